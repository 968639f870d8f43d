use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scan_orchestrator::target::detect_local_networks;
use scan_orchestrator::types::{ScanResults, ScanStatus};
use scan_orchestrator::{server, EngineConfig, ScanEngine};

const DEFAULT_LOG_FILTER: &str = "scan_orchestrator=info,tower_http=info";

/// scan-orchestrator: run nmap scans and turn their reports into classified findings.
#[derive(Debug, Parser)]
#[command(name = "scan-orchestrator", version, about, long_about = None)]
struct Cli {
    /// TOML engine configuration. Defaults to the built-in profiles.
    #[arg(long, global = true, env = "SCAN_ORCHESTRATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Scanner binary to run instead of the configured one.
    #[arg(long, global = true, env = "SCAN_ORCHESTRATOR_SCANNER")]
    scanner: Option<String>,

    /// Directory for raw reports and persisted results.
    #[arg(long = "output-dir", global = true, env = "SCAN_ORCHESTRATOR_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one scan to completion and print its findings.
    Scan {
        /// quick, standard or deep.
        #[arg(long = "type", default_value = "quick")]
        scan_type: String,

        /// IPv4 address, CIDR or hostname. If omitted, the first detected local /24 is scanned.
        #[arg(long)]
        target: Option<String>,

        /// Write results as pretty JSON to this path (optional).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Status poll interval in milliseconds.
        #[arg(long = "poll-ms", default_value_t = 500)]
        poll_ms: u64,
    },
    /// Serve the HTTP scan API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_target(false)
        .init();

    let mut config = match cli.config.as_deref() {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::builtin(),
    };
    if let Some(scanner) = cli.scanner {
        config.scanner_binary = scanner;
    }
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    config.validate()?;

    let engine = ScanEngine::new(config);
    match cli.command {
        Command::Scan {
            scan_type,
            target,
            output,
            poll_ms,
        } => {
            let target = match target {
                Some(t) => t,
                None => default_target()?,
            };
            let poll = Duration::from_millis(poll_ms);
            run_scan(&engine, &scan_type, &target, output.as_deref(), poll).await
        }
        Command::Serve { bind } => server::serve(&bind, engine).await,
    }
}

fn default_target() -> Result<String> {
    let nets = detect_local_networks().context("failed to detect local networks")?;
    match nets.first() {
        Some(net) => {
            println!("No target given, scanning local network {net}");
            Ok(net.to_string())
        }
        None => bail!("no local IPv4 network detected; pass --target"),
    }
}

async fn run_scan(
    engine: &ScanEngine,
    scan_type: &str,
    target: &str,
    output: Option<&Path>,
    poll: Duration,
) -> Result<()> {
    let id = engine.start_scan(scan_type, target).await?;
    println!("Scan {id} started ({scan_type} against {target})");

    let mut last = None;
    let view = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                engine.cancel_scan(&id).await;
                println!("\nCancelling scan {id}...");
            }
            _ = tokio::time::sleep(poll) => {}
        }
        let Some(view) = engine.get_scan_status(&id).await else {
            bail!("scan {id} disappeared from the registry");
        };
        let current = (view.progress, view.stage.clone());
        if last.as_ref() != Some(&current) {
            println!("[{:>3}%] {}", view.progress, view.stage);
            last = Some(current);
        }
        if view.status.is_terminal() {
            break view;
        }
    };

    match view.status {
        ScanStatus::Completed => {}
        ScanStatus::Cancelled => bail!("scan {id} was cancelled"),
        _ => bail!(
            "scan {id} failed: {}",
            view.error.as_deref().unwrap_or("unknown error")
        ),
    }

    let Some(results) = engine.get_scan_results(&id).await else {
        bail!("scan {id} completed without results");
    };
    print_results_table(&results);
    if let Some(path) = output {
        write_results_json(path, &results)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        println!("Wrote JSON results to {}", path.display());
    }
    Ok(())
}

fn print_results_table(results: &ScanResults) {
    let id_w = "id".len().max(5);
    let sev_w = "severity".len();
    let mut title_w = "title".len();
    let mut sys_w = "systems".len();
    for f in &results.findings {
        title_w = title_w.max(f.title.len().min(60));
        sys_w = sys_w.max(f.affected_systems.join(", ").len().min(40));
    }

    println!(
        "\nSystems scanned: {}  Issues: {}  Threat level: {:?}",
        results.systems_scanned, results.total_issues, results.threat_level
    );
    if results.findings.is_empty() {
        println!("No findings.");
        return;
    }
    println!(
        "{:<id_w$}  {:<sev_w$}  {:>5}  {:<title_w$}  {:<sys_w$}",
        "id", "severity", "cvss", "title", "systems"
    );
    println!(
        "{:-<id_w$}  {:-<sev_w$}  {:-<5}  {:-<title_w$}  {:-<sys_w$}",
        "", "", "", "", ""
    );
    for f in &results.findings {
        let mut title = f.title.clone();
        truncate_chars(&mut title, 60);
        let mut systems = f.affected_systems.join(", ");
        truncate_chars(&mut systems, 40);
        println!(
            "{:<id_w$}  {:<sev_w$}  {:>5.1}  {:<title_w$}  {:<sys_w$}",
            f.id,
            f.severity.as_str(),
            f.cvss_score,
            title,
            systems
        );
    }
}

fn truncate_chars(s: &mut String, max: usize) {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
}

fn write_results_json(path: &Path, results: &ScanResults) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}
