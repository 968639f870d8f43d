#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scan_orchestrator::types::{ScanId, ScanStatusView};
use scan_orchestrator::{EngineConfig, ScanEngine};
use tempfile::TempDir;

pub const LOOPBACK_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" version="7.94">
<host><status state="up"/><address addr="127.0.0.1" addrtype="ipv4"/>
<ports>
<port protocol="tcp" portid="22"><state state="open"/>
<service name="ssh" product="OpenSSH" version="9.6p1"/></port>
<port protocol="tcp" portid="23"><state state="open"/><service name="telnet"/></port>
</ports>
</host>
<runstats><finished exit="success"/></runstats>
</nmaprun>"#;

/// Shell preamble that leaves the `-oX` path in `$out`.
const ARGS_PREAMBLE: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-oX" ]; then out="$2"; shift; fi
  shift
done
"#;

pub fn completes_with(report: &str) -> String {
    format!(
        "echo 'Starting Nmap 7.94'\n\
         echo 'Stats: 0:00:01 elapsed; Timing: About 50.00% done'\n\
         cat > \"$out\" <<'REPORT'\n{report}\nREPORT\nexit 0\n"
    )
}

pub fn hangs() -> String {
    "echo 'Starting Nmap 7.94'\nexec sleep 30\n".to_string()
}

pub fn exits_with(code: i32, stderr: &str) -> String {
    format!("echo '{stderr}' >&2\nexit {code}\n")
}

pub struct Harness {
    pub engine: ScanEngine,
    pub dir: TempDir,
}

impl Harness {
    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("scans")
    }
}

pub fn write_scanner(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-nmap");
    std::fs::write(&path, format!("{ARGS_PREAMBLE}{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn test_config(dir: &Path, scanner: &Path) -> EngineConfig {
    let mut config = EngineConfig::builtin();
    config.scanner_binary = scanner.display().to_string();
    config.output_dir = dir.join("scans");
    config.tick_interval_ms = 10;
    config
}

/// Engine driven by a fake scanner script; `tweak` adjusts the config before start.
pub fn harness(body: &str, tweak: impl FnOnce(&mut EngineConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let scanner = write_scanner(dir.path(), body);
    let mut config = test_config(dir.path(), &scanner);
    tweak(&mut config);
    Harness {
        engine: ScanEngine::new(config),
        dir,
    }
}

/// Poll until the scan reaches a terminal state, collecting every view seen.
pub async fn wait_terminal(engine: &ScanEngine, id: &ScanId) -> Vec<ScanStatusView> {
    let mut seen = Vec::new();
    for _ in 0..500 {
        let view = engine.get_scan_status(id).await.expect("scan is registered");
        let done = view.status.is_terminal();
        seen.push(view);
        if done {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("scan {id} did not finish; last view: {:?}", seen.last());
}
