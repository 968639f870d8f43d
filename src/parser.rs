//! Turns a finished scanner report into `ScanResults`.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use time::OffsetDateTime;

use crate::classifier;
use crate::nmap_xml::{self, NmapRun};
use crate::types::{Finding, ScanId, ScanResults, ScanType};

/// Build the results summary for one report.
///
/// Per open port: at most one baseline service finding, then (deep scans)
/// one finding per vulnerability script that did not clear the target.
/// Per host: an end-of-life OS finding (standard and deep) and host-level
/// script findings (deep). One TLS advisory closes the list when any TLS
/// endpoint was seen (standard and deep). Hosts reported down are skipped.
pub fn build_results(
    scan_id: ScanId,
    scan_type: ScanType,
    run: &NmapRun,
    timestamp: OffsetDateTime,
) -> ScanResults {
    let mut findings: Vec<Finding> = Vec::new();
    let mut systems = BTreeSet::new();
    let mut tls_endpoints = Vec::new();

    for (idx, host) in run.hosts.iter().enumerate() {
        if !host.is_up() {
            continue;
        }
        let label = host.label().unwrap_or_else(|| format!("host-{}", idx + 1));
        systems.insert(label.clone());

        for port in host.open_ports() {
            let endpoint = format!("{label}:{}", port.portid);
            if let Some(service) = &port.service {
                findings.extend(classifier::classify_service(service, &endpoint));
                if scan_type.detects_services() && classifier::is_tls_service(service) {
                    tls_endpoints.push(endpoint.clone());
                }
            }
            if scan_type.runs_scripts() {
                findings.extend(
                    port.scripts
                        .iter()
                        .filter(|s| classifier::is_vulnerability_script(s))
                        .filter_map(|s| classifier::classify_script(s, &endpoint)),
                );
            }
        }

        if scan_type.detects_services() {
            // Later OS matches are alternatives for the same host.
            if let Some(f) = host
                .os
                .iter()
                .flat_map(|os| os.matches.iter())
                .find_map(|m| classifier::classify_os(&m.name, &label))
            {
                findings.push(f);
            }
        }

        if scan_type.runs_scripts() {
            findings.extend(
                host.host_scripts()
                    .iter()
                    .filter(|s| classifier::is_vulnerability_script(s))
                    .filter_map(|s| classifier::classify_script(s, &label)),
            );
        }
    }

    findings.extend(classifier::tls_advisory(&tls_endpoints));

    for (n, f) in findings.iter_mut().enumerate() {
        f.id = format!("F-{:03}", n + 1);
    }

    ScanResults {
        scan_id,
        systems_scanned: systems.len() as u32,
        total_issues: findings.len() as u32,
        threat_level: classifier::threat_level(&findings),
        timestamp,
        findings,
    }
}

/// Read and parse the report file, then build results. Any failure means no results at all.
pub async fn results_from_report(
    path: &Path,
    scan_id: ScanId,
    scan_type: ScanType,
) -> Result<ScanResults> {
    let xml = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read scanner report: {}", path.display()))?;
    let run = nmap_xml::parse_report(&xml)?;
    Ok(build_results(scan_id, scan_type, &run, OffsetDateTime::now_utc()))
}
