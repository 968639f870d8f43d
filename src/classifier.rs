//! Deterministic mapping from what the scanner saw to normalized findings.
//!
//! Nothing here does I/O. Severity comes from static tables; the CVSS number
//! attached to a finding is a fixed per-tier placeholder, not a computed score.

use std::sync::OnceLock;

use regex::Regex;

use crate::nmap_xml::{Script, Service};
use crate::types::{Finding, Reference, Severity, ThreatLevel};

/// Baseline text and severity for a common service.
struct ServiceTemplate {
    services: &'static [&'static str],
    title: &'static str,
    severity: Severity,
    description: &'static str,
    remediation: &'static str,
}

const SERVICE_TEMPLATES: &[ServiceTemplate] = &[
    ServiceTemplate {
        services: &["ssh"],
        title: "SSH service exposed",
        severity: Severity::Low,
        description: "An SSH server accepts connections on this port.",
        remediation: "Restrict SSH to trusted networks, disable password authentication and keep \
                      the server patched.",
    },
    ServiceTemplate {
        services: &["http", "http-alt", "http-proxy"],
        title: "HTTP service exposed",
        severity: Severity::Low,
        description: "A web server is reachable over plain HTTP.",
        remediation: "Serve content over HTTPS and redirect plain HTTP requests.",
    },
    ServiceTemplate {
        services: &["https", "ssl/http", "https-alt"],
        title: "HTTPS service exposed",
        severity: Severity::Low,
        description: "A web server is reachable over HTTPS.",
        remediation: "Keep the web server and its TLS configuration up to date.",
    },
    ServiceTemplate {
        services: &["ftp"],
        title: "FTP service exposed",
        severity: Severity::Medium,
        description: "FTP transfers data and credentials in cleartext.",
        remediation: "Replace FTP with SFTP or FTPS, or restrict it to trusted networks.",
    },
    ServiceTemplate {
        services: &["telnet"],
        title: "Telnet service exposed",
        severity: Severity::High,
        description: "Telnet sends credentials and session data in cleartext.",
        remediation: "Disable Telnet and use SSH for remote administration.",
    },
    ServiceTemplate {
        services: &["smtp", "submission"],
        title: "Mail transfer service exposed",
        severity: Severity::Low,
        description: "An SMTP server accepts connections on this port.",
        remediation: "Require STARTTLS, disable open relaying and keep the mail server patched.",
    },
    ServiceTemplate {
        services: &["pop3", "imap"],
        title: "Cleartext mailbox access",
        severity: Severity::Medium,
        description: "Mailbox protocol offered without transport encryption.",
        remediation: "Offer only the TLS variants (POP3S/IMAPS) or enforce STARTTLS.",
    },
    ServiceTemplate {
        services: &["domain"],
        title: "DNS service exposed",
        severity: Severity::Low,
        description: "A DNS server answers on this port.",
        remediation: "Disable recursion for untrusted clients and restrict zone transfers.",
    },
    ServiceTemplate {
        services: &["microsoft-ds", "netbios-ssn"],
        title: "SMB file sharing exposed",
        severity: Severity::Medium,
        description: "Windows file sharing is reachable on this port.",
        remediation: "Block SMB at the network edge and disable SMBv1.",
    },
    ServiceTemplate {
        services: &["ms-wbt-server"],
        title: "Remote Desktop exposed",
        severity: Severity::Medium,
        description: "A Remote Desktop service accepts connections.",
        remediation: "Put RDP behind a VPN or gateway and require Network Level Authentication.",
    },
    ServiceTemplate {
        services: &["vnc"],
        title: "VNC service exposed",
        severity: Severity::Medium,
        description: "A VNC remote desktop server accepts connections.",
        remediation: "Tunnel VNC through SSH or a VPN and set a strong password.",
    },
    ServiceTemplate {
        services: &["mysql", "postgresql", "ms-sql-s", "oracle-tns"],
        title: "Database service exposed",
        severity: Severity::Medium,
        description: "A database server is reachable from the scanned network.",
        remediation: "Bind the database to internal interfaces and firewall the port.",
    },
    ServiceTemplate {
        services: &["redis", "mongodb", "memcached", "elasticsearch"],
        title: "Unauthenticated data store exposed",
        severity: Severity::High,
        description: "A data store that often ships without authentication is reachable.",
        remediation: "Enable authentication and restrict the service to internal hosts.",
    },
    ServiceTemplate {
        services: &["snmp"],
        title: "SNMP service exposed",
        severity: Severity::Medium,
        description: "SNMP may disclose device configuration through default communities.",
        remediation: "Use SNMPv3 with authentication, or disable SNMP.",
    },
];

/// `product version` prefixes considered outdated, per service.
const OUTDATED_VERSIONS: &[(&str, &[&str])] = &[
    (
        "ssh",
        &[
            "OpenSSH 4.",
            "OpenSSH 5.",
            "OpenSSH 6.",
            "OpenSSH 7.0",
            "OpenSSH 7.1",
            "OpenSSH 7.2",
            "OpenSSH 7.3",
        ],
    ),
    (
        "http",
        &[
            "Apache httpd 1.",
            "Apache httpd 2.0.",
            "Apache httpd 2.2.",
            "nginx 0.",
            "nginx 1.0.",
            "nginx 1.1",
            "Microsoft IIS httpd 6.",
            "Microsoft IIS httpd 7.",
        ],
    ),
    ("https", &["Apache httpd 2.2.", "nginx 1.0.", "nginx 1.1", "Microsoft IIS httpd 6."]),
    ("ftp", &["vsftpd 2.", "ProFTPD 1.2", "ProFTPD 1.3.0", "ProFTPD 1.3.3"]),
    ("smtp", &["Sendmail 8.1", "Exim smtpd 4.8", "Postfix smtpd 2."]),
    ("mysql", &["MySQL 4.", "MySQL 5.0", "MySQL 5.1", "MySQL 5.5"]),
    ("postgresql", &["PostgreSQL DB 8.", "PostgreSQL DB 9."]),
    ("microsoft-ds", &["Samba smbd 3."]),
];

/// Operating systems past vendor end of life.
const END_OF_LIFE_OS: &[&str] = &[
    "Windows 2000",
    "Windows XP",
    "Windows Vista",
    "Windows 7",
    "Windows 8",
    "Windows Server 2003",
    "Windows Server 2008",
    "CentOS 5",
    "CentOS 6",
    "Ubuntu 14.04",
    "Ubuntu 16.04",
    "Linux 2.4",
    "Linux 2.6",
];

/// Services whose traffic is wrapped in TLS.
const TLS_SERVICES: &[&str] =
    &["https", "ssl", "imaps", "pop3s", "smtps", "ldaps", "ftps", "https-alt"];

/// Placeholder CVSS value for a severity tier; `None` is an unclassified result.
pub fn cvss_score(severity: Option<Severity>) -> f32 {
    match severity {
        Some(Severity::Critical) => 9.5,
        Some(Severity::High) => 7.5,
        Some(Severity::Medium) => 5.0,
        Some(Severity::Low) => 3.0,
        None => 2.0,
    }
}

/// CVSS v3 qualitative bands.
pub fn severity_from_cvss(score: f32) -> Severity {
    if score >= 9.0 {
        Severity::Critical
    } else if score >= 7.0 {
        Severity::High
    } else if score >= 4.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Highest severity present, `None` for an empty list.
pub fn threat_level(findings: &[Finding]) -> ThreatLevel {
    findings
        .iter()
        .map(|f| ThreatLevel::from(f.severity))
        .max()
        .unwrap_or(ThreatLevel::None)
}

/// True when the service's `product version` matches an outdated prefix.
pub fn is_outdated(service: &Service) -> bool {
    let Some(pv) = service.product_version() else {
        return false;
    };
    let pv = pv.to_ascii_lowercase();
    OUTDATED_VERSIONS
        .iter()
        .filter(|(name, _)| {
            service.name.eq_ignore_ascii_case(name)
                || (*name == "https" && service.tunnel.as_deref() == Some("ssl"))
        })
        .flat_map(|(_, prefixes)| prefixes.iter())
        .any(|prefix| pv.starts_with(&prefix.to_ascii_lowercase()))
}

/// Baseline finding for an open port, or `None` when the service has no template.
///
/// Findings are returned with an empty `id`; the caller numbers them.
pub fn classify_service(service: &Service, system: &str) -> Option<Finding> {
    let mut name = service.name.to_ascii_lowercase();
    if name == "http" && service.tunnel.as_deref() == Some("ssl") {
        name = "https".to_string();
    }
    let template = SERVICE_TEMPLATES.iter().find(|t| t.services.contains(&name.as_str()))?;

    let mut severity = template.severity;
    let mut description = template.description.to_string();
    if let Some(pv) = service.product_version() {
        description.push_str(&format!(" Identified as {pv}."));
    }
    if is_outdated(service) {
        severity = severity.bump();
        description.push_str(" This version is outdated and no longer receives security fixes.");
    }

    Some(Finding {
        id: String::new(),
        title: template.title.to_string(),
        severity,
        description,
        remediation: template.remediation.to_string(),
        affected_systems: vec![system.to_string()],
        cvss_score: cvss_score(Some(severity)),
        references: Vec::new(),
    })
}

/// High-severity finding when the fingerprinted OS is past end of life.
pub fn classify_os(os_name: &str, host: &str) -> Option<Finding> {
    let lower = os_name.to_ascii_lowercase();
    let eol = END_OF_LIFE_OS.iter().find(|eol| lower.contains(&eol.to_ascii_lowercase()))?;
    Some(Finding {
        id: String::new(),
        title: format!("End-of-life operating system: {eol}"),
        severity: Severity::High,
        description: format!(
            "The host appears to run {os_name}, which no longer receives security updates."
        ),
        remediation: "Upgrade to a supported operating system release or isolate the host."
            .to_string(),
        affected_systems: vec![host.to_string()],
        cvss_score: cvss_score(Some(Severity::High)),
        references: Vec::new(),
    })
}

/// Whether a script result comes from a vulnerability check.
///
/// Either the id names one (`vulners`, `smb-vuln-*`, ...) or the script
/// reports a `VULNERABLE` / `LIKELY VULNERABLE` state, which covers the rest
/// of the `vuln` category (`ssl-heartbleed`, `ftp-vsftpd-backdoor`, ...).
pub fn is_vulnerability_script(script: &Script) -> bool {
    script.id.to_ascii_lowercase().contains("vuln")
        || script.keyed_elems().iter().any(|(k, v)| {
            let state = v.to_ascii_uppercase();
            k.eq_ignore_ascii_case("state")
                && (state.starts_with("VULNERABLE") || state.starts_with("LIKELY VULNERABLE"))
        })
}

/// Severity from free text: the first of "critical", "high", "medium" found wins, else low.
///
/// Substring matching on prose both over- and under-reports ("highlight"
/// reads as high, an unlabeled RCE reads as low). Only used when the script
/// gives no structured verdict.
pub fn severity_from_text(text: &str) -> Severity {
    let lower = text.to_ascii_lowercase();
    if lower.contains("critical") {
        Severity::Critical
    } else if lower.contains("high") {
        Severity::High
    } else if lower.contains("medium") {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Structured verdict of a script, when it reports one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptVerdict {
    NotVulnerable,
    Scored(f32),
    Unstructured,
}

pub fn script_verdict(script: &Script) -> ScriptVerdict {
    let elems = script.keyed_elems();
    let states: Vec<String> = elems
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("state"))
        .map(|(_, v)| v.to_ascii_uppercase())
        .collect();
    let max_cvss = elems
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("cvss"))
        .filter_map(|(_, v)| v.parse::<f32>().ok())
        .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))));

    if let Some(score) = max_cvss {
        return ScriptVerdict::Scored(score);
    }
    if !states.is_empty() && states.iter().all(|s| s.starts_with("NOT VULNERABLE")) {
        return ScriptVerdict::NotVulnerable;
    }
    ScriptVerdict::Unstructured
}

fn cve_regex() -> &'static Regex {
    static CVE: OnceLock<Regex> = OnceLock::new();
    CVE.get_or_init(|| Regex::new(r"CVE-\d{4}-\d{4,7}").expect("valid CVE pattern"))
}

/// NVD links for every distinct CVE id mentioned in `text`, in order of appearance.
pub fn cve_references(text: &str) -> Vec<Reference> {
    let mut refs: Vec<Reference> = Vec::new();
    for m in cve_regex().find_iter(text) {
        let id = m.as_str();
        if refs.iter().any(|r| r.title == id) {
            continue;
        }
        refs.push(Reference {
            title: id.to_string(),
            url: format!("https://nvd.nist.gov/vuln/detail/{id}"),
        });
    }
    refs
}

/// Finding for a vulnerability script result, or `None` if the script cleared the target.
pub fn classify_script(script: &Script, system: &str) -> Option<Finding> {
    let severity = match script_verdict(script) {
        ScriptVerdict::NotVulnerable => return None,
        ScriptVerdict::Scored(score) => severity_from_cvss(score),
        ScriptVerdict::Unstructured => severity_from_text(&script.output),
    };
    let mut references = cve_references(&script.output);
    for (key, _) in script.keyed_elems() {
        for r in cve_references(key) {
            if !references.contains(&r) {
                references.push(r);
            }
        }
    }
    let summary = script.output.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");

    Some(Finding {
        id: String::new(),
        title: format!("Vulnerability check {} reported an issue", script.id),
        severity,
        description: if summary.is_empty() {
            format!("The {} script flagged {system}.", script.id)
        } else {
            format!("The {} script flagged {system}: {summary}", script.id)
        },
        remediation: "Review the script output, apply the vendor patches for the referenced \
                      issues and re-scan."
            .to_string(),
        affected_systems: vec![system.to_string()],
        cvss_score: cvss_score(Some(severity)),
        references,
    })
}

pub fn is_tls_service(service: &Service) -> bool {
    service.tunnel.as_deref() == Some("ssl")
        || TLS_SERVICES.contains(&service.name.to_ascii_lowercase().as_str())
}

/// One advisory covering every TLS endpoint seen in the scan.
pub fn tls_advisory(endpoints: &[String]) -> Option<Finding> {
    if endpoints.is_empty() {
        return None;
    }
    Some(Finding {
        id: String::new(),
        title: "TLS endpoints detected: configuration audit recommended".to_string(),
        severity: Severity::Low,
        description: format!(
            "{} TLS-enabled service(s) were found. Port scanning does not assess protocol \
             versions, cipher suites or certificates.",
            endpoints.len()
        ),
        remediation: "Run a dedicated TLS audit against these endpoints and disable legacy \
                      protocols and weak ciphers."
            .to_string(),
        affected_systems: endpoints.to_vec(),
        cvss_score: cvss_score(Some(Severity::Low)),
        references: vec![Reference {
            title: "Mozilla Server Side TLS guidelines".to_string(),
            url: "https://wiki.mozilla.org/Security/Server_Side_TLS".to_string(),
        }],
    })
}
