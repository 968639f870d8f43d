use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ScanError;

/// Opaque scan identifier, assigned once at launch.
pub type ScanId = Uuid;

/// Scan depth. Fixes both the tool argument profile and the stage table.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Quick,
    Standard,
    Deep,
}

impl ScanType {
    pub const ALL: [ScanType; 3] = [ScanType::Quick, ScanType::Standard, ScanType::Deep];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Quick => "quick",
            ScanType::Standard => "standard",
            ScanType::Deep => "deep",
        }
    }

    /// OS fingerprints and TLS advisories are only reported beyond a quick scan.
    pub fn detects_services(&self) -> bool {
        !matches!(self, ScanType::Quick)
    }

    /// Only deep scans run vulnerability scripts.
    pub fn runs_scripts(&self) -> bool {
        matches!(self, ScanType::Deep)
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = ScanError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ScanType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ScanError::InvalidScanType(s.to_string()))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanStatus::Running)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Finding severity, ordered from least to most severe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One tier up for outdated software. High and critical stay where they are.
    pub fn bump(self) -> Severity {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate severity of a whole scan; `None` only when nothing was found.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl From<Severity> for ThreatLevel {
    fn from(s: Severity) -> Self {
        match s {
            Severity::Low => ThreatLevel::Low,
            Severity::Medium => ThreatLevel::Medium,
            Severity::High => ThreatLevel::High,
            Severity::Critical => ThreatLevel::Critical,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reference {
    pub title: String,
    pub url: String,
}

/// One normalized observation from a completed scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub description: String,
    pub remediation: String,
    pub affected_systems: Vec<String>,
    pub cvss_score: f32,
    #[serde(default)]
    pub references: Vec<Reference>,
}

/// Summary plus findings. Built once when a scan completes and never changed afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanResults {
    pub scan_id: ScanId,
    pub systems_scanned: u32,
    pub total_issues: u32,
    pub threat_level: ThreatLevel,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub findings: Vec<Finding>,
}

/// Registry entry for one scan attempt.
#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub id: ScanId,
    pub scan_type: ScanType,
    pub target: String,
    pub target_descriptor: String,
    pub status: ScanStatus,
    pub progress: u8,
    pub stage: String,
    pub started_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub results: Option<Arc<ScanResults>>,
}

impl ScanRecord {
    pub fn new(id: ScanId, scan_type: ScanType, target: String, target_descriptor: String) -> Self {
        Self {
            id,
            scan_type,
            target,
            target_descriptor,
            status: ScanStatus::Running,
            progress: 0,
            stage: "Initializing".to_string(),
            started_at: OffsetDateTime::now_utc(),
            completed_at: None,
            error: None,
            results: None,
        }
    }

    /// Point in time the retention window is measured from.
    pub fn retention_anchor(&self) -> OffsetDateTime {
        self.completed_at.unwrap_or(self.started_at)
    }
}

/// What a poller sees of a scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatusView {
    pub id: ScanId,
    pub status: ScanStatus,
    pub progress: u8,
    pub stage: String,
    pub scan_type: ScanType,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub completed_at: Option<OffsetDateTime>,
    pub target_descriptor: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl From<&ScanRecord> for ScanStatusView {
    fn from(r: &ScanRecord) -> Self {
        Self {
            id: r.id,
            status: r.status,
            progress: r.progress,
            stage: r.stage.clone(),
            scan_type: r.scan_type,
            started_at: r.started_at,
            completed_at: r.completed_at,
            target_descriptor: r.target_descriptor.clone(),
            error: r.error.clone(),
        }
    }
}
