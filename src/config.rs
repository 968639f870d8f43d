//! Engine configuration and per-scan-type profiles.
//!
//! Profiles are declarative: the tool argument list, optional port set,
//! deadline and the weighted stage table used for progress reporting all
//! live in TOML rather than in code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;

use crate::ports;
use crate::types::ScanType;

const BUILTIN: &str = include_str!("../config/default.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Advance through the stage table on a fixed timer.
    #[default]
    Simulated,
    /// Follow stage markers and percentage lines in the scanner's output.
    Live,
}

/// What to do with a target that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetPolicy {
    #[default]
    Reject,
    /// Scan 127.0.0.1 instead. Kept for compatibility with older callers.
    Loopback,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub weight: u32,
    /// Output substrings that mark the start of this stage (live mode).
    #[serde(default)]
    pub markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanProfile {
    pub args: Vec<String>,
    #[serde(default)]
    pub ports: Option<String>,
    pub timeout_secs: u64,
    pub stages: Vec<StageSpec>,
}

impl ScanProfile {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Port set in `-p` syntax, if the profile narrows it.
    pub fn port_arg(&self) -> Result<Option<String>> {
        match self.ports.as_deref() {
            None => Ok(None),
            Some(list) => {
                let parsed = ports::parse_port_list(list)?;
                ensure!(!parsed.is_empty(), "port list is empty");
                Ok(Some(ports::to_port_arg(&parsed)))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profiles {
    pub quick: ScanProfile,
    pub standard: ScanProfile,
    pub deep: ScanProfile,
}

impl Profiles {
    pub fn get(&self, scan_type: ScanType) -> &ScanProfile {
        match scan_type {
            ScanType::Quick => &self.quick,
            ScanType::Standard => &self.standard,
            ScanType::Deep => &self.deep,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_scanner_binary")]
    pub scanner_binary: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_scans: usize,
    #[serde(default)]
    pub progress_mode: ProgressMode,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub invalid_target: TargetPolicy,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    pub profiles: Profiles,
}

fn default_scanner_binary() -> String {
    "nmap".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("scans")
}

fn default_max_concurrent() -> usize {
    8
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_retention_hours() -> u64 {
    24
}

impl EngineConfig {
    /// The configuration shipped with the crate.
    pub fn builtin() -> Self {
        Self::from_toml_str(BUILTIN).expect("built-in configuration is valid")
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(s).context("failed to parse engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.scanner_binary.trim().is_empty(), "scanner_binary must not be empty");
        ensure!(self.max_concurrent_scans > 0, "max_concurrent_scans must be at least 1");
        ensure!(self.tick_interval_ms > 0, "tick_interval_ms must be positive");

        for scan_type in ScanType::ALL {
            let profile = self.profiles.get(scan_type);
            let ctx = || format!("profile '{scan_type}'");
            if profile.stages.is_empty() {
                bail!("{}: stage table is empty", ctx());
            }
            if let Some(stage) = profile.stages.iter().find(|s| s.weight == 0) {
                bail!("{}: stage '{}' has zero weight", ctx(), stage.name);
            }
            ensure!(profile.timeout_secs > 0, "{}: timeout_secs must be positive", ctx());
            profile.port_arg().with_context(ctx)?;
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builtin()
    }
}
