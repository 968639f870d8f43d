//! Library crate for scan-orchestrator: runs nmap scans as supervised
//! subprocesses and turns their XML reports into classified findings.
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod nmap_xml;
pub mod parser;
pub mod ports;
pub mod progress;
pub mod registry;
pub mod server;
pub mod store;
pub mod target;
pub mod types;

pub use config::EngineConfig;
pub use engine::ScanEngine;
pub use error::{ErrorKind, ScanError};
pub use lifecycle::CleanupReport;
