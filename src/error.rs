//! Errors a caller can get back synchronously from `start_scan`.
//!
//! Anything that goes wrong after a scan is running is recorded on the scan
//! itself (status `failed` plus an `error` text) and never surfaces here.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ScanId, ScanType};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid scan type '{0}' (expected one of: quick, standard, deep)")]
    InvalidScanType(String),

    #[error("invalid target '{0}' (expected an IPv4 address, IPv4 CIDR or hostname)")]
    InvalidTarget(String),

    #[error("scan capacity reached ({0} scans already running)")]
    AtCapacity(usize),

    #[error("cannot prepare scan output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn scanner '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("scan profile '{scan_type}' is unusable: {reason}")]
    Profile { scan_type: ScanType, reason: String },

    #[error("scan id {0} already registered")]
    DuplicateId(ScanId),

    #[error("scan engine has shut down")]
    EngineClosed,
}

/// Coarse error class a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments. Nothing was created; fix the input and retry.
    InvalidInput,
    /// The engine could not prepare or start the scan.
    LaunchFailure,
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::InvalidScanType(_) | ScanError::InvalidTarget(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::LaunchFailure,
        }
    }
}
