use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use time::OffsetDateTime;

use crate::error::ScanError;
use crate::types::{ScanId, ScanResults};

/// Per-scan files under one output directory:
/// `<id>.xml` is the scanner's raw report, `<id>.json` the persisted `ScanResults`.
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<(), ScanError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ScanError::OutputDir {
                path: self.dir.clone(),
                source,
            })
    }

    pub fn report_path(&self, id: &ScanId) -> PathBuf {
        self.dir.join(format!("{id}.xml"))
    }

    pub fn results_path(&self, id: &ScanId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub async fn save_results(&self, results: &ScanResults) -> Result<()> {
        let path = self.results_path(&results.scan_id);
        let json = serde_json::to_vec_pretty(results)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("failed to write results: {}", path.display()))
    }

    /// Persisted results, or `None` if none were ever written.
    pub async fn load_results(&self, id: &ScanId) -> Result<Option<ScanResults>> {
        let path = self.results_path(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let results = serde_json::from_slice(&bytes)
                    .with_context(|| format!("corrupt results file: {}", path.display()))?;
                Ok(Some(results))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read results: {}", path.display())),
        }
    }

    /// Delete both artifacts of a scan. Missing files are fine.
    pub async fn remove(&self, id: &ScanId) -> Result<()> {
        for path in [self.report_path(id), self.results_path(id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to remove {}", path.display()))
                }
            }
        }
        Ok(())
    }

    /// Remove artifacts of scans the registry no longer knows about, once they are older
    /// than `cutoff`.
    pub async fn sweep_orphans(
        &self,
        live: &HashSet<ScanId>,
        cutoff: OffsetDateTime,
    ) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", self.dir.display()))
            }
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let ext_ok = matches!(path.extension().and_then(|e| e.to_str()), Some("xml" | "json"));
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<ScanId>().ok())
            else {
                continue;
            };
            if !ext_ok || live.contains(&id) {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if OffsetDateTime::from(modified) < cutoff {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ThreatLevel;
    use uuid::Uuid;

    fn results(id: ScanId) -> ScanResults {
        ScanResults {
            scan_id: id,
            systems_scanned: 1,
            total_issues: 0,
            threat_level: ThreatLevel::None,
            timestamp: OffsetDateTime::now_utc(),
            findings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path().join("scans"));
        store.ensure_dir().await.unwrap();

        let id = Uuid::new_v4();
        assert!(store.load_results(&id).await.unwrap().is_none());

        let r = results(id);
        store.save_results(&r).await.unwrap();
        assert_eq!(store.load_results(&id).await.unwrap(), Some(r));

        store.remove(&id).await.unwrap();
        store.remove(&id).await.unwrap();
        assert!(store.load_results(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn orphans_are_swept_but_live_scans_and_foreign_files_stay() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        let live = Uuid::new_v4();
        let orphan = Uuid::new_v4();
        store.save_results(&results(live)).await.unwrap();
        store.save_results(&results(orphan)).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let future = OffsetDateTime::now_utc() + time::Duration::minutes(1);
        let removed = store.sweep_orphans(&HashSet::from([live]), future).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.results_path(&live).exists());
        assert!(!store.results_path(&orphan).exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
