//! Scan state machine and the single task that owns every registry write.
//!
//! `running` is the only non-terminal state. `Completed`, `Failed` and
//! `Cancelled` are final: a transition out of any of them is refused and
//! reported as `false`, never as an error.
//!
//! Supervisors and the engine facade talk to the controller through one
//! bounded channel, so events for a scan are applied in the order they were
//! sent and no two writers ever touch the same record concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ScanError;
use crate::progress::{ProgressUpdate, MAX_RUNNING_PROGRESS};
use crate::registry::ScanRegistry;
use crate::store::ReportStore;
use crate::types::{ScanId, ScanRecord, ScanResults, ScanStatus};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
pub(crate) enum ScanEvent {
    Register {
        record: ScanRecord,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<(), ScanError>>,
    },
    Progress {
        id: ScanId,
        update: ProgressUpdate,
    },
    Finished {
        id: ScanId,
        outcome: Result<ScanResults, String>,
    },
    Cancel {
        id: ScanId,
        reply: oneshot::Sender<bool>,
    },
    Evict {
        id: ScanId,
        reply: oneshot::Sender<bool>,
    },
    Cleanup {
        max_age: time::Duration,
        reply: oneshot::Sender<CleanupReport>,
    },
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Records removed from the registry.
    pub removed: usize,
    /// Of those, scans that were still running and had to be stopped.
    pub stopped: usize,
    /// Artifact files removed for scans no longer in the registry.
    pub orphan_files: usize,
}

impl ScanRecord {
    pub(crate) fn advance(&mut self, update: &ProgressUpdate) -> bool {
        if self.status != ScanStatus::Running || update.progress < self.progress {
            return false;
        }
        self.progress = update.progress.min(MAX_RUNNING_PROGRESS);
        self.stage = update.stage.clone();
        true
    }

    pub(crate) fn complete(&mut self, results: Arc<ScanResults>, now: OffsetDateTime) -> bool {
        if self.status != ScanStatus::Running {
            return false;
        }
        self.status = ScanStatus::Completed;
        self.progress = 100;
        self.stage = "Completed".to_string();
        self.completed_at = Some(now);
        self.results = Some(results);
        true
    }

    pub(crate) fn fail(&mut self, error: String, now: OffsetDateTime) -> bool {
        if self.status != ScanStatus::Running {
            return false;
        }
        self.status = ScanStatus::Failed;
        self.stage = "Scan failed".to_string();
        self.completed_at = Some(now);
        self.error = Some(error);
        true
    }

    pub(crate) fn cancel(&mut self, now: OffsetDateTime) -> bool {
        if self.status != ScanStatus::Running {
            return false;
        }
        self.status = ScanStatus::Cancelled;
        self.stage = "Scan cancelled".to_string();
        self.completed_at = Some(now);
        true
    }
}

pub(crate) struct LifecycleController {
    registry: Arc<ScanRegistry>,
    store: ReportStore,
    supervisors: HashMap<ScanId, CancellationToken>,
}

impl LifecycleController {
    /// Start the controller task and return the sender every producer uses.
    pub(crate) fn spawn(
        registry: Arc<ScanRegistry>,
        store: ReportStore,
    ) -> mpsc::Sender<ScanEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let controller = LifecycleController {
            registry,
            store,
            supervisors: HashMap::new(),
        };
        tokio::spawn(controller.run(rx));
        tx
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ScanEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        // Every handle is gone; stop whatever is still running.
        for token in self.supervisors.values() {
            token.cancel();
        }
        tracing::debug!("lifecycle controller stopped");
    }

    async fn handle(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Register { record, cancel, reply } => {
                let id = record.id;
                let res = self.registry.create(record).await;
                if res.is_ok() {
                    self.supervisors.insert(id, cancel);
                }
                let _ = reply.send(res);
            }
            ScanEvent::Progress { id, update } => {
                let applied = self.registry.update(&id, |r| r.advance(&update)).await;
                if applied == Some(true) {
                    tracing::debug!(
                        scan_id = %id,
                        progress = update.progress,
                        stage = %update.stage,
                        "progress"
                    );
                }
            }
            ScanEvent::Finished { id, outcome } => {
                self.supervisors.remove(&id);
                self.finish(id, outcome).await;
            }
            ScanEvent::Cancel { id, reply } => {
                let now = OffsetDateTime::now_utc();
                let cancelled = self.registry.update(&id, |r| r.cancel(now)).await.unwrap_or(false);
                if cancelled {
                    if let Some(token) = self.supervisors.remove(&id) {
                        token.cancel();
                    }
                    tracing::info!(scan_id = %id, "scan cancelled");
                }
                let _ = reply.send(cancelled);
            }
            ScanEvent::Evict { id, reply } => {
                let terminal = self
                    .registry
                    .get(&id)
                    .await
                    .is_some_and(|r| r.status.is_terminal());
                if terminal {
                    self.registry.delete(&id).await;
                    tracing::debug!(scan_id = %id, "scan evicted from memory");
                }
                let _ = reply.send(terminal);
            }
            ScanEvent::Cleanup { max_age, reply } => {
                let report = self.cleanup(max_age).await;
                let _ = reply.send(report);
            }
        }
    }

    async fn finish(&mut self, id: ScanId, outcome: Result<ScanResults, String>) {
        let now = OffsetDateTime::now_utc();
        match outcome {
            Ok(results) => {
                let results = Arc::new(results);
                let shared = results.clone();
                let done = self
                    .registry
                    .update(&id, |r| r.complete(shared, now))
                    .await
                    .unwrap_or(false);
                if !done {
                    tracing::debug!(
                        scan_id = %id,
                        "ignoring completion of a scan that is no longer running"
                    );
                    return;
                }
                tracing::info!(
                    scan_id = %id,
                    findings = results.total_issues,
                    threat_level = ?results.threat_level,
                    "scan completed"
                );
                if let Err(e) = self.store.save_results(&results).await {
                    tracing::warn!(scan_id = %id, "failed to persist results: {e:#}");
                }
            }
            Err(error) => {
                let message = error.clone();
                let failed = self
                    .registry
                    .update(&id, |r| r.fail(message, now))
                    .await
                    .unwrap_or(false);
                if failed {
                    tracing::warn!(scan_id = %id, %error, "scan failed");
                } else {
                    tracing::debug!(
                        scan_id = %id,
                        "ignoring failure of a scan that is no longer running"
                    );
                }
            }
        }
    }

    async fn cleanup(&mut self, max_age: time::Duration) -> CleanupReport {
        let cutoff = OffsetDateTime::now_utc()
            .checked_sub(max_age)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let mut report = CleanupReport::default();

        for record in self.registry.snapshot().await {
            if record.retention_anchor() >= cutoff {
                continue;
            }
            if let Some(token) = self.supervisors.remove(&record.id) {
                token.cancel();
                report.stopped += 1;
            }
            if let Err(e) = self.store.remove(&record.id).await {
                tracing::warn!(scan_id = %record.id, "failed to remove artifacts: {e:#}");
            }
            self.registry.delete(&record.id).await;
            report.removed += 1;
        }

        let live: HashSet<ScanId> = self.registry.snapshot().await.iter().map(|r| r.id).collect();
        match self.store.sweep_orphans(&live, cutoff).await {
            Ok(n) => report.orphan_files = n,
            Err(e) => tracing::warn!("orphan artifact sweep failed: {e:#}"),
        }

        if report != CleanupReport::default() {
            tracing::info!(
                removed = report.removed,
                stopped = report.stopped,
                orphan_files = report.orphan_files,
                "retention sweep"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScanType, ThreatLevel};
    use uuid::Uuid;

    fn record() -> ScanRecord {
        ScanRecord::new(Uuid::new_v4(), ScanType::Deep, "10.0.0.5".into(), "10.0.0.5 (host)".into())
    }

    fn results(id: ScanId) -> Arc<ScanResults> {
        Arc::new(ScanResults {
            scan_id: id,
            systems_scanned: 1,
            total_issues: 0,
            threat_level: ThreatLevel::None,
            timestamp: OffsetDateTime::now_utc(),
            findings: Vec::new(),
        })
    }

    fn update(progress: u8, stage: &str) -> ProgressUpdate {
        ProgressUpdate { progress, stage: stage.into() }
    }

    #[test]
    fn progress_never_regresses() {
        let mut r = record();
        assert!(r.advance(&update(40, "Port discovery")));
        assert!(!r.advance(&update(30, "Initializing")));
        assert_eq!((r.progress, r.stage.as_str()), (40, "Port discovery"));
    }

    #[test]
    fn completion_sets_results_once() {
        let mut r = record();
        let now = OffsetDateTime::now_utc();
        assert!(r.complete(results(r.id), now));
        assert_eq!(
            (r.status, r.progress, r.stage.as_str()),
            (ScanStatus::Completed, 100, "Completed")
        );
        let first = r.results.clone().unwrap();
        assert!(!r.complete(results(r.id), now), "double completion is refused");
        assert!(Arc::ptr_eq(&first, r.results.as_ref().unwrap()));
    }

    #[test]
    fn terminal_states_are_final() {
        let now = OffsetDateTime::now_utc();

        let mut cancelled = record();
        assert!(cancelled.cancel(now));
        assert_eq!(cancelled.stage, "Scan cancelled");
        assert!(!cancelled.cancel(now));
        assert!(!cancelled.complete(results(cancelled.id), now));
        assert!(!cancelled.fail("late".into(), now));
        assert!(!cancelled.advance(&update(99, "Reporting")));
        assert!(cancelled.results.is_none());

        let mut failed = record();
        assert!(failed.fail("exit status: 1".into(), now));
        assert_eq!(failed.error.as_deref(), Some("exit status: 1"));
        assert!(failed.results.is_none());
        assert!(!failed.cancel(now));
        assert_eq!(failed.status, ScanStatus::Failed);
    }
}
