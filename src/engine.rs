use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{EngineConfig, TargetPolicy};
use crate::error::ScanError;
use crate::launcher::{self, Supervisor};
use crate::lifecycle::{CleanupReport, LifecycleController, ScanEvent};
use crate::progress::ProgressTracker;
use crate::registry::ScanRegistry;
use crate::store::ReportStore;
use crate::target::Target;
use crate::types::{ScanId, ScanRecord, ScanResults, ScanStatus, ScanStatusView, ScanType};

/// Handle to the scan engine. Cheap to clone; every clone drives the same scans.
///
/// Must be created inside a Tokio runtime: construction starts the lifecycle
/// controller task.
#[derive(Clone)]
pub struct ScanEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    registry: Arc<ScanRegistry>,
    store: ReportStore,
    events: mpsc::Sender<ScanEvent>,
    admission: Arc<Semaphore>,
}

impl ScanEngine {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(ScanRegistry::new());
        let store = ReportStore::new(&config.output_dir);
        let events = LifecycleController::spawn(registry.clone(), store.clone());
        let admission = Arc::new(Semaphore::new(config.max_concurrent_scans));
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                store,
                events,
                admission,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Scans currently holding an admission slot.
    pub fn running_scans(&self) -> usize {
        self.inner.config.max_concurrent_scans - self.inner.admission.available_permits()
    }

    /// Validate inputs, spawn the scanner and register the scan as running.
    ///
    /// Returns as soon as the process is started. Every error here is
    /// synchronous and leaves no record behind.
    pub async fn start_scan(&self, scan_type: &str, target: &str) -> Result<ScanId, ScanError> {
        let inner = &self.inner;
        let scan_type: ScanType = scan_type.parse()?;
        let target = match Target::parse(target) {
            Ok(t) => t,
            Err(e) => match inner.config.invalid_target {
                TargetPolicy::Reject => return Err(e),
                TargetPolicy::Loopback => {
                    tracing::warn!(
                        requested = %target,
                        "invalid target, scanning loopback instead"
                    );
                    Target::Ipv4(Ipv4Addr::LOCALHOST)
                }
            },
        };

        let permit = inner
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|_| ScanError::AtCapacity(inner.config.max_concurrent_scans))?;
        inner.store.ensure_dir().await?;

        let id = self.fresh_id().await;
        let profile = inner.config.profiles.get(scan_type);
        let report_path = inner.store.report_path(&id);
        let args = launcher::build_args(profile, &target, &report_path).map_err(|e| {
            ScanError::Profile {
                scan_type,
                reason: format!("{e:#}"),
            }
        })?;
        let child = launcher::spawn_scanner(&inner.config.scanner_binary, &args)?;

        let cancel = CancellationToken::new();
        let record = ScanRecord::new(id, scan_type, target.to_string(), target.describe());
        let (reply, registered) = oneshot::channel();
        inner
            .events
            .send(ScanEvent::Register {
                record,
                cancel: cancel.clone(),
                reply,
            })
            .await
            .map_err(|_| ScanError::EngineClosed)?;
        registered.await.map_err(|_| ScanError::EngineClosed)??;

        tracing::info!(scan_id = %id, %scan_type, scan_target = %target, "scan started");

        let supervisor = Supervisor {
            id,
            scan_type,
            child,
            report_path,
            tracker: ProgressTracker::new(&profile.stages),
            mode: inner.config.progress_mode,
            tick: inner.config.tick_interval(),
            deadline: profile.timeout(),
            cancel,
            events: inner.events.clone(),
            _permit: permit,
        };
        tokio::spawn(supervisor.run());
        Ok(id)
    }

    pub async fn get_scan_status(&self, id: &ScanId) -> Option<ScanStatusView> {
        self.inner.registry.get(id).await.map(|r| ScanStatusView::from(&r))
    }

    /// Results of a completed scan.
    ///
    /// Falls back to the persisted copy when the record has been evicted from memory.
    pub async fn get_scan_results(&self, id: &ScanId) -> Option<Arc<ScanResults>> {
        if let Some(record) = self.inner.registry.get(id).await {
            return match record.status {
                ScanStatus::Completed => record.results,
                _ => None,
            };
        }
        match self.inner.store.load_results(id).await {
            Ok(found) => found.map(Arc::new),
            Err(e) => {
                tracing::warn!(scan_id = %id, "unreadable persisted results: {e:#}");
                None
            }
        }
    }

    /// Stop a running scan. `false` for unknown or already finished scans.
    pub async fn cancel_scan(&self, id: &ScanId) -> bool {
        self.request(|reply| ScanEvent::Cancel { id: *id, reply }).await.unwrap_or(false)
    }

    /// Drop a finished scan from memory, keeping its artifacts on disk.
    pub async fn evict(&self, id: &ScanId) -> bool {
        self.request(|reply| ScanEvent::Evict { id: *id, reply }).await.unwrap_or(false)
    }

    /// Remove scans whose completion (or start, if never completed) is older than `max_age_hours`.
    pub async fn cleanup_old_scans(&self, max_age_hours: u64) -> CleanupReport {
        let secs = i64::try_from(max_age_hours.saturating_mul(3600)).unwrap_or(i64::MAX);
        self.cleanup_older_than(time::Duration::seconds(secs)).await
    }

    pub async fn cleanup_older_than(&self, max_age: time::Duration) -> CleanupReport {
        self.request(|reply| ScanEvent::Cleanup { max_age, reply })
            .await
            .unwrap_or_default()
    }

    async fn request<T>(&self, event: impl FnOnce(oneshot::Sender<T>) -> ScanEvent) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.inner.events.send(event(tx)).await.ok()?;
        rx.await.ok()
    }

    async fn fresh_id(&self) -> ScanId {
        loop {
            let id = Uuid::new_v4();
            if !self.inner.registry.contains(&id).await {
                return id;
            }
        }
    }
}
