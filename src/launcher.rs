use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{ProgressMode, ScanProfile};
use crate::error::ScanError;
use crate::lifecycle::ScanEvent;
use crate::parser;
use crate::progress::ProgressTracker;
use crate::target::Target;
use crate::types::{ScanId, ScanResults, ScanType};

/// Lines of stderr kept for the failure message.
const STDERR_TAIL: usize = 5;

/// Scanner arguments: profile flags, optional port set, XML report path, target last.
pub fn build_args(
    profile: &ScanProfile,
    target: &Target,
    report_path: &Path,
) -> Result<Vec<String>> {
    let mut args = profile.args.clone();
    if let Some(ports) = profile.port_arg()? {
        args.push("-p".to_string());
        args.push(ports);
    }
    args.push("-oX".to_string());
    args.push(report_path.display().to_string());
    args.push(target.to_string());
    Ok(args)
}

/// Start the scanner process with piped output. Dropping the child kills it.
pub fn spawn_scanner(program: &str, args: &[String]) -> Result<Child, ScanError> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ScanError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// Watches one scanner process from spawn to exit and reports to the lifecycle controller.
pub(crate) struct Supervisor {
    pub id: ScanId,
    pub scan_type: ScanType,
    pub child: Child,
    pub report_path: PathBuf,
    pub tracker: ProgressTracker,
    pub mode: ProgressMode,
    pub tick: Duration,
    pub deadline: Duration,
    pub cancel: CancellationToken,
    pub events: mpsc::Sender<ScanEvent>,
    /// Admission slot, released when the supervisor ends.
    pub _permit: OwnedSemaphorePermit,
}

impl Supervisor {
    pub(crate) async fn run(mut self) {
        let stderr_tail = tokio::spawn(collect_stderr(self.id, self.child.stderr.take()));
        let mut lines = self.child.stdout.take().map(|s| BufReader::new(s).lines());

        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let deadline = time::sleep(self.deadline);
        tokio::pin!(deadline);
        let simulated = self.mode == ProgressMode::Simulated;

        let status = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.kill().await;
                    return;
                }
                _ = &mut deadline => {
                    self.kill().await;
                    let msg = format!("scan exceeded its {}s deadline", self.deadline.as_secs());
                    self.report(Err(msg)).await;
                    return;
                }
                _ = ticker.tick(), if simulated => {
                    if let Some(update) = self.tracker.tick() {
                        self.send(ScanEvent::Progress { id: self.id, update }).await;
                    }
                }
                line = next_line(&mut lines) => match line {
                    Some(line) => {
                        tracing::trace!(scan_id = %self.id, "{line}");
                        if !simulated {
                            if let Some(update) = self.tracker.observe_line(&line) {
                                self.send(ScanEvent::Progress { id: self.id, update }).await;
                            }
                        }
                    }
                    None => lines = None,
                },
                status = self.child.wait() => break status,
            }
        };

        let tail = stderr_tail.await.unwrap_or_default();
        let outcome = match status {
            Ok(s) if s.success() => {
                parser::results_from_report(&self.report_path, self.id, self.scan_type)
                    .await
                    .map_err(|e| format!("{e:#}"))
            }
            Ok(s) => Err(exit_diagnostic(s, &tail)),
            Err(e) => Err(format!("failed to wait for scanner: {e}")),
        };
        if self.cancel.is_cancelled() {
            return;
        }
        self.report(outcome).await;
    }

    async fn report(&self, outcome: Result<ScanResults, String>) {
        self.send(ScanEvent::Finished { id: self.id, outcome }).await;
    }

    async fn send(&self, event: ScanEvent) {
        if self.events.send(event).await.is_err() {
            tracing::warn!(scan_id = %self.id, "lifecycle controller is gone; dropping scan event");
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(scan_id = %self.id, "scanner already gone: {e}");
        }
        let _ = self.child.wait().await;
        tracing::debug!(scan_id = %self.id, "scanner process stopped");
    }
}

async fn next_line(lines: &mut Option<Lines<BufReader<ChildStdout>>>) -> Option<String> {
    match lines {
        Some(l) => l.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

async fn collect_stderr(id: ScanId, stderr: Option<ChildStderr>) -> Vec<String> {
    let Some(stderr) = stderr else {
        return Vec::new();
    };
    let mut tail = Vec::new();
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(scan_id = %id, "scanner stderr: {line}");
        if tail.len() == STDERR_TAIL {
            tail.remove(0);
        }
        tail.push(line);
    }
    tail
}

fn exit_diagnostic(status: ExitStatus, stderr_tail: &[String]) -> String {
    let detail = stderr_tail
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    if detail.is_empty() {
        format!("scanner exited with {status}")
    } else {
        format!("scanner exited with {status}: {detail}")
    }
}
