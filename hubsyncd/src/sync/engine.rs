use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::notifier::Notifier;

use super::backoff::Backoff;
use super::cleanup::remove_uploaded;
use super::executor::{UploadExecutor, UploadOutcome};
use super::idle::IdleMonitor;
use super::ledger::{FailureLedger, FailureVerdict, HistoryLedger, LedgerError};
use super::local_watcher::start_notify_watcher;
use super::paths::remote_path;
use super::reconcile::exists_with_size;
use super::remote::RemoteRepository;
use super::scanner::{FileTask, FolderBatch, ScanError, scan};
use super::stability::{Stability, verify_folder};

const BYTES_PER_MB: u64 = 1024 * 1024;
/// Shortest wait between a filesystem wake-up and the rescan it triggers.
const MIN_WAKE_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub uploaded: usize,
    pub reconciled: usize,
    pub already_confirmed: usize,
    pub failed: usize,
    pub unstable_folders: usize,
    pub gated_folders: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Uploaded { cleaned: bool, reconciled: bool },
    AlreadyConfirmed,
    Failed,
    Skipped,
    Cancelled,
}

/// The single sequential upload loop. Owns both ledgers for its lifetime.
pub struct UploadEngine<R> {
    remote: R,
    config: DaemonConfig,
    notifier: Arc<dyn Notifier>,
    history: HistoryLedger,
    failures: FailureLedger,
    idle: IdleMonitor,
    /// Marked files whose remote copy was confirmed during this run.
    confirmed: BTreeSet<String>,
    wake: Arc<Notify>,
}

impl<R: RemoteRepository> UploadEngine<R> {
    pub fn new(remote: R, config: DaemonConfig, notifier: Arc<dyn Notifier>) -> Self {
        let history = HistoryLedger::load(config.history_path()).unwrap_or_else(|err| {
            warn!(error = %err, "history ledger unreadable, starting empty");
            HistoryLedger::empty(config.history_path())
        });
        let failures = FailureLedger::load(config.failures_path()).unwrap_or_else(|err| {
            warn!(error = %err, "failure ledger unreadable, starting empty");
            FailureLedger::empty(config.failures_path())
        });
        let idle = IdleMonitor::new(
            config.idle_interval,
            config.enable_idle_notification,
            Instant::now(),
        );
        Self {
            remote,
            config,
            notifier,
            history,
            failures,
            idle,
            confirmed: BTreeSet::new(),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn history(&self) -> &HistoryLedger {
        &self.history
    }

    pub fn failures(&self) -> &FailureLedger {
        &self.failures
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let root = self.config.watch_root.clone();
        if let Err(err) = tokio::fs::create_dir_all(&root).await {
            warn!(root = %root.display(), error = %err, "cannot create watched root");
        }
        let _watcher = if self.config.enable_local_watcher {
            match start_notify_watcher(&root, self.wake.clone()) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    warn!(root = %root.display(), error = %err, "filesystem watcher unavailable, polling only");
                    None
                }
            }
        } else {
            None
        };
        info!(
            root = %root.display(),
            history = self.history.len(),
            failing = self.failures.len(),
            "upload loop started"
        );

        while !cancel.is_cancelled() {
            let pause = match self.run_cycle(&cancel).await {
                Ok(report) => {
                    if report.candidates > 0 {
                        info!(
                            uploaded = report.uploaded + report.reconciled,
                            failed = report.failed,
                            deferred_folders = report.unstable_folders,
                            "cycle finished"
                        );
                    }
                    self.config.poll_interval
                }
                Err(err) => {
                    error!(error = %err, "upload cycle failed");
                    self.config.error_pause
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {
                    // A burst of writes collapses into one rescan once it settles.
                    let settle = self.config.stability_window.max(MIN_WAKE_SETTLE).min(pause);
                    debug!(settle_ms = settle.as_millis() as u64, "woken by filesystem activity");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(settle) => {}
                    }
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!("upload loop stopped");
    }

    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> Result<CycleReport, EngineError> {
        let scanned = scan(&self.config.watch_root).await?;
        let mut report = CycleReport {
            gated_folders: scanned.gated.len(),
            ..CycleReport::default()
        };
        for folder in &scanned.gated {
            debug!(folder = folder_label(folder), "pending download, folder skipped");
        }

        let folders: Vec<FolderBatch> = scanned
            .folders
            .into_iter()
            .filter_map(|mut batch| {
                batch
                    .files
                    .retain(|file| !self.confirmed.contains(&file.relative_path));
                (!batch.files.is_empty()).then_some(batch)
            })
            .collect();
        report.candidates = folders.iter().map(|batch| batch.files.len()).sum();

        let transition = self.idle.observe(report.candidates, Instant::now());
        if report.candidates == 0 {
            if transition.entered_idle {
                info!("no new files, waiting");
            }
            if transition.notify {
                self.notifier.notify(
                    "hubsyncd is idle",
                    &format!(
                        "No new files under {} for more than {} minutes.",
                        self.config.watch_root.display(),
                        self.config.idle_interval.as_secs() / 60
                    ),
                );
            }
            return Ok(report);
        }

        info!(
            candidates = report.candidates,
            folders = folders.len(),
            "scan found new files"
        );
        for batch in &folders {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.process_folder(batch, cancel, &mut report).await;
        }
        self.idle.mark_busy(Instant::now());
        Ok(report)
    }

    async fn process_folder(
        &mut self,
        batch: &FolderBatch,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) {
        let label = folder_label(&batch.folder_key);
        info!(folder = label, files = batch.files.len(), "processing folder");

        match verify_folder(&batch.local_dir, self.config.stability_window, cancel).await {
            Stability::Stable => {}
            Stability::Unstable => {
                info!(folder = label, "folder is still being written, retrying next cycle");
                report.unstable_folders += 1;
                return;
            }
            Stability::Cancelled => {
                report.cancelled = true;
                return;
            }
        }

        let mut uploads_started = 0usize;
        let mut uploaded_here = 0usize;
        let mut all_cleaned = true;
        for task in &batch.files {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.process_file(task, cancel, &mut uploads_started).await {
                FileOutcome::Uploaded {
                    cleaned,
                    reconciled,
                } => {
                    if reconciled {
                        report.reconciled += 1;
                    } else {
                        report.uploaded += 1;
                    }
                    uploaded_here += 1;
                    all_cleaned &= cleaned;
                }
                FileOutcome::AlreadyConfirmed => report.already_confirmed += 1,
                FileOutcome::Failed => report.failed += 1,
                FileOutcome::Skipped => {}
                FileOutcome::Cancelled => {
                    report.cancelled = true;
                    break;
                }
            }
        }

        if uploaded_here > 0 {
            let local = if self.config.delete_after_upload && all_cleaned {
                "local copies removed"
            } else {
                "local copies kept"
            };
            self.notifier.notify(
                "Folder uploaded",
                &format!(
                    "{label}: {uploaded_here} file(s) uploaded to {}, {local}.",
                    self.remote_label()
                ),
            );
        }
    }

    async fn process_file(
        &mut self,
        task: &FileTask,
        cancel: &CancellationToken,
        uploads_started: &mut usize,
    ) -> FileOutcome {
        let relative = task.relative_path.as_str();
        let size = match tokio::fs::metadata(&task.local_path).await {
            Ok(meta) => meta.len(),
            Err(err) => {
                debug!(file = relative, error = %err, "file vanished before upload");
                return FileOutcome::Skipped;
            }
        };
        let remote = remote_path(&self.config.remote_folder, relative);

        if self.history.contains(relative) {
            if exists_with_size(&self.remote, &remote, size).await {
                debug!(file = relative, "already uploaded, remote copy confirmed");
                let cleaned = self.cleanup(task).await;
                self.remember_confirmed(relative, cleaned);
                return FileOutcome::AlreadyConfirmed;
            }
            warn!(file = relative, "uploaded mark not confirmed by remote, uploading again");
            log_persist(self.history.remove(relative), "history");
        }

        if *uploads_started > 0 && !self.config.file_interval.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return FileOutcome::Cancelled,
                _ = tokio::time::sleep(self.config.file_interval) => {}
            }
        }
        *uploads_started += 1;

        info!(file = relative, remote_path = %remote, size_mb = size / BYTES_PER_MB, "uploading");
        let executor = UploadExecutor::new(
            &self.remote,
            Backoff::new(self.config.retry_base_delay),
            self.config.max_retries,
        );
        let outcome = executor.run(&task.local_path, &remote, size, cancel).await;
        match outcome {
            UploadOutcome::Uploaded { attempts } => {
                info!(file = relative, attempts, "upload confirmed");
                self.finish_success(task, size, false).await
            }
            UploadOutcome::Reconciled { attempts } => {
                info!(file = relative, attempts, "upload confirmed by remote check");
                self.finish_success(task, size, true).await
            }
            UploadOutcome::Failed { attempts, error } => {
                error!(file = relative, attempts, error = %error, "upload failed");
                let record = self.failures.record_failure(relative, SystemTime::now());
                log_persist(record.persisted, "failures");
                match record.verdict {
                    FailureVerdict::FirstFailure => {}
                    FailureVerdict::Silent => debug!(file = relative, "still failing"),
                    FailureVerdict::Alert { stuck_for } => self.notifier.notify(
                        "Upload stuck",
                        &format!(
                            "{relative} has been failing for {} hours. Last error: {error}",
                            stuck_for.as_secs() / 3600
                        ),
                    ),
                }
                FileOutcome::Failed
            }
            UploadOutcome::Cancelled => {
                info!(file = relative, "upload interrupted by stop");
                FileOutcome::Cancelled
            }
        }
    }

    async fn finish_success(&mut self, task: &FileTask, size: u64, reconciled: bool) -> FileOutcome {
        let relative = task.relative_path.as_str();
        log_persist(self.history.mark_success(relative), "history");
        log_persist(self.failures.clear(relative), "failures");

        let size_mb = size / BYTES_PER_MB;
        if size_mb >= self.config.notify_min_size_mb {
            self.notifier.notify(
                "Large file uploaded",
                &format!("{relative} ({size_mb} MB) is now in {}.", self.remote_label()),
            );
        }
        let cleaned = self.cleanup(task).await;
        self.remember_confirmed(relative, cleaned);
        FileOutcome::Uploaded {
            cleaned,
            reconciled,
        }
    }

    /// A local copy that should have been deleted stays a candidate, so the
    /// next cycle reconciles it and retries the cleanup.
    fn remember_confirmed(&mut self, relative: &str, cleaned: bool) {
        if !self.config.delete_after_upload || cleaned {
            self.confirmed.insert(relative.to_string());
        }
    }

    async fn cleanup(&self, task: &FileTask) -> bool {
        if !self.config.delete_after_upload {
            return false;
        }
        let report = remove_uploaded(&self.config.watch_root, &task.local_path).await;
        if let Some((path, err)) = &report.error {
            warn!(path = %path.display(), error = %err, "cleanup incomplete");
        }
        for dir in &report.removed_dirs {
            debug!(dir = %dir.display(), "removed empty folder");
        }
        report.file_removed
    }

    fn remote_label(&self) -> String {
        if self.config.remote_folder.is_empty() {
            self.config.repo.repo_id.clone()
        } else {
            format!("{}/{}", self.config.repo.repo_id, self.config.remote_folder)
        }
    }
}

fn folder_label(key: &str) -> &str {
    if key.is_empty() { "(root)" } else { key }
}

fn log_persist(result: Result<(), LedgerError>, ledger: &'static str) {
    if let Err(err) = result {
        warn!(ledger, error = %err, "ledger write failed, keeping in-memory state");
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
