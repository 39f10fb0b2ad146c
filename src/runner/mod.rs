//! Backup pipeline execution.
//!
//! One run is three strictly sequential steps against the repository:
//! unlock (clear stale locks), backup, then forget/prune. Each step is a
//! separately awaited engine invocation so cancellation is observed at
//! every boundary as well as mid-step. On cancellation the runner issues a
//! best-effort unlock before exiting so the next scheduled run does not
//! trip over a stale lock.

use crate::engine::{BackupRequest, ForgetRequest, SnapshotEngine};
use crate::fs::ResolvedPaths;
use crate::retention::RetentionPolicy;
use crate::utils::errors::{EngineError, JobError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Label partitioning retention grouping. Snapshots from scheduled runs and
/// interactive runs never prune each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTag(String);

impl JobTag {
    pub fn interactive() -> Self {
        Self("interactive".to_string())
    }

    pub fn scheduled() -> Self {
        Self("scheduled".to_string())
    }

    pub fn custom(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single-flight guard: at most one pipeline at a time per lock. The
/// external scheduler is expected to prevent concurrent invocations; this
/// catches the case where it does not.
pub struct RunLock {
    active: AtomicBool,
}

impl RunLock {
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    pub fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| RunGuard { lock: self })
    }
}

impl Default for RunLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RunGuard<'a> {
    lock: &'a RunLock,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.lock.active.store(false, Ordering::Release);
    }
}

/// Pipeline steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Unlock,
    Backup,
    Prune,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Step::Unlock => "unlock",
            Step::Backup => "backup",
            Step::Prune => "prune",
        }
    }
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub tag: JobTag,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub steps: Vec<Step>,
}

/// Owns the lifecycle of one backup invocation
pub struct JobRunner<E> {
    engine: E,
    cancel: CancellationToken,
    lock: RunLock,
}

impl<E: SnapshotEngine> JobRunner<E> {
    pub fn new(engine: E, cancel: CancellationToken) -> Self {
        Self {
            engine,
            cancel,
            lock: RunLock::new(),
        }
    }

    /// Run the full pipeline: unlock, backup, prune.
    ///
    /// A failed backup stops the pipeline before prune. A failed prune
    /// does not roll the backup back; the snapshot landing matters more
    /// than the prune succeeding.
    pub async fn run(
        &self,
        resolved: &ResolvedPaths,
        tag: &JobTag,
        policy: &RetentionPolicy,
        connections: u32,
    ) -> Result<RunReport, JobError> {
        let _guard = self.lock.try_acquire().ok_or(JobError::AlreadyRunning)?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut steps = Vec::new();

        if policy.is_degenerate() {
            warn!("Retention policy keeps zero snapshots in every period; prune will keep nothing");
        }

        info!(
            "Starting backup pipeline {} (tag: {}, {} targets, {} exclude files)",
            run_id,
            tag,
            resolved.targets.len(),
            resolved.exclude_files.len()
        );

        // Clear stale locks left by a previous abnormally terminated run.
        // Unlock on an already-unlocked repository exits cleanly, so any
        // failure here is a real one.
        self.step(
            Step::Unlock,
            &mut steps,
            self.engine.unlock(&self.cancel),
            JobError::UnlockFailed,
        )
        .await?;

        let backup_request = BackupRequest {
            targets: resolved.target_paths(),
            exclude_files: resolved.exclude_files.clone(),
            tag: tag.as_str().to_string(),
            connections,
        };
        self.step(
            Step::Backup,
            &mut steps,
            self.engine.backup(&backup_request, &self.cancel),
            JobError::BackupFailed,
        )
        .await?;

        let forget_request = ForgetRequest {
            tag: tag.as_str().to_string(),
            policy: *policy,
            connections,
        };
        self.step(
            Step::Prune,
            &mut steps,
            self.engine.forget(&forget_request, &self.cancel),
            JobError::PruneFailed,
        )
        .await?;

        let report = RunReport {
            run_id,
            tag: tag.clone(),
            started_at,
            duration: clock.elapsed(),
            steps,
        };

        info!(
            "Backup pipeline {} completed in {:.1}s",
            run_id,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    /// Await one step, observing cancellation at the boundary before it and
    /// mid-step through the engine.
    async fn step<F>(
        &self,
        step: Step,
        steps: &mut Vec<Step>,
        operation: F,
        fail: fn(EngineError) -> JobError,
    ) -> Result<(), JobError>
    where
        F: Future<Output = Result<(), EngineError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled(step).await);
        }

        match operation.await {
            Ok(()) => {
                steps.push(step);
                Ok(())
            }
            Err(EngineError::Cancelled) => Err(self.cancelled(step).await),
            Err(e) => Err(fail(e)),
        }
    }

    /// Cancellation cleanup: release the repository lock so the next
    /// scheduled attempt starts clean. Failure is logged, not escalated.
    async fn cancelled(&self, step: Step) -> JobError {
        warn!(
            "Cancellation received at the {} step; releasing repository lock",
            step.name()
        );

        // The shared token has already fired; the cleanup gets its own.
        if let Err(e) = self.engine.unlock(&CancellationToken::new()).await {
            warn!("Best-effort unlock after cancellation failed: {}", e);
        }

        JobError::CancelledByOperator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::BackupTarget;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedEngine {
        calls: Mutex<Vec<&'static str>>,
        fail_unlock: bool,
        fail_backup: bool,
        fail_forget: bool,
        cancel_during_backup: Option<CancellationToken>,
        forget_requests: Mutex<Vec<ForgetRequest>>,
    }

    impl SnapshotEngine for ScriptedEngine {
        async fn unlock(&self, _cancel: &CancellationToken) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push("unlock");
            if self.fail_unlock {
                return Err(EngineError::ExitStatus {
                    command: "unlock",
                    code: 1,
                });
            }
            Ok(())
        }

        async fn backup(
            &self,
            _request: &BackupRequest,
            _cancel: &CancellationToken,
        ) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push("backup");
            if let Some(token) = &self.cancel_during_backup {
                // Simulate an operator signal arriving mid-step
                token.cancel();
                return Err(EngineError::Cancelled);
            }
            if self.fail_backup {
                return Err(EngineError::ExitStatus {
                    command: "backup",
                    code: 1,
                });
            }
            Ok(())
        }

        async fn forget(
            &self,
            request: &ForgetRequest,
            _cancel: &CancellationToken,
        ) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push("forget");
            self.forget_requests.lock().unwrap().push(request.clone());
            if self.fail_forget {
                return Err(EngineError::ExitStatus {
                    command: "forget",
                    code: 2,
                });
            }
            Ok(())
        }
    }

    fn two_targets() -> ResolvedPaths {
        ResolvedPaths {
            targets: vec![
                BackupTarget {
                    path: PathBuf::from("/a"),
                    exclude_files: vec![],
                },
                BackupTarget {
                    path: PathBuf::from("/b"),
                    exclude_files: vec![],
                },
            ],
            exclude_files: vec![],
        }
    }

    #[tokio::test]
    async fn test_pipeline_runs_steps_in_order() {
        let engine = ScriptedEngine::default();
        let runner = JobRunner::new(&engine, CancellationToken::new());
        let policy = RetentionPolicy::new(7, 8, 1, 1);

        let report = runner
            .run(&two_targets(), &JobTag::scheduled(), &policy, 8)
            .await
            .unwrap();

        assert_eq!(
            engine.calls.lock().unwrap().as_slice(),
            ["unlock", "backup", "forget"]
        );
        assert_eq!(report.steps, vec![Step::Unlock, Step::Backup, Step::Prune]);
        assert_eq!(report.tag.as_str(), "scheduled");
    }

    #[tokio::test]
    async fn test_forget_only_sees_the_run_tag() {
        let engine = ScriptedEngine::default();
        let runner = JobRunner::new(&engine, CancellationToken::new());
        let policy = RetentionPolicy::new(7, 8, 1, 1);

        runner
            .run(&two_targets(), &JobTag::scheduled(), &policy, 8)
            .await
            .unwrap();

        let requests = engine.forget_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tag, "scheduled");
        assert_eq!(requests[0].policy, policy);
    }

    #[tokio::test]
    async fn test_backup_failure_skips_prune() {
        let engine = ScriptedEngine {
            fail_backup: true,
            ..Default::default()
        };
        let runner = JobRunner::new(&engine, CancellationToken::new());

        let err = runner
            .run(
                &two_targets(),
                &JobTag::scheduled(),
                &RetentionPolicy::default(),
                8,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::BackupFailed(_)));
        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| **c == "forget").count(), 0);
    }

    #[tokio::test]
    async fn test_unlock_failure_stops_pipeline() {
        let engine = ScriptedEngine {
            fail_unlock: true,
            ..Default::default()
        };
        let runner = JobRunner::new(&engine, CancellationToken::new());

        let err = runner
            .run(
                &two_targets(),
                &JobTag::interactive(),
                &RetentionPolicy::default(),
                8,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::UnlockFailed(_)));
        assert_eq!(engine.calls.lock().unwrap().as_slice(), ["unlock"]);
    }

    #[tokio::test]
    async fn test_prune_failure_after_successful_backup() {
        let engine = ScriptedEngine {
            fail_forget: true,
            ..Default::default()
        };
        let runner = JobRunner::new(&engine, CancellationToken::new());

        let err = runner
            .run(
                &two_targets(),
                &JobTag::scheduled(),
                &RetentionPolicy::default(),
                8,
            )
            .await
            .unwrap_err();

        // The backup already landed; only the prune step is reported
        assert!(matches!(err, JobError::PruneFailed(_)));
        assert_eq!(
            engine.calls.lock().unwrap().as_slice(),
            ["unlock", "backup", "forget"]
        );
    }

    #[tokio::test]
    async fn test_cancellation_during_backup_unlocks_and_skips_prune() {
        let cancel = CancellationToken::new();
        let engine = ScriptedEngine {
            cancel_during_backup: Some(cancel.clone()),
            ..Default::default()
        };
        let runner = JobRunner::new(&engine, cancel);

        let err = runner
            .run(
                &two_targets(),
                &JobTag::scheduled(),
                &RetentionPolicy::default(),
                8,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::CancelledByOperator));
        // Initial unlock, the interrupted backup, then the cleanup unlock
        assert_eq!(
            engine.calls.lock().unwrap().as_slice(),
            ["unlock", "backup", "unlock"]
        );
    }

    #[tokio::test]
    async fn test_cancellation_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = ScriptedEngine::default();
        let runner = JobRunner::new(&engine, cancel);

        let err = runner
            .run(
                &two_targets(),
                &JobTag::scheduled(),
                &RetentionPolicy::default(),
                8,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::CancelledByOperator));
        // Only the cleanup unlock; no backup, no prune
        assert_eq!(engine.calls.lock().unwrap().as_slice(), ["unlock"]);
    }

    #[tokio::test]
    async fn test_sequential_runs_release_the_lock() {
        let engine = ScriptedEngine::default();
        let runner = JobRunner::new(&engine, CancellationToken::new());
        let resolved = two_targets();
        let policy = RetentionPolicy::default();

        runner
            .run(&resolved, &JobTag::interactive(), &policy, 4)
            .await
            .unwrap();
        runner
            .run(&resolved, &JobTag::interactive(), &policy, 4)
            .await
            .unwrap();
    }

    #[test]
    fn test_run_lock_single_flight() {
        let lock = RunLock::new();
        let guard = lock.try_acquire().unwrap();
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(lock.try_acquire().is_some());
    }

    #[test]
    fn test_job_tag_labels() {
        assert_eq!(JobTag::interactive().as_str(), "interactive");
        assert_eq!(JobTag::scheduled().as_str(), "scheduled");
        assert_eq!(JobTag::custom("migration").as_str(), "migration");
    }
}
