//! Restic subprocess wrapper.
//!
//! Builds and spawns restic invocations with `tokio::process`. The
//! repository address and credentials are taken from the process
//! environment, which restic reads on its own; this module never handles
//! them directly.

use super::{BackupRequest, ForgetRequest, SnapshotEngine};
use crate::config::RepositoryConfig;
use crate::utils::errors::EngineError;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Remote backends whose connection count restic exposes as an extended option
const TUNABLE_BACKENDS: [&str; 5] = ["b2", "s3", "azure", "gs", "swift"];

pub struct ResticEngine {
    binary: String,
    cache_dir: Option<PathBuf>,
    repository: Option<String>,
}

impl ResticEngine {
    pub fn new(
        binary: impl Into<String>,
        cache_dir: Option<PathBuf>,
        repository: Option<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            cache_dir,
            repository,
        }
    }

    /// Build an engine from the repository configuration. The repository
    /// address comes from the environment, same as the credentials.
    pub fn from_config(repository: &RepositoryConfig) -> Self {
        Self::new(
            repository.binary.clone(),
            repository.cache_dir.clone(),
            std::env::var("RESTIC_REPOSITORY").ok(),
        )
    }

    /// Extended option tuning the backend connection count, derived from the
    /// repository address scheme. Local and unrecognized backends get none.
    fn connection_option(&self, connections: u32) -> Option<OsString> {
        let repository = self.repository.as_deref()?;
        let (scheme, _) = repository.split_once(':')?;
        if TUNABLE_BACKENDS.contains(&scheme) {
            Some(OsString::from(format!("{scheme}.connections={connections}")))
        } else {
            None
        }
    }

    /// Flags shared by every invocation
    fn common_args(&self, connections: Option<u32>) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(cache_dir) = &self.cache_dir {
            args.push("--cache-dir".into());
            args.push(cache_dir.as_os_str().to_os_string());
        }
        if let Some(option) = connections.and_then(|n| self.connection_option(n)) {
            args.push("-o".into());
            args.push(option);
        }
        args
    }

    fn unlock_args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from("unlock")];
        args.extend(self.common_args(None));
        args
    }

    fn backup_args(&self, request: &BackupRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "backup".into(),
            // Never cross filesystem boundaries, whatever the targets are
            "--one-file-system".into(),
            "--tag".into(),
            request.tag.clone().into(),
        ];
        args.extend(self.common_args(Some(request.connections)));
        for file in &request.exclude_files {
            args.push("--exclude-file".into());
            args.push(file.as_os_str().to_os_string());
        }
        for target in &request.targets {
            args.push(target.as_os_str().to_os_string());
        }
        args
    }

    fn forget_args(&self, request: &ForgetRequest) -> Vec<OsString> {
        // Grouping by host would split or merge retention groups whenever a
        // machine is renamed; group by path set and tag only.
        let policy = &request.policy;
        let mut args: Vec<OsString> = vec![
            "forget".into(),
            "--group-by".into(),
            "paths,tag".into(),
            "--tag".into(),
            request.tag.clone().into(),
            "--keep-daily".into(),
            policy.daily().to_string().into(),
            "--keep-weekly".into(),
            policy.weekly().to_string().into(),
            "--keep-monthly".into(),
            policy.monthly().to_string().into(),
            "--keep-yearly".into(),
            policy.yearly().to_string().into(),
            "--prune".into(),
        ];
        args.extend(self.common_args(Some(request.connections)));
        args
    }

    /// Spawn one restic invocation and wait for it, killing the child if
    /// the cancellation token fires first.
    async fn run(
        &self,
        command: &'static str,
        args: Vec<OsString>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        debug!("Running {} {:?}", self.binary, args);

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| EngineError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(EngineError::ExitStatus {
                        command,
                        code: status.code().unwrap_or(-1),
                    })
                }
            }
            _ = cancel.cancelled() => {
                info!("Cancellation received, terminating {} {}", self.binary, command);
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill {} child: {}", command, e);
                }
                let _ = child.wait().await;
                Err(EngineError::Cancelled)
            }
        }
    }
}

impl SnapshotEngine for ResticEngine {
    async fn unlock(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        // Exits cleanly when the repository holds no locks at all, so a
        // second unlock in a row is a no-op.
        self.run("unlock", self.unlock_args(), cancel).await
    }

    async fn backup(
        &self,
        request: &BackupRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.run("backup", self.backup_args(request), cancel).await
    }

    async fn forget(
        &self,
        request: &ForgetRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        self.run("forget", self.forget_args(request), cancel).await
    }
}
