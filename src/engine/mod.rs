//! Backup engine invocation layer.
//!
//! The runner never talks to the repository itself; everything goes through
//! a [`SnapshotEngine`], normally the restic subprocess wrapper in
//! [`restic`]. Tests swap in a scripted implementation.

pub mod restic;

pub use restic::ResticEngine;

use crate::retention::RetentionPolicy;
use crate::utils::errors::EngineError;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// One backup invocation: the resolved target set, the combined exclude
/// list, the snapshot tag, and the backend connection count.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub targets: Vec<PathBuf>,
    pub exclude_files: Vec<PathBuf>,
    pub tag: String,
    pub connections: u32,
}

/// One forget/prune invocation. Snapshots are grouped by (path set, tag);
/// only snapshots carrying this tag are ever considered.
#[derive(Debug, Clone)]
pub struct ForgetRequest {
    pub tag: String,
    pub policy: RetentionPolicy,
    pub connections: u32,
}

/// Seam between the pipeline and the external backup tool.
///
/// Every operation takes a cancellation token and is expected to terminate
/// promptly (returning [`EngineError::Cancelled`]) once the token fires.
#[allow(async_fn_in_trait)]
pub trait SnapshotEngine {
    /// Clear stale repository locks. A no-op when nothing is locked.
    async fn unlock(&self, cancel: &CancellationToken) -> Result<(), EngineError>;

    /// Snapshot the requested targets.
    async fn backup(
        &self,
        request: &BackupRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;

    /// Apply the retention policy and prune unreferenced data.
    async fn forget(
        &self,
        request: &ForgetRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;
}

impl<E: SnapshotEngine> SnapshotEngine for &E {
    async fn unlock(&self, cancel: &CancellationToken) -> Result<(), EngineError> {
        (**self).unlock(cancel).await
    }

    async fn backup(
        &self,
        request: &BackupRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        (**self).backup(request, cancel).await
    }

    async fn forget(
        &self,
        request: &ForgetRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        (**self).forget(request, cancel).await
    }
}
