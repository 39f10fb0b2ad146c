//! Backup target discovery and exclusion-rule composition.
//!
//! Targets are the immediate subdirectories of each configured root, so a
//! "sites" root yields one target per site and a "home" root one target per
//! user. Exclude files discovered inside targets are collected into one
//! shared list that applies to the whole invocation.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A single backup source path with the exclude files discovered inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    /// Directory to back up
    pub path: PathBuf,

    /// Exclude files found inside this target, in discovery order
    pub exclude_files: Vec<PathBuf>,
}

/// Everything a backup invocation needs: the target set plus the combined
/// exclude list drawn from all targets and the optional machine-wide file.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPaths {
    pub targets: Vec<BackupTarget>,
    pub exclude_files: Vec<PathBuf>,
}

impl ResolvedPaths {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Target paths in discovery order
    pub fn target_paths(&self) -> Vec<PathBuf> {
        self.targets.iter().map(|t| t.path.clone()).collect()
    }
}

/// Discover backup targets and exclude files.
///
/// # Arguments
/// * `roots` - Directories whose immediate subdirectories become targets
/// * `user_exclude_filename` - Exclude file name looked up inside each target
/// * `global_exclude_file` - Machine-wide exclude file, attached if present
///
/// A missing root directory contributes zero targets and is never an error;
/// the same holds for exclude files that do not exist at resolve time.
/// Results are sorted by file name within each root so repeated runs see
/// the same target order.
pub fn resolve(
    roots: &[PathBuf],
    user_exclude_filename: &str,
    global_exclude_file: Option<&Path>,
) -> ResolvedPaths {
    let mut resolved = ResolvedPaths::default();

    for root in roots {
        if !root.is_dir() {
            debug!("Root {} is absent, skipping", root.display());
            continue;
        }

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };

            // Only directories become targets; loose files under a root are
            // not backed up on their own.
            if !entry.file_type().is_dir() {
                continue;
            }

            let path = entry.into_path();
            let mut exclude_files = Vec::new();

            let candidate = path.join(user_exclude_filename);
            if candidate.is_file() {
                debug!("Found exclude file {}", candidate.display());
                exclude_files.push(candidate.clone());
                resolved.exclude_files.push(candidate);
            }

            resolved.targets.push(BackupTarget { path, exclude_files });
        }
    }

    if let Some(global) = global_exclude_file {
        if global.is_file() {
            resolved.exclude_files.push(global.to_path_buf());
        } else {
            debug!("Global exclude file {} is absent, skipping", global.display());
        }
    }

    resolved
}
