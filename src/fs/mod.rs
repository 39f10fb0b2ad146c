//! Filesystem discovery for backup targets.

pub mod resolver;

pub use resolver::{resolve, BackupTarget, ResolvedPaths};
