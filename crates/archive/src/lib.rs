//! Zip archives of served directories.
//!
//! - **[`Archiver`]** streams one directory subtree into a zip file and
//!   publishes it with a single rename.
//! - **[`ArchiveLifecycle`]** decides whether an archive needs building at
//!   all, and deletes it again after the retention window.

mod archiver;
pub mod error;
mod lifecycle;

pub use crate::archiver::{ArchiveState, Archiver, Summary, provisional_path};
pub use crate::lifecycle::{ArchiveLifecycle, DEFAULT_RETENTION, SweepSummary};
