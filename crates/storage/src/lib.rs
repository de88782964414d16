//! File-system plumbing shared by the cache and archive crates.

pub mod error;
mod listing;
mod locks;
mod path;
mod walk;
mod write;

pub use crate::listing::{EntryClass, Listed, list_directory};
pub use crate::locks::{KeyGuard, KeyedLocks};
pub use crate::path::{extension, normalize as normalize_path, slash_path, validate as validate_path, validate_request};
pub use crate::walk::{Entry, EntryKind, EntryStream, WalkSummary, entries, walk};
pub use crate::write::{create_dir_all, persist, write_atomic};
