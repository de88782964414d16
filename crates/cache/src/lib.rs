//! On-disk cache of derived images.
//!
//! The cache is not the source of truth; the served tree is. Any derivative
//! can be deleted and it will be rebuilt on the next request, or sooner by
//! the background worker.
//!
//! # Architecture
//! - **[`DerivedCache`]**: get-or-build for thumbnails and lossy re-encodes,
//!   keyed by (source path, profile) and laid out by [`CacheLayout`].
//! - **[`PrecacheWorker`]**: scans for sources missing a derivative and
//!   builds them, strictly one at a time.
//! - **[`TreeWatcher`]**: turns file-system events into debounced re-scans
//!   for the worker.

mod derived;
pub mod error;
mod layout;
mod precache;
mod watch;

pub use crate::derived::{Delivery, Derived, DerivedCache, Origin, WorkItem};
pub use crate::layout::{CacheLayout, DEFAULT_ELIGIBLE};
pub use crate::precache::{PrecacheHandle, PrecacheWorker, WorkerState, WorkerStatus};
pub use crate::watch::{Burst, TreeWatcher, debounce};
