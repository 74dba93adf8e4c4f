//! Filesystem side of the daemon.
//!
//! # Architecture
//!
//! ```text
//! notify::RecommendedWatcher (recursive, one root per library folder)
//!         |
//!      FsWatcher  -- RawEvent -->  aggregate::Aggregator
//!                                       |
//!                                 WatchRegistry (read-only)
//! ```

mod error;
mod event;
mod fs;
mod registry;

pub use error::WatchError;
pub use event::{Operation, RawEvent};
pub use fs::{FsWatcher, WatchRoots};
pub use registry::{WatchRegistry, WatchedDirectory};
