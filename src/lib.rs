//! Watch media library folders and publish batched change notifications.
//!
//! Filesystem events under each library's directories are collected into
//! fixed windows; each window produces one payload naming the libraries
//! that changed plus the raw events, published to an MQTT topic.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod logging;
pub mod publish;
pub mod watcher;

pub use aggregate::{Aggregator, Batch, EngineStats};
pub use config::{ConfigError, MatchMode, Settings};
pub use publish::{PublishError, Publisher};
pub use watcher::{Operation, RawEvent, WatchRegistry};
