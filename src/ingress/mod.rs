//! Ingress entries: the desired routing state handed to every frontend.
//!
//! # Data Flow
//! ```text
//! entries file (JSON array)
//!     → watcher.rs (notify on change, parse)
//!     → IngressUpdate (one complete snapshot)
//!     → Controller::update → every Updater
//! ```
//!
//! # Design Decisions
//! - A snapshot supersedes the previous one; entries are never merged
//! - Entry identity is (host, normalized path), see `normalize_path`

pub mod entry;
pub mod watcher;

pub use entry::{normalize_path, IngressEntry, IngressUpdate};
pub use watcher::EntriesWatcher;
