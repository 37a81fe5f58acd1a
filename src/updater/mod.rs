//! The lifecycle contract every frontend implements.
//!
//! # States
//! ```text
//! Stopped --start()--> Running(uninitialized) --first update()--> Running(initialized)
//!    ^                                                                   |
//!    +------------------------------ stop() -----------------------------+
//! ```
//!
//! # Design Decisions
//! - `health()` reads cached state only and never waits on I/O
//! - External calls are attempted once; the caller owns retry policy
//! - `Display` provides the human-readable frontend label

pub mod error;

use std::fmt;

use async_trait::async_trait;

use crate::ingress::IngressUpdate;

pub use error::{FrontendError, FrontendResult};

/// A frontend that carries traffic and is kept in step with ingress entries.
#[async_trait]
pub trait Updater: fmt::Display + Send + Sync {
    /// Bring the frontend up. Fails if it never becomes ready.
    async fn start(&self) -> FrontendResult<()>;

    /// Tear the frontend down, waiting for owned background work to finish.
    async fn stop(&self) -> FrontendResult<()>;

    /// Reconcile the frontend with a new snapshot of entries.
    async fn update(&self, update: &IngressUpdate) -> FrontendResult<()>;

    /// Report the cached health of the frontend.
    fn health(&self) -> FrontendResult<()>;
}
