//! Frontend synchronisation for the feed ingress controller.
//!
//! Keeps a locally supervised nginx and, optionally, Google Cloud load
//! balancer membership in step with a changing set of ingress entries.

pub mod admin;
pub mod config;
pub mod controller;
pub mod gclb;
pub mod ingress;
pub mod lifecycle;
pub mod nginx;
pub mod observability;
pub mod updater;

pub use config::FeedConfig;
pub use controller::Controller;
pub use ingress::{IngressEntry, IngressUpdate};
pub use lifecycle::Shutdown;
pub use updater::{FrontendError, FrontendResult, Updater};
