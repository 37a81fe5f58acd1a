//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (gauges on a per-frontend registry)
//!
//! Consumers:
//!     → stdout (human or JSON lines)
//!     → admin /metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields instead of interpolated strings
//! - Metrics registries are owned by the frontend that publishes them,
//!   never installed as the process-global recorder

pub mod logging;
pub mod metrics;

pub use self::metrics::MetricsRegistry;
