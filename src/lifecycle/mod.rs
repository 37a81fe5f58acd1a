//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Background loops (shutdown.rs):
//!     Updater::start → Shutdown::spawn(loop) per loop
//!     Updater::stop  → Shutdown::trigger → join every loop
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary stops the controller
//! ```
//!
//! # Design Decisions
//! - Every loop owned by a frontend is joined before `stop()` returns
//! - A fresh `Shutdown` per start; a triggered one is never reused

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
