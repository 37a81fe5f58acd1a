//! Fan-out of ingress updates to every configured frontend.
//!
//! # Data Flow
//! ```text
//! entries source → Controller::update → each Updater::update (concurrently)
//! admin /health  → Controller::health → each Updater::health
//! ```
//!
//! # Design Decisions
//! - Frontends start in the order given and stop in reverse, so a cloud
//!   frontend listed after nginx detaches before nginx shuts down
//! - Every frontend sees every update even if another one fails

use std::sync::Arc;

use futures_util::future::join_all;

use crate::ingress::IngressUpdate;
use crate::updater::{FrontendError, FrontendResult, Updater};

/// Drives a fixed set of frontends through their lifecycle.
pub struct Controller {
    updaters: Vec<Arc<dyn Updater>>,
}

impl Controller {
    pub fn new(updaters: Vec<Arc<dyn Updater>>) -> Self {
        Self { updaters }
    }

    pub fn updaters(&self) -> &[Arc<dyn Updater>] {
        &self.updaters
    }

    /// Start each frontend in order. Stops the ones already started if one fails.
    pub async fn start(&self) -> FrontendResult<()> {
        for (i, updater) in self.updaters.iter().enumerate() {
            tracing::info!(frontend = %updater, "Starting frontend");
            if let Err(e) = updater.start().await {
                tracing::error!(frontend = %updater, error = %e, "Frontend failed to start");
                for started in self.updaters[..i].iter().rev() {
                    if let Err(stop_err) = started.stop().await {
                        tracing::warn!(frontend = %started, error = %stop_err, "Unable to stop frontend");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop every frontend in reverse start order, attempting all of them.
    pub async fn stop(&self) -> FrontendResult<()> {
        let mut errors = Vec::new();
        for updater in self.updaters.iter().rev() {
            tracing::info!(frontend = %updater, "Stopping frontend");
            if let Err(e) = updater.stop().await {
                tracing::error!(frontend = %updater, error = %e, "Frontend did not stop cleanly");
                errors.push(e);
            }
        }
        aggregate(errors)
    }

    /// Hand `update` to every frontend and join their errors.
    pub async fn update(&self, update: &IngressUpdate) -> FrontendResult<()> {
        let results = join_all(self.updaters.iter().map(|u| u.update(update))).await;
        let errors = results
            .into_iter()
            .zip(&self.updaters)
            .filter_map(|(result, updater)| {
                result
                    .map_err(|e| {
                        tracing::warn!(frontend = %updater, error = %e, "Frontend update failed");
                        e
                    })
                    .err()
            })
            .collect();
        aggregate(errors)
    }

    /// Healthy only if every frontend is.
    pub fn health(&self) -> FrontendResult<()> {
        aggregate(self.updaters.iter().filter_map(|u| u.health().err()).collect())
    }
}

fn aggregate(mut errors: Vec<FrontendError>) -> FrontendResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(FrontendError::Aggregate(errors)),
    }
}
