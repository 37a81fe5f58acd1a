//! Google Cloud load balancer frontend.
//!
//! # Data Flow
//! ```text
//! first update()
//!     → client.rs: resolve this instance (metadata server)
//!     → client.rs: list instance groups named <prefix>*
//!     → for each group: member? else add
//!     → registered count vs expected
//!
//! stop()
//!     → for each group joined: member? then remove
//!     → drain delay
//! ```
//!
//! # Design Decisions
//! - Nothing happens on start; attaching waits until nginx has a config
//! - One attempt per update call; the caller's reconcile loop retries
//! - Attaches are kept when the count does not match

pub mod client;
pub mod types;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics::Gauge;
use tokio::sync::Mutex;

use crate::config::GclbConfig;
use crate::ingress::IngressUpdate;
use crate::observability::MetricsRegistry;
use crate::updater::{FrontendError, FrontendResult, Updater};

pub use client::{ComputeApi, GceClient};
pub use types::{CloudError, CloudResult, Instance, InstanceGroup};

pub const REGISTERED_FRONTENDS: &str = "feed_ingress_gclb_registered_frontends";

/// Where the one-time attach stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unattached,
    Attached,
}

/// State guarded by the attach lock.
struct Attachment {
    phase: Phase,
    /// Completed attach attempts.
    attempts: u64,
    last_outcome: FrontendResult<()>,
    instance: Option<Instance>,
    groups: Vec<InstanceGroup>,
}

/// Keeps this node registered with the load balancer's instance groups.
pub struct GclbUpdater {
    config: GclbConfig,
    api: Arc<dyn ComputeApi>,
    registry: Arc<MetricsRegistry>,
    registered_gauge: Gauge,
    attachment: Mutex<Attachment>,
    attempts: AtomicU64,
    running: AtomicBool,
    ready: AtomicBool,
    registered: AtomicUsize,
}

impl GclbUpdater {
    pub fn new(config: GclbConfig, api: Arc<dyn ComputeApi>) -> Self {
        Self::with_registry(config, api, Arc::new(MetricsRegistry::new()))
    }

    pub fn with_registry(config: GclbConfig, api: Arc<dyn ComputeApi>, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            registered_gauge: registry.gauge(REGISTERED_FRONTENDS),
            config,
            api,
            registry,
            attachment: Mutex::new(Attachment {
                phase: Phase::Unattached,
                attempts: 0,
                last_outcome: Ok(()),
                instance: None,
                groups: Vec::new(),
            }),
            attempts: AtomicU64::new(0),
            running: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            registered: AtomicUsize::new(0),
        }
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.registry.clone()
    }

    /// Number of groups this node was registered with at the last attach attempt.
    pub fn registered_frontends(&self) -> usize {
        self.registered.load(Ordering::SeqCst)
    }

    fn set_registered(&self, count: usize) {
        self.registered.store(count, Ordering::SeqCst);
        self.registered_gauge.set(count as f64);
    }

    async fn attach(&self, attachment: &mut Attachment) -> FrontendResult<()> {
        let instance = match &attachment.instance {
            Some(instance) => instance.clone(),
            None => {
                let instance = self.api.self_instance().await?;
                tracing::info!(instance = %instance, id = %instance.id, "Resolved this instance");
                attachment.instance = Some(instance.clone());
                instance
            }
        };

        let groups = self
            .api
            .find_instance_groups(&instance.project, &instance.zone, &self.config.instance_group_prefix)
            .await?;
        tracing::info!(
            prefix = %self.config.instance_group_prefix,
            groups = groups.len(),
            "Discovered frontend instance groups"
        );
        attachment.groups = groups.clone();

        let mut registered = 0;
        for group in &groups {
            if self.api.is_member(&instance, &group.name).await? {
                tracing::info!(instance = %instance.name, group = %group.name, "Instance already attached");
            } else {
                tracing::info!(instance = %instance.name, group = %group.name, "Registering instance");
                if let Err(e) = self.api.add_instance(&instance, &group.name).await {
                    self.set_registered(registered);
                    tracing::error!(group = %group.name, error = %e, "Unable to register instance");
                    return Err(e.into());
                }
            }
            registered += 1;
        }
        self.set_registered(registered);

        let expected = self.config.expected_frontends;
        if expected > 0 && registered != expected {
            return Err(FrontendError::AttachMismatch {
                expected,
                actual: registered,
            });
        }
        Ok(())
    }

    /// Remove this instance from every group it joined. Returns the groups that failed.
    async fn detach(&self, attachment: &Attachment) -> Vec<String> {
        let mut failed = Vec::new();
        let Some(instance) = &attachment.instance else {
            return failed;
        };

        for group in &attachment.groups {
            tracing::info!(instance = %instance.name, group = %group.name, "Deregistering instance");
            let outcome = match self.api.is_member(instance, &group.name).await {
                Ok(true) => self.api.remove_instance(instance, &group.name).await,
                Ok(false) => {
                    tracing::info!(instance = %instance.name, group = %group.name, "Instance is not in the group");
                    Ok(())
                }
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                tracing::warn!(instance = %instance.name, group = %group.name, error = %e, "Unable to deregister instance");
                failed.push(group.name.clone());
            }
        }
        failed
    }
}

impl fmt::Display for GclbUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("gclb")
    }
}

#[async_trait]
impl Updater for GclbUpdater {
    async fn start(&self) -> FrontendResult<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> FrontendResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let mut attachment = self.attachment.lock().await;
        let failed = self.detach(&attachment).await;
        attachment.phase = Phase::Unattached;
        self.ready.store(false, Ordering::SeqCst);
        self.set_registered(0);

        let drain = self.config.drain_delay();
        tracing::info!(delay = ?drain, "Waiting to finish gclb deregistration");
        tokio::time::sleep(drain).await;

        if failed.is_empty() {
            Ok(())
        } else {
            Err(FrontendError::PartialDetachFailure { failed })
        }
    }

    async fn update(&self, _update: &IngressUpdate) -> FrontendResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(FrontendError::NotRunning("gclb"));
        }

        let seen = self.attempts.load(Ordering::SeqCst);
        let mut attachment = self.attachment.lock().await;
        if attachment.attempts > seen {
            // Another caller attached while this one waited for the lock.
            return attachment.last_outcome.clone();
        }
        if attachment.phase == Phase::Attached {
            return Ok(());
        }

        tracing::info!("First update, attaching to frontends");
        let outcome = self.attach(&mut attachment).await;
        if outcome.is_ok() {
            attachment.phase = Phase::Attached;
        }
        attachment.attempts += 1;
        attachment.last_outcome = outcome.clone();
        self.attempts.store(attachment.attempts, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        outcome
    }

    fn health(&self) -> FrontendResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(FrontendError::NotRunning("gclb"));
        }
        if !self.ready.load(Ordering::SeqCst) {
            return Err(FrontendError::WaitingForInitialUpdate);
        }
        let expected = self.config.expected_frontends;
        let actual = self.registered.load(Ordering::SeqCst);
        if expected == 0 || expected == actual {
            Ok(())
        } else {
            Err(FrontendError::AttachMismatch { expected, actual })
        }
    }
}
