//! Locally supervised nginx frontend.
//!
//! # Data Flow
//! ```text
//! update()
//!     → first call: render.rs → process.rs apply, synchronously
//!     → later calls: scheduler.rs pending slot (newest wins)
//!         → once per update period tick: render → apply
//!           (never sooner than one period after the previous apply)
//!
//! status.rs: periodic scrape of /basic_status → gauges
//! ```
//!
//! # Design Decisions
//! - The first update blocks so callers know the initial config landed
//! - Identical rendered configs never trigger a reload
//! - Stopping discards any queued update; a restart begins from a fresh first update
//! - Health reads flags and the process state; it never touches nginx

pub mod process;
pub mod render;
pub mod scheduler;
pub mod status;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::NginxConfig;
use crate::ingress::IngressUpdate;
use crate::lifecycle::Shutdown;
use crate::observability::MetricsRegistry;
use crate::updater::{FrontendError, FrontendResult, Updater};

pub use process::{NginxProcess, ProcessState};
pub use render::{render, RenderedConfig};
pub use scheduler::PendingSlot;
pub use status::{ScrapeError, StatusGauges, StatusPoller, StubStatus};

/// The nginx frontend.
pub struct NginxUpdater {
    inner: Arc<Inner>,
}

struct Inner {
    config: NginxConfig,
    process: NginxProcess,
    registry: Arc<MetricsRegistry>,
    slot: Arc<PendingSlot<IngressUpdate>>,
    running: AtomicBool,
    initialized: AtomicBool,
    first_update: tokio::sync::Mutex<()>,
    last_error: Mutex<Option<FrontendError>>,
    tasks: Mutex<Option<Arc<Shutdown>>>,
}

impl NginxUpdater {
    pub fn new(config: NginxConfig) -> Self {
        Self::with_registry(config, Arc::new(MetricsRegistry::new()))
    }

    /// Build an updater whose status gauges land in `registry`.
    pub fn with_registry(config: NginxConfig, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                process: NginxProcess::new(config.clone()),
                config,
                registry,
                slot: Arc::new(PendingSlot::new()),
                running: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                first_update: tokio::sync::Mutex::new(()),
                last_error: Mutex::new(None),
                tasks: Mutex::new(None),
            }),
        }
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.inner.registry.clone()
    }

    /// The config nginx is currently serving, if it has been started.
    pub fn live_config(&self) -> Option<Arc<RenderedConfig>> {
        self.inner.process.live()
    }
}

impl Inner {
    /// Render `update` and hand it to nginx unless nothing changed.
    async fn render_and_apply(&self, update: &IngressUpdate) -> FrontendResult<()> {
        let candidate = render(&self.config, update);
        if self
            .process
            .live()
            .is_some_and(|live| live.same_content(&candidate))
        {
            tracing::debug!(digest = %candidate.digest(), "Config unchanged, skipping reload");
            return Ok(());
        }
        let result = self.process.apply(&candidate).await;
        self.slot.mark_applied();
        result
    }

    fn record_outcome(&self, result: &FrontendResult<()>) {
        let mut last_error = self.last_error.lock().expect("nginx last error poisoned");
        match result {
            Ok(()) => *last_error = None,
            Err(e) => {
                tracing::error!(error = %e, "Unable to update nginx");
                *last_error = Some(e.clone());
            }
        }
    }

    async fn apply_queued(&self, update: IngressUpdate) {
        let result = self.render_and_apply(&update).await;
        self.record_outcome(&result);
    }
}

impl fmt::Display for NginxUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("nginx")
    }
}

#[async_trait]
impl Updater for NginxUpdater {
    async fn start(&self) -> FrontendResult<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            tracing::warn!("nginx already started");
            return Ok(());
        }

        let initial = render(&self.inner.config, &IngressUpdate::default());
        self.inner.process.start(&initial).await?;

        let tasks = Arc::new(Shutdown::new());

        let inner = self.inner.clone();
        let slot = self.inner.slot.clone();
        let period = self.inner.config.update_period();
        tasks.spawn("nginx-updates", move |rx| {
            scheduler::run(
                slot,
                period,
                move |update| {
                    let inner = inner.clone();
                    async move { inner.apply_queued(update).await }
                },
                rx,
            )
        });

        let poller = StatusPoller::new(
            self.inner.config.health_port,
            self.inner.config.status_poll_interval(),
            StatusGauges::register(&self.inner.registry),
        );
        tasks.spawn("nginx-status", move |rx| poller.run(rx));

        *self.inner.tasks.lock().expect("nginx task group poisoned") = Some(tasks);
        self.inner.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> FrontendResult<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let tasks = self.inner.tasks.lock().expect("nginx task group poisoned").take();
        if let Some(tasks) = tasks {
            tasks.trigger_and_join().await;
        }
        if self.inner.slot.take().is_some() {
            tracing::debug!("Discarded queued update on stop");
        }
        self.inner.initialized.store(false, Ordering::SeqCst);
        self.inner.process.stop().await
    }

    async fn update(&self, update: &IngressUpdate) -> FrontendResult<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(FrontendError::NotRunning("nginx"));
        }

        if !self.inner.initialized.load(Ordering::SeqCst) {
            let _first = self.inner.first_update.lock().await;
            if !self.inner.initialized.load(Ordering::SeqCst) {
                let result = self.inner.render_and_apply(update).await;
                self.inner.record_outcome(&result);
                self.inner.initialized.store(true, Ordering::SeqCst);
                if result.is_ok() {
                    tracing::info!(entries = update.entries.len(), "Initial nginx config applied");
                }
                return result;
            }
        }

        self.inner.slot.offer(update.clone());
        Ok(())
    }

    fn health(&self) -> FrontendResult<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(FrontendError::NotRunning("nginx"));
        }
        if let ProcessState::Exited { status, .. } = self.inner.process.state() {
            return Err(FrontendError::ProcessExited(status));
        }
        if let Some(e) = self.inner.last_error.lock().expect("nginx last error poisoned").as_ref() {
            return Err(FrontendError::LastUpdateFailed(e.to_string()));
        }
        if !self.inner.initialized.load(Ordering::SeqCst) {
            return Err(FrontendError::WaitingForInitialUpdate);
        }
        Ok(())
    }
}
