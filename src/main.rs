//! feed-ingress
//!
//! Keeps nginx, and optionally GCLB membership, in step with ingress entries.
//!
//! ```text
//!  entries.json ──notify──▶ EntriesWatcher ──▶ Controller::update ──┬──▶ NginxUpdater ──▶ nginx -s reload
//!                                                                   └──▶ GclbUpdater  ──▶ Compute API
//!
//!  admin :12082  /health  ──▶ Controller::health
//!                /metrics ──▶ per-frontend MetricsRegistry
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use feed_ingress::admin::{self, AdminState};
use feed_ingress::config::load_config;
use feed_ingress::controller::Controller;
use feed_ingress::gclb::{GceClient, GclbUpdater};
use feed_ingress::ingress::{watcher::load_entries, EntriesWatcher};
use feed_ingress::lifecycle::{signals::wait_for_termination, Shutdown};
use feed_ingress::nginx::NginxUpdater;
use feed_ingress::observability::{logging::init_logging, MetricsRegistry};
use feed_ingress::updater::Updater;

#[derive(Parser, Debug)]
#[command(name = "feed-ingress", version, about = "Ingress frontend controller")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/feed-ingress/feed.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    init_logging(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "feed-ingress starting");

    let nginx_metrics = Arc::new(MetricsRegistry::new());
    let mut registries = vec![nginx_metrics.clone()];
    let mut updaters: Vec<Arc<dyn Updater>> = vec![Arc::new(NginxUpdater::with_registry(
        config.nginx.clone(),
        nginx_metrics,
    ))];

    if config.gclb.enabled {
        let gclb_metrics = Arc::new(MetricsRegistry::new());
        registries.push(gclb_metrics.clone());
        let client = GceClient::new(&config.gclb)?;
        updaters.push(Arc::new(GclbUpdater::with_registry(
            config.gclb.clone(),
            Arc::new(client),
            gclb_metrics,
        )));
    }

    let listener = TcpListener::bind(&config.admin.bind_address).await?;

    let controller = Arc::new(Controller::new(updaters));
    controller.start().await?;

    let tasks = Shutdown::new();
    let state = AdminState {
        controller: controller.clone(),
        registries,
    };
    tasks.spawn("admin", move |rx| async move {
        if let Err(e) = admin::serve(listener, state, rx).await {
            tracing::error!(error = %e, "Admin server failed");
        }
    });

    let entries_path = config.source.entries_path.clone();
    let (watcher, mut updates) = EntriesWatcher::new(&entries_path);
    let _watch = match watcher.run() {
        Ok(watch) => Some(watch),
        Err(e) => {
            tracing::error!(path = %entries_path.display(), error = %e, "Unable to watch ingress entries");
            None
        }
    };

    let sync = controller.clone();
    tasks.spawn("ingress-sync", move |mut rx| async move {
        match load_entries(&entries_path) {
            Ok(initial) => {
                if let Err(e) = sync.update(&initial).await {
                    tracing::error!(error = %e, "Initial update failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "Unable to read initial ingress entries"),
        }

        loop {
            tokio::select! {
                Some(update) = updates.recv() => {
                    if let Err(e) = sync.update(&update).await {
                        tracing::error!(error = %e, "Update failed");
                    }
                }
                _ = rx.recv() => break,
            }
        }
    });

    wait_for_termination().await;
    tracing::info!("Shutting down");

    tasks.trigger_and_join().await;
    if let Err(e) = controller.stop().await {
        tracing::error!(error = %e, "Shutdown incomplete");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
