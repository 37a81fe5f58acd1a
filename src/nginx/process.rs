//! Supervision of the nginx process.
//!
//! # Responsibilities
//! - Start nginx and wait (bounded) for its pid file
//! - Validate a candidate config before it replaces the live one
//! - Reload in place, never restart
//! - Observe the child continuously so a crash is visible immediately
//!
//! # Design Decisions
//! - One monitor task owns the `Child`; everyone else reads a watch channel
//! - Control goes through the binary's own flags (`-t`, `-s reload`, `-s quit`)

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::NginxConfig;
use crate::nginx::render::RenderedConfig;
use crate::updater::{FrontendError, FrontendResult};

const READINESS_POLL: Duration = Duration::from_millis(10);

/// Observed state of the child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Exited {
        /// True when the exit followed a stop request.
        requested: bool,
        status: String,
    },
}

/// The nginx child process and its live configuration.
pub struct NginxProcess {
    config: NginxConfig,
    state: Arc<watch::Sender<ProcessState>>,
    stopping: Arc<AtomicBool>,
    live: ArcSwapOption<RenderedConfig>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl NginxProcess {
    pub fn new(config: NginxConfig) -> Self {
        let (state, _) = watch::channel(ProcessState::NotStarted);
        Self {
            config,
            state: Arc::new(state),
            stopping: Arc::new(AtomicBool::new(false)),
            live: ArcSwapOption::empty(),
            kill: Mutex::new(None),
            monitor: Mutex::new(None),
        }
    }

    /// Current process state. Never blocks.
    pub fn state(&self) -> ProcessState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.borrow(), ProcessState::Running)
    }

    /// The configuration nginx is currently serving.
    pub fn live(&self) -> Option<Arc<RenderedConfig>> {
        self.live.load_full()
    }

    /// Write the initial config, launch nginx and wait for it to come up.
    pub async fn start(&self, initial: &RenderedConfig) -> FrontendResult<()> {
        let config_path = self.config.config_path();
        let pid_path = self.config.pid_path();

        tokio::fs::create_dir_all(&self.config.working_dir).await?;
        match tokio::fs::remove_file(&pid_path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        tokio::fs::write(&config_path, initial.text()).await?;

        tracing::info!(
            binary = %self.config.binary_location.display(),
            config = %config_path.display(),
            "Starting nginx"
        );

        let child = Command::new(&self.config.binary_location)
            .arg("-c")
            .arg(&config_path)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FrontendError::StartupFailure(format!(
                    "unable to launch {}: {}",
                    self.config.binary_location.display(),
                    e
                ))
            })?;

        self.stopping.store(false, Ordering::SeqCst);
        self.state.send_replace(ProcessState::Running);
        let (kill_tx, kill_rx) = oneshot::channel();
        *self.kill.lock().expect("nginx kill handle poisoned") = Some(kill_tx);
        let monitor = tokio::spawn(monitor(child, kill_rx, self.state.clone(), self.stopping.clone()));
        *self.monitor.lock().expect("nginx monitor handle poisoned") = Some(monitor);

        if let Err(e) = self.wait_until_ready(&pid_path).await {
            self.stopping.store(true, Ordering::SeqCst);
            self.kill_and_join().await;
            return Err(e);
        }

        self.live.store(Some(Arc::new(initial.clone())));
        tracing::info!("nginx started");
        Ok(())
    }

    async fn wait_until_ready(&self, pid_path: &Path) -> FrontendResult<()> {
        let timeout = self.config.startup_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if let ProcessState::Exited { status, .. } = self.state() {
                return Err(FrontendError::StartupFailure(format!(
                    "nginx exited during startup: {}",
                    status
                )));
            }
            if tokio::fs::try_exists(pid_path).await.unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FrontendError::StartupFailure(format!(
                    "nginx did not write {} within {:?}",
                    pid_path.display(),
                    timeout
                )));
            }
            time::sleep(READINESS_POLL).await;
        }
    }

    /// Validate `candidate`, make it the live config and reload nginx.
    ///
    /// On validation failure the live config file is untouched.
    pub async fn apply(&self, candidate: &RenderedConfig) -> FrontendResult<()> {
        if let ProcessState::Exited { status, .. } = self.state() {
            return Err(FrontendError::ProcessExited(status));
        }

        let config_path = self.config.config_path();
        let candidate_path = self.config.working_dir.join("nginx.conf.candidate");
        tokio::fs::write(&candidate_path, candidate.text()).await?;

        let (command, result) = self.control(&["-t", "-c"], &candidate_path).await;
        let output = result?;
        if !output.status.success() {
            let _ = tokio::fs::remove_file(&candidate_path).await;
            return Err(FrontendError::ConfigInvalid {
                command,
                output: combined_output(&output),
            });
        }

        tokio::fs::rename(&candidate_path, &config_path).await?;

        let (command, result) = self.control(&["-s", "reload", "-c"], &config_path).await;
        let output = result?;
        if !output.status.success() {
            return Err(FrontendError::ApplyFailure {
                command,
                output: combined_output(&output),
            });
        }

        self.live.store(Some(Arc::new(candidate.clone())));
        tracing::info!(digest = %candidate.digest(), "nginx reloaded");
        Ok(())
    }

    /// Ask nginx to quit gracefully and wait for it, bounded by the shutdown timeout.
    pub async fn stop(&self) -> FrontendResult<()> {
        self.stopping.store(true, Ordering::SeqCst);
        if !self.is_running() {
            self.kill_and_join().await;
            return Ok(());
        }

        tracing::info!("Stopping nginx");
        let (command, result) = self.control(&["-s", "quit", "-c"], &self.config.config_path()).await;
        match result {
            Ok(output) if output.status.success() => {}
            Ok(output) => tracing::warn!(
                command = %command,
                output = %combined_output(&output),
                "Graceful quit request failed"
            ),
            Err(e) => tracing::warn!(command = %command, error = %e, "Graceful quit request failed"),
        }

        let timeout = self.config.shutdown_timeout();
        let mut rx = self.state.subscribe();
        let exited = time::timeout(timeout, async {
            rx.wait_for(|s| matches!(s, ProcessState::Exited { .. })).await.is_ok()
        })
        .await;

        self.kill_and_join().await;
        match exited {
            Ok(_) => {
                tracing::info!("nginx stopped");
                Ok(())
            }
            Err(_) => {
                tracing::error!(timeout = ?timeout, "nginx did not quit in time, killed it");
                Err(FrontendError::StopTimeout(timeout))
            }
        }
    }

    /// Kill the child if it is still alive and wait for the monitor to finish.
    async fn kill_and_join(&self) {
        if let Some(kill) = self.kill.lock().expect("nginx kill handle poisoned").take() {
            let _ = kill.send(());
        }
        let monitor = self.monitor.lock().expect("nginx monitor handle poisoned").take();
        if let Some(monitor) = monitor {
            if let Err(e) = monitor.await {
                tracing::error!(error = %e, "nginx monitor task failed");
            }
        }
    }

    /// Run the nginx binary with control flags followed by a config path.
    async fn control(&self, flags: &[&str], path: &Path) -> (String, std::io::Result<std::process::Output>) {
        let command = format!(
            "{} {} {}",
            self.config.binary_location.display(),
            flags.join(" "),
            path.display()
        );
        let output = Command::new(&self.config.binary_location)
            .args(flags)
            .arg(path)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .output()
            .await;
        (command, output)
    }
}

/// Own the child until it exits, publishing the exit through `state`.
async fn monitor(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    state: Arc<watch::Sender<ProcessState>>,
    stopping: Arc<AtomicBool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "nginx already gone");
            }
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("unable to wait for nginx: {}", e),
    };
    let requested = stopping.load(Ordering::SeqCst);
    if requested {
        tracing::debug!(status = %status, "nginx exited");
    } else {
        tracing::error!(status = %status, "nginx exited unexpectedly");
    }
    state.send_replace(ProcessState::Exited { requested, status });
}

fn combined_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr.trim());
    }
    text
}
