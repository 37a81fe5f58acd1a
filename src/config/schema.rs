//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the ingress.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the ingress frontends.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FeedConfig {
    /// Locally supervised nginx frontend.
    pub nginx: NginxConfig,

    /// Google Cloud load balancer membership.
    pub gclb: GclbConfig,

    /// Log output settings.
    pub logging: LoggingConfig,

    /// Health and metrics endpoints of this process.
    pub admin: AdminConfig,

    /// Where ingress entries are read from.
    pub source: SourceConfig,
}

/// Nginx process and rendering configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NginxConfig {
    /// Path to the nginx binary.
    pub binary_location: PathBuf,

    /// Directory holding nginx.conf, the pid file and temp paths.
    pub working_dir: PathBuf,

    /// Port serving ingress traffic.
    pub ingress_port: u16,

    /// Port serving nginx's own status pages.
    pub health_port: u16,

    pub worker_processes: u32,

    pub worker_connections: u32,

    /// Client keepalive in seconds.
    pub keepalive_seconds: u32,

    /// Idle keepalive connections kept per upstream pool.
    pub backend_keepalives: u32,

    pub backend_connect_timeout_seconds: u32,

    /// Negative values leave nginx's default in place.
    pub server_names_hash_max_size: i32,

    /// Negative values leave nginx's default in place.
    pub server_names_hash_bucket_size: i32,

    /// Frontend CIDRs whose X-Forwarded-For (or PROXY header) is trusted.
    pub trusted_frontends: Vec<String>,

    /// Expect the PROXY protocol on the ingress listener.
    pub proxy_protocol: bool,

    pub access_log: bool,

    pub access_log_dir: PathBuf,

    /// Request headers captured in the access log.
    pub log_headers: Vec<String>,

    /// nginx error_log level.
    pub log_level: String,

    /// Minimum time between two reloads in milliseconds.
    pub update_period_ms: u64,

    /// How long nginx may take to write its pid file in milliseconds.
    pub startup_timeout_ms: u64,

    pub status_poll_interval_ms: u64,

    /// Bound on waiting for nginx to exit after a graceful quit, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl NginxConfig {
    pub fn update_period(&self) -> Duration {
        Duration::from_millis(self.update_period_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Path of the live configuration file.
    pub fn config_path(&self) -> PathBuf {
        self.working_dir.join("nginx.conf")
    }

    /// Path of the pid file nginx writes once it is up.
    pub fn pid_path(&self) -> PathBuf {
        self.working_dir.join("nginx.pid")
    }
}

impl Default for NginxConfig {
    fn default() -> Self {
        Self {
            binary_location: PathBuf::from("/usr/sbin/nginx"),
            working_dir: PathBuf::from("/var/run/feed-ingress"),
            ingress_port: 8080,
            health_port: 8081,
            worker_processes: 1,
            worker_connections: 1024,
            keepalive_seconds: 60,
            backend_keepalives: 512,
            backend_connect_timeout_seconds: 1,
            server_names_hash_max_size: -1,
            server_names_hash_bucket_size: -1,
            trusted_frontends: Vec::new(),
            proxy_protocol: false,
            access_log: false,
            access_log_dir: PathBuf::from("/var/log/nginx"),
            log_headers: Vec::new(),
            log_level: "warn".to_string(),
            update_period_ms: 1000,
            startup_timeout_ms: 5000,
            status_poll_interval_ms: 10_000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Google Cloud load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GclbConfig {
    /// Attach this node to matching instance groups.
    pub enabled: bool,

    /// Instance groups whose name starts with this prefix are frontends.
    pub instance_group_prefix: String,

    /// Number of groups this node must be registered with. 0 disables the check.
    pub expected_frontends: usize,

    /// Wait after detaching, in milliseconds.
    pub drain_delay_ms: u64,

    /// Longest wait for one add or remove operation to finish, in milliseconds.
    pub operation_timeout_ms: u64,

    /// Base URL of the instance metadata server.
    pub metadata_url: String,

    /// Base URL of the compute API.
    pub compute_url: String,
}

impl GclbConfig {
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Default for GclbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            instance_group_prefix: String::new(),
            expected_frontends: 0,
            drain_delay_ms: 30_000,
            operation_timeout_ms: 120_000,
            metadata_url: "http://metadata.google.internal/computeMetadata/v1/".to_string(),
            compute_url: "https://compute.googleapis.com/compute/v1/".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bind address for /health and /metrics.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:12082".to_string(),
        }
    }
}

/// Ingress entry source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    /// JSON file holding the current array of ingress entries.
    pub entries_path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            entries_path: PathBuf::from("/etc/feed-ingress/entries.json"),
        }
    }
}
