//! nginx.conf rendering.
//!
//! # Responsibilities
//! - Collapse entries sharing (host, normalized path) to the first one seen
//! - One upstream pool per (namespace, service, port)
//! - Servers ordered by host, locations ordered by path
//!
//! # Design Decisions
//! - Pure function of the entries and static config: identical inputs
//!   always produce byte-identical text
//! - Only BTreeMap/sorted collections feed the output, never hash order

use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Write};

use sha2::{Digest, Sha256};

use crate::config::NginxConfig;
use crate::ingress::{IngressEntry, IngressUpdate};

/// A rendered nginx.conf together with its content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    text: String,
    digest: String,
}

impl RenderedConfig {
    pub fn new(text: String) -> Self {
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        Self { text, digest }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Hex SHA-256 of the text, used to detect unchanged configs.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn same_content(&self, other: &RenderedConfig) -> bool {
        self.digest == other.digest
    }
}

#[derive(Debug)]
struct Upstream {
    server: String,
}

#[derive(Debug)]
struct Location<'a> {
    path: String,
    upstream: String,
    entry: &'a IngressEntry,
}

/// Render the complete nginx configuration for a snapshot of entries.
pub fn render(config: &NginxConfig, update: &IngressUpdate) -> RenderedConfig {
    let mut seen = HashSet::new();
    let mut upstreams: BTreeMap<String, Upstream> = BTreeMap::new();
    let mut servers: BTreeMap<&str, Vec<Location<'_>>> = BTreeMap::new();

    for entry in &update.entries {
        let key = entry.route_key();
        let path = key.1.clone();
        if !seen.insert(key) {
            tracing::debug!(
                host = %entry.host,
                path = %path,
                ingress = %format!("{}/{}", entry.namespace, entry.name),
                "Ignoring duplicate host and path"
            );
            continue;
        }

        let upstream = format!("{}.{}.{}", entry.namespace, entry.service_address, entry.service_port);
        upstreams.entry(upstream.clone()).or_insert_with(|| Upstream {
            server: format!("{}:{}", entry.service_address, entry.service_port),
        });

        servers.entry(entry.host.as_str()).or_default().push(Location {
            path,
            upstream,
            entry,
        });
    }

    for locations in servers.values_mut() {
        locations.sort_by(|a, b| a.path.cmp(&b.path));
    }

    let mut text = String::new();
    // Writing into a String cannot fail.
    let _ = write_config(&mut text, config, &upstreams, &servers);
    RenderedConfig::new(text)
}

fn write_config(
    out: &mut String,
    config: &NginxConfig,
    upstreams: &BTreeMap<String, Upstream>,
    servers: &BTreeMap<&str, Vec<Location<'_>>>,
) -> fmt::Result {
    let working_dir = config.working_dir.display();

    writeln!(out, "# Generated by feed-ingress. Changes will be overwritten.")?;
    writeln!(out, "daemon off;")?;
    writeln!(out)?;
    writeln!(out, "worker_processes {};", config.worker_processes)?;
    writeln!(out, "pid {};", config.pid_path().display())?;
    writeln!(out)?;
    writeln!(out, "error_log stderr {};", config.log_level)?;
    writeln!(out)?;
    writeln!(out, "events {{")?;
    writeln!(out, "    # Accept connections as fast as possible.")?;
    writeln!(out, "    multi_accept on;")?;
    writeln!(out, "    # Includes both proxy and client connections.")?;
    writeln!(out, "    worker_connections {};", config.worker_connections)?;
    writeln!(out, "    use epoll;")?;
    writeln!(out, "}}")?;
    writeln!(out)?;
    writeln!(out, "http {{")?;
    writeln!(out, "    default_type text/html;")?;
    writeln!(out)?;
    writeln!(out, "    # Keep alive time for client connections. Don't limit by number of requests.")?;
    writeln!(out, "    keepalive_timeout {}s;", config.keepalive_seconds)?;
    writeln!(out, "    keepalive_requests 2147483647;")?;
    writeln!(out)?;
    writeln!(out, "    # Optimize for latency over throughput for persistent connections.")?;
    writeln!(out, "    tcp_nodelay on;")?;
    writeln!(out)?;
    writeln!(out, "    # Disable nginx version leakage to external clients.")?;
    writeln!(out, "    server_tokens off;")?;
    writeln!(out)?;

    if config.server_names_hash_max_size >= 0 {
        writeln!(out, "    server_names_hash_max_size {};", config.server_names_hash_max_size)?;
    }
    if config.server_names_hash_bucket_size >= 0 {
        writeln!(out, "    server_names_hash_bucket_size {};", config.server_names_hash_bucket_size)?;
    }

    writeln!(out, "    # Obtain the client address from the trusted frontends.")?;
    for cidr in &config.trusted_frontends {
        writeln!(out, "    set_real_ip_from {};", cidr)?;
    }
    let real_ip_header = if config.proxy_protocol {
        "proxy_protocol"
    } else {
        "X-Forwarded-For"
    };
    writeln!(out, "    real_ip_header {};", real_ip_header)?;
    if !config.trusted_frontends.is_empty() {
        writeln!(out, "    real_ip_recursive on;")?;
    }
    writeln!(out)?;

    write_access_log(out, config)?;

    writeln!(out, "    # Put all temporary data into the working directory.")?;
    for kind in ["client_body", "proxy", "fastcgi", "uwsgi", "scgi"] {
        writeln!(out, "    {}_temp_path {}/tmp_{} 1 2;", kind, working_dir, kind)?;
    }
    writeln!(out)?;
    writeln!(out, "    # Proxy settings shared by every location.")?;
    writeln!(out, "    proxy_http_version 1.1;")?;
    writeln!(out, "    proxy_set_header Connection \"\";")?;
    writeln!(out, "    proxy_set_header Host $host;")?;
    writeln!(out, "    proxy_set_header X-Real-IP $remote_addr;")?;
    writeln!(out, "    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;")?;
    writeln!(out, "    proxy_set_header X-Forwarded-Proto $scheme;")?;
    writeln!(out, "    proxy_set_header X-Original-URI $request_uri;")?;
    writeln!(out, "    proxy_connect_timeout {}s;", config.backend_connect_timeout_seconds)?;
    writeln!(out)?;
    writeln!(out, "    # Per host and path traffic statistics.")?;
    writeln!(out, "    vhost_traffic_status_zone;")?;

    for (id, upstream) in upstreams {
        writeln!(out)?;
        writeln!(out, "    upstream {} {{", id)?;
        writeln!(out, "        server {};", upstream.server)?;
        writeln!(out, "        keepalive {};", config.backend_keepalives)?;
        writeln!(out, "    }}")?;
    }

    let listen_suffix = if config.proxy_protocol { " proxy_protocol" } else { "" };
    for (host, locations) in servers {
        writeln!(out)?;
        write_server(out, config.ingress_port, listen_suffix, host, locations)?;
    }

    writeln!(out)?;
    writeln!(out, "    # Reject requests for unknown hosts.")?;
    writeln!(out, "    server {{")?;
    writeln!(out, "        listen {}{} default_server;", config.ingress_port, listen_suffix)?;
    writeln!(out, "        location / {{")?;
    writeln!(out, "            return 404;")?;
    writeln!(out, "        }}")?;
    writeln!(out, "    }}")?;
    writeln!(out)?;
    writeln!(out, "    # Status server. Only reachable from inside the node.")?;
    writeln!(out, "    server {{")?;
    writeln!(out, "        listen {};", config.health_port)?;
    writeln!(out, "        location /health {{")?;
    writeln!(out, "            access_log off;")?;
    writeln!(out, "            return 200;")?;
    writeln!(out, "        }}")?;
    writeln!(out, "        location /basic_status {{")?;
    writeln!(out, "            access_log off;")?;
    writeln!(out, "            stub_status;")?;
    writeln!(out, "        }}")?;
    writeln!(out, "        location /status {{")?;
    writeln!(out, "            access_log off;")?;
    writeln!(out, "            vhost_traffic_status_display;")?;
    writeln!(out, "            vhost_traffic_status_display_format html;")?;
    writeln!(out, "        }}")?;
    writeln!(out, "    }}")?;
    writeln!(out, "}}")
}

fn write_access_log(out: &mut String, config: &NginxConfig) -> fmt::Result {
    let headers: String = config
        .log_headers
        .iter()
        .map(|h| format!("{}=$http_{} ", h, h.replace('-', "_")))
        .collect();

    writeln!(out, "    # Access log format, including captured request headers.")?;
    writeln!(out, "    log_format upstream_info '$remote_addr - $remote_user [$time_local] '")?;
    writeln!(out, "                             '\"$request\" $status {}$body_bytes_sent '", headers)?;
    writeln!(out, "                             '\"$http_referer\" \"$http_user_agent\" $request_length $request_time '")?;
    writeln!(out, "                             '$upstream_addr $upstream_response_length $upstream_response_time $upstream_status';")?;
    if config.access_log {
        writeln!(
            out,
            "    access_log {}/access.log upstream_info buffer=32k flush=1m;",
            config.access_log_dir.display()
        )?;
    } else {
        writeln!(out, "    access_log off;")?;
    }
    writeln!(out)
}

fn write_server(
    out: &mut String,
    port: u16,
    listen_suffix: &str,
    host: &str,
    locations: &[Location<'_>],
) -> fmt::Result {
    let mut ingresses: Vec<String> = Vec::new();
    for location in locations {
        let name = format!("{}/{}", location.entry.namespace, location.entry.name);
        if !ingresses.contains(&name) {
            ingresses.push(name);
        }
    }

    writeln!(out, "    # ingress: {}", ingresses.join(" "))?;
    writeln!(out, "    server {{")?;
    writeln!(out, "        listen {}{};", port, listen_suffix)?;
    writeln!(out, "        server_name {};", host)?;
    writeln!(out)?;
    writeln!(out, "        # disable any limits to avoid HTTP 413 for large uploads")?;
    writeln!(out, "        client_max_body_size 0;")?;

    for location in locations {
        writeln!(out)?;
        write_location(out, location)?;
    }

    writeln!(out, "    }}")
}

fn write_location(out: &mut String, location: &Location<'_>) -> fmt::Result {
    let entry = location.entry;

    writeln!(out, "        location {} {{", location.path)?;
    if entry.strip_paths {
        writeln!(out, "            # Strip location path when proxying.")?;
        writeln!(out, "            # Beware this can cause issues with url encoded characters.")?;
        writeln!(out, "            proxy_pass http://{}/;", location.upstream)?;
    } else {
        writeln!(out, "            # Keep original path when proxying.")?;
        writeln!(out, "            proxy_pass http://{};", location.upstream)?;
    }
    writeln!(out)?;
    writeln!(out, "            # Set display name for vhost stats.")?;
    writeln!(
        out,
        "            vhost_traffic_status_filter_by_set_key {}::$proxy_host $server_name;",
        location.path
    )?;
    writeln!(out)?;
    writeln!(out, "            # Close proxy connections after backend keepalive time.")?;
    writeln!(out, "            proxy_read_timeout {}s;", entry.backend_keep_alive_seconds)?;
    writeln!(out, "            proxy_send_timeout {}s;", entry.backend_keep_alive_seconds)?;
    writeln!(out)?;
    writeln!(out, "            # Allow localhost for debugging")?;
    writeln!(out, "            allow 127.0.0.1;")?;
    writeln!(out)?;
    writeln!(out, "            # Restrict clients")?;
    for cidr in entry.allowed() {
        writeln!(out, "            allow {};", cidr)?;
    }
    writeln!(out, "            ")?;
    writeln!(out, "            deny all;")?;
    writeln!(out, "        }}")
}
