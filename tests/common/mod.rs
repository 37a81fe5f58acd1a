//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use feed_ingress::config::NginxConfig;
use feed_ingress::ingress::{IngressEntry, IngressUpdate};

/// How the fake nginx behaves when launched with `-c`.
#[derive(Debug, Clone, Copy)]
pub enum FakeNginx {
    /// Writes its pid file and runs until TERM/QUIT.
    Healthy,
    /// Exits before writing a pid file.
    DiesOnStart,
    /// Runs but never writes a pid file.
    NeverReady,
    /// Ignores the graceful quit request.
    IgnoresQuit,
}

const HEADER: &str = r#"#!/bin/sh
mode=run
signal=
conf=
while [ $# -gt 0 ]; do
    case "$1" in
        -t) mode=test ;;
        -s) mode=signal; signal="$2"; shift ;;
        -c) conf="$2"; shift ;;
    esac
    shift
done
dir=$(dirname "$conf")

if [ "$mode" = test ]; then
    if grep -q invalid-host "$conf"; then
        echo "nginx: [emerg] host not found in upstream \"invalid-host\" in $conf" >&2
        exit 1
    fi
    echo "nginx: configuration file $conf test is successful"
    exit 0
fi

if [ "$mode" = signal ]; then
    echo "$signal" >> "$dir/signals.log"
    if [ "$signal" = quit ]; then
        kill -TERM "$(cat "$dir/nginx.pid")"
    fi
    exit 0
fi
"#;

const RUN_HEALTHY: &str = r#"
trap 'rm -f "$dir/nginx.pid"; exit 0' TERM QUIT
echo $$ > "$dir/nginx.pid"
while true; do sleep 1 & wait $!; done
"#;

const RUN_DIES: &str = r#"
echo "nginx: [emerg] bind() to 0.0.0.0:8080 failed (98: Address already in use)" >&2
exit 1
"#;

const RUN_NEVER_READY: &str = r#"
trap 'exit 0' TERM QUIT
while true; do sleep 1 & wait $!; done
"#;

const RUN_IGNORES_QUIT: &str = r#"
trap '' TERM QUIT
echo $$ > "$dir/nginx.pid"
while true; do sleep 1; done
"#;

/// Write an executable fake nginx into `dir`.
pub fn write_fake_nginx(dir: &Path, behaviour: FakeNginx) -> PathBuf {
    let run = match behaviour {
        FakeNginx::Healthy => RUN_HEALTHY,
        FakeNginx::DiesOnStart => RUN_DIES,
        FakeNginx::NeverReady => RUN_NEVER_READY,
        FakeNginx::IgnoresQuit => RUN_IGNORES_QUIT,
    };
    let path = dir.join("fake-nginx");
    fs::write(&path, format!("{}{}", HEADER, run)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// An nginx config pointing at a fake binary in a fresh working directory.
pub fn nginx_config(dir: &Path, behaviour: FakeNginx) -> NginxConfig {
    let working_dir = dir.join("run");
    fs::create_dir_all(&working_dir).unwrap();
    NginxConfig {
        binary_location: write_fake_nginx(dir, behaviour),
        working_dir,
        health_port: unused_port(),
        update_period_ms: 200,
        startup_timeout_ms: 2_000,
        status_poll_interval_ms: 50,
        shutdown_timeout_ms: 2_000,
        ..NginxConfig::default()
    }
}

/// Control requests the fake nginx received, in order.
pub fn signals(config: &NginxConfig) -> Vec<String> {
    fs::read_to_string(config.working_dir.join("signals.log"))
        .map(|log| log.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn reload_count(config: &NginxConfig) -> usize {
    signals(config).iter().filter(|s| *s == "reload").count()
}

pub fn live_config(config: &NginxConfig) -> String {
    fs::read_to_string(config.config_path()).unwrap()
}

/// Kill the fake nginx without giving it a chance to clean up.
pub fn crash(config: &NginxConfig) {
    let pid = fs::read_to_string(config.pid_path()).unwrap();
    let status = std::process::Command::new("kill")
        .arg("-KILL")
        .arg(pid.trim())
        .status()
        .unwrap();
    assert!(status.success());
}

pub fn entry(host: &str, path: &str, service: &str) -> IngressEntry {
    IngressEntry {
        host: host.into(),
        namespace: "core".into(),
        name: format!("{}-ingress", service),
        path: path.into(),
        service_address: service.into(),
        service_port: 8080,
        backend_keep_alive_seconds: 28,
        ..IngressEntry::default()
    }
}

pub fn update(entries: Vec<IngressEntry>) -> IngressUpdate {
    IngressUpdate::new(entries)
}

pub fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Serve `body` for every request on 127.0.0.1:`port`, like nginx's stub status page.
pub async fn start_status_server(port: u16, body: &'static str) {
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut request = [0u8; 1024];
                        let _ = socket.read(&mut request).await;
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
