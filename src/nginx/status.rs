//! Periodic scrape of nginx's stub status page.
//!
//! The page looks like:
//! ```text
//! Active connections: 9
//! server accepts handled requests
//!  13287 13286 66627
//! Reading: 2 Writing: 1 Waiting: 8
//! ```

use std::time::Duration;

use metrics::Gauge;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::observability::MetricsRegistry;

pub const CONNECTIONS: &str = "feed_ingress_nginx_connections";
pub const ACCEPTS: &str = "feed_ingress_nginx_accepts";
pub const HANDLED: &str = "feed_ingress_nginx_handled";
pub const REQUESTS: &str = "feed_ingress_nginx_requests";
pub const READING: &str = "feed_ingress_nginx_reading_connections";
pub const WRITING: &str = "feed_ingress_nginx_writing_connections";
pub const WAITING: &str = "feed_ingress_nginx_waiting_connections";

const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a status sample could not be taken.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("unrecognised status page: {0:?}")]
    Unrecognised(String),
}

/// One parsed stub status sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StubStatus {
    pub active: u64,
    pub accepts: u64,
    pub handled: u64,
    pub requests: u64,
    pub reading: u64,
    pub writing: u64,
    pub waiting: u64,
}

impl StubStatus {
    /// Parse the stub status text. Returns `None` if any field is missing.
    pub fn parse(body: &str) -> Option<Self> {
        let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());

        let active = lines.next()?.strip_prefix("Active connections:")?.trim().parse().ok()?;

        if !lines.next()?.starts_with("server accepts handled requests") {
            return None;
        }
        let mut counters = lines.next()?.split_whitespace().map(|v| v.parse::<u64>());
        let accepts = counters.next()?.ok()?;
        let handled = counters.next()?.ok()?;
        let requests = counters.next()?.ok()?;

        let mut reading = None;
        let mut writing = None;
        let mut waiting = None;
        let mut fields = lines.next()?.split_whitespace();
        while let (Some(label), Some(value)) = (fields.next(), fields.next()) {
            let value = value.parse().ok()?;
            match label {
                "Reading:" => reading = Some(value),
                "Writing:" => writing = Some(value),
                "Waiting:" => waiting = Some(value),
                _ => return None,
            }
        }

        Some(Self {
            active,
            accepts,
            handled,
            requests,
            reading: reading?,
            writing: writing?,
            waiting: waiting?,
        })
    }
}

/// Gauges fed from the stub status page.
#[derive(Clone)]
pub struct StatusGauges {
    connections: Gauge,
    accepts: Gauge,
    handled: Gauge,
    requests: Gauge,
    reading: Gauge,
    writing: Gauge,
    waiting: Gauge,
}

impl StatusGauges {
    pub fn register(registry: &MetricsRegistry) -> Self {
        Self {
            connections: registry.gauge(CONNECTIONS),
            accepts: registry.gauge(ACCEPTS),
            handled: registry.gauge(HANDLED),
            requests: registry.gauge(REQUESTS),
            reading: registry.gauge(READING),
            writing: registry.gauge(WRITING),
            waiting: registry.gauge(WAITING),
        }
    }

    pub fn record(&self, status: &StubStatus) {
        self.connections.set(status.active as f64);
        self.accepts.set(status.accepts as f64);
        self.handled.set(status.handled as f64);
        self.requests.set(status.requests as f64);
        self.reading.set(status.reading as f64);
        self.writing.set(status.writing as f64);
        self.waiting.set(status.waiting as f64);
    }
}

/// Scrapes the stub status page on an interval until shutdown.
pub struct StatusPoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    gauges: StatusGauges,
}

impl StatusPoller {
    pub fn new(health_port: u16, interval: Duration, gauges: StatusGauges) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("http://127.0.0.1:{}/basic_status", health_port),
            interval,
            gauges,
        }
    }

    /// Fetch one sample. Errors are logged and leave the gauges unchanged.
    pub async fn poll_once(&self) {
        match self.scrape().await {
            Ok(status) => {
                tracing::trace!(?status, "nginx status");
                self.gauges.record(&status);
            }
            Err(e) => tracing::warn!(url = %self.url, error = %e, "Unable to read nginx status"),
        }
    }

    async fn scrape(&self) -> Result<StubStatus, ScrapeError> {
        let response = self.client.get(&self.url).timeout(SCRAPE_TIMEOUT).send().await?;
        if !response.status().is_success() {
            return Err(ScrapeError::Status(response.status()));
        }
        let body = response.text().await?;
        StubStatus::parse(&body).ok_or(ScrapeError::Unrecognised(body))
    }

    /// Poll immediately, then once per interval.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                _ = shutdown.recv() => {
                    tracing::debug!("Status poller stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Active connections: 9 \n\
        server accepts handled requests\n \
        13287 13286 66627 \n\
        Reading: 2 Writing: 1 Waiting: 8 \n";

    #[test]
    fn test_parse_stub_status() {
        assert_eq!(
            StubStatus::parse(SAMPLE),
            Some(StubStatus {
                active: 9,
                accepts: 13287,
                handled: 13286,
                requests: 66627,
                reading: 2,
                writing: 1,
                waiting: 8,
            })
        );
    }

    #[test]
    fn test_parse_rejects_partial_pages() {
        assert_eq!(StubStatus::parse(""), None);
        assert_eq!(StubStatus::parse("Active connections: 9\n"), None);
        assert_eq!(
            StubStatus::parse(&SAMPLE.replace("Waiting: 8", "Waiting: x")),
            None
        );
        assert_eq!(StubStatus::parse(&SAMPLE.replace(" Waiting: 8", "")), None);
    }

    #[test]
    fn test_record_sets_every_gauge() {
        let registry = MetricsRegistry::new();
        let gauges = StatusGauges::register(&registry);
        gauges.record(&StubStatus::parse(SAMPLE).unwrap());

        assert_eq!(registry.gauge_value(CONNECTIONS), Some(9.0));
        assert_eq!(registry.gauge_value(ACCEPTS), Some(13287.0));
        assert_eq!(registry.gauge_value(HANDLED), Some(13286.0));
        assert_eq!(registry.gauge_value(REQUESTS), Some(66627.0));
        assert_eq!(registry.gauge_value(READING), Some(2.0));
        assert_eq!(registry.gauge_value(WRITING), Some(1.0));
        assert_eq!(registry.gauge_value(WAITING), Some(8.0));
    }

    /// Serve one canned HTTP response on an ephemeral port.
    async fn serve_once(response: &'static str) -> u16 {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        port
    }

    fn poller(port: u16) -> StatusPoller {
        StatusPoller::new(
            port,
            Duration::from_secs(1),
            StatusGauges::register(&MetricsRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_scrape_errors_are_typed() {
        let port = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello").await;
        let err = poller(port).scrape().await.unwrap_err();
        assert!(matches!(err, ScrapeError::Unrecognised(ref body) if body == "hello"));

        let port = serve_once("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let err = poller(port).scrape().await.unwrap_err();
        assert!(matches!(err, ScrapeError::Status(status) if status.as_u16() == 503));
        assert_eq!(err.to_string(), "unexpected status 503 Service Unavailable");

        let err = poller(9).scrape().await.unwrap_err();
        assert!(matches!(err, ScrapeError::Http(_)));
    }

    #[tokio::test]
    async fn test_failed_scrape_leaves_gauges_alone() {
        let registry = MetricsRegistry::new();
        let gauges = StatusGauges::register(&registry);
        gauges.record(&StubStatus::parse(SAMPLE).unwrap());

        // Port 9 (discard) is not listening in test environments.
        let poller = StatusPoller::new(9, Duration::from_secs(1), gauges);
        poller.poll_once().await;

        assert_eq!(registry.gauge_value(CONNECTIONS), Some(9.0));
    }
}
