//! Active health checker.
//!
//! Periodically probes every backend in the pool and records the result in
//! its liveness flag.

use crate::backend::{Backend, ServerPool};
use crate::config::{HealthCheckConfig, HealthCheckType};
use crate::proxy::authority_of;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

/// Active health checker that probes backend servers.
pub struct HealthChecker {
    /// Pool whose backends are probed and updated.
    pool: Arc<ServerPool>,
    /// Probe type, cadence and timeout.
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(pool: Arc<ServerPool>, config: HealthCheckConfig) -> Self {
        Self { pool, config }
    }

    /// Probe on every tick until shutdown. The first round runs immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval = %humantime::format_duration(self.config.interval),
            check = ?self.config.check_type,
            backends = self.pool.len(),
            "health checker starting"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                    debug!("health check completed");
                }

                _ = shutdown.recv() => {
                    info!("health checker shutting down");
                    break;
                }
            }
        }
    }

    /// Probe every backend concurrently and update its liveness.
    pub async fn check_all(&self) {
        join_all(self.pool.backends().iter().map(|backend| self.check_backend(backend))).await;
    }

    async fn check_backend(&self, backend: &Backend) {
        let result = match authority_of(backend.url()) {
            Some(address) => perform_health_check(&address, &self.config).await,
            None => Err(format!("no address for {}", backend.url())),
        };

        let alive = result.is_ok();
        let was_alive = backend.is_alive();
        if !self.pool.mark_backend_status(backend.url(), alive) {
            warn!(backend = %backend.url(), "probed backend is not in the pool");
            return;
        }

        let status = if alive { "up" } else { "down" };
        match result {
            Err(e) if was_alive => {
                warn!(backend = %backend.url(), status, error = %e, "backend status changed");
            }
            _ if alive != was_alive => {
                info!(backend = %backend.url(), status, "backend status changed");
            }
            Err(e) => debug!(backend = %backend.url(), status, error = %e, "health check failed"),
            Ok(()) => debug!(backend = %backend.url(), status, "health check passed"),
        }
    }
}

/// Perform a single health check on a `host:port` address.
async fn perform_health_check(address: &str, config: &HealthCheckConfig) -> Result<(), String> {
    match config.check_type {
        HealthCheckType::Tcp => tcp_health_check(address, config.timeout).await,
        HealthCheckType::Http => {
            let path = config.path.as_deref().unwrap_or("/");
            http_health_check(address, path, config.expected_status, config.timeout).await
        }
    }
}

/// Perform a TCP health check (connect, then drop the connection).
async fn tcp_health_check(address: &str, check_timeout: Duration) -> Result<(), String> {
    match timeout(check_timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(format!("connection failed: {}", e)),
        Err(_) => Err("connection timeout".to_string()),
    }
}

/// Perform an HTTP health check.
async fn http_health_check(
    address: &str,
    path: &str,
    expected_status: u16,
    check_timeout: Duration,
) -> Result<(), String> {
    let mut stream = match timeout(check_timeout, TcpStream::connect(address)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return Err(format!("connection failed: {}", e)),
        Err(_) => return Err("connection timeout".to_string()),
    };

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, address
    );

    if let Err(e) = stream.write_all(request.as_bytes()).await {
        return Err(format!("write failed: {}", e));
    }

    // The status line fits comfortably in the first read.
    let mut buf = vec![0u8; 1024];
    let n = match timeout(check_timeout, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => n,
        Ok(Ok(_)) => return Err("empty response".to_string()),
        Ok(Err(e)) => return Err(format!("read failed: {}", e)),
        Err(_) => return Err("read timeout".to_string()),
    };

    let response = String::from_utf8_lossy(&buf[..n]);
    let status = parse_http_status(&response)?;

    if status == expected_status {
        Ok(())
    } else {
        Err(format!(
            "unexpected status: {} (expected {})",
            status, expected_status
        ))
    }
}

/// Parse HTTP status code from response.
fn parse_http_status(response: &str) -> Result<u16, String> {
    // Format: "HTTP/1.1 200 OK\r\n..."
    let mut parts = response.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => {
            code.parse().map_err(|_| "invalid status code".to_string())
        }
        _ => Err("invalid HTTP response".to_string()),
    }
}
