//! Per-request dispatch with bounded retries.

use crate::backend::{Backend, ServerPool};
use crate::dispatch::{Attempt, BufferedRequest, DispatchPolicy, ReadBodyError};
use crate::proxy::{error_response, ProxyBody, ProxyError};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Body sent for every request the balancer cannot serve.
pub const SERVICE_UNAVAILABLE_MESSAGE: &str = "Service not available";

/// Terminal dispatch failures. Both render as the same 503 response.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no live backend available")]
    NoLiveBackend,

    #[error("max attempts reached ({attempts})")]
    AttemptsExceeded { attempts: u32 },
}

impl DispatchError {
    /// Response shown to the client.
    pub fn into_response(self) -> Response<ProxyBody> {
        error_response(StatusCode::SERVICE_UNAVAILABLE, SERVICE_UNAVAILABLE_MESSAGE)
    }
}

/// Routes each request to a backend chosen by the pool.
///
/// A forwarding failure is retried against the same backend up to
/// `max_retries` times, `retry_delay` apart. After that the backend is marked
/// dead and a new one is selected as the next attempt. Requests beyond
/// `max_attempts` are rejected.
pub struct Dispatcher {
    pool: Arc<ServerPool>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(pool: Arc<ServerPool>, policy: DispatchPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Serve one inbound request end to end.
    pub async fn handle(&self, req: Request<Incoming>, client_addr: SocketAddr) -> Response<ProxyBody> {
        let request = match BufferedRequest::read(req, client_addr, self.policy.max_body_size).await {
            Ok(request) => request,
            Err(e @ ReadBodyError::TooLarge { .. }) => {
                warn!(client = %client_addr, error = %e, "request body too large");
                return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
            Err(e) => {
                warn!(client = %client_addr, error = %e, "failed to read request body");
                return error_response(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
        };

        match self.dispatch(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    client = %client_addr,
                    path = %request.uri().path(),
                    request_id = %request.request_id(),
                    error = %e,
                    "request not served"
                );
                e.into_response()
            }
        }
    }

    /// Dispatch a request entering the balancer.
    pub async fn dispatch(&self, request: &BufferedRequest) -> Result<Response<ProxyBody>, DispatchError> {
        self.dispatch_from(request, Attempt::first()).await
    }

    /// Dispatch starting from an existing attempt record.
    #[instrument(skip_all, fields(request_id = %request.request_id(), path = %request.uri().path()))]
    pub async fn dispatch_from(
        &self,
        request: &BufferedRequest,
        mut attempt: Attempt,
    ) -> Result<Response<ProxyBody>, DispatchError> {
        loop {
            if self.policy.attempts_exhausted(attempt) {
                warn!(attempts = attempt.attempts, "max attempts reached, terminating");
                return Err(DispatchError::AttemptsExceeded {
                    attempts: attempt.attempts,
                });
            }

            let Some(peer) = self.pool.get_next_peer() else {
                warn!(attempts = attempt.attempts, "no live backend");
                return Err(DispatchError::NoLiveBackend);
            };

            match self.forward_with_retries(&peer, request, attempt).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(
                        backend = %peer.url(),
                        attempts = attempt.attempts,
                        error = %e,
                        "backend unreachable, marking down"
                    );
                    peer.set_alive(false);
                    attempt = attempt.next_attempt();
                }
            }
        }
    }

    /// Forward to `peer`, retrying it while the policy allows.
    async fn forward_with_retries(
        &self,
        peer: &Backend,
        request: &BufferedRequest,
        mut attempt: Attempt,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        loop {
            match peer.forward(request.to_request()).await {
                Ok(response) => {
                    debug!(backend = %peer.url(), %attempt, status = response.status().as_u16(), "request forwarded");
                    return Ok(response);
                }
                Err(e) if self.policy.can_retry(attempt) => {
                    warn!(backend = %peer.url(), %attempt, error = %e, "forwarding failed, retrying");
                    tokio::time::sleep(self.policy.retry_delay).await;
                    attempt = attempt.next_retry();
                }
                Err(e) => return Err(e),
            }
        }
    }
}
