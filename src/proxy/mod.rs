//! Request forwarding to a single upstream.
//!
//! A [`Backend`](crate::backend::Backend) owns a [`Forward`] delegate and never
//! looks inside it: the delegate either returns the upstream response or a
//! [`ProxyError`] meaning the backend could not be reached.

mod http_proxy;

pub use http_proxy::{
    add_forwarding_headers, authority_of, error_response, join_path, remove_hop_headers,
    ReverseProxy,
};

use bytes::Bytes;
use futures::future::BoxFuture;
use http_body_util::combinators::BoxBody;
use http_body_util::Full;
use hyper::{Request, Response};

/// Body type of every response handed back to the client.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Capability to forward one HTTP request to a fixed upstream.
pub trait Forward: Send + Sync {
    /// Send `req` upstream and return its response.
    fn forward(&self, req: Request<Full<Bytes>>)
        -> BoxFuture<'_, Result<Response<ProxyBody>, ProxyError>>;
}

/// The upstream could not be reached or stopped answering mid-request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to connect to backend {0}: {1}")]
    Connect(String, std::io::Error),

    #[error("connection timeout to backend {0}")]
    Timeout(String),

    #[error("backend handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("failed to send request to backend: {0}")]
    Send(#[source] hyper::Error),

    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),
}
