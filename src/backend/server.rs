//! A single upstream server and its liveness flag.

use crate::proxy::{Forward, ProxyBody, ProxyError, ReverseProxy};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// One upstream target.
///
/// The liveness flag sits behind a read/write lock so dispatching requests
/// can read it concurrently while the health checker writes it. The lock is
/// only held for the flag access itself, never across forwarding.
pub struct Backend {
    url: Url,
    alive: RwLock<bool>,
    proxy: Arc<dyn Forward>,
}

impl Backend {
    /// Create a backend that forwards through `proxy`. Starts alive.
    pub fn new(url: Url, proxy: Arc<dyn Forward>) -> Self {
        Self {
            url,
            alive: RwLock::new(true),
            proxy,
        }
    }

    /// Create a backend with a [`ReverseProxy`] bound to its own URL.
    pub fn with_reverse_proxy(url: Url, connect_timeout: Duration) -> Result<Self, ProxyError> {
        let proxy = ReverseProxy::new(url.clone(), connect_timeout)?;
        Ok(Self::new(url, Arc::new(proxy)))
    }

    /// The upstream URL this backend was configured with.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_alive(&self, alive: bool) {
        *self.alive.write() = alive;
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.read()
    }

    /// Hand `req` to this backend's proxying delegate.
    pub async fn forward(&self, req: Request<Full<Bytes>>) -> Result<Response<ProxyBody>, ProxyError> {
        self.proxy.forward(req).await
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("url", &self.url.as_str())
            .field("alive", &self.is_alive())
            .finish()
    }
}
