//! HTTP reverse proxy bound to one upstream URL.
//!
//! Provides HTTP/1.1 proxying with path joining and forwarding headers.

use crate::proxy::{Forward, ProxyBody, ProxyError};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE, HOST};
use hyper::{HeaderMap, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};
use url::Url;

/// Headers that only apply to a single connection and are never forwarded.
const HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Single-host reverse proxy.
///
/// Every call opens a fresh connection to the target; the request path is
/// joined onto the target's base path and the client's `Host` header is kept.
#[derive(Debug, Clone)]
pub struct ReverseProxy {
    target: Url,
    /// `host:port` dialed for every request.
    authority: String,
    connect_timeout: Duration,
}

impl ReverseProxy {
    /// Create a proxy for `target`.
    pub fn new(target: Url, connect_timeout: Duration) -> Result<Self, ProxyError> {
        let authority = authority_of(&target)
            .ok_or_else(|| ProxyError::InvalidTarget(target.to_string()))?;

        Ok(Self {
            target,
            authority,
            connect_timeout,
        })
    }

    /// The upstream base URL.
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// The `host:port` this proxy connects to.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    #[instrument(skip_all, fields(
        backend = %self.authority,
        method = %req.method(),
        path = %req.uri().path()
    ))]
    async fn proxy(&self, mut req: Request<Full<Bytes>>) -> Result<Response<ProxyBody>, ProxyError> {
        let start_time = Instant::now();

        let stream = match timeout(self.connect_timeout, TcpStream::connect(self.authority.as_str())).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProxyError::Connect(self.authority.clone(), e)),
            Err(_) => return Err(ProxyError::Timeout(self.authority.clone())),
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on backend connection");
        }

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(ProxyError::Handshake)?;

        // Spawn connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "backend connection error");
            }
        });

        *req.uri_mut() = self.rewrite_uri(req.uri())?;
        if !req.headers().contains_key(HOST) {
            if let Ok(value) = HeaderValue::from_str(&self.authority) {
                req.headers_mut().insert(HOST, value);
            }
        }

        let response = sender.send_request(req).await.map_err(ProxyError::Send)?;

        let (mut parts, body) = response.into_parts();
        remove_hop_headers(&mut parts.headers);

        debug!(
            status = parts.status.as_u16(),
            duration_ms = start_time.elapsed().as_millis(),
            "backend responded"
        );

        Ok(Response::from_parts(parts, body.boxed()))
    }

    /// Build the origin-form URI sent upstream.
    fn rewrite_uri(&self, uri: &Uri) -> Result<Uri, ProxyError> {
        let path = join_path(self.target.path(), uri.path());

        let query = match (self.target.query().filter(|q| !q.is_empty()), uri.query()) {
            (Some(base), Some(extra)) => Some(format!("{}&{}", base, extra)),
            (Some(base), None) => Some(base.to_string()),
            (None, extra) => extra.map(str::to_string),
        };

        let path_and_query = match query {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };

        path_and_query
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::InvalidTarget(e.to_string()))
    }
}

impl Forward for ReverseProxy {
    fn forward(
        &self,
        req: Request<Full<Bytes>>,
    ) -> BoxFuture<'_, Result<Response<ProxyBody>, ProxyError>> {
        self.proxy(req).boxed()
    }
}

/// `host:port` of an http URL, with the scheme's default port filled in.
pub fn authority_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

/// Join two URL paths with exactly one slash between them.
pub fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Drop hop-by-hop headers, including any named by `Connection`.
pub fn remove_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_HEADERS {
        headers.remove(name);
    }
}

/// Record the client in `X-Forwarded-For`, appending to any prior hops.
pub fn add_forwarding_headers(headers: &mut HeaderMap, client_addr: SocketAddr) {
    let client_ip = client_addr.ip().to_string();

    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client_ip),
        None => client_ip,
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Create a plain-text error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(format!("{}\n", message)))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn proxy_for(target: &str) -> ReverseProxy {
        ReverseProxy::new(target.parse().unwrap(), Duration::from_secs(1)).unwrap()
    }

    /// Serve one connection with a fixed response and hand back what was received.
    async fn one_shot_backend(response: &'static str) -> (SocketAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        (addr, handle)
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("/", "/api"), "/api");
        assert_eq!(join_path("/base", "/api"), "/base/api");
        assert_eq!(join_path("/base/", "api"), "/base/api");
        assert_eq!(join_path("/base/", "/api"), "/base/api");
        assert_eq!(join_path("/", "/"), "/");
    }

    #[test]
    fn test_authority_defaults_port() {
        assert_eq!(proxy_for("http://example.com").authority(), "example.com:80");
        assert_eq!(proxy_for("http://127.0.0.1:3031").authority(), "127.0.0.1:3031");
    }

    #[test]
    fn test_invalid_target() {
        let result = ReverseProxy::new("unix:/tmp/sock".parse().unwrap(), Duration::from_secs(1));
        assert!(matches!(result, Err(ProxyError::InvalidTarget(_))));
    }

    #[test]
    fn test_rewrite_uri() {
        let proxy = proxy_for("http://127.0.0.1:3031/v1?key=abc");
        let uri: Uri = "http://lb.local/users?page=2".parse().unwrap();
        assert_eq!(proxy.rewrite_uri(&uri).unwrap(), "/v1/users?key=abc&page=2");

        let proxy = proxy_for("http://127.0.0.1:3031");
        let uri: Uri = "/users".parse().unwrap();
        assert_eq!(proxy.rewrite_uri(&uri).unwrap(), "/users");
    }

    #[test]
    fn test_forwarded_for_appends() {
        let client: SocketAddr = "192.168.1.100:12345".parse().unwrap();

        let mut headers = HeaderMap::new();
        add_forwarding_headers(&mut headers, client);
        assert_eq!(headers["x-forwarded-for"], "192.168.1.100");

        add_forwarding_headers(&mut headers, "10.0.0.1:80".parse().unwrap());
        assert_eq!(headers["x-forwarded-for"], "192.168.1.100, 10.0.0.1");
    }

    #[test]
    fn test_remove_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-kept", HeaderValue::from_static("yes"));

        remove_hop_headers(&mut headers);

        assert!(!headers.contains_key("connection"));
        assert!(!headers.contains_key("x-trace"));
        assert!(!headers.contains_key("keep-alive"));
        assert_eq!(headers["x-kept"], "yes");
    }

    #[test]
    fn test_error_response() {
        let resp = error_response(StatusCode::SERVICE_UNAVAILABLE, "Service not available");
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn test_forward_to_backend() {
        let (addr, received) =
            one_shot_backend("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello").await;
        let proxy = proxy_for(&format!("http://{}/app", addr));

        let mut req = Request::new(Full::new(Bytes::new()));
        *req.uri_mut() = "/status?full=1".parse().unwrap();
        req.headers_mut().insert(HOST, HeaderValue::from_static("lb.local"));

        let resp = proxy.forward(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key("connection"));

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");

        let request_text = received.await.unwrap();
        assert!(request_text.starts_with("GET /app/status?full=1 HTTP/1.1\r\n"));
        assert!(request_text.to_lowercase().contains("host: lb.local"));
    }

    #[tokio::test]
    async fn test_forward_connection_refused() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = proxy_for(&format!("http://{}", addr));
        let result = proxy.forward(Request::new(Full::new(Bytes::new()))).await;
        assert!(matches!(result, Err(ProxyError::Connect(..))));
    }
}
