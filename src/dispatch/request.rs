//! Replayable copy of an inbound request.

use crate::proxy::{add_forwarding_headers, remove_hop_headers};
use crate::util::RequestId;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::HeaderValue;
use hyper::{HeaderMap, Method, Request, Uri, Version};
use std::error::Error as StdError;
use std::net::SocketAddr;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Why an inbound body could not be buffered.
#[derive(Debug, thiserror::Error)]
pub enum ReadBodyError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Body(#[source] BoxError),
}

/// Inbound request with its body fully read, so it can be sent again after
/// a forwarding failure.
#[derive(Debug, Clone)]
pub struct BufferedRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    request_id: RequestId,
}

impl BufferedRequest {
    /// Read the body of `req`, at most `max_body_size` bytes, and prepare it
    /// for forwarding.
    ///
    /// Hop-by-hop headers are dropped, the client is appended to
    /// `X-Forwarded-For`, and an `X-Request-Id` is added when missing.
    pub async fn read<B>(
        req: Request<B>,
        client_addr: SocketAddr,
        max_body_size: usize,
    ) -> Result<Self, ReadBodyError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                return Err(ReadBodyError::TooLarge {
                    limit: max_body_size,
                });
            }
            Err(e) => return Err(ReadBodyError::Body(e)),
        };

        let mut headers = parts.headers;
        remove_hop_headers(&mut headers);
        add_forwarding_headers(&mut headers, client_addr);

        let request_id = RequestId::from_headers(&headers);
        if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
            headers.insert(RequestId::HEADER, value);
        }

        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers,
            body,
            request_id,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// A fresh request to hand to a backend. Cheap: the body is shared.
    pub fn to_request(&self) -> Request<Full<Bytes>> {
        let mut req = Request::new(Full::new(self.body.clone()));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.version_mut() = self.version;
        *req.headers_mut() = self.headers.clone();
        req
    }
}

impl From<Request<Bytes>> for BufferedRequest {
    fn from(req: Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        let request_id = RequestId::from_headers(&parts.headers);
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            request_id,
        }
    }
}
