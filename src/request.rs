//! Logical requests: what the caller submits, immutable once built.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

/// One logical request: a unit of work that the retry executor drives
/// end-to-end as a bounded sequence of attempts.
///
/// Immutable once submitted; the core only reads it.
#[derive(Debug, Clone)]
pub struct LogicalRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Bytes>,
    pub(crate) idempotent: bool,
    /// Overall deadline budget, measured from submit.
    pub(crate) timeout: Option<Duration>,
    /// Per-attempt timeout; overrides the client default when set.
    pub(crate) attempt_timeout: Option<Duration>,
    pub(crate) cancel: CancellationToken,
    pub(crate) request_id: String,
}

impl LogicalRequest {
    /// Start building a request. The URL must be absolute with a host.
    pub fn builder(method: Method, url: &str) -> Result<RequestBuilder> {
        let url = Url::parse(url)
            .map_err(|e| Error::invalid_request(format!("unparseable URL {url:?}: {e}")))?;
        if url.host_str().is_none() {
            return Err(Error::invalid_request(format!("URL {url} has no host")));
        }
        let idempotent = method_is_idempotent(&method);
        Ok(RequestBuilder {
            request: LogicalRequest {
                method,
                url,
                headers: HeaderMap::new(),
                body: None,
                idempotent,
                timeout: None,
                attempt_timeout: None,
                cancel: CancellationToken::new(),
                request_id: Uuid::new_v4().to_string(),
            },
        })
    }

    pub fn get(url: &str) -> Result<RequestBuilder> {
        Self::builder(Method::GET, url)
    }

    pub fn post(url: &str) -> Result<RequestBuilder> {
        Self::builder(Method::POST, url)
    }

    pub fn put(url: &str) -> Result<RequestBuilder> {
        Self::builder(Method::PUT, url)
    }

    pub fn delete(url: &str) -> Result<RequestBuilder> {
        Self::builder(Method::DELETE, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn idempotent(&self) -> bool {
        self.idempotent
    }

    /// Client-generated correlation id, propagated as `x-request-id`.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Identity of the upstream target this request addresses:
    /// `scheme://host:port`. Throttle and breaker state are keyed by this.
    pub fn target(&self) -> String {
        let scheme = self.url.scheme();
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port_or_known_default() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        }
    }
}

/// Builder for [`LogicalRequest`].
#[derive(Debug)]
pub struct RequestBuilder {
    request: LogicalRequest,
}

impl RequestBuilder {
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::try_from(name)
            .map_err(|e| Error::invalid_request(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| Error::invalid_request(format!("invalid header value: {e}")))?;
        self.request.headers.insert(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Override the idempotency inferred from the HTTP method.
    ///
    /// Non-idempotent requests are not retried after ambiguous post-send
    /// failures (unless the policy opts in).
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.request.idempotent = idempotent;
        self
    }

    /// Overall deadline budget for the whole logical request, retries and
    /// backoff included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Per-attempt timeout. Takes precedence over the client-wide default.
    pub fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.request.attempt_timeout = Some(attempt_timeout);
        self
    }

    /// Cancellation token observed during throttle waits, backoff sleeps and
    /// in-flight attempts.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.request.cancel = cancel;
        self
    }

    pub fn build(self) -> LogicalRequest {
        self.request
    }
}

/// RFC 9110 idempotent methods. POST and PATCH are not.
fn method_is_idempotent(method: &Method) -> bool {
    matches!(
        method.as_str(),
        "GET" | "HEAD" | "OPTIONS" | "TRACE" | "PUT" | "DELETE"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_inferred_from_method() {
        let get = LogicalRequest::get("https://api.example.com/v1/users")
            .unwrap()
            .build();
        assert!(get.idempotent());

        let post = LogicalRequest::post("https://api.example.com/v1/users")
            .unwrap()
            .build();
        assert!(!post.idempotent());

        let put = LogicalRequest::put("https://api.example.com/v1/users/7")
            .unwrap()
            .build();
        assert!(put.idempotent());
    }

    #[test]
    fn idempotency_override_wins() {
        let post = LogicalRequest::post("https://api.example.com/v1/charges")
            .unwrap()
            .idempotent(true)
            .build();
        assert!(post.idempotent());
    }

    #[test]
    fn target_includes_scheme_host_and_port() {
        let req = LogicalRequest::get("https://api.example.com/v1/users?page=2")
            .unwrap()
            .build();
        assert_eq!(req.target(), "https://api.example.com:443");

        let req = LogicalRequest::get("http://localhost:8080/health")
            .unwrap()
            .build();
        assert_eq!(req.target(), "http://localhost:8080");
    }

    #[test]
    fn same_host_different_ports_are_distinct_targets() {
        let a = LogicalRequest::get("http://upstream:8080/a").unwrap().build();
        let b = LogicalRequest::get("http://upstream:9090/b").unwrap().build();
        assert_ne!(a.target(), b.target());
    }

    #[test]
    fn bad_urls_are_rejected() {
        assert!(LogicalRequest::get("not a url").is_err());
        assert!(LogicalRequest::get("file:///etc/passwd").is_err());
    }

    #[test]
    fn request_ids_are_unique() {
        let a = LogicalRequest::get("https://api.example.com/").unwrap().build();
        let b = LogicalRequest::get("https://api.example.com/").unwrap().build();
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn invalid_header_is_rejected() {
        let res = LogicalRequest::get("https://api.example.com/")
            .unwrap()
            .header("bad header", "x");
        assert!(res.is_err());
    }
}
