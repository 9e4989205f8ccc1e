//! Handler-facing request, response and reply types.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use http::Method;
use serde_json::Value;
use smallvec::SmallVec;

use super::writer::ResponseWriter;
use crate::context::{ByteStream, Context};
use crate::ids::RequestId;
use crate::route::Route;
use crate::router::ParamVec;

/// Maximum inline headers before heap allocation
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated response header storage
///
/// Header names are `Arc<str>` so repeated names such as `content-type` are
/// shared rather than copied.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// What a handler returns
pub type HandlerResult = anyhow::Result<Reply>;

type HandlerFn = dyn Fn(HandlerRequest) -> HandlerResult + Send + Sync;

/// Request data passed to a handler
///
/// Cheap to clone: the context, route and writer are shared.
#[derive(Clone)]
pub struct HandlerRequest {
    /// Unique request ID for tracing and correlation
    pub request_id: RequestId,
    /// HTTP method
    pub method: Method,
    /// Request path without query string or fragment
    pub path: String,
    /// The matched route
    pub route: Arc<Route>,
    /// Path parameters extracted from the URL (stack-allocated for ≤8 params)
    pub path_params: ParamVec,
    /// Query string parameters, decoded (stack-allocated for ≤8 params)
    pub query_params: ParamVec,
    /// Transport context the request arrived on
    pub context: Arc<dyn Context>,
    /// The single writer for this request's response
    pub response: ResponseWriter,
}

impl HandlerRequest {
    /// Get a path parameter by name
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| &**k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name
    ///
    /// Uses "last write wins" semantics: for `?limit=10&limit=20` this
    /// returns `20`.
    #[inline]
    #[must_use]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| &**k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get a request header by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.context.header(name)
    }

    /// Take the request body stream from the transport
    #[must_use]
    pub fn body(&self) -> ByteStream {
        self.context.body()
    }
}

impl fmt::Debug for HandlerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRequest")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("route", &self.route.pattern().as_str())
            .field("path_params", &self.path_params)
            .field("query_params", &self.query_params)
            .finish_non_exhaustive()
    }
}

/// Decode `a=1&b=two%20words` into name/value pairs.
///
/// `+` is read as a space; pairs that do not decode are kept raw.
pub(crate) fn parse_query(query: &str) -> ParamVec {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (Arc::from(decode_component(name)), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Response body
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Binary(Bytes),
    Json(Value),
}

impl Body {
    /// Content type implied by the body variant
    #[must_use]
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Body::Empty => None,
            Body::Text(_) => Some("text/plain; charset=utf-8"),
            Body::Binary(_) => Some("application/octet-stream"),
            Body::Json(_) => Some("application/json"),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Text(s) => s.is_empty(),
            Body::Binary(b) => b.is_empty(),
            Body::Json(_) => false,
        }
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Text(s) => Bytes::from(s),
            Body::Binary(b) => b,
            Body::Json(v) => Bytes::from(v.to_string()),
        }
    }
}

/// A complete (non-streaming) response
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    /// HTTP status code (200, 404, 500, etc.)
    pub status: u16,
    /// HTTP response headers (stack-allocated for ≤16 headers)
    pub headers: HeaderVec,
    pub body: Body,
}

impl HandlerResponse {
    /// Create a new response with the given status, headers, and body
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: Body) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a JSON response
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self::with_body(status, Body::Json(body))
    }

    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::with_body(status, Body::Text(body.into()))
    }

    #[must_use]
    pub fn bytes(status: u16, body: impl Into<Bytes>) -> Self {
        Self::with_body(status, Body::Binary(body.into()))
    }

    /// A response without a body
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self::new(status, HeaderVec::new(), Body::Empty)
    }

    /// Create an error response with a JSON `{"error": message}` body
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    fn with_body(status: u16, body: Body) -> Self {
        let mut headers = HeaderVec::new();
        if let Some(content_type) = body.content_type() {
            headers.push((Arc::from("content-type"), content_type.to_string()));
        }
        Self {
            status,
            headers,
            body,
        }
    }

    /// Get a header by name
    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value.into()));
    }

    /// Builder form of [`HandlerResponse::set_header`]
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }
}

impl From<Value> for HandlerResponse {
    fn from(body: Value) -> Self {
        HandlerResponse::json(200, body)
    }
}

impl From<String> for HandlerResponse {
    fn from(body: String) -> Self {
        HandlerResponse::text(200, body)
    }
}

impl From<&str> for HandlerResponse {
    fn from(body: &str) -> Self {
        HandlerResponse::text(200, body)
    }
}

impl From<Bytes> for HandlerResponse {
    fn from(body: Bytes) -> Self {
        HandlerResponse::bytes(200, body)
    }
}

/// A response whose body is produced chunk by chunk
pub struct StreamReply {
    pub status: u16,
    pub headers: HeaderVec,
    /// Chunks in the order they are written; an error ends the response
    pub chunks: BoxStream<'static, anyhow::Result<Bytes>>,
}

impl StreamReply {
    pub fn new<S>(status: u16, chunks: S) -> Self
    where
        S: Stream<Item = anyhow::Result<Bytes>> + Send + 'static,
    {
        Self {
            status,
            headers: HeaderVec::new(),
            chunks: chunks.boxed(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value.into()));
        self
    }
}

impl fmt::Debug for StreamReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReply")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Everything a handler can hand back to the dispatcher
pub enum Reply {
    /// Written immediately
    Value(HandlerResponse),
    /// Written when it resolves; an error goes through the error path
    Future(BoxFuture<'static, anyhow::Result<HandlerResponse>>),
    /// Chunks written in arrival order, then the response is ended
    Stream(StreamReply),
    /// The handler wrote (or will finish) the response itself
    Empty,
}

impl Reply {
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<HandlerResponse>> + Send + 'static,
    {
        Reply::Future(future.boxed())
    }

    pub fn stream<S>(status: u16, chunks: S) -> Self
    where
        S: Stream<Item = anyhow::Result<Bytes>> + Send + 'static,
    {
        Reply::Stream(StreamReply::new(status, chunks))
    }

    /// Short label used in logs
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Reply::Value(_) => "value",
            Reply::Future(_) => "future",
            Reply::Stream(_) => "stream",
            Reply::Empty => "empty",
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Value(resp) => f.debug_tuple("Value").field(resp).finish(),
            Reply::Future(_) => f.write_str("Future(..)"),
            Reply::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
            Reply::Empty => f.write_str("Empty"),
        }
    }
}

impl From<HandlerResponse> for Reply {
    fn from(resp: HandlerResponse) -> Self {
        Reply::Value(resp)
    }
}

impl From<Value> for Reply {
    fn from(body: Value) -> Self {
        Reply::Value(body.into())
    }
}

impl From<String> for Reply {
    fn from(body: String) -> Self {
        Reply::Value(body.into())
    }
}

impl From<&str> for Reply {
    fn from(body: &str) -> Self {
        Reply::Value(body.into())
    }
}

impl From<StreamReply> for Reply {
    fn from(stream: StreamReply) -> Self {
        Reply::Stream(stream)
    }
}

/// Declared return kind of a handler, used to pick a default execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// May block the calling thread; defaults to the worker pool
    Blocking,
    /// Returns quickly (a value, future or stream); safe on the event loop
    NonBlocking,
}

/// A type-erased handler
///
/// Clones share the same closure. Decorators wrap a handler by building a new
/// one around it, usually keeping the inner handler's kind:
///
/// ```
/// use routecore::dispatcher::Handler;
///
/// let inner = Handler::blocking(|_req| Ok("done".into()));
/// let wrapped = Handler::new(inner.kind(), move |req| {
///     tracing::debug!("before");
///     inner.call(req)
/// });
/// assert_eq!(wrapped.kind(), routecore::dispatcher::HandlerKind::Blocking);
/// ```
#[derive(Clone)]
pub struct Handler {
    func: Arc<HandlerFn>,
    kind: HandlerKind,
}

impl Handler {
    pub fn new<F>(kind: HandlerKind, func: F) -> Self
    where
        F: Fn(HandlerRequest) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            kind,
        }
    }

    /// A handler that may block; runs on the worker pool unless overridden
    pub fn blocking<F>(func: F) -> Self
    where
        F: Fn(HandlerRequest) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(HandlerKind::Blocking, func)
    }

    /// A handler that never blocks; runs inline unless overridden
    pub fn non_blocking<F>(func: F) -> Self
    where
        F: Fn(HandlerRequest) -> HandlerResult + Send + Sync + 'static,
    {
        Self::new(HandlerKind::NonBlocking, func)
    }

    /// A handler producing a future
    pub fn from_future<F, Fut>(func: F) -> Self
    where
        F: Fn(HandlerRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HandlerResponse>> + Send + 'static,
    {
        Self::non_blocking(move |req| Ok(Reply::future(func(req))))
    }

    /// A handler producing a `200` chunked body
    pub fn from_stream<F, S>(func: F) -> Self
    where
        F: Fn(HandlerRequest) -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<Bytes>> + Send + 'static,
    {
        Self::non_blocking(move |req| Ok(Reply::stream(200, func(req))))
    }

    /// Same closure, different declared kind
    #[must_use]
    pub fn with_kind(mut self, kind: HandlerKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Invoke the handler
    pub fn call(&self, req: HandlerRequest) -> HandlerResult {
        (self.func)(req)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let params = parse_query("limit=10&q=two+words&tag=a%26b&limit=20&flag");
        let get = |name: &str| {
            params
                .iter()
                .rfind(|(k, _)| &**k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("limit"), Some("20"));
        assert_eq!(get("q"), Some("two words"));
        assert_eq!(get("tag"), Some("a&b"));
        assert_eq!(get("flag"), Some(""));
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn test_response_constructors_set_content_type() {
        let json = HandlerResponse::json(200, serde_json::json!({"ok": true}));
        assert_eq!(json.get_header("Content-Type"), Some("application/json"));
        let text = HandlerResponse::text(201, "hi");
        assert_eq!(text.get_header("content-type"), Some("text/plain; charset=utf-8"));
        assert!(HandlerResponse::empty(204).headers.is_empty());
    }

    #[test]
    fn test_set_header_replaces() {
        let mut resp = HandlerResponse::text(200, "x");
        resp.set_header("Content-Type", "text/html");
        assert_eq!(resp.headers.len(), 1);
        assert_eq!(resp.get_header("content-type"), Some("text/html"));
    }

    #[test]
    fn test_body_into_bytes() {
        assert_eq!(Body::Json(serde_json::json!([1, 2])).into_bytes(), Bytes::from("[1,2]"));
        assert!(Body::Empty.into_bytes().is_empty());
        assert!(Body::Text(String::new()).is_empty());
    }

    #[test]
    fn test_handler_kind() {
        let h = Handler::blocking(|_req| Ok(Reply::Empty));
        assert_eq!(h.kind(), HandlerKind::Blocking);
        assert_eq!(h.with_kind(HandlerKind::NonBlocking).kind(), HandlerKind::NonBlocking);
        let f = Handler::from_future(|_req| async { Ok(HandlerResponse::empty(204)) });
        assert_eq!(f.kind(), HandlerKind::NonBlocking);
    }
}
