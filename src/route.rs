//! # Route Module
//!
//! Route values and the declarations used to build them.
//!
//! A [`RouteSpec`] is what application code hands to
//! [`crate::router::Router::register`]: method, path template, decorators and
//! attributes. Registration compiles the template, composes the decorators
//! around the handler once, and stores the result as an immutable [`Route`]
//! shared through `Arc` by every request that matches it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatcher::Handler;
use crate::middleware::Decorator;
use crate::pattern::Pattern;

/// Where a handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Inline on the thread that delivered the request; the handler must not block
    EventLoop,
    /// On the bounded worker pool; the handler may block
    Worker,
    /// Decided by the dispatcher default, then by the handler's declared kind
    #[default]
    Default,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "event_loop" | "eventloop" => Ok(Self::EventLoop),
            "worker" => Ok(Self::Worker),
            "default" => Ok(Self::Default),
            other => Err(format!("unknown execution mode `{other}`")),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EventLoop => "event_loop",
            Self::Worker => "worker",
            Self::Default => "default",
        })
    }
}

/// Method a route answers to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    /// Exactly this method
    Exact(Method),
    /// Every method not claimed by a more specific route at the same path
    Any,
}

impl RouteMethod {
    /// Whether a request with `method` can be served by this route
    #[must_use]
    pub fn admits(&self, method: &Method) -> bool {
        match self {
            RouteMethod::Exact(m) => m == method,
            RouteMethod::Any => true,
        }
    }

    /// Whether two route methods can be served by the same request
    #[must_use]
    pub fn overlaps(&self, other: &RouteMethod) -> bool {
        match (self, other) {
            (RouteMethod::Exact(a), RouteMethod::Exact(b)) => a == b,
            _ => true,
        }
    }
}

impl From<Method> for RouteMethod {
    fn from(method: Method) -> Self {
        RouteMethod::Exact(method)
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMethod::Exact(m) => f.write_str(m.as_str()),
            RouteMethod::Any => f.write_str("*"),
        }
    }
}

/// A media range such as `application/json` or `text/*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType(mime::Mime);

impl MediaType {
    /// Parse a media type, ignoring surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns the parser error when the text is not a valid media type.
    pub fn parse(raw: &str) -> Result<Self, mime::FromStrError> {
        raw.trim().parse::<mime::Mime>().map(MediaType)
    }

    /// `type/subtype` without parameters
    #[must_use]
    pub fn essence(&self) -> &str {
        self.0.essence_str()
    }

    /// Whether the two ranges overlap, honouring `*` on either side
    #[must_use]
    pub fn matches(&self, other: &MediaType) -> bool {
        let type_ok = self.0.type_() == mime::STAR
            || other.0.type_() == mime::STAR
            || self.0.type_() == other.0.type_();
        let subtype_ok = self.0.subtype() == mime::STAR
            || other.0.subtype() == mime::STAR
            || self.0.subtype() == other.0.subtype();
        type_ok && subtype_ok
    }

    /// Parse a comma separated header value (`Accept`), skipping invalid entries
    /// and ranges with `q=0`
    #[must_use]
    pub fn parse_list(header: &str) -> Vec<MediaType> {
        header
            .split(',')
            .filter_map(|part| MediaType::parse(part).ok())
            .filter(|m| {
                m.0.get_param("q")
                    .and_then(|q| q.as_str().parse::<f32>().ok())
                    .is_none_or(|q| q > 0.0)
            })
            .collect()
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for MediaType {
    type Err = mime::FromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaType::parse(s)
    }
}

/// Declaration of a route, consumed by [`crate::router::Router::register`]
#[derive(Clone)]
pub struct RouteSpec {
    pub(crate) method: RouteMethod,
    pub(crate) path: String,
    pub(crate) decorators: Vec<Arc<dyn Decorator>>,
    pub(crate) name: Option<String>,
    pub(crate) execution_mode: ExecutionMode,
    pub(crate) consumes: Vec<MediaType>,
    pub(crate) produces: Vec<MediaType>,
    pub(crate) attributes: HashMap<String, Value>,
}

impl RouteSpec {
    /// Start a declaration for `method` and `path`
    pub fn new(method: impl Into<RouteMethod>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            decorators: Vec::new(),
            name: None,
            execution_mode: ExecutionMode::Default,
            consumes: Vec::new(),
            produces: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    /// Declaration answering every method
    pub fn any(path: impl Into<String>) -> Self {
        Self::new(RouteMethod::Any, path)
    }

    /// Append a decorator; the first one added runs outermost
    #[must_use]
    pub fn decorator<D: Decorator + 'static>(mut self, decorator: D) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Override where the handler runs
    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// Declare an accepted request `Content-Type`; invalid types are ignored
    /// with a warning
    #[must_use]
    pub fn consumes(mut self, media_type: &str) -> Self {
        match MediaType::parse(media_type) {
            Ok(m) => self.consumes.push(m),
            Err(e) => tracing::warn!(media_type, error = %e, "Ignoring invalid consumes media type"),
        }
        self
    }

    /// Declare a response media type the route can produce
    #[must_use]
    pub fn produces(mut self, media_type: &str) -> Self {
        match MediaType::parse(media_type) {
            Ok(m) => self.produces.push(m),
            Err(e) => tracing::warn!(media_type, error = %e, "Ignoring invalid produces media type"),
        }
        self
    }

    /// Attach a free-form attribute
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn method(&self) -> &RouteMethod {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSpec")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("decorators", &self.decorators.len())
            .field("name", &self.name)
            .field("execution_mode", &self.execution_mode)
            .finish_non_exhaustive()
    }
}

/// A registered route
///
/// Immutable once created; the handler stored here already has every
/// decorator composed around it.
pub struct Route {
    pub(crate) id: usize,
    pub(crate) method: RouteMethod,
    pub(crate) pattern: Pattern,
    pub(crate) handler: Handler,
    pub(crate) name: Option<String>,
    pub(crate) execution_mode: ExecutionMode,
    pub(crate) consumes: Vec<MediaType>,
    pub(crate) produces: Vec<MediaType>,
    pub(crate) attributes: HashMap<String, Value>,
}

impl Route {
    /// Registration sequence number, unique per router
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn method(&self) -> &RouteMethod {
        &self.method
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// The composed handler
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Execution mode declared on the route (`Default` when not overridden)
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    #[must_use]
    pub fn consumes(&self) -> &[MediaType] {
        &self.consumes
    }

    #[must_use]
    pub fn produces(&self) -> &[MediaType] {
        &self.produces
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("name", &self.name)
            .field("execution_mode", &self.execution_mode)
            .field("kind", &self.handler.kind())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}
