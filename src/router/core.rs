//! Router core module: registration, sealing and the per-request match.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Method;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use super::radix::{RequestPath, RouteTrie};
use crate::dispatcher::Handler;
use crate::error::RouterError;
use crate::middleware::{compose, Decorator};
use crate::pattern::Pattern;
use crate::route::{Route, RouteSpec};

/// Maximum number of path parameters before heap allocation.
/// Most routes bind four or fewer (e.g. `/users/{id}/posts/{post_id}`).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the hot path.
///
/// Names are `Arc<str>` shared with the trie, so binding a capture is an
/// atomic increment rather than a string copy. Values are per-request.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Matching above this duration is logged as slow
const SLOW_MATCH: Duration = Duration::from_millis(1);

/// A request path resolved to a route
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route
    pub route: Arc<Route>,
    /// Decoded path parameters in path order; globs carry the raw remainder
    pub path_params: ParamVec,
}

impl RouteMatch {
    /// Get a path parameter by name
    #[inline]
    #[must_use]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| &**k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of [`Router::match_route`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Matched,
    NotFound,
    MethodNotAllowed,
}

/// Result of matching a method and path against the routing table
///
/// `NotFound` and `MethodNotAllowed` are ordinary outcomes, not errors.
#[derive(Debug, Clone)]
pub enum MatchResult {
    /// A route serves the request
    Matched(RouteMatch),
    /// No route matches the path
    NotFound,
    /// The path matches, but only for other methods
    MethodNotAllowed {
        /// Methods the path does answer to, sorted by name
        allowed: Vec<Method>,
    },
}

impl MatchResult {
    #[must_use]
    pub fn status(&self) -> MatchStatus {
        match self {
            MatchResult::Matched(_) => MatchStatus::Matched,
            MatchResult::NotFound => MatchStatus::NotFound,
            MatchResult::MethodNotAllowed { .. } => MatchStatus::MethodNotAllowed,
        }
    }

    #[must_use]
    pub fn route(&self) -> Option<&Arc<Route>> {
        match self {
            MatchResult::Matched(m) => Some(&m.route),
            _ => None,
        }
    }

    /// Captured parameter by name, `None` unless matched
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        match self {
            MatchResult::Matched(m) => m.get_path_param(name),
            _ => None,
        }
    }

    /// Methods reported with `MethodNotAllowed`, empty otherwise
    #[must_use]
    pub fn allowed_methods(&self) -> &[Method] {
        match self {
            MatchResult::MethodNotAllowed { allowed } => allowed,
            _ => &[],
        }
    }
}

/// The route table
///
/// Built single-threaded during bootstrap with [`Router::register`], then
/// frozen with [`Router::seal`]. A sealed router has no interior mutability and
/// is shared between threads as `Arc<Router>`; see [`Router::into_shared`].
///
/// ```
/// use routecore::dispatcher::{Handler, HandlerResponse};
/// use routecore::router::{MatchStatus, Router};
/// use http::Method;
///
/// let mut router = Router::new();
/// router.get("/users/{id}", Handler::non_blocking(|_req| Ok(HandlerResponse::text(200, "user").into()))).unwrap();
/// router.get("/users/me", Handler::non_blocking(|_req| Ok(HandlerResponse::text(200, "me").into()))).unwrap();
/// router.seal();
///
/// let result = router.match_route(&Method::GET, "/users/me");
/// assert_eq!(result.route().unwrap().pattern().as_str(), "/users/me");
/// assert_eq!(router.match_route(&Method::POST, "/users/7").status(), MatchStatus::MethodNotAllowed);
/// ```
#[derive(Default)]
pub struct Router {
    trie: RouteTrie,
    routes: Vec<Arc<Route>>,
    decorators: Vec<Arc<dyn Decorator>>,
    sealed: bool,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a decorator applied to every route registered after this call.
    ///
    /// Router-level decorators run outside the route's own decorators, in the
    /// order they were added.
    pub fn decorate<D: Decorator + 'static>(&mut self, decorator: D) -> &mut Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Register a route.
    ///
    /// Compiles the pattern, composes the router and route decorators around
    /// `handler` once, and inserts the route into the trie.
    ///
    /// # Errors
    ///
    /// - [`RouterError::Sealed`] after [`Router::seal`]
    /// - [`RouterError::PatternSyntax`] when the path does not compile
    /// - [`RouterError::AmbiguousRoute`] when a different parameter name is
    ///   already bound at the same position for an overlapping method
    pub fn register(&mut self, spec: RouteSpec, handler: Handler) -> Result<Arc<Route>, RouterError> {
        if self.sealed {
            warn!(method = %spec.method, path = %spec.path, "Route registration after seal rejected");
            return Err(RouterError::Sealed {
                method: spec.method.to_string(),
                pattern: spec.path,
            });
        }

        let pattern = Pattern::compile(&spec.path)?;
        self.trie.check(&spec.method, &pattern)?;

        let RouteSpec {
            method,
            decorators,
            name,
            execution_mode,
            consumes,
            produces,
            attributes,
            ..
        } = spec;

        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.pattern.as_str() == pattern.as_str())
        {
            warn!(
                method = %method,
                pattern = %pattern,
                "Duplicate route registered; the earlier registration takes precedence"
            );
        }

        let chain: Vec<Arc<dyn Decorator>> = self
            .decorators
            .iter()
            .map(Arc::clone)
            .chain(decorators)
            .collect();
        let decorator_count = chain.len();
        let handler = compose(&chain, handler);

        let route = Arc::new(Route {
            id: self.routes.len(),
            method,
            pattern,
            handler,
            name,
            execution_mode,
            consumes,
            produces,
            attributes,
        });
        self.trie.insert(Arc::clone(&route));
        self.routes.push(Arc::clone(&route));

        debug!(
            route_id = route.id,
            method = %route.method,
            pattern = %route.pattern,
            decorators = decorator_count,
            execution_mode = %route.execution_mode,
            "Route registered"
        );
        Ok(route)
    }

    pub fn get(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>, RouterError> {
        self.register(RouteSpec::new(Method::GET, path), handler)
    }

    pub fn post(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>, RouterError> {
        self.register(RouteSpec::new(Method::POST, path), handler)
    }

    pub fn put(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>, RouterError> {
        self.register(RouteSpec::new(Method::PUT, path), handler)
    }

    pub fn patch(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>, RouterError> {
        self.register(RouteSpec::new(Method::PATCH, path), handler)
    }

    pub fn delete(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>, RouterError> {
        self.register(RouteSpec::new(Method::DELETE, path), handler)
    }

    /// Register a route answering every method without a more specific route
    pub fn any(&mut self, path: &str, handler: Handler) -> Result<Arc<Route>, RouterError> {
        self.register(RouteSpec::any(path), handler)
    }

    /// Freeze the table. Calling it again is a no-op.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }
        self.sealed = true;
        let routes_summary: Vec<String> = self.routes.iter().take(10).map(ToString::to_string).collect();
        info!(
            routes_count = self.routes.len(),
            routes_summary = ?routes_summary,
            routing_algorithm = "segment_trie",
            "Routing table sealed"
        );
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Seal and wrap for sharing between threads
    #[must_use]
    pub fn into_shared(mut self) -> Arc<Self> {
        self.seal();
        Arc::new(self)
    }

    /// Match a request.
    ///
    /// `path` may carry a query string or fragment; both are ignored. Literal
    /// segments always win over parameters and parameters over globs,
    /// whatever the registration order.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str) -> MatchResult {
        let match_start = Instant::now();
        let request_path = RequestPath::parse(path);
        let mut params = ParamVec::new();
        let mut allowed = Vec::new();

        let found = self
            .trie
            .lookup(method, &request_path, &mut params, &mut allowed);
        let match_duration = match_start.elapsed();

        if let Some(route) = found {
            if match_duration > SLOW_MATCH {
                warn!(
                    method = %method,
                    path = %path,
                    route_pattern = %route.pattern,
                    duration_us = match_duration.as_micros(),
                    "Slow route matching detected"
                );
            } else {
                debug!(
                    method = %method,
                    path = %path,
                    route_pattern = %route.pattern,
                    path_params = ?params,
                    duration_us = match_duration.as_micros(),
                    "Route matched"
                );
            }
            return MatchResult::Matched(RouteMatch {
                route,
                path_params: params,
            });
        }

        if allowed.is_empty() {
            debug!(method = %method, path = %path, "No route matched");
            MatchResult::NotFound
        } else {
            sort_methods(&mut allowed);
            debug!(method = %method, path = %path, allowed = ?allowed, "Method not allowed");
            MatchResult::MethodNotAllowed { allowed }
        }
    }

    /// Exact methods registered for `path`, sorted by name.
    ///
    /// Any-method routes are not listed.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods = self.trie.methods_at(&RequestPath::parse(path));
        sort_methods(&mut methods);
        methods
    }

    /// Registered routes in registration order
    #[must_use]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// First route registered under `name`
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|r| r.name() == Some(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Log every registered route at info level
    pub fn dump_routes(&self) {
        info!(count = self.routes.len(), sealed = self.sealed, "Routing table");
        for route in &self.routes {
            info!(
                route_id = route.id,
                method = %route.method,
                pattern = %route.pattern,
                name = route.name().unwrap_or("-"),
                execution_mode = %route.execution_mode,
                "Route"
            );
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .field("decorators", &self.decorators.len())
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}

fn sort_methods(methods: &mut Vec<Method>) {
    methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    methods.dedup();
}

