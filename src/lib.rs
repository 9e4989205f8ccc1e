//! # routecore
//!
//! **routecore** is the request-routing and dispatch core of an HTTP service:
//! a radix-trie router over path patterns, decorator composition around
//! handlers, and a dispatcher that runs each handler inline or on a bounded
//! worker pool and writes exactly one response per request.
//!
//! ## Overview
//!
//! The crate owns no sockets. A transport adapter implements
//! [`context::Context`] for every request it receives and hands it to
//! [`dispatcher::Dispatcher::dispatch`]; everything from matching to the final
//! write happens behind that call.
//!
//! ## Architecture
//!
//! - **[`pattern`]** - Path pattern compilation (`/users/{id:[0-9]+}/*rest`)
//! - **[`router`]** - Route registration, sealing and radix-trie matching
//! - **[`route`]** - Route specs, execution modes and media types
//! - **[`middleware`]** - Decorators composed around handlers at registration
//! - **[`dispatcher`]** - Handler invocation, reply normalization, the single
//!   response writer and dispatch metrics
//! - **[`worker_pool`]** - Bounded pool of named worker threads with load shedding
//! - **[`context`]** - The transport boundary and an in-memory implementation
//! - **[`runtime_config`]** / **[`logging`]** - Explicit configuration and
//!   subscriber setup
//! - **[`error`]** / **[`ids`]** - Error types and ULID request ids
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Transport
//!     participant Dispatcher
//!     participant Router
//!     participant Pool as WorkerPool
//!     participant Handler as Composed Handler
//!     participant Writer as ResponseWriter
//!
//!     Transport->>Dispatcher: dispatch(ctx)
//!     Dispatcher->>Router: match_route(method, path)
//!
//!     alt No Route Match
//!         Dispatcher->>Writer: 404 Not Found
//!     else Wrong Method
//!         Dispatcher->>Writer: 405 + Allow
//!     end
//!
//!     alt EventLoop mode
//!         Dispatcher->>Handler: call inline
//!     else Worker mode
//!         Dispatcher->>Pool: submit(job)
//!         alt Pool Saturated
//!             Dispatcher->>Writer: 503 + Retry-After
//!         end
//!         Pool->>Handler: call on worker thread
//!     end
//!
//!     Handler-->>Dispatcher: Reply (Value / Future / Stream / Empty)
//!     Dispatcher->>Writer: normalize into one terminal write
//!     Writer->>Transport: status, headers, body, end
//! ```
//!
//! ### Key Architectural Patterns
//!
//! 1. **Structural precedence**: literal segments beat parameters, parameters
//!    beat globs, independent of registration order
//! 2. **Build once, share immutably**: routers are sealed before dispatch and
//!    shared through `Arc`
//! 3. **Compose at registration**: decorators wrap the handler once, not per request
//! 4. **Single writer**: all response writes for a request pass one lock
//! 5. **Shed, never queue unboundedly**: the worker pool rejects work past its bound
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use http::Method;
//! use routecore::context::{Context, MemoryContext};
//! use routecore::dispatcher::{Dispatcher, Handler, HandlerResponse};
//! use routecore::router::Router;
//!
//! let mut router = Router::new();
//! router
//!     .get(
//!         "/users/{id}",
//!         Handler::non_blocking(|req| {
//!             let id = req.get_path_param("id").unwrap_or_default();
//!             Ok(HandlerResponse::text(200, format!("user {id}")).into())
//!         }),
//!     )
//!     .unwrap();
//!
//! let dispatcher = Dispatcher::builder(router.into_shared()).build().unwrap();
//!
//! let ctx = Arc::new(MemoryContext::new(Method::GET, "/users/42"));
//! dispatcher.dispatch(ctx.clone() as Arc<dyn Context>);
//! assert_eq!(ctx.status(), Some(200));
//! assert_eq!(ctx.body_text(), "user 42");
//! ```
//!
//! ## Runtime Considerations
//!
//! - Handlers that return futures or streams need a tokio runtime handle
//!   injected with [`dispatcher::DispatcherBuilder::runtime`]; without one
//!   such replies fail with `500`
//! - Blocking handlers run on the worker pool, whose size, queue bound and
//!   stack size come from [`worker_pool::WorkerPoolConfig`]
//! - Nothing is configured globally: logging is installed by the embedding
//!   binary through [`logging::init_logging`]

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod pattern;
pub mod route;
pub mod router;
pub mod runtime_config;
pub mod worker_pool;

pub use context::{Context, MemoryContext};
pub use dispatcher::{
    DispatchHandle, Dispatcher, DispatcherBuilder, Handler, HandlerRequest, HandlerResponse, Reply,
};
pub use error::{DispatchError, ResponseError, RouterError, StatusError};
pub use ids::RequestId;
pub use route::{ExecutionMode, RouteMethod, RouteSpec};
pub use router::{MatchResult, Router};
pub use runtime_config::RuntimeConfig;
pub use worker_pool::{WorkerPool, WorkerPoolConfig};
