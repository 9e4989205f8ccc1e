//! # Dispatcher Module
//!
//! Takes a request from a transport [`crate::context::Context`], matches it
//! against a sealed [`crate::router::Router`] and runs the route's composed
//! handler, producing exactly one response.
//!
//! ## Request Flow
//!
//! 1. Match: `404` for unknown paths, `405` with `Allow` for known paths with
//!    the wrong method
//! 2. Content negotiation: `415` / `406` when the route declares media types
//!    the request cannot use
//! 3. Execution mode: the route's override, else the dispatcher default, else
//!    inferred from the handler kind (blocking handlers go to the worker pool)
//! 4. The handler runs inline or on the [`crate::worker_pool::WorkerPool`];
//!    a saturated pool sheds the request with `503` and `Retry-After`
//! 5. The [`Reply`] is normalized: values are written at once, futures and
//!    streams are driven on the injected tokio runtime
//!
//! Every write goes through the request's [`ResponseWriter`], which refuses
//! and records a second terminal write.
//!
//! ## Errors
//!
//! Handler errors and panics are mapped to a status by the [`StatusMapper`]
//! and handed to the optional [`ErrorHandler`]. When that leaves the response
//! uncommitted, a JSON body `{"error", "message", "request_id"}` is written.
//! Server errors never echo the underlying error text to the client.

mod core;
mod handler;
mod metrics;
mod writer;

pub use core::{DispatchHandle, Dispatcher, DispatcherBuilder, ErrorHandler, StatusMapper};
pub use handler::{
    Body, Handler, HandlerKind, HandlerRequest, HandlerResponse, HandlerResult, HeaderVec, Reply,
    StreamReply, MAX_INLINE_HEADERS,
};
pub use metrics::DispatchMetrics;
pub use writer::{DispatchState, ResponsePhase, ResponseWriter};
