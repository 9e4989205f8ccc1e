//! # Middleware Module
//!
//! Decorators compose around a route's handler once, when the route is
//! registered. The first decorator in a list is the outermost: it runs first
//! on the way in and last on the way out.
//!
//! Besides plain `Fn(Handler) -> Handler` closures, the module provides the
//! [`Middleware`] before/after trait with its [`from_middleware`] adapter, a
//! span-per-request [`TracingDecorator`] and the [`HeaderTokenMiddleware`]
//! token check.

mod auth;
mod core;
mod tracing;

pub use auth::HeaderTokenMiddleware;
pub use core::{compose, from_middleware, Decorator, Middleware, MiddlewareDecorator};
pub use tracing::TracingDecorator;
