//! Tests for decorators and the before/after middleware adapter
//!
//! # Test Coverage
//!
//! - `before` short-circuits without calling the handler
//! - `after` sees value responses and responses produced by futures
//! - Token check middleware answers `401`
//! - The tracing decorator correlates handler events with the request
//! - Composition keeps the terminal handler's kind

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use routecore::context::MemoryContext;
use routecore::dispatcher::{Dispatcher, Handler, HandlerKind, HandlerRequest, HandlerResponse};
use routecore::middleware::{
    compose, from_middleware, Decorator, HeaderTokenMiddleware, Middleware, TracingDecorator,
};
use routecore::route::RouteSpec;
use routecore::router::Router;

mod common;
use common::tracing_capture::TestTracing;
use common::{dispatch, request, text, wait_for_response};

struct MaintenanceMode;

impl Middleware for MaintenanceMode {
    fn before(&self, req: &HandlerRequest) -> Option<HandlerResponse> {
        req.header("x-maintenance")
            .map(|_| HandlerResponse::error(503, "Down for maintenance"))
    }
}

#[derive(Clone, Default)]
struct ServedBy {
    seen: Arc<AtomicUsize>,
}

impl Middleware for ServedBy {
    fn after(&self, _req: &HandlerRequest, res: &mut HandlerResponse, _latency: Duration) {
        self.seen.fetch_add(1, Ordering::SeqCst);
        res.set_header("x-served-by", "routecore");
    }
}

#[test]
fn test_before_short_circuits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);

    let mut router = Router::new();
    router
        .register(
            RouteSpec::new(Method::GET, "/status").decorator(from_middleware(MaintenanceMode)),
            Handler::non_blocking(move |_req| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok("up".into())
            }),
        )
        .unwrap();
    let d = Dispatcher::builder(router.into_shared()).build().unwrap();

    let blocked =
        Arc::new(MemoryContext::new(Method::GET, "/status").with_header("X-Maintenance", "1"));
    dispatch(&d, &blocked);
    assert_eq!(blocked.status(), Some(503));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let open = request(Method::GET, "/status");
    dispatch(&d, &open);
    assert_eq!(open.body_text(), "up");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_after_sees_value_and_future_responses() {
    let rt = common::runtime();
    let served = ServedBy::default();

    let mut router = Router::new();
    router
        .register(
            RouteSpec::new(Method::GET, "/now").decorator(from_middleware(served.clone())),
            text("now"),
        )
        .unwrap();
    router
        .register(
            RouteSpec::new(Method::GET, "/later").decorator(from_middleware(served.clone())),
            Handler::from_future(|_req| async { Ok(HandlerResponse::text(200, "later")) }),
        )
        .unwrap();
    let d = Dispatcher::builder(router.into_shared())
        .runtime(rt.handle().clone())
        .build()
        .unwrap();

    let now = request(Method::GET, "/now");
    dispatch(&d, &now);
    assert_eq!(now.response_header("x-served-by").as_deref(), Some("routecore"));

    let later = request(Method::GET, "/later");
    dispatch(&d, &later);
    wait_for_response(&later);
    assert_eq!(later.body_text(), "later");
    assert_eq!(later.response_header("x-served-by").as_deref(), Some("routecore"));
    assert_eq!(served.seen.load(Ordering::SeqCst), 2);
}

#[test]
fn test_bearer_token_middleware() {
    let mut router = Router::new();
    router
        .register(
            RouteSpec::new(Method::GET, "/secure")
                .decorator(from_middleware(HeaderTokenMiddleware::bearer("s3cret"))),
            text("secret stuff"),
        )
        .unwrap();
    let d = Dispatcher::builder(router.into_shared()).build().unwrap();

    let anonymous = request(Method::GET, "/secure");
    dispatch(&d, &anonymous);
    assert_eq!(anonymous.status(), Some(401));
    assert_eq!(anonymous.body_json()["error"], "Unauthorized");

    let wrong = Arc::new(
        MemoryContext::new(Method::GET, "/secure").with_header("Authorization", "Bearer nope"),
    );
    dispatch(&d, &wrong);
    assert_eq!(wrong.status(), Some(401));

    let authorized = Arc::new(
        MemoryContext::new(Method::GET, "/secure").with_header("Authorization", "Bearer s3cret"),
    );
    dispatch(&d, &authorized);
    assert_eq!(authorized.status(), Some(200));
    assert_eq!(authorized.body_text(), "secret stuff");
}

#[test]
fn test_tracing_decorator_records_request_fields() {
    let capture = TestTracing::init();

    let mut router = Router::new();
    router.decorate(TracingDecorator);
    router
        .get(
            "/traced/{id}",
            Handler::non_blocking(|_req| {
                tracing::info!("inside handler");
                Ok("ok".into())
            }),
        )
        .unwrap();
    let d = Dispatcher::builder(router.into_shared()).build().unwrap();

    let ctx = request(Method::GET, "/traced/9");
    let handle = dispatch(&d, &ctx);
    assert_eq!(ctx.status(), Some(200));

    let output = capture.output();
    let line = output
        .lines()
        .find(|line| line.contains("inside handler"))
        .expect("handler event captured");
    assert!(line.contains(&handle.request_id().to_string()));
    assert!(line.contains("/traced/{id}"));
    assert!(output.contains("Handler returned"));
}

#[test]
fn test_compose_keeps_terminal_kind() {
    let chain: Vec<Arc<dyn Decorator>> = vec![
        Arc::new(|next: Handler| next.with_kind(HandlerKind::NonBlocking)),
        Arc::new(TracingDecorator),
    ];
    let composed = compose(&chain, Handler::blocking(|_req| Ok("work".into())));
    assert_eq!(composed.kind(), HandlerKind::Blocking);
}
