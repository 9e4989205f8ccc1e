use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dispatcher::{Handler, HandlerRequest, HandlerResponse, Reply};

/// Wraps a handler in another handler
///
/// A decorator may run code before and after delegating to `next`, skip `next`
/// entirely, or translate the error `next` returns. Any
/// `Fn(Handler) -> Handler` closure is a decorator:
///
/// ```
/// use routecore::dispatcher::{Handler, HandlerResponse};
/// use routecore::middleware::{compose, Decorator};
/// use std::sync::Arc;
///
/// let deny_all = |next: Handler| {
///     Handler::new(next.kind(), |_req| Ok(HandlerResponse::error(403, "Forbidden").into()))
/// };
/// let chain: Vec<Arc<dyn Decorator>> = vec![Arc::new(deny_all)];
/// let handler = compose(&chain, Handler::blocking(|_req| Ok("hello".into())));
/// assert_eq!(handler.kind(), routecore::dispatcher::HandlerKind::Blocking);
/// ```
pub trait Decorator: Send + Sync {
    fn decorate(&self, next: Handler) -> Handler;
}

impl<F> Decorator for F
where
    F: Fn(Handler) -> Handler + Send + Sync,
{
    fn decorate(&self, next: Handler) -> Handler {
        self(next)
    }
}

/// Fold `decorators` around `terminal`, first decorator outermost.
///
/// The result keeps the terminal handler's declared kind whatever the
/// decorators report, so the execution mode inferred for a route does not
/// depend on its decorators.
#[must_use]
pub fn compose(decorators: &[Arc<dyn Decorator>], terminal: Handler) -> Handler {
    let kind = terminal.kind();
    decorators
        .iter()
        .rev()
        .fold(terminal, |next, decorator| decorator.decorate(next))
        .with_kind(kind)
}

/// Before/after hooks around a handler
///
/// `before` may answer the request itself by returning a response, in which
/// case the handler is not called. `after` sees value responses, including
/// ones produced by futures, and the time the handler took.
pub trait Middleware: Send + Sync {
    fn before(&self, _req: &HandlerRequest) -> Option<HandlerResponse> {
        None
    }
    fn after(&self, _req: &HandlerRequest, _res: &mut HandlerResponse, _latency: Duration) {}
}

/// A [`Middleware`] used as a [`Decorator`]
pub struct MiddlewareDecorator<M> {
    middleware: Arc<M>,
}

impl<M: Middleware + 'static> MiddlewareDecorator<M> {
    pub fn new(middleware: M) -> Self {
        Self {
            middleware: Arc::new(middleware),
        }
    }
}

/// Adapt a [`Middleware`] into a [`Decorator`]
pub fn from_middleware<M: Middleware + 'static>(middleware: M) -> MiddlewareDecorator<M> {
    MiddlewareDecorator::new(middleware)
}

impl<M: Middleware + 'static> Decorator for MiddlewareDecorator<M> {
    fn decorate(&self, next: Handler) -> Handler {
        let middleware = Arc::clone(&self.middleware);
        Handler::new(next.kind(), move |req| {
            if let Some(early) = middleware.before(&req) {
                return Ok(Reply::Value(early));
            }
            let observed = req.clone();
            let start = Instant::now();
            match next.call(req)? {
                Reply::Value(mut resp) => {
                    middleware.after(&observed, &mut resp, start.elapsed());
                    Ok(Reply::Value(resp))
                }
                Reply::Future(fut) => {
                    let middleware = Arc::clone(&middleware);
                    Ok(Reply::future(async move {
                        let mut resp = fut.await?;
                        middleware.after(&observed, &mut resp, start.elapsed());
                        Ok(resp)
                    }))
                }
                other => Ok(other),
            }
        })
    }
}
