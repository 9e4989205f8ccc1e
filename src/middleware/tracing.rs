use std::time::Instant;

use tracing::{debug, info_span, warn, Instrument};

use super::Decorator;
use crate::dispatcher::{Handler, Reply};

/// Opens an `info` span around every invocation of the wrapped handler
///
/// The span carries the request id, method, path and route pattern, so every
/// event the handler emits is correlated. Futures returned by the handler are
/// instrumented with the same span.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDecorator;

impl Decorator for TracingDecorator {
    fn decorate(&self, next: Handler) -> Handler {
        Handler::new(next.kind(), move |req| {
            let span = info_span!(
                "request",
                request_id = %req.request_id,
                method = %req.method,
                path = %req.path,
                route = %req.route.pattern(),
            );
            let start = Instant::now();
            let result = span.in_scope(|| next.call(req));

            span.in_scope(|| match &result {
                Ok(reply) => debug!(
                    reply = reply.kind_name(),
                    elapsed_us = start.elapsed().as_micros(),
                    "Handler returned"
                ),
                Err(err) => warn!(
                    error = %err,
                    elapsed_us = start.elapsed().as_micros(),
                    "Handler failed"
                ),
            });

            match result? {
                Reply::Future(fut) => Ok(Reply::Future(Box::pin(fut.instrument(span)))),
                other => Ok(other),
            }
        })
    }
}
