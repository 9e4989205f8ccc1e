use std::any::{Any, TypeId};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use http::StatusCode;
use serde_json::json;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use super::handler::{
    parse_query, HandlerKind, HandlerRequest, HandlerResponse, HandlerResult, Reply, StreamReply,
};
use super::metrics::DispatchMetrics;
use super::writer::{DispatchState, ResponsePhase, ResponseWriter};
use crate::context::Context;
use crate::error::{DispatchError, ResponseError, RouterError, StatusError};
use crate::ids::RequestId;
use crate::route::{ExecutionMode, MediaType, Route};
use crate::router::{MatchResult, RouteMatch, Router};
use crate::runtime_config::{RuntimeConfig, DEFAULT_REQUEST_ID_HEADER};
use crate::worker_pool::{WorkerPool, WorkerPoolConfig};

/// Called for handler, normalization and overload failures.
///
/// Receives the writer of the failed request, the error and the status chosen
/// by the [`StatusMapper`]. If it leaves the response uncommitted the
/// dispatcher writes its default JSON error body.
pub type ErrorHandler = Arc<dyn Fn(&ResponseWriter, &anyhow::Error, StatusCode) + Send + Sync>;

type ErrorMatcher = fn(&anyhow::Error) -> bool;

/// Maps handler error types to response statuses
///
/// Rules are keyed by the error's `TypeId` and checked against every error in
/// the `anyhow` chain, in registration order. [`StatusError`] and
/// [`DispatchError`] always carry their own status and take precedence.
/// Anything unmapped becomes `500`.
///
/// ```
/// use routecore::dispatcher::StatusMapper;
/// use http::StatusCode;
///
/// let mapper = StatusMapper::new().map::<std::num::ParseIntError>(StatusCode::BAD_REQUEST);
/// let err = anyhow::Error::new("x".parse::<u32>().unwrap_err());
/// assert_eq!(mapper.status_for(&err), StatusCode::BAD_REQUEST);
/// assert_eq!(mapper.status_for(&anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR);
/// ```
#[derive(Clone, Default)]
pub struct StatusMapper {
    rules: Vec<(TypeId, StatusCode, ErrorMatcher)>,
}

impl StatusMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer errors of type `E` with `status`; a second mapping for the same
    /// type replaces the first
    #[must_use]
    pub fn map<E>(mut self, status: StatusCode) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<E>();
        self.rules.retain(|(id, _, _)| *id != type_id);
        self.rules.push((type_id, status, contains::<E>));
        self
    }

    #[must_use]
    pub fn status_for(&self, err: &anyhow::Error) -> StatusCode {
        if let Some(e) = find::<StatusError>(err) {
            return e.status;
        }
        if let Some(e) = find::<DispatchError>(err) {
            return e.status();
        }
        self.rules
            .iter()
            .find(|(_, _, matches)| matches(err))
            .map_or(StatusCode::INTERNAL_SERVER_ERROR, |(_, status, _)| *status)
    }
}

impl fmt::Debug for StatusMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusMapper")
            .field("rules", &self.rules.len())
            .finish()
    }
}

fn contains<E: std::error::Error + Send + Sync + 'static>(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<E>())
}

fn find<E: std::error::Error + Send + Sync + 'static>(err: &anyhow::Error) -> Option<&E> {
    err.chain().find_map(|cause| cause.downcast_ref::<E>())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The transport's handle on one dispatched request
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    writer: ResponseWriter,
}

impl DispatchHandle {
    /// The connection closed: stop work for this request.
    ///
    /// Returns `false` when the response had already ended.
    pub fn cancel(&self) -> bool {
        self.writer.cancel()
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.writer.request_id()
    }

    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.writer.state()
    }

    #[must_use]
    pub fn phase(&self) -> ResponsePhase {
        self.writer.phase()
    }

    /// Second terminal writes attempted on this response
    #[must_use]
    pub fn violations(&self) -> Vec<ResponseError> {
        self.writer.violations()
    }

    /// The response was written or cancelled
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(
            self.writer.phase(),
            ResponsePhase::Committed { .. } | ResponsePhase::Cancelled
        )
    }

    #[must_use]
    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }
}

struct Inner {
    router: Arc<Router>,
    pool: Arc<WorkerPool>,
    runtime: Option<Handle>,
    default_mode: ExecutionMode,
    error_handler: Option<ErrorHandler>,
    status_mapper: StatusMapper,
    metrics: Arc<DispatchMetrics>,
    request_id_header: Option<String>,
}

/// Runs matched handlers and writes exactly one response per request
///
/// Cheap to clone; clones share the router, pool and metrics.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Start building a dispatcher over a sealed router
    pub fn builder(router: Arc<Router>) -> DispatcherBuilder {
        DispatcherBuilder::new(router)
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.inner.router
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.inner.pool
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.inner.metrics
    }

    /// Route one request and produce its response.
    ///
    /// Returns once the handler has run inline, been queued on the worker
    /// pool, or been rejected. Async replies complete on the runtime; use the
    /// returned handle to observe or cancel the request.
    pub fn dispatch(&self, ctx: Arc<dyn Context>) -> DispatchHandle {
        let inner = &self.inner;
        let request_id = RequestId::from_context(ctx.as_ref(), inner.request_id_header.as_deref());
        let writer =
            ResponseWriter::with_metrics(Arc::clone(&ctx), request_id, Some(Arc::clone(&inner.metrics)));
        inner.metrics.record_dispatch();

        let method = ctx.method().clone();
        let raw_path = ctx.raw_path();
        let (path, query) = split_target(raw_path);

        let RouteMatch { route, path_params } = match inner.router.match_route(&method, path) {
            MatchResult::Matched(m) => m,
            MatchResult::NotFound => {
                inner.metrics.record_not_found();
                writer.set_state(DispatchState::NotFound);
                debug!(request_id = %request_id, method = %method, path = %path, "Responding 404");
                inner.commit(&writer, HandlerResponse::error(404, "Not Found"));
                return DispatchHandle { writer };
            }
            MatchResult::MethodNotAllowed { allowed } => {
                inner.metrics.record_method_not_allowed();
                writer.set_state(DispatchState::MethodNotAllowed);
                let allow = allowed
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                debug!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    allow = %allow,
                    "Responding 405"
                );
                inner.commit(
                    &writer,
                    HandlerResponse::error(405, "Method Not Allowed").header("allow", allow),
                );
                return DispatchHandle { writer };
            }
        };

        inner.metrics.record_matched();
        writer.set_state(DispatchState::Matched);

        if let Some(rejection) = negotiate(&route, ctx.as_ref()) {
            debug!(
                request_id = %request_id,
                route = %route.pattern(),
                status = rejection.status,
                "Content negotiation failed"
            );
            inner.commit(&writer, rejection);
            return DispatchHandle { writer };
        }

        let mode = inner.effective_mode(&route);
        let query_params = query.map(parse_query).unwrap_or_default();
        let path = path.to_string();
        let request = HandlerRequest {
            request_id,
            method,
            path,
            route: Arc::clone(&route),
            path_params,
            query_params,
            context: ctx,
            response: writer.clone(),
        };

        debug!(
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
            route = %route.pattern(),
            mode = %mode,
            "Dispatching to handler"
        );

        match mode {
            ExecutionMode::Worker => {
                writer.set_state(DispatchState::Dispatched);
                let job_inner = Arc::clone(inner);
                let job_writer = writer.clone();
                let submitted = inner.pool.submit(Box::new(move || {
                    if job_writer.is_cancelled() {
                        debug!(request_id = %job_writer.request_id(), "Skipping cancelled request");
                        return;
                    }
                    let result = execute(&request);
                    job_inner.normalize(&job_writer, result);
                }));
                if let Err(err) = submitted {
                    inner.metrics.record_overload();
                    inner.fail(&writer, err.into());
                }
            }
            ExecutionMode::EventLoop | ExecutionMode::Default => {
                writer.set_state(DispatchState::Dispatched);
                let result = execute(&request);
                inner.normalize(&writer, result);
            }
        }

        DispatchHandle { writer }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.inner.router.len())
            .field("pool", &self.inner.pool)
            .field("default_mode", &self.inner.default_mode)
            .field("has_runtime", &self.inner.runtime.is_some())
            .finish_non_exhaustive()
    }
}

/// Split `path?query#fragment` into path and query
fn split_target(raw: &str) -> (&str, Option<&str>) {
    let raw = raw.split_once('#').map_or(raw, |(before, _)| before);
    match raw.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw, None),
    }
}

/// `415` when a declared body type is not what the request sent, `406` when
/// nothing the route produces is acceptable
fn negotiate(route: &Route, ctx: &dyn Context) -> Option<HandlerResponse> {
    if !route.consumes().is_empty() {
        if let Some(content_type) = ctx.header("content-type") {
            let supported = MediaType::parse(&content_type)
                .is_ok_and(|sent| route.consumes().iter().any(|c| c.matches(&sent)));
            if !supported {
                return Some(HandlerResponse::error(415, "Unsupported Media Type"));
            }
        }
    }
    if !route.produces().is_empty() {
        if let Some(accept) = ctx.header("accept") {
            let ranges = MediaType::parse_list(&accept);
            let acceptable = ranges.is_empty()
                || ranges
                    .iter()
                    .any(|range| route.produces().iter().any(|p| p.matches(range)));
            if !acceptable {
                return Some(HandlerResponse::error(406, "Not Acceptable"));
            }
        }
    }
    None
}

/// Call the handler, turning a panic into an error
fn execute(request: &HandlerRequest) -> HandlerResult {
    let handler = request.route.handler();
    panic::catch_unwind(AssertUnwindSafe(|| handler.call(request.clone()))).unwrap_or_else(
        |payload| Err(DispatchError::HandlerPanicked(panic_message(payload.as_ref())).into()),
    )
}

impl Inner {
    fn effective_mode(&self, route: &Route) -> ExecutionMode {
        match (route.execution_mode(), self.default_mode) {
            (ExecutionMode::Default, ExecutionMode::Default) => match route.handler().kind() {
                HandlerKind::Blocking => ExecutionMode::Worker,
                HandlerKind::NonBlocking => ExecutionMode::EventLoop,
            },
            (ExecutionMode::Default, mode) | (mode, _) => mode,
        }
    }

    /// Turn whatever the handler returned into exactly one response
    fn normalize(self: &Arc<Self>, writer: &ResponseWriter, result: HandlerResult) {
        let reply = match result {
            Ok(reply) => reply,
            Err(err) => return self.fail(writer, err),
        };

        match reply {
            Reply::Value(response) => self.commit(writer, response),
            Reply::Future(future) => {
                let Some(runtime) = &self.runtime else {
                    return self.fail(writer, DispatchError::NoAsyncRuntime.into());
                };
                writer.set_state(DispatchState::AwaitingAsync);
                let inner = Arc::clone(self);
                let task_writer = writer.clone();
                let task = runtime.spawn(async move {
                    match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(Ok(response)) => inner.commit(&task_writer, response),
                        Ok(Err(err)) => inner.fail(&task_writer, err),
                        Err(payload) => inner.fail(
                            &task_writer,
                            DispatchError::HandlerPanicked(panic_message(payload.as_ref())).into(),
                        ),
                    }
                });
                writer.attach_task(task.abort_handle());
            }
            Reply::Stream(stream) => {
                let Some(runtime) = &self.runtime else {
                    return self.fail(writer, DispatchError::NoAsyncRuntime.into());
                };
                writer.set_state(DispatchState::AwaitingAsync);
                let inner = Arc::clone(self);
                let task_writer = writer.clone();
                let task = runtime.spawn(async move {
                    let pumped = AssertUnwindSafe(inner.pump_stream(&task_writer, stream))
                        .catch_unwind()
                        .await;
                    if let Err(payload) = pumped {
                        inner.fail(
                            &task_writer,
                            DispatchError::HandlerPanicked(panic_message(payload.as_ref())).into(),
                        );
                    }
                });
                writer.attach_task(task.abort_handle());
            }
            Reply::Empty => match writer.phase() {
                ResponsePhase::Open => self.commit(writer, HandlerResponse::empty(204)),
                ResponsePhase::Streaming { .. } => {
                    let _ = writer.finish();
                }
                ResponsePhase::Committed { .. } | ResponsePhase::Cancelled => {}
            },
        }
    }

    /// Forward chunks in arrival order. Status and headers go out with the
    /// first chunk so an error before it can still become an error response.
    async fn pump_stream(&self, writer: &ResponseWriter, stream: StreamReply) {
        let StreamReply {
            status,
            headers,
            mut chunks,
        } = stream;
        let mut begun = false;

        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    if !begun {
                        if writer.begin_stream(status, &headers).is_err() {
                            return self.close_abandoned_stream(writer);
                        }
                        begun = true;
                    }
                    if writer.write_chunk(chunk).is_err() {
                        return;
                    }
                }
                Err(err) if begun => {
                    error!(
                        request_id = %writer.request_id(),
                        error = %err,
                        "Stream failed after the first chunk - ending response early"
                    );
                    self.metrics.record_failure();
                    let _ = writer.finish();
                    return;
                }
                Err(err) => return self.fail(writer, err),
            }
        }

        if !begun && writer.begin_stream(status, &headers).is_err() {
            return self.close_abandoned_stream(writer);
        }
        let _ = writer.finish();
    }

    fn commit(&self, writer: &ResponseWriter, response: HandlerResponse) {
        let status = response.status;
        // failures are logged by the writer
        match writer.send(response) {
            Ok(()) => debug!(request_id = %writer.request_id(), status = status, "Response written"),
            Err(_) => self.close_abandoned_stream(writer),
        }
    }

    /// A stream the handler began itself still has to end, even when its
    /// reply was rejected as a second terminal write.
    fn close_abandoned_stream(&self, writer: &ResponseWriter) {
        if writer.finish_open_stream() {
            warn!(
                request_id = %writer.request_id(),
                "Stream begun by handler was left open - ending response"
            );
        }
    }

    fn fail(&self, writer: &ResponseWriter, err: anyhow::Error) {
        let status = self.status_mapper.status_for(&err);
        let request_id = writer.request_id();
        writer.set_state(DispatchState::Failed);
        self.metrics.record_failure();

        if status.is_server_error() {
            error!(request_id = %request_id, status = status.as_u16(), error = %err, "Request failed");
        } else {
            warn!(request_id = %request_id, status = status.as_u16(), error = %err, "Request failed");
        }

        match writer.phase() {
            ResponsePhase::Open => {}
            ResponsePhase::Streaming { .. } => {
                let _ = writer.finish();
                return;
            }
            ResponsePhase::Committed { .. } | ResponsePhase::Cancelled => return,
        }

        if let Some(handler) = &self.error_handler {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(writer, &err, status))).is_err() {
                error!(request_id = %request_id, "Error handler panicked");
            }
        }

        if writer.is_open() {
            self.commit(writer, default_error_response(&err, status, request_id));
        } else {
            self.close_abandoned_stream(writer);
        }
    }
}

/// `{"error", "message", "request_id"}`; server errors never expose the
/// underlying error text
fn default_error_response(
    err: &anyhow::Error,
    status: StatusCode,
    request_id: RequestId,
) -> HandlerResponse {
    let reason = status.canonical_reason().unwrap_or("Error");
    let message = if status.is_server_error() {
        reason.to_string()
    } else if let Some(e) = find::<StatusError>(err) {
        e.message.clone()
    } else {
        err.to_string()
    };

    let mut response = HandlerResponse::json(
        status.as_u16(),
        json!({
            "error": reason,
            "message": message,
            "request_id": request_id.to_string(),
        }),
    );
    if find::<DispatchError>(err).is_some_and(DispatchError::is_retryable) {
        response.set_header("retry-after", "1");
    }
    response
}

/// Configures and builds a [`Dispatcher`]
///
/// ```
/// use routecore::dispatcher::{Dispatcher, Handler};
/// use routecore::router::Router;
/// use routecore::worker_pool::WorkerPoolConfig;
///
/// let mut router = Router::new();
/// router.get("/health", Handler::non_blocking(|_req| Ok("ok".into()))).unwrap();
///
/// let dispatcher = Dispatcher::builder(router.into_shared())
///     .worker_config(WorkerPoolConfig::new(2, 16, 0x40000))
///     .build()
///     .unwrap();
/// assert_eq!(dispatcher.pool().workers(), 2);
/// ```
pub struct DispatcherBuilder {
    router: Arc<Router>,
    pool: Option<Arc<WorkerPool>>,
    worker_config: WorkerPoolConfig,
    runtime: Option<Handle>,
    default_mode: ExecutionMode,
    error_handler: Option<ErrorHandler>,
    status_mapper: StatusMapper,
    metrics: Option<Arc<DispatchMetrics>>,
    request_id_header: Option<String>,
}

impl DispatcherBuilder {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            pool: None,
            worker_config: WorkerPoolConfig::default(),
            runtime: None,
            default_mode: ExecutionMode::Default,
            error_handler: None,
            status_mapper: StatusMapper::new(),
            metrics: None,
            request_id_header: Some(DEFAULT_REQUEST_ID_HEADER.to_string()),
        }
    }

    /// Share an existing pool instead of creating one
    #[must_use]
    pub fn worker_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sizing of the pool created at build time; ignored with [`Self::worker_pool`]
    #[must_use]
    pub fn worker_config(mut self, config: WorkerPoolConfig) -> Self {
        self.worker_config = config;
        self
    }

    /// Runtime that futures and streams are driven on
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    #[must_use]
    pub fn default_mode(mut self, mode: ExecutionMode) -> Self {
        self.default_mode = mode;
        self
    }

    #[must_use]
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ResponseWriter, &anyhow::Error, StatusCode) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn status_mapper(mut self, mapper: StatusMapper) -> Self {
        self.status_mapper = mapper;
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Header a client-supplied request id is read from; `None` always mints
    #[must_use]
    pub fn request_id_header(mut self, header: Option<&str>) -> Self {
        self.request_id_header = header.map(str::to_string);
        self
    }

    /// Apply execution mode, request id header and pool sizing
    #[must_use]
    pub fn with_runtime_config(mut self, config: &RuntimeConfig) -> Self {
        self.default_mode = config.default_execution_mode;
        self.request_id_header = Some(config.request_id_header.clone());
        self.worker_config = config.worker.clone();
        self
    }

    /// Build the dispatcher.
    ///
    /// # Errors
    ///
    /// [`RouterError::NotSealed`] when the router still accepts registrations.
    pub fn build(self) -> Result<Dispatcher, RouterError> {
        if !self.router.is_sealed() {
            return Err(RouterError::NotSealed);
        }

        let pool = self
            .pool
            .unwrap_or_else(|| Arc::new(WorkerPool::new("routecore-worker", self.worker_config)));

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                router: self.router,
                pool,
                runtime: self.runtime,
                default_mode: self.default_mode,
                error_handler: self.error_handler,
                status_mapper: self.status_mapper,
                metrics: self.metrics.unwrap_or_default(),
                request_id_header: self.request_id_header,
            }),
        })
    }
}

impl fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("routes", &self.router.len())
            .field("worker_config", &self.worker_config)
            .field("default_mode", &self.default_mode)
            .finish_non_exhaustive()
    }
}
