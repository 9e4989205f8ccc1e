//! The single writer every response goes through.
//!
//! A [`ResponseWriter`] wraps the transport [`Context`] of one request. All
//! writes take the same lock, so stream chunks produced on an async task never
//! interleave with anything else, and the phase recorded under that lock makes
//! a second terminal write detectable instead of silently applied.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use super::handler::{HandlerResponse, HeaderVec};
use super::metrics::DispatchMetrics;
use crate::context::Context;
use crate::error::ResponseError;
use crate::ids::RequestId;

/// Where the response of one request stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePhase {
    /// Nothing written yet
    Open,
    /// Status and headers sent, body chunks may follow
    Streaming { status: u16 },
    /// Response ended
    Committed { status: u16 },
    /// The connection went away before the response ended
    Cancelled,
}

/// Lifecycle of one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Matching,
    NotFound,
    MethodNotAllowed,
    Matched,
    /// Handed to the handler (inline or on the worker pool)
    Dispatched,
    /// Waiting for a future or stream to finish
    AwaitingAsync,
    /// In the error path
    Failed,
    /// Terminal response written
    Written,
    Cancelled,
}

impl DispatchState {
    fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Written | DispatchState::Cancelled)
    }
}

struct WriterState {
    phase: ResponsePhase,
    dispatch: DispatchState,
    violations: Vec<ResponseError>,
    task: Option<AbortHandle>,
}

struct Shared {
    context: Arc<dyn Context>,
    request_id: RequestId,
    metrics: Option<Arc<DispatchMetrics>>,
    started: Instant,
    state: Mutex<WriterState>,
}

/// Write-once handle to a request's response
///
/// Clones share the same state. Handlers receive one in
/// [`super::HandlerRequest::response`] and may write through it directly
/// before returning [`super::Reply::Empty`].
#[derive(Clone)]
pub struct ResponseWriter {
    shared: Arc<Shared>,
}

impl ResponseWriter {
    /// Writer without metrics, for transports and tests driving it directly
    pub fn new(context: Arc<dyn Context>, request_id: RequestId) -> Self {
        Self::with_metrics(context, request_id, None)
    }

    pub(crate) fn with_metrics(
        context: Arc<dyn Context>,
        request_id: RequestId,
        metrics: Option<Arc<DispatchMetrics>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                context,
                request_id,
                metrics,
                started: Instant::now(),
                state: Mutex::new(WriterState {
                    phase: ResponsePhase::Open,
                    dispatch: DispatchState::Matching,
                    violations: Vec::new(),
                    task: None,
                }),
            }),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.shared.request_id
    }

    #[must_use]
    pub fn context(&self) -> &Arc<dyn Context> {
        &self.shared.context
    }

    #[must_use]
    pub fn phase(&self) -> ResponsePhase {
        self.shared.state.lock().phase
    }

    #[must_use]
    pub fn state(&self) -> DispatchState {
        self.shared.state.lock().dispatch
    }

    /// Nothing has been written yet
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.phase() == ResponsePhase::Open
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self.phase(), ResponsePhase::Committed { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.phase() == ResponsePhase::Cancelled
    }

    /// Double-termination attempts recorded so far
    #[must_use]
    pub fn violations(&self) -> Vec<ResponseError> {
        self.shared.state.lock().violations.clone()
    }

    pub(crate) fn set_state(&self, next: DispatchState) {
        let mut state = self.shared.state.lock();
        if !state.dispatch.is_terminal() {
            state.dispatch = next;
        }
    }

    /// Write a complete response and end it.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::AlreadyTerminated`] when a response was already
    ///   committed or a stream begun; the attempt is logged and recorded
    /// - [`ResponseError::Cancelled`] after [`ResponseWriter::cancel`]
    /// - [`ResponseError::Transport`] when the context rejects a write
    pub fn send(&self, response: HandlerResponse) -> Result<(), ResponseError> {
        let mut state = self.shared.state.lock();
        self.check_open(&mut state, response.status)?;

        let HandlerResponse {
            status,
            mut headers,
            body,
        } = response;
        if let Some(content_type) = body.content_type() {
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                headers.push((Arc::from("content-type"), content_type.to_string()));
            }
        }

        let ctx = &self.shared.context;
        let result = (|| {
            ctx.write_status(status)?;
            for (name, value) in &headers {
                ctx.write_header(name, value)?;
            }
            if !body.is_empty() {
                ctx.write_body(body.into_bytes())?;
            }
            ctx.end()
        })();

        self.terminate(&mut state, status);
        result.map_err(|e| self.transport_failure(e))
    }

    /// Send status and headers for a chunked body.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ResponseWriter::send`].
    pub fn begin_stream(&self, status: u16, headers: &HeaderVec) -> Result<(), ResponseError> {
        let mut state = self.shared.state.lock();
        self.check_open(&mut state, status)?;

        let ctx = &self.shared.context;
        let result = (|| {
            ctx.write_status(status)?;
            for (name, value) in headers {
                ctx.write_header(name, value)?;
            }
            Ok::<(), std::io::Error>(())
        })();

        match result {
            Ok(()) => {
                state.phase = ResponsePhase::Streaming { status };
                Ok(())
            }
            Err(e) => {
                self.terminate(&mut state, status);
                Err(self.transport_failure(e))
            }
        }
    }

    /// Append a chunk to a begun stream.
    ///
    /// # Errors
    ///
    /// [`ResponseError::NotStreaming`] when no stream is open,
    /// [`ResponseError::AlreadyTerminated`] after the response ended,
    /// [`ResponseError::Cancelled`] or [`ResponseError::Transport`].
    pub fn write_chunk(&self, chunk: Bytes) -> Result<(), ResponseError> {
        let mut state = self.shared.state.lock();
        let phase = state.phase;
        match phase {
            ResponsePhase::Streaming { status } => {
                if let Err(e) = self.shared.context.write_body(chunk) {
                    self.terminate(&mut state, status);
                    return Err(self.transport_failure(e));
                }
                Ok(())
            }
            ResponsePhase::Open => Err(ResponseError::NotStreaming),
            ResponsePhase::Committed { status } => {
                Err(self.violation(&mut state, ResponseError::AlreadyTerminated { status }))
            }
            ResponsePhase::Cancelled => Err(ResponseError::Cancelled),
        }
    }

    /// End a begun stream.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ResponseWriter::write_chunk`].
    pub fn finish(&self) -> Result<(), ResponseError> {
        let mut state = self.shared.state.lock();
        let phase = state.phase;
        match phase {
            ResponsePhase::Streaming { status } => {
                let result = self.shared.context.end();
                self.terminate(&mut state, status);
                result.map_err(|e| self.transport_failure(e))
            }
            ResponsePhase::Open => Err(ResponseError::NotStreaming),
            ResponsePhase::Committed { status } => {
                Err(self.violation(&mut state, ResponseError::AlreadyTerminated { status }))
            }
            ResponsePhase::Cancelled => Err(ResponseError::Cancelled),
        }
    }

    /// End a stream that was begun but never finished.
    ///
    /// Returns `false` when no stream was open.
    pub(crate) fn finish_open_stream(&self) -> bool {
        let mut state = self.shared.state.lock();
        let ResponsePhase::Streaming { status } = state.phase else {
            return false;
        };
        if let Err(e) = self.shared.context.end() {
            self.transport_failure(e);
        }
        self.terminate(&mut state, status);
        true
    }

    /// Abandon the response because the connection closed.
    ///
    /// Aborts any attached async task. Returns `false` when the response had
    /// already ended or been cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock();
        let phase = state.phase;
        match phase {
            ResponsePhase::Committed { .. } | ResponsePhase::Cancelled => false,
            ResponsePhase::Open | ResponsePhase::Streaming { .. } => {
                state.phase = ResponsePhase::Cancelled;
                state.dispatch = DispatchState::Cancelled;
                if let Some(task) = state.task.take() {
                    task.abort();
                }
                if let Some(metrics) = &self.shared.metrics {
                    metrics.record_terminal(self.shared.started.elapsed(), true);
                }
                debug!(request_id = %self.shared.request_id, "Response cancelled");
                true
            }
        }
    }

    /// Tie an async task to this response so cancellation aborts it
    pub(crate) fn attach_task(&self, task: AbortHandle) {
        let mut state = self.shared.state.lock();
        if state.phase == ResponsePhase::Cancelled {
            task.abort();
        } else {
            state.task = Some(task);
        }
    }

    fn check_open(&self, state: &mut WriterState, attempted: u16) -> Result<(), ResponseError> {
        let phase = state.phase;
        match phase {
            ResponsePhase::Open => Ok(()),
            ResponsePhase::Cancelled => {
                debug!(
                    request_id = %self.shared.request_id,
                    status = attempted,
                    "Write after cancellation dropped"
                );
                Err(ResponseError::Cancelled)
            }
            ResponsePhase::Streaming { status } | ResponsePhase::Committed { status } => {
                Err(self.violation(state, ResponseError::AlreadyTerminated { status }))
            }
        }
    }

    fn terminate(&self, state: &mut WriterState, status: u16) {
        state.phase = ResponsePhase::Committed { status };
        state.dispatch = DispatchState::Written;
        state.task = None;
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_terminal(self.shared.started.elapsed(), false);
        }
    }

    fn violation(&self, state: &mut WriterState, err: ResponseError) -> ResponseError {
        error!(
            request_id = %self.shared.request_id,
            error = %err,
            "Second terminal write on one response - handler or normalization bug"
        );
        state.violations.push(err.clone());
        err
    }

    fn transport_failure(&self, err: std::io::Error) -> ResponseError {
        warn!(
            request_id = %self.shared.request_id,
            error = %err,
            "Transport rejected response write"
        );
        ResponseError::from(err)
    }
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ResponseWriter")
            .field("request_id", &self.shared.request_id)
            .field("phase", &state.phase)
            .field("state", &state.dispatch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryContext;
    use crate::dispatcher::Body;
    use http::Method;

    fn writer() -> (Arc<MemoryContext>, ResponseWriter) {
        let ctx = Arc::new(MemoryContext::new(Method::GET, "/"));
        let writer = ResponseWriter::new(Arc::clone(&ctx) as Arc<dyn Context>, RequestId::new());
        (ctx, writer)
    }

    #[test]
    fn test_send_writes_once() {
        let (ctx, writer) = writer();
        writer.send(HandlerResponse::text(200, "ok")).unwrap();
        assert_eq!(ctx.status(), Some(200));
        assert_eq!(ctx.body_text(), "ok");
        assert_eq!(writer.state(), DispatchState::Written);

        let err = writer.send(HandlerResponse::text(500, "again")).unwrap_err();
        assert_eq!(err, ResponseError::AlreadyTerminated { status: 200 });
        assert_eq!(writer.violations().len(), 1);
        assert_eq!(ctx.body_text(), "ok");
        assert_eq!(ctx.recorded().status_writes, 1);
    }

    #[test]
    fn test_send_adds_missing_content_type() {
        let (ctx, writer) = writer();
        let resp = HandlerResponse::new(200, HeaderVec::new(), Body::Json(serde_json::json!({})));
        writer.send(resp).unwrap();
        assert_eq!(ctx.response_header("content-type").as_deref(), Some("application/json"));
    }

    #[test]
    fn test_stream_lifecycle() {
        let (ctx, writer) = writer();
        assert_eq!(writer.write_chunk(Bytes::from_static(b"x")), Err(ResponseError::NotStreaming));
        writer.begin_stream(200, &HeaderVec::new()).unwrap();
        writer.write_chunk(Bytes::from_static(b"a")).unwrap();
        writer.write_chunk(Bytes::from_static(b"b")).unwrap();
        assert!(matches!(
            writer.send(HandlerResponse::empty(204)),
            Err(ResponseError::AlreadyTerminated { status: 200 })
        ));
        writer.finish().unwrap();
        assert_eq!(ctx.body_text(), "ab");
        assert!(ctx.is_ended());
        assert!(writer.finish().is_err());
        assert_eq!(writer.violations().len(), 2);
    }

    #[test]
    fn test_finish_open_stream() {
        let (ctx, writer) = writer();
        assert!(!writer.finish_open_stream());
        writer.begin_stream(200, &HeaderVec::new()).unwrap();
        writer.write_chunk(Bytes::from_static(b"a")).unwrap();
        assert!(writer.finish_open_stream());
        assert!(ctx.is_ended());
        assert_eq!(writer.phase(), ResponsePhase::Committed { status: 200 });
        assert!(!writer.finish_open_stream());
        assert!(writer.violations().is_empty());
    }

    #[test]
    fn test_cancel_blocks_later_writes() {
        let (ctx, writer) = writer();
        assert!(writer.cancel());
        assert!(!writer.cancel());
        assert_eq!(writer.send(HandlerResponse::empty(200)), Err(ResponseError::Cancelled));
        assert!(writer.violations().is_empty());
        assert_eq!(ctx.status(), None);
        assert_eq!(writer.state(), DispatchState::Cancelled);
    }

    #[test]
    fn test_cancel_after_commit_is_noop() {
        let (_ctx, writer) = writer();
        writer.send(HandlerResponse::empty(204)).unwrap();
        assert!(!writer.cancel());
        assert!(writer.is_committed());
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let (_ctx, writer) = writer();
        writer.send(HandlerResponse::empty(204)).unwrap();
        writer.set_state(DispatchState::Failed);
        assert_eq!(writer.state(), DispatchState::Written);
    }
}
