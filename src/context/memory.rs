use std::io;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::Method;
use parking_lot::{Condvar, Mutex};

use super::{ByteStream, Context};

/// Everything written to a [`MemoryContext`]
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    /// Last status written
    pub status: Option<u16>,
    /// Response headers in write order
    pub headers: Vec<(String, String)>,
    /// Body chunks in write order
    pub chunks: Vec<Bytes>,
    /// Whether `end` was called
    pub ended: bool,
    /// How many times `write_status` was called
    pub status_writes: usize,
}

/// In-memory [`Context`] that records every response write
///
/// ```
/// use routecore::context::{Context, MemoryContext};
/// use http::Method;
///
/// let ctx = MemoryContext::new(Method::GET, "/health").with_header("Accept", "text/plain");
/// assert_eq!(ctx.header("accept").as_deref(), Some("text/plain"));
/// ctx.write_status(200).unwrap();
/// ctx.end().unwrap();
/// assert!(ctx.is_ended());
/// ```
pub struct MemoryContext {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: Mutex<Option<Bytes>>,
    recorded: Mutex<Recorded>,
    ended: Condvar,
}

impl MemoryContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Mutex::new(None),
            recorded: Mutex::new(Recorded::default()),
            ended: Condvar::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        *self.body.lock() = Some(body.into());
        self
    }

    /// Snapshot of what has been written so far
    #[must_use]
    pub fn recorded(&self) -> Recorded {
        self.recorded.lock().clone()
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.recorded.lock().status
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.recorded.lock().ended
    }

    /// First response header with `name`, compared case-insensitively
    #[must_use]
    pub fn response_header(&self, name: &str) -> Option<String> {
        self.recorded
            .lock()
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// All body chunks joined together
    #[must_use]
    pub fn body_bytes(&self) -> Bytes {
        let recorded = self.recorded.lock();
        let mut buf = BytesMut::new();
        for chunk in &recorded.chunks {
            buf.extend_from_slice(chunk);
        }
        buf.freeze()
    }

    /// Body decoded as UTF-8 (lossy)
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body_bytes()).into_owned()
    }

    /// Body parsed as JSON, `Value::Null` when it is not valid JSON
    #[must_use]
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body_bytes()).unwrap_or(serde_json::Value::Null)
    }

    /// Block until the response has ended or `timeout` elapses.
    ///
    /// Returns whether the response ended.
    pub fn wait_for_end(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut recorded = self.recorded.lock();
        while !recorded.ended {
            if self.ended.wait_until(&mut recorded, deadline).timed_out() {
                return recorded.ended;
            }
        }
        true
    }

    fn ensure_open(recorded: &Recorded) -> io::Result<()> {
        if recorded.ended {
            Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "response already ended",
            ))
        } else {
            Ok(())
        }
    }
}

impl Context for MemoryContext {
    fn method(&self) -> &Method {
        &self.method
    }

    fn raw_path(&self) -> &str {
        &self.path
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    fn body(&self) -> ByteStream {
        let body = self.body.lock().take();
        futures::stream::iter(body.map(Ok)).boxed()
    }

    fn write_status(&self, status: u16) -> io::Result<()> {
        let mut recorded = self.recorded.lock();
        Self::ensure_open(&recorded)?;
        recorded.status = Some(status);
        recorded.status_writes += 1;
        Ok(())
    }

    fn write_header(&self, name: &str, value: &str) -> io::Result<()> {
        let mut recorded = self.recorded.lock();
        Self::ensure_open(&recorded)?;
        recorded.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    fn write_body(&self, chunk: Bytes) -> io::Result<()> {
        let mut recorded = self.recorded.lock();
        Self::ensure_open(&recorded)?;
        recorded.chunks.push(chunk);
        Ok(())
    }

    fn end(&self) -> io::Result<()> {
        let mut recorded = self.recorded.lock();
        Self::ensure_open(&recorded)?;
        recorded.ended = true;
        self.ended.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_writes_in_order() {
        let ctx = MemoryContext::new(Method::GET, "/");
        ctx.write_status(201).unwrap();
        ctx.write_header("Content-Type", "text/plain").unwrap();
        ctx.write_body(Bytes::from_static(b"a")).unwrap();
        ctx.write_body(Bytes::from_static(b"b")).unwrap();
        ctx.end().unwrap();

        assert_eq!(ctx.status(), Some(201));
        assert_eq!(ctx.response_header("content-type").as_deref(), Some("text/plain"));
        assert_eq!(ctx.body_text(), "ab");
        assert!(ctx.wait_for_end(Duration::from_millis(1)));
    }

    #[test]
    fn test_writes_after_end_fail() {
        let ctx = MemoryContext::new(Method::GET, "/");
        ctx.end().unwrap();
        assert!(ctx.write_body(Bytes::from_static(b"late")).is_err());
        assert!(ctx.end().is_err());
    }

    #[test]
    fn test_body_is_taken_once() {
        let ctx = MemoryContext::new(Method::POST, "/").with_body("payload");
        let first: Vec<_> = futures::executor::block_on(ctx.body().collect());
        let second: Vec<_> = futures::executor::block_on(ctx.body().collect());
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_wait_for_end_times_out() {
        let ctx = MemoryContext::new(Method::GET, "/");
        assert!(!ctx.wait_for_end(Duration::from_millis(10)));
    }
}
