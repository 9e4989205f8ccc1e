//! # Context Module
//!
//! The boundary between the dispatch core and whatever transport actually owns
//! the socket.
//!
//! A transport adapter implements [`Context`] once per request: it exposes the
//! request line, headers and body, and accepts the raw response writes. The
//! core never writes to a `Context` directly from handler code; every write is
//! funnelled through a [`crate::dispatcher::ResponseWriter`], which enforces a
//! single terminal write and strict chunk ordering. Adapters therefore only
//! need to forward bytes.
//!
//! [`MemoryContext`] is a complete in-memory implementation used by tests and
//! benchmarks, and a reference for writing real adapters.

mod memory;

use std::io;

use bytes::Bytes;
use futures::stream::BoxStream;
use http::Method;

pub use memory::{MemoryContext, Recorded};

/// Request body as delivered by the transport
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Per-request object supplied by the transport layer
///
/// Implementations must be shareable across threads: a request matched on an
/// I/O thread may be answered from a worker thread or an async task.
pub trait Context: Send + Sync {
    /// Request method
    fn method(&self) -> &Method;

    /// Request target as received, possibly with a query string
    fn raw_path(&self) -> &str;

    /// First value of a request header, looked up case-insensitively
    fn header(&self, name: &str) -> Option<String>;

    /// Take the request body. Later calls yield an empty stream.
    fn body(&self) -> ByteStream;

    /// Start the response with a status code
    fn write_status(&self, status: u16) -> io::Result<()>;

    /// Add a response header; only valid before the first body chunk
    fn write_header(&self, name: &str, value: &str) -> io::Result<()>;

    /// Append a chunk to the response body
    fn write_body(&self, chunk: Bytes) -> io::Result<()>;

    /// Complete the response
    fn end(&self) -> io::Result<()>;
}
