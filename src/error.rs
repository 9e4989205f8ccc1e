//! Error types shared by the router and the dispatcher.
//!
//! Registration problems surface as [`RouterError`] at startup and never at
//! request time. Failures raised while serving a request are plain
//! `anyhow::Error` values owned by handlers; the dispatcher adds the few
//! conditions it raises itself through [`DispatchError`] and reports writer
//! misuse with [`ResponseError`].

use http::StatusCode;
use thiserror::Error;

/// Why a path pattern failed to compile
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternErrorKind {
    /// A glob (`*` or `{name}*`) appeared before the final segment
    #[error("glob segment must be the last segment")]
    GlobNotLast,
    /// The same parameter name appears twice in one pattern
    #[error("duplicate parameter name `{0}`")]
    DuplicateParam(String),
    /// The regex attached to a parameter does not compile
    #[error("invalid regex for parameter `{name}`: {message}")]
    InvalidRegex {
        /// Parameter the regex belongs to
        name: String,
        /// Message reported by the regex engine
        message: String,
    },
    /// `{}` or `{:re}` with no name, or a name with illegal characters
    #[error("invalid parameter name `{0}`")]
    InvalidParamName(String),
    /// `{` without a matching `}` or the reverse
    #[error("unbalanced braces")]
    UnbalancedBraces,
    /// A segment mixing literal text with a parameter, like `file.{ext}`
    #[error("segment `{0}` mixes literal text and a parameter")]
    MixedSegment(String),
}

/// Registration-time failures raised by [`crate::router::Router`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The path pattern could not be compiled
    #[error("invalid route pattern `{pattern}`: {kind}")]
    PatternSyntax {
        /// Pattern as supplied by the caller
        pattern: String,
        /// What was wrong with it
        kind: PatternErrorKind,
    },
    /// Two parameter names compete for the same trie position and method
    #[error(
        "route {method} {pattern} binds `{name}` where `{existing}` is already bound for the same method"
    )]
    AmbiguousRoute {
        /// Method of the route being registered
        method: String,
        /// Pattern of the route being registered
        pattern: String,
        /// Parameter name the new route wants
        name: String,
        /// Parameter name already registered at that position
        existing: String,
    },
    /// `register` was called after `seal`
    #[error("router is sealed; route {method} {pattern} rejected")]
    Sealed {
        /// Method of the rejected route
        method: String,
        /// Pattern of the rejected route
        pattern: String,
    },
    /// A dispatcher was built from a router that was never sealed
    #[error("dispatcher requires a sealed router")]
    NotSealed,
}

/// Conditions the dispatcher raises on its own while serving a request
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The worker pool has no room left; the request was shed
    #[error("worker pool saturated ({depth}/{capacity} in flight)")]
    Overloaded {
        /// In-flight jobs when the submission was rejected
        depth: usize,
        /// Admission limit of the pool
        capacity: usize,
    },
    /// The worker pool has shut down
    #[error("worker pool is not accepting jobs")]
    PoolClosed,
    /// A handler produced a future or stream but no async runtime is configured
    #[error("handler returned an async reply but no async runtime is configured")]
    NoAsyncRuntime,
    /// The handler panicked
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

impl DispatchError {
    /// Status code the dispatcher answers with for this condition
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Overloaded { .. } | DispatchError::PoolClosed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::NoAsyncRuntime | DispatchError::HandlerPanicked(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether a client may retry the same request later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Overloaded { .. })
    }
}

/// An error that carries the status it should be answered with.
///
/// Handlers return it (through `anyhow`) to pick a status explicitly:
///
/// ```
/// use routecore::error::StatusError;
/// use http::StatusCode;
///
/// let err = anyhow::Error::new(StatusError::new(StatusCode::CONFLICT, "version mismatch"));
/// assert_eq!(err.downcast_ref::<StatusError>().map(|e| e.status), Some(StatusCode::CONFLICT));
/// ```
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct StatusError {
    /// Status to respond with
    pub status: StatusCode,
    /// Message placed in the default error body
    pub message: String,
}

impl StatusError {
    /// Create a status error
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Misuse of a [`crate::dispatcher::ResponseWriter`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// A terminal write was attempted on a response that already terminated
    #[error("response already terminated with status {status}")]
    AlreadyTerminated {
        /// Status of the response that was committed first
        status: u16,
    },
    /// Chunk or finish called without an open stream
    #[error("no streaming response in progress")]
    NotStreaming,
    /// The connection went away and the response was cancelled
    #[error("response cancelled")]
    Cancelled,
    /// The transport failed to write
    #[error("transport write failed: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ResponseError {
    fn from(err: std::io::Error) -> Self {
        ResponseError::Transport(err.to_string())
    }
}
