#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use routecore::context::{Context, MemoryContext};
use routecore::dispatcher::{DispatchHandle, Dispatcher, Handler, HandlerResponse};

/// How long tests wait for an async or worker-side response
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A small multi-thread runtime for future and stream replies
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("test runtime")
}

/// Non-blocking handler answering `200` with a fixed body
pub fn text(body: &'static str) -> Handler {
    Handler::non_blocking(move |_req| Ok(HandlerResponse::text(200, body).into()))
}

/// Non-blocking handler answering with the route name it was registered under
pub fn named() -> Handler {
    Handler::non_blocking(|req| {
        let name = req.route.name().unwrap_or("unnamed").to_string();
        Ok(HandlerResponse::text(200, name).into())
    })
}

pub fn request(method: Method, path: &str) -> Arc<MemoryContext> {
    Arc::new(MemoryContext::new(method, path))
}

pub fn dispatch(dispatcher: &Dispatcher, ctx: &Arc<MemoryContext>) -> DispatchHandle {
    dispatcher.dispatch(Arc::clone(ctx) as Arc<dyn Context>)
}

/// Block until the response ends, failing the test on timeout
pub fn wait_for_response(ctx: &MemoryContext) {
    assert!(
        ctx.wait_for_end(RESPONSE_TIMEOUT),
        "response did not end within {RESPONSE_TIMEOUT:?}"
    );
}

/// A latch handlers block on until the test opens it
#[derive(Clone, Default)]
pub struct Gate(Arc<(parking_lot::Mutex<bool>, parking_lot::Condvar)>);

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until opened, giving up after [`RESPONSE_TIMEOUT`]
    pub fn wait(&self) {
        let (open, cond) = &*self.0;
        let mut open = open.lock();
        while !*open {
            if cond.wait_for(&mut open, RESPONSE_TIMEOUT).timed_out() {
                return;
            }
        }
    }

    pub fn open(&self) {
        let (open, cond) = &*self.0;
        *open.lock() = true;
        cond.notify_all();
    }
}

/// Poll `check` until it holds or [`RESPONSE_TIMEOUT`] passes
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + RESPONSE_TIMEOUT;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}

pub mod tracing_capture {
    use std::io;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    /// Captures formatted events emitted on the current thread
    pub struct TestTracing {
        buffer: Arc<Mutex<Vec<u8>>>,
        _guard: tracing::subscriber::DefaultGuard,
    }

    #[derive(Clone)]
    struct BufferWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl TestTracing {
        pub fn init() -> Self {
            let buffer = Arc::new(Mutex::new(Vec::new()));
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(BufferWriter(Arc::clone(&buffer)))
                .finish();
            let guard = tracing::subscriber::set_default(subscriber);
            Self {
                buffer,
                _guard: guard,
            }
        }

        /// Everything logged so far
        pub fn output(&self) -> String {
            String::from_utf8_lossy(&self.buffer.lock()).into_owned()
        }
    }
}
