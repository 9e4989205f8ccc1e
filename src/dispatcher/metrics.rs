use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Dispatch counters shared by every request of one dispatcher
///
/// All counters use relaxed atomics: cheap to update from any thread and
/// eventually consistent when read. Inject one instance through
/// [`super::DispatcherBuilder::metrics`] to share it with the rest of the
/// application.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    dispatched: AtomicU64,
    matched: AtomicU64,
    not_found: AtomicU64,
    method_not_allowed: AtomicU64,
    failed: AtomicU64,
    overloaded: AtomicU64,
    cancelled: AtomicU64,
    completed: AtomicU64,
    in_flight: AtomicUsize,
    total_latency_ns: AtomicU64,
}

impl DispatchMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_matched(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_method_not_allowed(&self) {
        self.method_not_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overload(&self) {
        self.overloaded.fetch_add(1, Ordering::Relaxed);
    }

    /// A response reached a terminal state (written or cancelled)
    pub(crate) fn record_terminal(&self, latency: Duration, cancelled: bool) {
        if cancelled {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed.fetch_add(1, Ordering::Relaxed);
            self.total_latency_ns
                .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        }
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Requests handed to the dispatcher
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn matched(&self) -> u64 {
        self.matched.load(Ordering::Relaxed)
    }

    pub fn not_found(&self) -> u64 {
        self.not_found.load(Ordering::Relaxed)
    }

    pub fn method_not_allowed(&self) -> u64 {
        self.method_not_allowed.load(Ordering::Relaxed)
    }

    /// Requests that went through the error path
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Requests shed because the worker pool was full
    pub fn overloaded(&self) -> u64 {
        self.overloaded.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Responses fully written
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Requests dispatched but not yet written or cancelled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Mean time from dispatch to the terminal write of completed responses.
    ///
    /// Returns zero duration if nothing has completed yet.
    pub fn average_latency(&self) -> Duration {
        let count = self.completed.load(Ordering::Relaxed);
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_gauge() {
        let m = DispatchMetrics::new();
        m.record_dispatch();
        m.record_dispatch();
        assert_eq!(m.in_flight(), 2);
        m.record_terminal(Duration::from_millis(4), false);
        m.record_terminal(Duration::ZERO, true);
        assert_eq!(m.in_flight(), 0);
        assert_eq!(m.completed(), 1);
        assert_eq!(m.cancelled(), 1);
        assert_eq!(m.average_latency(), Duration::from_millis(4));
    }

    #[test]
    fn test_average_latency_without_completions() {
        assert_eq!(DispatchMetrics::new().average_latency(), Duration::ZERO);
    }
}
