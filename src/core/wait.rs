//! Bounded polling with cooperative cancellation.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Outcome of a polling wait on a device condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Ready,
    TimedOut,
    Aborted,
    /// The device reported its error flag while we were waiting.
    DeviceError,
}

impl WaitResult {
    pub fn is_ready(self) -> bool {
        self == WaitResult::Ready
    }
}

/// Shared abort flag, raised from any thread and checked on every poll.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Poll `probe` every `interval` until it yields a result.
///
/// `timeout = None` waits without bound. The abort token is checked before
/// each probe; errors from the probe are returned unchanged.
pub fn poll_until<E>(
    timeout: Option<Duration>,
    interval: Duration,
    abort: &AbortToken,
    mut probe: impl FnMut() -> Result<Option<WaitResult>, E>,
) -> Result<WaitResult, E> {
    let started = Instant::now();
    loop {
        if abort.is_aborted() {
            return Ok(WaitResult::Aborted);
        }
        if let Some(result) = probe()? {
            return Ok(result);
        }
        if let Some(timeout) = timeout {
            if started.elapsed() >= timeout {
                return Ok(WaitResult::TimedOut);
            }
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_returns_probe_result() {
        let abort = AbortToken::new();
        let mut calls = 0;
        let result: Result<_, ()> = poll_until(
            Some(Duration::from_secs(1)),
            Duration::from_millis(1),
            &abort,
            || {
                calls += 1;
                Ok((calls == 3).then_some(WaitResult::Ready))
            },
        );
        assert_eq!(result, Ok(WaitResult::Ready));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_poll_times_out() {
        let abort = AbortToken::new();
        let result: Result<_, ()> = poll_until(
            Some(Duration::from_millis(20)),
            Duration::from_millis(2),
            &abort,
            || Ok(None),
        );
        assert_eq!(result, Ok(WaitResult::TimedOut));
    }

    #[test]
    fn test_abort_is_checked_every_iteration() {
        let abort = AbortToken::new();
        let raiser = abort.clone();
        let mut calls = 0;
        let result: Result<_, ()> = poll_until(None, Duration::from_millis(1), &abort, || {
            calls += 1;
            if calls == 5 {
                raiser.abort();
            }
            Ok(None)
        });
        assert_eq!(result, Ok(WaitResult::Aborted));
        assert_eq!(calls, 5);
    }
}
