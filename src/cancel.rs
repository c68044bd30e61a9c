//! Limits for long-running remote commands
//!
//! No limit applies unless a caller asks for one. When set, the remote
//! client checks the limits each time the command produces a line of output
//! and when it ends, and kills the remote shell once a limit trips.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag tripped to request cancellation
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Outcome of a limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStatus {
    Ok,
    Cancelled,
    TimedOut,
}

/// Optional timeout and cancellation for one remote command
#[derive(Debug, Clone, Default)]
pub struct ExecLimits {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl ExecLimits {
    /// No timeout, no cancellation
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Check the limits for a command started at `started`
    pub fn check(&self, started: Instant) -> LimitStatus {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return LimitStatus::Cancelled;
        }
        match self.timeout {
            Some(timeout) if started.elapsed() > timeout => LimitStatus::TimedOut,
            _ => LimitStatus::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_limits_never_trip() {
        let started = Instant::now() - Duration::from_secs(3600);
        assert_eq!(ExecLimits::none().check(started), LimitStatus::Ok);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let limits = ExecLimits::none().with_cancel(token.clone());
        assert_eq!(limits.check(Instant::now()), LimitStatus::Ok);

        token.cancel();
        assert_eq!(limits.check(Instant::now()), LimitStatus::Cancelled);
    }

    #[test]
    fn test_timeout() {
        let limits = ExecLimits::none().with_timeout(Duration::from_millis(10));
        assert_eq!(limits.check(Instant::now()), LimitStatus::Ok);

        let started = Instant::now() - Duration::from_secs(1);
        assert_eq!(limits.check(started), LimitStatus::TimedOut);
    }
}
