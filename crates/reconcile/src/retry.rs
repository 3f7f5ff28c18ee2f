use schema::Transient;
use std::fmt::Debug;
use std::time::Duration;

/// Re-exports the type from the `exponential-backoff` crate, so that
/// users of the library don't need to add their own dependency in order
/// to configure it.
pub use exponential_backoff::Backoff;

/// Determines which lifecycle errors to retry and how long to wait
/// before doing so.
pub trait Retry: Debug + Clone + Send + Sync + Unpin + 'static {
    /// Resets internal state; called at the start of each resource's
    /// processing so budgets don't leak across resources.
    fn reset(&mut self);

    /// Decides whether `error` should be retried, and the backoff to
    /// apply first. `None` makes the error terminal for the resource.
    fn next_backoff(&mut self, error: &anyhow::Error) -> Option<Duration>;
}

/// A `Retry` that doesn't: every error is terminal.
#[derive(Debug, Clone)]
pub struct NoRetry;

impl Retry for NoRetry {
    fn reset(&mut self) { /* no-op */
    }

    fn next_backoff(&mut self, _error: &anyhow::Error) -> Option<Duration> {
        None
    }
}

/// Exponential backoff over transient errors. An error is transient
/// when any cause in its chain is a [`Transient`] marker; everything
/// else is terminal immediately.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    error_count: u32,
    backoff: Backoff,
}

impl ExponentialBackoff {
    pub fn new(max_retries: impl Into<Option<u32>>) -> ExponentialBackoff {
        let backoff = Backoff::new(
            max_retries.into().unwrap_or(u32::MAX),
            Duration::from_millis(100),
            Some(Duration::from_secs(300)),
        );
        ExponentialBackoff {
            error_count: 0,
            backoff,
        }
    }

    pub fn with_min(mut self, min: Duration) -> Self {
        self.backoff.set_min(min);
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.backoff.set_max(Some(max));
        self
    }

    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.backoff.set_jitter(jitter);
        self
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.backoff.set_factor(factor);
        self
    }
}

impl Retry for ExponentialBackoff {
    fn reset(&mut self) {
        self.error_count = 0;
    }

    fn next_backoff(&mut self, error: &anyhow::Error) -> Option<Duration> {
        if !error
            .chain()
            .any(|cause| cause.downcast_ref::<Transient>().is_some())
        {
            return None;
        }
        self.error_count += 1;
        self.backoff.next(self.error_count)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn terminal_errors_are_not_retried() {
        let mut retry = ExponentialBackoff::new(3);
        let err = anyhow::anyhow!("boom");
        assert!(retry.next_backoff(&err).is_none());
    }

    #[test]
    fn transient_errors_back_off_until_the_budget_runs_out() {
        let mut retry = ExponentialBackoff::new(3).with_jitter(0.0);
        let err = Transient::because(anyhow::anyhow!("throttled"));

        assert!(retry.next_backoff(&err).is_some());
        // The budget eventually runs out.
        assert!((0..8).any(|_| retry.next_backoff(&err).is_none()));
    }

    #[test]
    fn context_wrapping_keeps_an_error_transient() {
        let mut retry = ExponentialBackoff::new(3);
        let err = Transient::because(anyhow::anyhow!("throttled")).context("creating thing");
        assert!(retry.next_backoff(&err).is_some());
    }

    #[test]
    fn reset_restores_the_budget() {
        let mut retry = ExponentialBackoff::new(3);
        let err = Transient::because(anyhow::anyhow!("throttled"));

        while retry.next_backoff(&err).is_some() {}
        assert!(retry.next_backoff(&err).is_none());
        retry.reset();
        assert!(retry.next_backoff(&err).is_some());
    }
}
