use std::time::Duration;

/// Exponential reconnect delay.
///
/// The delay doubles after every failed attempt. It is not reset by a
/// successful connect, so a flapping link keeps backing off.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Option<Duration>) -> Self {
        let current = match max {
            Some(max) => initial.min(max),
            None => initial,
        };
        Self { current, max }
    }

    /// Delay to wait before the next attempt
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed attempt
    pub fn advance(&mut self) {
        let doubled = self.current.saturating_mul(2);
        self.current = match self.max {
            Some(max) => doubled.min(max),
            None => doubled,
        };
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), None)
    }
}
