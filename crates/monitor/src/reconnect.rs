//! Broker reconnect pacing. The wait is a future of its own so the caller
//! can keep serving stdin and ctrl_c while the broker is away.

use std::pin::Pin;
use std::time::Duration;
use tokio::time::{sleep, Instant, Sleep};

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Exponential backoff, 1 s doubling to a 30 s ceiling.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: BACKOFF_INITIAL,
        }
    }
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(BACKOFF_MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = BACKOFF_INITIAL;
    }
}

pub struct Reconnect {
    backoff: Backoff,
    retry: Pin<Box<Sleep>>,
    waiting: bool,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            retry: Box::pin(sleep(Duration::ZERO)),
            waiting: false,
        }
    }
}

impl Reconnect {
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Arm the retry timer after a connection error. Returns the delay.
    pub fn schedule(&mut self) -> Duration {
        let delay = self.backoff.next_delay();
        self.retry.as_mut().reset(Instant::now() + delay);
        self.waiting = true;
        delay
    }

    /// Resolves once the armed delay has passed. Dropping it early keeps
    /// the deadline.
    pub async fn wait(&mut self) {
        self.retry.as_mut().await;
        self.waiting = false;
    }

    pub fn connected(&mut self) {
        self.backoff.reset();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Backoff ------------------------------------------------------------

    #[test]
    fn doubles_to_ceiling() {
        let mut b = Backoff::default();
        let delays: Vec<u64> = (0..7).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn reset_starts_over() {
        let mut b = Backoff::default();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    // -- Reconnect ----------------------------------------------------------

    #[tokio::test]
    async fn connected_resets_delay() {
        let mut r = Reconnect::default();
        assert_eq!(r.schedule(), Duration::from_secs(1));
        assert_eq!(r.schedule(), Duration::from_secs(2));
        r.connected();
        assert_eq!(r.schedule(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn other_branches_run_while_waiting() {
        let mut r = Reconnect::default();
        r.schedule();
        r.schedule();
        let started = Instant::now();

        let other_ran = tokio::select! {
            _ = r.wait() => false,
            _ = sleep(Duration::from_millis(100)) => true,
        };

        assert!(other_ran);
        assert!(r.is_waiting());

        r.wait().await;
        assert!(!r.is_waiting());
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
