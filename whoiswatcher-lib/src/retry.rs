//! Retry handling.
//!
//! Two separate mechanisms live here:
//!
//! - [`RetryPolicy`]: immediate retries of a lookup that failed at the
//!   transport level (one extra attempt after a short fixed backoff).
//! - [`RetryQueue`] and [`Pacer`]: domains the upstream service throttled are
//!   parked during the primary pass and replayed one at a time afterwards,
//!   with randomly spaced cooldown pauses.

use crate::types::Outcome;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Retry policy for transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `attempt` until it produces something other than a retryable
    /// transport error or the attempts are used up. The closure receives the 1-based
    /// attempt number.
    pub async fn execute<F, Fut>(&self, mut attempt: F) -> Outcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Outcome>,
    {
        let mut number = 1;
        loop {
            let outcome = attempt(number).await;
            match outcome {
                Outcome::TransportError(ref err)
                    if err.is_retryable() && number < self.max_attempts =>
                {
                    debug!(attempt = number, error = %err, "transport error, retrying");
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                    number += 1;
                }
                other => return other,
            }
        }
    }
}

/// Result of asking the queue to defer a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    /// The domain was appended; `attempt` counts deferrals so far
    Queued { attempt: u32 },
    /// The domain hit its deferral limit and was not queued
    Exhausted { attempts: u32 },
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    deferrals: HashMap<String, u32>,
}

/// FIFO of rate-limited domains, shared by all workers.
#[derive(Debug)]
pub struct RetryQueue {
    state: Mutex<QueueState>,
    max_deferrals: Option<u32>,
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RetryQueue {
    /// Create a queue; `max_deferrals` bounds how often one domain may be
    /// queued (`None` means unbounded).
    pub fn new(max_deferrals: Option<u32>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_deferrals,
        }
    }

    /// Append a domain to the back of the queue.
    pub fn push(&self, domain: &str) -> Deferral {
        let mut state = self.lock();
        let count = state.deferrals.entry(domain.to_string()).or_insert(0);

        if let Some(max) = self.max_deferrals {
            if *count >= max {
                return Deferral::Exhausted { attempts: *count };
            }
        }

        *count += 1;
        let attempt = *count;
        state.pending.push_back(domain.to_string());
        Deferral::Queued { attempt }
    }

    /// Take the domain at the front of the queue.
    pub fn pop(&self) -> Option<String> {
        self.lock().pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Snapshot of the pending domains, front first.
    pub fn pending(&self) -> Vec<String> {
        self.lock().pending.iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the queue half-updated.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Random pacing for the drain phase: after each entry, pause with
/// probability `1 / one_in`.
#[derive(Debug)]
pub struct Pacer {
    rng: StdRng,
    one_in: u32,
}

impl Pacer {
    pub fn new(one_in: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            one_in: one_in.max(1),
        }
    }

    /// Draw one of `one_in` outcomes; pause on zero.
    pub fn should_pause(&mut self) -> bool {
        self.rng.random_range(0..self.one_in) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchError;
    use crate::types::Record;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_policy_retries_transport_error_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let counter = calls.clone();
        let outcome = policy
            .execute(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Outcome::TransportError(WatchError::network("reset"))
                }
            })
            .await;

        assert!(matches!(outcome, Outcome::TransportError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_policy_stops_on_success() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let outcome = policy
            .execute(|attempt| async move {
                if attempt == 1 {
                    Outcome::TransportError(WatchError::network("reset"))
                } else {
                    Outcome::Resolved(Record::new("example.com"))
                }
            })
            .await;
        assert!(matches!(outcome, Outcome::Resolved(_)));
    }

    #[tokio::test]
    async fn test_policy_does_not_retry_other_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let counter = calls.clone();
        let outcome = policy
            .execute(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Outcome::ParseError(WatchError::parse("garbage"))
                }
            })
            .await;

        assert!(matches!(outcome, Outcome::ParseError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_policy_skips_permanent_transport_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let counter = calls.clone();
        let outcome = policy
            .execute(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Outcome::TransportError(WatchError::rdap_with_status(
                        "example.com",
                        "RDAP server returned error: 403 Forbidden",
                        403,
                    ))
                }
            })
            .await;

        assert!(matches!(outcome, Outcome::TransportError(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.backoff, Duration::from_secs(1));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = RetryQueue::default();
        queue.push("a.com");
        queue.push("b.com");
        queue.push("c.com");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().as_deref(), Some("a.com"));
        assert_eq!(queue.pop().as_deref(), Some("b.com"));
        assert_eq!(queue.pending(), vec!["c.com".to_string()]);
        assert_eq!(queue.pop().as_deref(), Some("c.com"));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_deferral_limit() {
        let queue = RetryQueue::new(Some(2));
        assert_eq!(queue.push("a.com"), Deferral::Queued { attempt: 1 });
        queue.pop();
        assert_eq!(queue.push("a.com"), Deferral::Queued { attempt: 2 });
        queue.pop();
        assert_eq!(queue.push("a.com"), Deferral::Exhausted { attempts: 2 });
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_concurrent_pushes() {
        let queue = Arc::new(RetryQueue::default());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        queue.push(&format!("d{}-{}.com", t, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.len(), 400);
    }

    #[test]
    fn test_pacer_is_deterministic_with_seed() {
        let mut a = Pacer::new(10, Some(42));
        let mut b = Pacer::new(10, Some(42));
        let draws_a: Vec<bool> = (0..100).map(|_| a.should_pause()).collect();
        let draws_b: Vec<bool> = (0..100).map(|_| b.should_pause()).collect();
        assert_eq!(draws_a, draws_b);

        let pauses = draws_a.iter().filter(|p| **p).count();
        assert!(pauses > 0 && pauses < 40, "unexpected pause count {}", pauses);
    }

    #[test]
    fn test_pacer_one_in_one_always_pauses() {
        let mut pacer = Pacer::new(1, Some(7));
        assert!((0..20).all(|_| pacer.should_pause()));
    }
}
