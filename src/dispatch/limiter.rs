//! # Dispatch Limiter
//!
//! Wraps outbound calls with three layers of admission control:
//!
//! 1. **Per-subject queue**: at most `per_subject_concurrency` calls per subject run at
//!    once; waiters are served highest priority first, FIFO within a priority.
//! 2. **Global ceiling**: a semaphore caps concurrent calls across all subjects.
//! 3. **Rate-limit policy**: errors carrying a retry-after hint are slept on (plus
//!    jitter) and retried. A hint above `cooldown_threshold` pauses every call through
//!    the limiter until the cooldown elapses.

use super::errors::{DispatchError, RateLimitSignal};
use super::priority::{Priority, QueueRank};
use crate::resilience::with_jitter;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Concurrent calls across all subjects
    pub max_concurrency: usize,
    /// Concurrent calls per subject
    pub per_subject_concurrency: usize,
    /// Retries after a rate-limit signal before the error propagates
    pub max_retries: u32,
    pub max_jitter: Duration,
    /// Signaled waits above this set the global cooldown
    pub cooldown_threshold: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            per_subject_concurrency: 1,
            max_retries: 3,
            max_jitter: Duration::from_millis(500),
            cooldown_threshold: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of limiter load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub active_subjects: usize,
    pub running_calls: usize,
    pub queued_calls: usize,
    pub available_permits: usize,
    pub cooldown_remaining: Option<Duration>,
}

struct Ticket {
    rank: QueueRank,
    grant: oneshot::Sender<()>,
}

impl PartialEq for Ticket {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank
    }
}

impl Eq for Ticket {}

impl Ord for Ticket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank.cmp(&other.rank)
    }
}

impl PartialOrd for Ticket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct SubjectQueue {
    running: usize,
    waiting: BinaryHeap<Ticket>,
}

impl SubjectQueue {
    fn live_waiters(&self) -> usize {
        self.waiting.iter().filter(|t| !t.grant.is_closed()).count()
    }
}

pub struct DispatchLimiter {
    settings: DispatchSettings,
    global: Semaphore,
    subjects: Mutex<HashMap<String, SubjectQueue>>,
    cooling_until: Mutex<Option<Instant>>,
    sequence: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for DispatchLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLimiter")
            .field("settings", &self.settings)
            .field("closed", &self.closed.load(AtomicOrdering::Relaxed))
            .finish()
    }
}

impl DispatchLimiter {
    pub fn new(settings: DispatchSettings) -> Self {
        let max_concurrency = settings.max_concurrency.max(1);
        info!(
            max_concurrency = max_concurrency,
            per_subject_concurrency = settings.per_subject_concurrency,
            max_retries = settings.max_retries,
            cooldown_threshold_secs = settings.cooldown_threshold.as_secs(),
            "🚦 Dispatch limiter initialized"
        );
        Self {
            global: Semaphore::new(max_concurrency),
            settings,
            subjects: Mutex::new(HashMap::new()),
            cooling_until: Mutex::new(None),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::Acquire)
    }

    /// Run `operation` in `subject`'s queue at `priority`, with rate-limit handling
    ///
    /// The subject slot is held across retries so a rate-limited call keeps its place
    /// ahead of later work from the same subject.
    pub async fn dispatch<F, Fut, T, E>(
        &self,
        subject: &str,
        priority: Priority,
        operation: F,
    ) -> Result<T, DispatchError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal + std::fmt::Display,
    {
        let Some(_slot) = self.acquire_subject_slot(subject, priority).await else {
            return Err(DispatchError::Closed);
        };
        debug!(subject = subject, priority = %priority, "Dispatch slot granted");
        self.with_rate_limit(operation).await
    }

    /// Run `operation` with cooldown, global ceiling and rate-limit retries, without
    /// a subject queue
    pub async fn with_rate_limit<F, Fut, T, E>(
        &self,
        mut operation: F,
    ) -> Result<T, DispatchError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal + std::fmt::Display,
    {
        let mut attempts: u32 = 0;
        loop {
            if self.is_closed() {
                return Err(DispatchError::Closed);
            }
            self.wait_for_cooldown().await;

            let permit = self
                .global
                .acquire()
                .await
                .map_err(|_| DispatchError::Closed)?;
            // A cooldown may have started while this call waited for a permit
            if self.cooldown_remaining().is_some() {
                drop(permit);
                continue;
            }

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            let Some(wait) = error.retry_after() else {
                return Err(DispatchError::Operation(error));
            };

            attempts += 1;
            // Cooldown is set before the permit is released to the next waiter
            if wait > self.settings.cooldown_threshold {
                self.enter_cooldown(wait);
            }
            drop(permit);
            if attempts > self.settings.max_retries {
                warn!(
                    attempts = attempts,
                    retry_after_ms = wait.as_millis() as u64,
                    error = %error,
                    "❌ Rate limit retries exhausted"
                );
                return Err(DispatchError::RetriesExhausted {
                    attempts,
                    retry_after: wait,
                    last_error: error,
                });
            }

            let delay = with_jitter(wait, self.settings.max_jitter);
            warn!(
                attempt = attempts,
                max_retries = self.settings.max_retries,
                delay_ms = delay.as_millis() as u64,
                "⏳ Rate limited, backing off before retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Time left on the global cooldown, if one is active
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        (*self.cooling_until.lock())
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn stats(&self) -> DispatchStats {
        let subjects = self.subjects.lock();
        DispatchStats {
            active_subjects: subjects.len(),
            running_calls: subjects.values().map(|q| q.running).sum(),
            queued_calls: subjects.values().map(SubjectQueue::live_waiters).sum(),
            available_permits: self.global.available_permits(),
            cooldown_remaining: self.cooldown_remaining(),
        }
    }

    /// Reject new calls and wake every queued waiter with `Closed`
    pub fn close(&self) {
        if self.closed.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        self.global.close();
        let mut subjects = self.subjects.lock();
        for queue in subjects.values_mut() {
            queue.waiting.clear();
        }
        subjects.retain(|_, queue| queue.running > 0);
        info!("🛑 Dispatch limiter closed");
    }

    fn enter_cooldown(&self, wait: Duration) {
        let until = Instant::now() + wait;
        let mut cooling = self.cooling_until.lock();
        if !matches!(*cooling, Some(current) if current >= until) {
            *cooling = Some(until);
            warn!(
                cooldown_secs = wait.as_secs(),
                threshold_secs = self.settings.cooldown_threshold.as_secs(),
                "🧊 Severe rate limit, pausing all dispatch"
            );
        }
    }

    async fn wait_for_cooldown(&self) {
        loop {
            let until = {
                let mut cooling = self.cooling_until.lock();
                match *cooling {
                    Some(until) if until > Instant::now() => until,
                    Some(_) => {
                        *cooling = None;
                        info!("🌡️ Dispatch cooldown elapsed");
                        return;
                    }
                    None => return,
                }
            };
            tokio::time::sleep_until(until).await;
        }
    }

    /// `None` when the limiter closes before a slot is granted
    async fn acquire_subject_slot(
        &self,
        subject: &str,
        priority: Priority,
    ) -> Option<SubjectSlot<'_>> {
        if self.is_closed() {
            return None;
        }
        let limit = self.settings.per_subject_concurrency.max(1);
        let receiver = {
            let mut subjects = self.subjects.lock();
            let queue = subjects.entry(subject.to_string()).or_default();
            queue.waiting.retain(|ticket| !ticket.grant.is_closed());
            if queue.running < limit && queue.waiting.is_empty() {
                queue.running += 1;
                return Some(SubjectSlot {
                    limiter: self,
                    subject: subject.to_string(),
                });
            }
            let (grant, receiver) = oneshot::channel();
            let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
            queue.waiting.push(Ticket {
                rank: QueueRank { priority, sequence },
                grant,
            });
            receiver
        };

        let mut pending = PendingSlot {
            limiter: self,
            subject,
            receiver: Some(receiver),
        };
        let granted = match pending.receiver.as_mut() {
            Some(receiver) => receiver.await.is_ok(),
            None => false,
        };
        pending.receiver = None;
        granted.then(|| SubjectSlot {
            limiter: self,
            subject: subject.to_string(),
        })
    }

    /// Hand the slot to the best live waiter, or free it
    fn release_subject_slot(&self, subject: &str) {
        let mut subjects = self.subjects.lock();
        let Some(queue) = subjects.get_mut(subject) else {
            return;
        };
        while let Some(ticket) = queue.waiting.pop() {
            if ticket.grant.send(()).is_ok() {
                return;
            }
        }
        queue.running = queue.running.saturating_sub(1);
        if queue.running == 0 {
            subjects.remove(subject);
        }
    }
}

/// Running slot in a subject queue; released on drop
struct SubjectSlot<'a> {
    limiter: &'a DispatchLimiter,
    subject: String,
}

impl Drop for SubjectSlot<'_> {
    fn drop(&mut self) {
        self.limiter.release_subject_slot(&self.subject);
    }
}

/// Queued waiter; if dropped after a grant arrived, passes the slot on
struct PendingSlot<'a> {
    limiter: &'a DispatchLimiter,
    subject: &'a str,
    receiver: Option<oneshot::Receiver<()>>,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if receiver.try_recv().is_ok() {
                self.limiter.release_subject_slot(self.subject);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourierError;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn settings() -> DispatchSettings {
        DispatchSettings {
            max_jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_after_signaled_wait() {
        let limiter = DispatchLimiter::new(settings());
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();

        let result = limiter
            .with_rate_limit(move || async move {
                if counter.fetch_add(1, AtomicOrdering::SeqCst) < 2 {
                    Err(CourierError::rate_limited(Duration::from_secs(5)))
                } else {
                    Ok("sent")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "sent");
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(limiter.cooldown_remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let limiter = DispatchLimiter::new(DispatchSettings {
            max_retries: 2,
            ..settings()
        });
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = limiter
            .with_rate_limit(move || async move {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Err(CourierError::rate_limited(Duration::from_secs(1)))
            })
            .await;

        match result {
            Err(DispatchError::RetriesExhausted { attempts, retry_after, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_plain_errors_are_not_retried() {
        let limiter = DispatchLimiter::new(settings());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = limiter
            .with_rate_limit(move || async move {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                Err(CourierError::ValidationError("bad payload".into()))
            })
            .await;

        assert!(matches!(result, Err(DispatchError::Operation(_))));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_severe_signal_sets_cooldown() {
        let limiter = DispatchLimiter::new(DispatchSettings {
            max_retries: 0,
            ..settings()
        });

        let result: Result<(), _> = limiter
            .with_rate_limit(|| async { Err(CourierError::rate_limited(Duration::from_secs(90))) })
            .await;
        assert!(matches!(result, Err(DispatchError::RetriesExhausted { .. })));

        let remaining = limiter.cooldown_remaining().unwrap();
        assert!(remaining > Duration::from_secs(89));

        let started = Instant::now();
        limiter
            .with_rate_limit(|| async { Ok::<_, CourierError>(()) })
            .await
            .unwrap();
        assert!(started.elapsed() >= remaining);
        assert!(limiter.cooldown_remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactive_served_before_background() {
        let limiter = Arc::new(DispatchLimiter::new(settings()));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let holder = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let mut release_rx = Some(release_rx);
                limiter
                    .dispatch("user-1", Priority::Normal, || {
                        let rx = release_rx.take();
                        async move {
                            if let Some(rx) = rx {
                                let _ = rx.await;
                            }
                            Ok::<_, CourierError>(())
                        }
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let mut waiters = Vec::new();
        for (label, priority) in [
            ("background", Priority::Background),
            ("interactive", Priority::Interactive),
        ] {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            waiters.push(tokio::spawn(async move {
                limiter
                    .dispatch("user-1", priority, || {
                        let order = Arc::clone(&order);
                        async move {
                            order.lock().push(label);
                            Ok::<_, CourierError>(())
                        }
                    })
                    .await
            }));
            tokio::task::yield_now().await;
        }

        assert_eq!(limiter.stats().queued_calls, 2);
        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock(), vec!["interactive", "background"]);
        assert_eq!(limiter.stats().active_subjects, 0);
    }

    #[tokio::test]
    async fn test_close_rejects_new_calls() {
        let limiter = DispatchLimiter::new(settings());
        limiter.close();
        let result = limiter
            .dispatch("user-1", Priority::Interactive, || async { Ok::<_, CourierError>(()) })
            .await;
        assert!(matches!(result, Err(DispatchError::Closed)));
    }
}
