//! Provider implementations of the engine's traits.
//!
//! - [`TokioScheduler`] and [`ManualScheduler`] implement [`Scheduler`]
//! - [`OsEntropy`] and [`SeededEntropy`] implement [`EntropySource`]

use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::{
    distributions::Alphanumeric,
    rngs::{OsRng, StdRng},
    Rng, RngCore, SeedableRng,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::trace;

use crate::{
    traits::{EntropySource, Scheduler},
    types::TimerToken,
};

/// Scheduler running on the tokio timer.
///
/// Each scheduled continuation is a spawned task that sleeps for the delay
/// and then sends its token on the channel returned by
/// [`TokioScheduler::new`]. Cancelling aborts the task. Scheduling must happen
/// from within a tokio runtime.
#[derive(Debug)]
pub struct TokioScheduler {
    next: u64,
    tasks: HashMap<TimerToken, JoinHandle<()>>,
    fired: mpsc::UnboundedSender<TimerToken>,
}

impl TokioScheduler {
    /// Creates a scheduler and the receiver its fired tokens arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerToken>) {
        let (fired, rx) = mpsc::unbounded_channel();
        (Self { next: 0, tasks: HashMap::new(), fired }, rx)
    }

    /// Number of continuations that have neither fired nor been cancelled.
    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|task| !task.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    fn schedule(&mut self, delay: Duration) -> TimerToken {
        self.tasks.retain(|_, task| !task.is_finished());

        self.next += 1;
        let token = TimerToken(self.next);
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone once the runner shut down.
            let _ = fired.send(token);
        });
        self.tasks.insert(token, task);

        trace!(?token, ?delay, "continuation scheduled");
        token
    }

    fn cancel(&mut self, token: TimerToken) {
        if let Some(task) = self.tasks.remove(&token) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}

/// Scheduler over a virtual clock.
///
/// Nothing fires on its own: the owner moves the clock forward and collects
/// due tokens with [`ManualScheduler::pop_due`]. Used for simulations and
/// deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    now: u64,
    next: u64,
    /// Pending continuations as `(due, token)`.
    queue: BTreeSet<(u64, TimerToken)>,
}

impl ManualScheduler {
    /// Creates a scheduler whose clock reads `now_millis`.
    pub fn new(now_millis: u64) -> Self {
        Self { now: now_millis, ..Self::default() }
    }

    /// Sets the clock. The clock never moves backwards.
    pub fn set_now(&mut self, now_millis: u64) {
        self.now = self.now.max(now_millis);
    }

    /// Number of pending continuations.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Due time of the earliest pending continuation.
    pub fn next_due(&self) -> Option<u64> {
        self.queue.first().map(|(due, _)| *due)
    }

    /// Removes the earliest continuation due at or before `until` and moves
    /// the clock to its due time.
    pub fn pop_due(&mut self, until: u64) -> Option<TimerToken> {
        let (due, token) = *self.queue.first()?;
        if due > until {
            return None;
        }

        self.queue.remove(&(due, token));
        self.set_now(due);
        Some(token)
    }
}

impl Scheduler for ManualScheduler {
    fn now_millis(&self) -> u64 {
        self.now
    }

    fn schedule(&mut self, delay: Duration) -> TimerToken {
        self.next += 1;
        let token = TimerToken(self.next);
        let delay = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.queue.insert((self.now.saturating_add(delay), token));
        token
    }

    fn cancel(&mut self, token: TimerToken) {
        self.queue.retain(|(_, pending)| *pending != token);
    }
}

fn alphanumeric(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

/// Entropy from the operating system's secure random number generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn random_string(&mut self, len: usize) -> String {
        alphanumeric(&mut OsRng, len)
    }

    fn random_integer(&mut self, min: i64, max: i64) -> i64 {
        OsRng.gen_range(min..=max)
    }

    fn unique_id(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic entropy from a seed.
///
/// Outcomes are reproducible and therefore not fair; meant for simulations
/// and tests only.
#[derive(Debug, Clone)]
pub struct SeededEntropy {
    rng: StdRng,
}

impl SeededEntropy {
    /// Creates a source seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }
}

impl EntropySource for SeededEntropy {
    fn random_string(&mut self, len: usize) -> String {
        alphanumeric(&mut self.rng, len)
    }

    fn random_integer(&mut self, min: i64, max: i64) -> i64 {
        self.rng.gen_range(min..=max)
    }

    fn unique_id(&mut self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_manual_scheduler_orders_by_due_time() {
        let mut scheduler = ManualScheduler::new(100);
        let late = scheduler.schedule(Duration::from_millis(50));
        let early = scheduler.schedule(Duration::from_millis(10));

        assert_eq!(scheduler.next_due(), Some(110));
        assert_eq!(scheduler.pop_due(105), None);
        assert_eq!(scheduler.pop_due(200), Some(early));
        assert_eq!(scheduler.now_millis(), 110);
        assert_eq!(scheduler.pop_due(200), Some(late));
        assert_eq!(scheduler.now_millis(), 150);
        assert_eq!(scheduler.pop_due(200), None);
    }

    #[test]
    fn test_manual_scheduler_cancel() {
        let mut scheduler = ManualScheduler::new(0);
        let token = scheduler.schedule(Duration::from_millis(5));
        scheduler.cancel(token);
        scheduler.cancel(token);

        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.pop_due(u64::MAX), None);
    }

    #[test]
    fn test_manual_clock_never_goes_back() {
        let mut scheduler = ManualScheduler::new(10);
        scheduler.set_now(5);
        assert_eq!(scheduler.now_millis(), 10);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::short(8)]
    #[case::long(64)]
    fn test_random_string_length(#[case] len: usize) {
        let secret = OsEntropy.random_string(len);
        assert_eq!(secret.len(), len);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_seeded_entropy_is_reproducible() {
        let mut a = SeededEntropy::new(42);
        let mut b = SeededEntropy::new(42);

        assert_eq!(a.unique_id(), b.unique_id());
        assert_eq!(a.random_string(16), b.random_string(16));
        assert_eq!(a.random_integer(-5, 5), b.random_integer(-5, 5));
    }

    #[test]
    fn test_unique_ids_differ() {
        let mut entropy = OsEntropy;
        assert_ne!(entropy.unique_id(), entropy.unique_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_fires_token() {
        let (mut scheduler, mut fired) = TokioScheduler::new();
        let token = scheduler.schedule(Duration::from_millis(100));

        assert_eq!(fired.recv().await, Some(token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel() {
        let (mut scheduler, mut fired) = TokioScheduler::new();
        let cancelled = scheduler.schedule(Duration::from_millis(10));
        let kept = scheduler.schedule(Duration::from_millis(20));
        scheduler.cancel(cancelled);

        assert_eq!(fired.recv().await, Some(kept));
        assert!(fired.try_recv().is_err());
    }
}
