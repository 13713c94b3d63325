use std::sync::Arc;

use crate::core::attempt::{AttemptKey, Record};
use crate::core::time::{format_epoch_ms, Clock};
use crate::store::StateStore;

/// Remaining time of an attempt, derived from wall-clock time and the persisted start only.
///
/// Without a start record the full duration remains. A clock that reads earlier than the
/// start never yields more than `duration_ms`.
pub(crate) fn remaining_ms(started_at_ms: Option<i64>, duration_ms: i64, now_ms: i64) -> i64 {
    let duration_ms = duration_ms.max(0);
    let Some(started_at_ms) = started_at_ms else {
        return duration_ms;
    };

    let elapsed = now_ms.saturating_sub(started_at_ms).max(0);
    duration_ms.saturating_sub(elapsed).max(0)
}

/// Persisted start timestamps, one per attempt identity.
///
/// Storage failures never reach the caller: reads degrade to "no record" and writes are
/// logged and dropped.
#[derive(Clone)]
pub(crate) struct TimerStore {
    store: Arc<dyn StateStore>,
}

impl TimerStore {
    pub(crate) fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub(crate) async fn started_at(&self, key: &AttemptKey) -> Option<i64> {
        let storage_key = key.storage_key(Record::TimerStart);
        match self.store.get(&storage_key).await {
            Ok(Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(attempt = %key, value = %raw, "Ignoring corrupt timer record");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(attempt = %key, error = %err, "Timer storage unavailable");
                None
            }
        }
    }

    /// Persists the start of `key` unless one already exists, and returns the effective start.
    ///
    /// When storage is unavailable the attempt runs on a session-local start of `now`.
    pub(crate) async fn ensure_started(&self, key: &AttemptKey, clock: &dyn Clock) -> i64 {
        let now = clock.now_ms();
        let storage_key = key.storage_key(Record::TimerStart);

        match self.store.set_if_absent(&storage_key, &now.to_string()).await {
            Ok(true) => {
                tracing::info!(attempt = %key, started_at = %format_epoch_ms(now), "Attempt timer started");
                now
            }
            Ok(false) => match self.started_at(key).await {
                Some(existing) => {
                    tracing::debug!(
                        attempt = %key,
                        started_at = %format_epoch_ms(existing),
                        "Attempt timer resumed"
                    );
                    existing
                }
                None => {
                    // Unreadable record: replace it rather than leave the attempt without a start.
                    if let Err(err) = self.store.set(&storage_key, &now.to_string()).await {
                        tracing::warn!(attempt = %key, error = %err, "Failed to rewrite timer record");
                    }
                    now
                }
            },
            Err(err) => {
                tracing::warn!(
                    attempt = %key,
                    error = %err,
                    "Timer storage unavailable; using a session-local start"
                );
                now
            }
        }
    }

    pub(crate) async fn remaining(&self, key: &AttemptKey, duration_ms: i64, clock: &dyn Clock) -> i64 {
        let started_at = self.started_at(key).await;
        remaining_ms(started_at, duration_ms, clock.now_ms())
    }

    pub(crate) async fn clear(&self, key: &AttemptKey) {
        if let Err(err) = self.store.remove(&key.storage_key(Record::TimerStart)).await {
            tracing::warn!(attempt = %key, error = %err, "Failed to clear timer record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attempt::ExamKind;
    use crate::store::MemoryStore;
    use crate::test_support::{FailingStore, ManualClock};

    const DURATION: i64 = 90 * 60_000;

    fn key() -> AttemptKey {
        AttemptKey::new(ExamKind::Assignment, "a-1", "s-1")
    }

    #[test]
    fn remaining_is_full_duration_without_record() {
        assert_eq!(remaining_ms(None, DURATION, 123), DURATION);
    }

    #[test]
    fn remaining_never_increases_as_time_passes() {
        let start = 1_000;
        let mut previous = remaining_ms(Some(start), DURATION, start);
        for now in (start..start + DURATION + 5_000).step_by(997) {
            let current = remaining_ms(Some(start), DURATION, now);
            assert!(current <= previous, "remaining grew at {now}");
            previous = current;
        }
    }

    #[test]
    fn remaining_floors_at_zero() {
        let start = 1_000;
        assert_eq!(remaining_ms(Some(start), DURATION, start + DURATION), 0);
        assert_eq!(remaining_ms(Some(start), DURATION, start + DURATION + 1), 0);
        assert_eq!(remaining_ms(Some(start), DURATION, i64::MAX), 0);
    }

    #[test]
    fn clock_behind_start_does_not_extend_duration() {
        assert_eq!(remaining_ms(Some(10_000), DURATION, 4_000), DURATION);
    }

    #[tokio::test]
    async fn ensure_started_is_idempotent() {
        let timers = TimerStore::new(Arc::new(MemoryStore::default()));
        let clock = ManualClock::new(5_000);

        assert_eq!(timers.ensure_started(&key(), &clock).await, 5_000);
        clock.advance(60_000);
        assert_eq!(timers.ensure_started(&key(), &clock).await, 5_000);
        assert_eq!(timers.started_at(&key()).await, Some(5_000));
    }

    #[tokio::test]
    async fn concurrent_ensure_started_agrees_on_one_start() {
        let timers = TimerStore::new(Arc::new(MemoryStore::default()));
        let clock = ManualClock::new(7_000);
        let (left, right) = (key(), key());

        let (first, second) =
            tokio::join!(timers.ensure_started(&left, &clock), timers.ensure_started(&right, &clock));
        assert_eq!(first, second);
        assert_eq!(timers.started_at(&key()).await, Some(first));
    }

    #[tokio::test]
    async fn remaining_is_stable_across_reload() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::default());
        let clock = ManualClock::new(0);
        TimerStore::new(store.clone()).ensure_started(&key(), &clock).await;

        clock.advance(42_500);
        let before = TimerStore::new(store.clone()).remaining(&key(), DURATION, &clock).await;
        // A reload re-reads the persisted start through a fresh store handle.
        let reloaded = TimerStore::new(store);
        reloaded.ensure_started(&key(), &clock).await;
        let after = reloaded.remaining(&key(), DURATION, &clock).await;

        assert_eq!(before, after);
        assert_eq!(after, DURATION - 42_500);
    }

    #[tokio::test]
    async fn attempts_do_not_share_timers() {
        let timers = TimerStore::new(Arc::new(MemoryStore::default()));
        let clock = ManualClock::new(1_000);
        let other = AttemptKey::new(ExamKind::Mcq, "m-9", "s-1");

        timers.ensure_started(&key(), &clock).await;
        clock.advance(10_000);
        timers.ensure_started(&other, &clock).await;

        assert_eq!(timers.started_at(&key()).await, Some(1_000));
        assert_eq!(timers.started_at(&other).await, Some(11_000));
    }

    #[tokio::test]
    async fn clear_removes_the_record() {
        let timers = TimerStore::new(Arc::new(MemoryStore::default()));
        let clock = ManualClock::new(1_000);
        timers.ensure_started(&key(), &clock).await;

        timers.clear(&key()).await;
        assert_eq!(timers.started_at(&key()).await, None);
        assert_eq!(timers.remaining(&key(), DURATION, &clock).await, DURATION);
    }

    #[tokio::test]
    async fn unavailable_storage_degrades_to_full_duration() {
        let timers = TimerStore::new(Arc::new(FailingStore));
        let clock = ManualClock::new(1_000);

        assert_eq!(timers.ensure_started(&key(), &clock).await, 1_000);
        clock.advance(30_000);
        assert_eq!(timers.remaining(&key(), DURATION, &clock).await, DURATION);
        timers.clear(&key()).await;
    }

    #[tokio::test]
    async fn corrupt_record_is_replaced() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::default());
        store.set(&key().storage_key(Record::TimerStart), "yesterday").await.unwrap();
        let timers = TimerStore::new(store);
        let clock = ManualClock::new(9_000);

        assert_eq!(timers.ensure_started(&key(), &clock).await, 9_000);
        assert_eq!(timers.started_at(&key()).await, Some(9_000));
    }
}
