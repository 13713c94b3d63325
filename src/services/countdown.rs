use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::core::attempt::AttemptKey;
use crate::core::time::Clock;
use crate::services::timer_store::{remaining_ms, TimerStore};

pub(crate) fn format_mm_ss(remaining_ms: i64) -> String {
    let total_seconds = remaining_ms.max(0) / 1000;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CountdownState {
    Running,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    Running { remaining_ms: i64 },
    /// First tick that observed zero. Reported once.
    Expired,
    AlreadyExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CountdownView {
    pub(crate) remaining_ms: i64,
    pub(crate) display: String,
    pub(crate) expired: bool,
}

/// `Running -> Expired` state machine over a persisted start.
#[derive(Debug, Clone)]
pub(crate) struct Countdown {
    started_at_ms: i64,
    duration_ms: i64,
    state: CountdownState,
}

impl Countdown {
    pub(crate) fn new(started_at_ms: i64, duration_ms: i64) -> Self {
        Self { started_at_ms, duration_ms, state: CountdownState::Running }
    }

    pub(crate) fn tick(&mut self, now_ms: i64) -> Tick {
        if self.state == CountdownState::Expired {
            return Tick::AlreadyExpired;
        }

        let remaining = remaining_ms(Some(self.started_at_ms), self.duration_ms, now_ms);
        if remaining > 0 {
            return Tick::Running { remaining_ms: remaining };
        }

        self.state = CountdownState::Expired;
        Tick::Expired
    }

    pub(crate) fn view(&self, now_ms: i64) -> CountdownView {
        let remaining = match self.state {
            CountdownState::Expired => 0,
            CountdownState::Running => {
                remaining_ms(Some(self.started_at_ms), self.duration_ms, now_ms)
            }
        };
        CountdownView {
            remaining_ms: remaining,
            display: format_mm_ss(remaining),
            expired: self.state == CountdownState::Expired,
        }
    }
}

#[async_trait]
pub(crate) trait ExpiryHook: Send + Sync {
    async fn on_expired(&self);
}

/// A mounted countdown. Dropping it cancels the tick task.
pub(crate) struct CountdownHandle {
    view: watch::Receiver<CountdownView>,
    task: JoinHandle<()>,
}

impl CountdownHandle {
    pub(crate) fn subscribe(&self) -> watch::Receiver<CountdownView> {
        self.view.clone()
    }

    pub(crate) fn current(&self) -> CountdownView {
        self.view.borrow().clone()
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.view.borrow().expired
    }

    pub(crate) async fn unmount(mut self) {
        self.task.abort();
        if let Err(err) = (&mut self.task).await {
            if !err.is_cancelled() {
                tracing::error!(error = %err, "Countdown task join failed");
            }
        }
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) struct CountdownConfig {
    pub(crate) duration_ms: i64,
    pub(crate) tick_interval: Duration,
}

/// Ensures the attempt has a start, then ticks until the first zero.
///
/// The expiry hook runs on its own task so that unmounting never cancels the
/// terminal action it starts.
pub(crate) async fn mount(
    timers: &TimerStore,
    key: &AttemptKey,
    config: CountdownConfig,
    clock: Arc<dyn Clock>,
    hook: Arc<dyn ExpiryHook>,
) -> CountdownHandle {
    let started_at = timers.ensure_started(key, clock.as_ref()).await;
    let mut countdown = Countdown::new(started_at, config.duration_ms);
    let (view_tx, view_rx) = watch::channel(countdown.view(clock.now_ms()));
    let attempt = key.clone();

    let task = tokio::spawn(async move {
        let mut ticker = interval(config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let now = clock.now_ms();
            match countdown.tick(now) {
                Tick::Running { remaining_ms } => {
                    tracing::trace!(attempt = %attempt, remaining_ms, "Countdown tick");
                    view_tx.send_replace(countdown.view(now));
                }
                Tick::Expired => {
                    view_tx.send_replace(countdown.view(now));
                    metrics::counter!("countdown_expired_total").increment(1);
                    tracing::info!(attempt = %attempt, "Attempt time is up");
                    let hook = hook.clone();
                    tokio::spawn(async move { hook.on_expired().await });
                    break;
                }
                Tick::AlreadyExpired => break,
            }
        }
    });

    CountdownHandle { view: view_rx, task }
}
