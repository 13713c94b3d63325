//! Tab-switch and window-blur detection with escalation to forced submission.
//!
//! [`ProctoringMonitor`] is plain state owned by one attempt: a fresh monitor per mount,
//! nothing shared between instances. [`run`] feeds it host signals and performs the
//! side effects.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum FocusSignal {
    /// `document.visibilityState` became `hidden`.
    DocumentHidden,
    /// The window lost focus.
    WindowBlur,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ProctoringConfig {
    pub(crate) max_violations: u32,
    pub(crate) debounce_ms: i64,
}

impl Default for ProctoringConfig {
    fn default() -> Self {
        Self { max_violations: 2, debounce_ms: 1_000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observation {
    /// Within the debounce window of the previous accepted signal.
    Ignored,
    Counted { count: u32 },
    /// Counted, and this is the first count above the threshold.
    Escalated { count: u32 },
}

#[derive(Debug)]
pub(crate) struct ProctoringMonitor {
    config: ProctoringConfig,
    violation_count: u32,
    last_accepted_at_ms: Option<i64>,
    has_auto_submitted: bool,
}

impl ProctoringMonitor {
    pub(crate) fn new(config: ProctoringConfig) -> Self {
        Self { config, violation_count: 0, last_accepted_at_ms: None, has_auto_submitted: false }
    }

    pub(crate) fn violation_count(&self) -> u32 {
        self.violation_count
    }

    pub(crate) fn has_auto_submitted(&self) -> bool {
        self.has_auto_submitted
    }

    pub(crate) fn observe(&mut self, _signal: FocusSignal, now_ms: i64) -> Observation {
        if let Some(last) = self.last_accepted_at_ms {
            if now_ms.saturating_sub(last) < self.config.debounce_ms {
                return Observation::Ignored;
            }
        }

        self.last_accepted_at_ms = Some(now_ms);
        self.violation_count += 1;
        let count = self.violation_count;

        if count > self.config.max_violations && !self.has_auto_submitted {
            self.has_auto_submitted = true;
            return Observation::Escalated { count };
        }

        Observation::Counted { count }
    }
}

#[async_trait]
pub(crate) trait ProctoringHooks: Send + Sync {
    fn on_violation(&self, count: u32);

    /// Called at most once per monitor. No confirmation is shown first.
    async fn on_auto_submit(&self);
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimedSignal {
    pub(crate) signal: FocusSignal,
    pub(crate) at_ms: i64,
}

/// Consumes signals until the channel closes or shutdown is flagged.
///
/// The escalation is deferred onto its own task rather than run inside the signal
/// handler; it is joined before this returns.
pub(crate) async fn run(
    mut monitor: ProctoringMonitor,
    mut signals: mpsc::Receiver<TimedSignal>,
    hooks: Arc<dyn ProctoringHooks>,
    mut shutdown: watch::Receiver<bool>,
) -> ProctoringMonitor {
    let mut escalation: Option<JoinHandle<()>> = None;

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            received = signals.recv() => {
                let Some(TimedSignal { signal, at_ms }) = received else {
                    break;
                };

                match monitor.observe(signal, at_ms) {
                    Observation::Ignored => {
                        tracing::debug!(?signal, "Duplicate focus-loss signal ignored");
                    }
                    Observation::Counted { count } => {
                        record_violation(signal, count);
                        hooks.on_violation(count);
                    }
                    Observation::Escalated { count } => {
                        record_violation(signal, count);
                        hooks.on_violation(count);
                        tracing::warn!(count, "Violation limit exceeded; forcing submission");
                        let hooks = hooks.clone();
                        escalation = Some(tokio::spawn(async move { hooks.on_auto_submit().await }));
                    }
                }
            }
        }
    }

    if let Some(handle) = escalation {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Forced submission task join failed");
        }
    }

    monitor
}

fn record_violation(signal: FocusSignal, count: u32) {
    let source = match signal {
        FocusSignal::DocumentHidden => "visibility",
        FocusSignal::WindowBlur => "blur",
    };
    metrics::counter!("proctoring_violations_total", "source" => source).increment(1);
    tracing::info!(count, source, "Proctoring violation recorded");
}
