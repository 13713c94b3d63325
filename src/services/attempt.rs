use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::attempt::{AttemptKey, ExamKind};
use crate::core::config::Settings;
use crate::core::time::Clock;
use crate::host::{FullscreenGate, HostCommand, HostEvent, HostSink, Navigator};
use crate::services::answers::McqAnswerStore;
use crate::services::backend::ExamBackend;
use crate::services::countdown::{self, CountdownConfig, CountdownHandle, CountdownView};
use crate::services::lockdown::{self, ListenerRegistry, LockdownGuard, LockdownScope};
use crate::services::proctoring::{
    self, FocusSignal, ProctoringConfig, ProctoringHooks, ProctoringMonitor, TimedSignal,
};
use crate::services::progress::{enter_question_view, AttemptProgressStore, QuestionAvailability};
use crate::services::submission::{
    SubmissionConfig, SubmissionCoordinator, SubmissionPhase, SubmitOutcome, SubmitTrigger,
};
use crate::services::timer_store::TimerStore;
use crate::store::StateStore;

const SIGNAL_BUFFER: usize = 64;
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum AttemptError {
    #[error("attempt is read-only: {0}")]
    ReadOnly(&'static str),
    #[error("{0} attempts do not take option answers")]
    NotMcq(&'static str),
    #[error("answer rejected: {0}")]
    InvalidAnswer(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AttemptConfig {
    pub(crate) duration_ms: i64,
    pub(crate) tick_interval: Duration,
    pub(crate) proctoring: ProctoringConfig,
    pub(crate) submission: SubmissionConfig,
}

impl AttemptConfig {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let exam = settings.exam();
        Self {
            duration_ms: exam.duration_ms(settings.attempt().exam_kind),
            tick_interval: Duration::from_millis(exam.tick_interval_ms),
            proctoring: ProctoringConfig {
                max_violations: exam.max_violations,
                debounce_ms: i64::try_from(exam.violation_debounce_ms).unwrap_or(i64::MAX),
            },
            submission: SubmissionConfig {
                clear_policy: exam.timer_clear_policy,
                redirect_delay: Duration::from_millis(exam.redirect_delay_ms),
            },
        }
    }
}

struct ViolationBridge {
    coordinator: Arc<SubmissionCoordinator>,
    host: Arc<dyn HostSink>,
    max_violations: u32,
}

#[async_trait]
impl ProctoringHooks for ViolationBridge {
    fn on_violation(&self, count: u32) {
        self.host.emit(HostCommand::Violation { count, max_violations: self.max_violations });
    }

    async fn on_auto_submit(&self) {
        self.coordinator.submit(SubmitTrigger::Proctoring).await;
    }
}

/// One mounted attempt: countdown, proctoring, lockdown and the submission flow
/// wired to a single host.
pub(crate) struct AttemptSession {
    key: AttemptKey,
    duration_ms: i64,
    clock: Arc<dyn Clock>,
    timers: TimerStore,
    backend: Arc<dyn ExamBackend>,
    progress: Arc<AttemptProgressStore>,
    answers: Arc<McqAnswerStore>,
    coordinator: Arc<SubmissionCoordinator>,
    countdown: CountdownHandle,
    host: Arc<dyn HostSink>,
    gate: Arc<dyn FullscreenGate>,
    registry: Arc<ListenerRegistry>,
    lockdowns: Mutex<Vec<LockdownGuard>>,
    submits: Mutex<Vec<JoinHandle<SubmitOutcome>>>,
    signals: mpsc::Sender<TimedSignal>,
    shutdown: watch::Sender<bool>,
    proctoring: JoinHandle<ProctoringMonitor>,
    relay: JoinHandle<()>,
}

impl AttemptSession {
    pub(crate) async fn start<H>(
        key: AttemptKey,
        config: AttemptConfig,
        store: Arc<dyn StateStore>,
        backend: Arc<dyn ExamBackend>,
        host: Arc<H>,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        H: HostSink + Navigator + FullscreenGate + 'static,
    {
        let timers = TimerStore::new(store.clone());
        let progress = Arc::new(AttemptProgressStore::new(store.clone()));
        let answers = Arc::new(McqAnswerStore::new(store));
        let sink: Arc<dyn HostSink> = host.clone();
        let navigator: Arc<dyn Navigator> = host.clone();
        let gate: Arc<dyn FullscreenGate> = host;

        let coordinator = Arc::new(SubmissionCoordinator::new(
            key.clone(),
            backend.clone(),
            timers.clone(),
            progress.clone(),
            answers.clone(),
            sink.clone(),
            navigator,
            config.submission,
        ));

        let countdown = countdown::mount(
            &timers,
            &key,
            CountdownConfig { duration_ms: config.duration_ms, tick_interval: config.tick_interval },
            clock.clone(),
            coordinator.clone(),
        )
        .await;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let relay = tokio::spawn(relay_countdown(countdown.subscribe(), sink.clone(), shutdown_rx.clone()));

        let (signals, signals_rx) = mpsc::channel(SIGNAL_BUFFER);
        let hooks = Arc::new(ViolationBridge {
            coordinator: coordinator.clone(),
            host: sink.clone(),
            max_violations: config.proctoring.max_violations,
        });
        let proctoring = tokio::spawn(proctoring::run(
            ProctoringMonitor::new(config.proctoring),
            signals_rx,
            hooks,
            shutdown_rx,
        ));

        tracing::info!(
            attempt = %key,
            remaining = %countdown.current().display,
            max_violations = config.proctoring.max_violations,
            "Attempt session started"
        );

        Self {
            key,
            duration_ms: config.duration_ms,
            clock,
            timers,
            backend,
            progress,
            answers,
            coordinator,
            countdown,
            host: sink,
            gate,
            registry: Arc::new(ListenerRegistry::default()),
            lockdowns: Mutex::new(Vec::new()),
            submits: Mutex::new(Vec::new()),
            signals,
            shutdown,
            proctoring,
            relay,
        }
    }

    pub(crate) fn key(&self) -> &AttemptKey {
        &self.key
    }

    pub(crate) fn countdown(&self) -> watch::Receiver<CountdownView> {
        self.countdown.subscribe()
    }

    pub(crate) fn submission(&self) -> watch::Receiver<SubmissionPhase> {
        self.coordinator.subscribe()
    }

    /// True once time is up or a submission has started, even if the network call is
    /// still in flight.
    pub(crate) fn is_read_only(&self) -> bool {
        self.countdown.is_expired() || self.coordinator.phase().is_locked()
    }

    fn ensure_writable(&self) -> Result<(), AttemptError> {
        if self.countdown.is_expired() {
            return Err(AttemptError::ReadOnly("time is up"));
        }
        match self.coordinator.phase() {
            SubmissionPhase::Submitting => Err(AttemptError::ReadOnly("submission in progress")),
            SubmissionPhase::Submitted(_) => Err(AttemptError::ReadOnly("already submitted")),
            SubmissionPhase::SessionExpired(_) => Err(AttemptError::ReadOnly("session expired")),
            SubmissionPhase::Idle | SubmissionPhase::Failed(_) => Ok(()),
        }
    }

    pub(crate) async fn record_answer(
        &self,
        question_id: &str,
        selected_option: &str,
    ) -> Result<BTreeMap<String, String>, AttemptError> {
        if self.key.kind != ExamKind::Mcq {
            return Err(AttemptError::NotMcq(self.key.kind.as_str()));
        }
        // Blank entries would fail submit validation on every later try.
        if question_id.trim().is_empty() {
            return Err(AttemptError::InvalidAnswer("question id is empty"));
        }
        if selected_option.trim().is_empty() {
            return Err(AttemptError::InvalidAnswer("no option selected"));
        }
        self.ensure_writable()?;
        Ok(self.answers.record(&self.key, question_id, selected_option).await)
    }

    pub(crate) async fn mark_completed(&self, question_id: &str) -> Result<BTreeSet<String>, AttemptError> {
        self.ensure_writable()?;
        Ok(self.progress.mark_completed(&self.key, question_id).await)
    }

    pub(crate) async fn open_question(&self, question_id: &str) -> QuestionAvailability {
        enter_question_view(self.gate.as_ref(), question_id).await;

        let server = match self.backend.question_status(&self.key, question_id).await {
            Ok(status) => Some(status),
            Err(err) => {
                tracing::warn!(attempt = %self.key, question_id, error = %err, "Question status unavailable");
                None
            }
        };

        let availability = self.progress.availability(&self.key, question_id, server).await;
        self.host.emit(HostCommand::QuestionAvailability(availability.clone()));
        availability
    }

    /// Starts a manual submit in the background so host events keep flowing while the
    /// backend call and redirect delay run. Joined at shutdown.
    fn spawn_submit(&self) {
        let coordinator = self.coordinator.clone();
        let task = tokio::spawn(async move { coordinator.submit(SubmitTrigger::Manual).await });

        let mut submits = self.submits.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        submits.retain(|task| !task.is_finished());
        submits.push(task);
    }

    async fn observe_focus(&self, signal: FocusSignal) {
        let timed = TimedSignal { signal, at_ms: self.clock.now_ms() };
        if self.signals.send(timed).await.is_err() {
            tracing::debug!(attempt = %self.key, ?signal, "Proctoring stopped; signal dropped");
        }
    }

    pub(crate) fn engage_lockdown(&self, scope: LockdownScope) {
        let guard = lockdown::engage(&self.registry, scope);
        self.lockdowns.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(guard);
    }

    /// Releases the most recent engagement of `scope`.
    pub(crate) fn release_lockdown(&self, scope: LockdownScope) {
        let mut guards = self.lockdowns.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guards.iter().rposition(|guard| guard.scope() == scope) {
            Some(index) => {
                drop(guards.remove(index));
                tracing::debug!(?scope, remaining = self.registry.active_listeners().len(), "Lockdown scope released");
            }
            None => tracing::debug!(?scope, "Lockdown release without engagement"),
        }
    }

    pub(crate) async fn handle(&self, event: HostEvent) {
        match event {
            HostEvent::VisibilityChange { hidden: true } => {
                self.observe_focus(FocusSignal::DocumentHidden).await
            }
            HostEvent::VisibilityChange { hidden: false } | HostEvent::Focus => {}
            HostEvent::Blur => self.observe_focus(FocusSignal::WindowBlur).await,
            HostEvent::Dom { surface, event } => {
                let disposition = self.registry.intercept(surface, event);
                self.host.emit(HostCommand::EventDisposition(disposition));
            }
            HostEvent::KeyChord(chord) => {
                let disposition = lockdown::intercept_editor_command(&chord);
                self.host.emit(HostCommand::EventDisposition(disposition));
            }
            HostEvent::OpenQuestion { question_id } => {
                self.open_question(&question_id).await;
            }
            HostEvent::QuestionCompleted { question_id } => {
                if let Err(err) = self.mark_completed(&question_id).await {
                    self.reject(err);
                }
            }
            HostEvent::Answer { question_id, selected_option } => {
                if let Err(err) = self.record_answer(&question_id, &selected_option).await {
                    self.reject(err);
                }
            }
            HostEvent::Submit => self.spawn_submit(),
            HostEvent::FullscreenDenied { reason } => {
                tracing::warn!(
                    attempt = %self.key,
                    reason = reason.as_deref().unwrap_or("unspecified"),
                    "Fullscreen denied; continuing windowed"
                );
            }
            HostEvent::EngageLockdown { scope } => self.engage_lockdown(scope),
            HostEvent::ReleaseLockdown { scope } => self.release_lockdown(scope),
        }
    }

    fn reject(&self, err: AttemptError) {
        tracing::info!(attempt = %self.key, error = %err, "Change rejected");
        self.host.emit(HostCommand::Rejected { reason: err.to_string() });
    }

    /// Stops background tasks and waits for a submission already in flight.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        drop(self.signals);

        let violations = match self.proctoring.await {
            Ok(monitor) => monitor.violation_count(),
            Err(err) => {
                tracing::error!(error = %err, "Proctoring task join failed");
                0
            }
        };

        let submits =
            std::mem::take(&mut *self.submits.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
        for task in submits {
            match tokio::time::timeout(SETTLE_TIMEOUT, task).await {
                Ok(Ok(outcome)) => tracing::debug!(attempt = %self.key, ?outcome, "Manual submission joined"),
                Ok(Err(err)) => tracing::error!(error = %err, "Manual submission task join failed"),
                Err(_) => tracing::warn!(attempt = %self.key, "Manual submission still in flight at shutdown"),
            }
        }

        let mut phase = self.coordinator.subscribe();
        let settled = tokio::time::timeout(
            SETTLE_TIMEOUT,
            phase.wait_for(|phase| *phase != SubmissionPhase::Submitting),
        )
        .await
        .is_ok();
        if !settled {
            tracing::warn!(attempt = %self.key, "Submission still in flight at shutdown");
        }

        self.countdown.unmount().await;
        if let Err(err) = self.relay.await {
            tracing::error!(error = %err, "Countdown relay join failed");
        }
        self.lockdowns.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
        let remaining_ms = self.timers.remaining(&self.key, self.duration_ms, self.clock.as_ref()).await;

        tracing::info!(
            attempt = %self.key,
            violations,
            remaining_ms,
            phase = self.coordinator.phase().as_str(),
            "Attempt session stopped"
        );
    }
}

async fn relay_countdown(
    mut views: watch::Receiver<CountdownView>,
    host: Arc<dyn HostSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    host.emit(HostCommand::Countdown(views.borrow_and_update().clone()));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                let expired = view.expired;
                host.emit(HostCommand::Countdown(view));
                if expired {
                    break;
                }
            }
        }
    }
}
