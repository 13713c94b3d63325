//! The one terminal transition of an attempt.
//!
//! Manual submit, timer expiry and proctoring escalation all funnel into
//! [`SubmissionCoordinator::submit`]. The `Idle|Failed -> Submitting` check-and-set is a
//! single `send_if_modified` on the phase channel, so concurrent triggers produce exactly
//! one backend call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::attempt::{AttemptKey, ExamKind};
use crate::core::config::TimerClearPolicy;
use crate::host::{Destination, HostCommand, HostSink, Navigator};
use crate::schemas::submission::{SubmissionReceipt, SubmitAssignmentRequest, SubmitMcqRequest};
use crate::services::answers::{to_wire, McqAnswerStore};
use crate::services::backend::{BackendError, ExamBackend};
use crate::services::countdown::ExpiryHook;
use crate::services::progress::AttemptProgressStore;
use crate::services::timer_store::TimerStore;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SubmissionPhase {
    Idle,
    Submitting,
    Submitted(SubmissionReceipt),
    Failed(String),
    /// The backend rejected the credentials. Terminal: the host has been logged out.
    SessionExpired(String),
}

impl SubmissionPhase {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Submitted(_) => "submitted",
            Self::Failed(_) => "failed",
            Self::SessionExpired(_) => "session_expired",
        }
    }

    fn accepts_submit(&self) -> bool {
        matches!(self, Self::Idle | Self::Failed(_))
    }

    /// Any phase other than `Idle` or `Failed`: the attempt no longer accepts edits.
    pub(crate) fn is_locked(&self) -> bool {
        matches!(self, Self::Submitting | Self::Submitted(_) | Self::SessionExpired(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitTrigger {
    Manual,
    TimerExpired,
    Proctoring,
}

impl SubmitTrigger {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::TimerExpired => "timer_expired",
            Self::Proctoring => "proctoring",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SubmitOutcome {
    Submitted(SubmissionReceipt),
    /// Another trigger already owns the transition, or it has completed.
    Suppressed,
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SubmissionConfig {
    pub(crate) clear_policy: TimerClearPolicy,
    pub(crate) redirect_delay: Duration,
}

pub(crate) struct SubmissionCoordinator {
    key: AttemptKey,
    backend: Arc<dyn ExamBackend>,
    timers: TimerStore,
    progress: Arc<AttemptProgressStore>,
    answers: Arc<McqAnswerStore>,
    host: Arc<dyn HostSink>,
    navigator: Arc<dyn Navigator>,
    config: SubmissionConfig,
    idempotency_key: Uuid,
    phase: watch::Sender<SubmissionPhase>,
}

impl SubmissionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: AttemptKey,
        backend: Arc<dyn ExamBackend>,
        timers: TimerStore,
        progress: Arc<AttemptProgressStore>,
        answers: Arc<McqAnswerStore>,
        host: Arc<dyn HostSink>,
        navigator: Arc<dyn Navigator>,
        config: SubmissionConfig,
    ) -> Self {
        let (phase, _) = watch::channel(SubmissionPhase::Idle);
        Self {
            key,
            backend,
            timers,
            progress,
            answers,
            host,
            navigator,
            config,
            idempotency_key: Uuid::new_v4(),
            phase,
        }
    }

    pub(crate) fn phase(&self) -> SubmissionPhase {
        self.phase.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SubmissionPhase> {
        self.phase.subscribe()
    }

    fn try_begin(&self) -> bool {
        self.phase.send_if_modified(|phase| {
            if phase.accepts_submit() {
                *phase = SubmissionPhase::Submitting;
                true
            } else {
                false
            }
        })
    }

    pub(crate) async fn submit(&self, trigger: SubmitTrigger) -> SubmitOutcome {
        if !self.try_begin() {
            tracing::debug!(
                attempt = %self.key,
                trigger = trigger.as_str(),
                phase = self.phase().as_str(),
                "Duplicate submission suppressed"
            );
            record(trigger, "suppressed");
            return SubmitOutcome::Suppressed;
        }

        tracing::info!(attempt = %self.key, trigger = trigger.as_str(), "Submitting attempt");
        self.host.emit(HostCommand::SubmissionState { state: "submitting", message: None, score: None });

        match self.send().await {
            Ok(receipt) => {
                record(trigger, "submitted");
                self.complete(receipt).await;
                SubmitOutcome::Submitted(receipt)
            }
            Err(err) => {
                record(trigger, "failed");
                SubmitOutcome::Failed(self.fail(err))
            }
        }
    }

    async fn send(&self) -> Result<SubmissionReceipt, BackendError> {
        match self.key.kind {
            ExamKind::Assignment => {
                let request = SubmitAssignmentRequest {
                    assignment_id: self.key.exam_id.clone(),
                    student_id: self.key.student_id.clone(),
                    solved_questions: self.progress.load(&self.key).await.into_iter().collect(),
                    is_final_submission: true,
                };
                self.backend.submit_assignment(&request, self.idempotency_key).await
            }
            ExamKind::Mcq => {
                let request = SubmitMcqRequest {
                    mcq_id: self.key.exam_id.clone(),
                    student_id: self.key.student_id.clone(),
                    answers: to_wire(&self.answers.load(&self.key).await),
                };
                self.backend.submit_mcq(&request, self.idempotency_key).await
            }
        }
    }

    async fn complete(&self, receipt: SubmissionReceipt) {
        if self.config.clear_policy == TimerClearPolicy::Clear {
            self.timers.clear(&self.key).await;
        }
        if self.key.kind == ExamKind::Mcq {
            self.answers.clear(&self.key).await;
        }

        self.phase.send_replace(SubmissionPhase::Submitted(receipt));
        self.host.emit(HostCommand::SubmissionState {
            state: "submitted",
            message: None,
            score: receipt.score,
        });
        tracing::info!(attempt = %self.key, score = ?receipt.score, "Attempt submitted");

        tokio::time::sleep(self.config.redirect_delay).await;
        self.navigator.navigate(Destination::Dashboard);
    }

    fn fail(&self, err: BackendError) -> String {
        let message = err.to_string();
        let phase = if err.is_auth() {
            SubmissionPhase::SessionExpired(message.clone())
        } else {
            SubmissionPhase::Failed(message.clone())
        };
        self.phase.send_replace(phase);
        self.host.emit(HostCommand::SubmissionState {
            state: "failed",
            message: Some(message.clone()),
            score: None,
        });

        if err.is_auth() {
            tracing::warn!(attempt = %self.key, error = %err, "Session expired during submission");
            self.navigator.logout(&message);
        } else {
            tracing::error!(attempt = %self.key, error = %err, "Submission failed; progress kept for retry");
        }
        message
    }
}

fn record(trigger: SubmitTrigger, status: &'static str) {
    metrics::counter!("submissions_total", "trigger" => trigger.as_str(), "status" => status)
        .increment(1);
}

#[async_trait]
impl ExpiryHook for SubmissionCoordinator {
    async fn on_expired(&self) {
        self.submit(SubmitTrigger::TimerExpired).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attempt::Record;
    use crate::core::time::Clock;
    use crate::store::{MemoryStore, StateStore};
    use crate::test_support::{ManualClock, RecordingBackend, RecordingHost};

    struct Fixture {
        store: Arc<dyn StateStore>,
        backend: Arc<RecordingBackend>,
        host: Arc<RecordingHost>,
        timers: TimerStore,
        progress: Arc<AttemptProgressStore>,
        answers: Arc<McqAnswerStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn StateStore> = Arc::new(MemoryStore::default());
            Self {
                backend: Arc::new(RecordingBackend::default()),
                host: Arc::new(RecordingHost::default()),
                timers: TimerStore::new(store.clone()),
                progress: Arc::new(AttemptProgressStore::new(store.clone())),
                answers: Arc::new(McqAnswerStore::new(store.clone())),
                store,
            }
        }

        fn coordinator(&self, key: AttemptKey, clear_policy: TimerClearPolicy) -> SubmissionCoordinator {
            SubmissionCoordinator::new(
                key,
                self.backend.clone(),
                self.timers.clone(),
                self.progress.clone(),
                self.answers.clone(),
                self.host.clone(),
                self.host.clone(),
                SubmissionConfig { clear_policy, redirect_delay: Duration::ZERO },
            )
        }
    }

    fn assignment() -> AttemptKey {
        AttemptKey::new(ExamKind::Assignment, "a-1", "s-1")
    }

    fn mcq() -> AttemptKey {
        AttemptKey::new(ExamKind::Mcq, "m-1", "s-1")
    }

    #[tokio::test]
    async fn concurrent_manual_and_expiry_submit_once() {
        let fixture = Fixture::new();
        fixture.backend.set_delay(Duration::from_millis(50));
        let coordinator = fixture.coordinator(assignment(), TimerClearPolicy::Clear);

        let (manual, expired) = tokio::join!(
            coordinator.submit(SubmitTrigger::Manual),
            coordinator.submit(SubmitTrigger::TimerExpired)
        );

        let outcomes = [manual, expired];
        assert_eq!(outcomes.iter().filter(|o| matches!(o, SubmitOutcome::Submitted(_))).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == SubmitOutcome::Suppressed).count(), 1);
        assert_eq!(fixture.backend.submit_calls(), 1);
        assert_eq!(fixture.host.navigations(), vec![Destination::Dashboard]);
    }

    #[tokio::test]
    async fn submitted_attempt_ignores_later_triggers() {
        let fixture = Fixture::new();
        let coordinator = fixture.coordinator(assignment(), TimerClearPolicy::Clear);

        assert!(matches!(coordinator.submit(SubmitTrigger::Manual).await, SubmitOutcome::Submitted(_)));
        assert_eq!(coordinator.submit(SubmitTrigger::Proctoring).await, SubmitOutcome::Suppressed);
        assert_eq!(fixture.backend.submit_calls(), 1);
        assert!(coordinator.phase().is_locked());
    }

    #[tokio::test]
    async fn assignment_submission_carries_completed_questions() {
        let fixture = Fixture::new();
        fixture.progress.mark_completed(&assignment(), "q-2").await;
        fixture.progress.mark_completed(&assignment(), "q-1").await;
        let coordinator = fixture.coordinator(assignment(), TimerClearPolicy::Clear);

        coordinator.submit(SubmitTrigger::Manual).await;

        let requests = fixture.backend.assignment_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].assignment_id, "a-1");
        assert_eq!(requests[0].solved_questions, vec!["q-1".to_string(), "q-2".to_string()]);
        assert!(requests[0].is_final_submission);
    }

    #[tokio::test]
    async fn failure_keeps_progress_and_retry_reuses_idempotency_key() {
        let fixture = Fixture::new();
        fixture.progress.mark_completed(&assignment(), "q-1").await;
        fixture.backend.fail_next(BackendError::Transport("connection reset".to_string()));
        let coordinator = fixture.coordinator(assignment(), TimerClearPolicy::Clear);

        let first = coordinator.submit(SubmitTrigger::Manual).await;
        assert!(matches!(first, SubmitOutcome::Failed(ref message) if message.contains("connection reset")));
        assert!(matches!(coordinator.phase(), SubmissionPhase::Failed(_)));
        assert!(!coordinator.phase().is_locked());
        assert!(fixture.progress.load(&assignment()).await.contains("q-1"));
        assert!(fixture.host.navigations().is_empty());

        let retry = coordinator.submit(SubmitTrigger::Manual).await;
        assert!(matches!(retry, SubmitOutcome::Submitted(_)));

        let keys = fixture.backend.idempotency_keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn auth_failure_logs_out_without_retry() {
        let fixture = Fixture::new();
        fixture.backend.fail_next(BackendError::Unauthorized(401));
        let coordinator = fixture.coordinator(assignment(), TimerClearPolicy::Clear);

        let outcome = coordinator.submit(SubmitTrigger::TimerExpired).await;

        assert!(matches!(outcome, SubmitOutcome::Failed(_)));
        assert_eq!(fixture.host.logouts(), 1);
        assert_eq!(fixture.host.navigations(), vec![Destination::Login]);
        assert_eq!(fixture.backend.submit_calls(), 1);
    }

    #[tokio::test]
    async fn expired_session_suppresses_later_triggers() {
        let fixture = Fixture::new();
        fixture.backend.fail_next(BackendError::Unauthorized(401));
        let coordinator = fixture.coordinator(assignment(), TimerClearPolicy::Clear);

        assert!(matches!(coordinator.submit(SubmitTrigger::Manual).await, SubmitOutcome::Failed(_)));
        assert!(matches!(coordinator.phase(), SubmissionPhase::SessionExpired(_)));
        assert!(coordinator.phase().is_locked());

        for trigger in [SubmitTrigger::Proctoring, SubmitTrigger::TimerExpired, SubmitTrigger::Manual] {
            assert_eq!(coordinator.submit(trigger).await, SubmitOutcome::Suppressed);
        }
        assert_eq!(fixture.backend.submit_calls(), 1);
        assert_eq!(fixture.host.logouts(), 1);
    }

    #[tokio::test]
    async fn clear_policy_removes_timer_start() {
        let fixture = Fixture::new();
        let clock = ManualClock::new(1_000);
        fixture.timers.ensure_started(&assignment(), &clock).await;
        let coordinator = fixture.coordinator(assignment(), TimerClearPolicy::Clear);

        coordinator.submit(SubmitTrigger::Manual).await;

        assert_eq!(fixture.timers.started_at(&assignment()).await, None);
    }

    #[tokio::test]
    async fn retain_policy_keeps_timer_start() {
        let fixture = Fixture::new();
        let clock = ManualClock::new(1_000);
        fixture.timers.ensure_started(&assignment(), &clock).await;
        let coordinator = fixture.coordinator(assignment(), TimerClearPolicy::Retain);

        coordinator.submit(SubmitTrigger::Manual).await;

        assert_eq!(fixture.timers.started_at(&assignment()).await, Some(clock.now_ms()));
    }

    #[tokio::test]
    async fn mcq_submission_reports_score_and_clears_answers() {
        let fixture = Fixture::new();
        fixture.backend.set_score(Some(8.5));
        fixture.answers.record(&mcq(), "q-1", "B").await;
        fixture.answers.record(&mcq(), "q-2", "C").await;
        let coordinator = fixture.coordinator(mcq(), TimerClearPolicy::Clear);

        let outcome = coordinator.submit(SubmitTrigger::Manual).await;

        assert_eq!(outcome, SubmitOutcome::Submitted(SubmissionReceipt { score: Some(8.5) }));
        let requests = fixture.backend.mcq_requests();
        assert_eq!(requests[0].mcq_id, "m-1");
        assert_eq!(requests[0].answers.len(), 2);
        assert!(fixture.answers.load(&mcq()).await.is_empty());
        let persisted = fixture.store.get(&mcq().storage_key(Record::McqAnswers)).await.unwrap();
        assert_eq!(persisted, None);
        assert!(fixture.host.commands().contains(&HostCommand::SubmissionState {
            state: "submitted",
            message: None,
            score: Some(8.5),
        }));
    }

    #[tokio::test]
    async fn failed_mcq_submission_keeps_answers() {
        let fixture = Fixture::new();
        fixture.backend.fail_next(BackendError::Status { status: 502, message: "bad gateway".to_string() });
        fixture.answers.record(&mcq(), "q-1", "B").await;
        let coordinator = fixture.coordinator(mcq(), TimerClearPolicy::Clear);

        coordinator.submit(SubmitTrigger::Manual).await;

        assert_eq!(fixture.answers.load(&mcq()).await.len(), 1);
    }

    #[tokio::test]
    async fn expiry_hook_submits_with_timer_trigger() {
        let fixture = Fixture::new();
        let coordinator = Arc::new(fixture.coordinator(assignment(), TimerClearPolicy::Clear));
        let hook: Arc<dyn ExpiryHook> = coordinator.clone();

        hook.on_expired().await;

        assert!(matches!(coordinator.phase(), SubmissionPhase::Submitted(_)));
        assert_eq!(fixture.backend.submit_calls(), 1);
    }
}
