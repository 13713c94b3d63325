use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::attempt::{AttemptKey, ExamKind};
use crate::core::time::Clock;
use crate::host::{Destination, FullscreenGate, HostCommand, HostError, HostSink, Navigator};
use crate::schemas::exam::{ExamDetail, QuestionStatus};
use crate::schemas::submission::{SubmissionReceipt, SubmitAssignmentRequest, SubmitMcqRequest};
use crate::services::backend::{BackendError, ExamBackend};
use crate::store::{StateStore, StoreError};

pub(crate) const TEST_EXAM_ID: &str = "assignment-test";
pub(crate) const TEST_STUDENT_ID: &str = "student-test";

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serialises tests that mutate process environment variables.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    locked(LOCK.get_or_init(|| Mutex::new(())))
}

pub(crate) fn set_test_env() {
    std::env::set_var("EXAMGUARD_ENV", "test");
    std::env::set_var("EXAMGUARD_STRICT_CONFIG", "0");
    std::env::set_var("EXAMGUARD_BACKEND_URL", "http://localhost:8080/api");
    std::env::set_var("EXAMGUARD_STORE", "memory");
    std::env::set_var("EXAMGUARD_EXAM_ID", TEST_EXAM_ID);
    std::env::set_var("EXAMGUARD_EXAM_KIND", "assignment");
    std::env::set_var("EXAMGUARD_STUDENT_ID", TEST_STUDENT_ID);
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    for name in [
        "ENVIRONMENT",
        "EXAMGUARD_AUTH_TOKEN",
        "EXAMGUARD_REQUEST_TIMEOUT_SECONDS",
        "EXAMGUARD_STORE_PATH",
        "EXAMGUARD_ASSIGNMENT_DURATION_MINUTES",
        "EXAMGUARD_MCQ_DURATION_MINUTES",
        "EXAMGUARD_MAX_VIOLATIONS",
        "EXAMGUARD_VIOLATION_DEBOUNCE_MS",
        "EXAMGUARD_TICK_INTERVAL_MS",
        "EXAMGUARD_REDIRECT_DELAY_MS",
        "EXAMGUARD_TIMER_CLEAR_POLICY",
        "REDIS_PASSWORD",
    ] {
        std::env::remove_var(name);
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub(crate) struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub(crate) fn new(now_ms: i64) -> Self {
        Self { now_ms: AtomicI64::new(now_ms) }
    }

    pub(crate) fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Storage that is never reachable, like a browser with storage disabled.
pub(crate) struct FailingStore;

#[async_trait]
impl StateStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("storage disabled".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("storage disabled".to_string()))
    }

    async fn set_if_absent(&self, _key: &str, _value: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("storage disabled".to_string()))
    }

    async fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("storage disabled".to_string()))
    }
}

#[derive(Default)]
pub(crate) struct RecordingHost {
    commands: Mutex<Vec<HostCommand>>,
    deny_fullscreen: AtomicBool,
    fullscreen_requests: AtomicUsize,
}

impl RecordingHost {
    pub(crate) fn deny_fullscreen(&self) {
        self.deny_fullscreen.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fullscreen_requests(&self) -> usize {
        self.fullscreen_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn commands(&self) -> Vec<HostCommand> {
        locked(&self.commands).clone()
    }

    pub(crate) fn navigations(&self) -> Vec<Destination> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                HostCommand::Navigate { destination } => Some(destination),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn logouts(&self) -> usize {
        self.commands().iter().filter(|command| matches!(command, HostCommand::Logout { .. })).count()
    }
}

impl HostSink for RecordingHost {
    fn emit(&self, command: HostCommand) {
        locked(&self.commands).push(command);
    }
}

impl Navigator for RecordingHost {
    fn navigate(&self, destination: Destination) {
        self.emit(HostCommand::Navigate { destination });
    }

    fn logout(&self, reason: &str) {
        self.emit(HostCommand::Logout { reason: reason.to_string() });
        self.emit(HostCommand::Navigate { destination: Destination::Login });
    }
}

#[async_trait]
impl FullscreenGate for RecordingHost {
    async fn request_fullscreen(&self) -> Result<(), HostError> {
        self.fullscreen_requests.fetch_add(1, Ordering::SeqCst);
        if self.deny_fullscreen.load(Ordering::SeqCst) {
            return Err(HostError::FullscreenDenied("permission denied".to_string()));
        }
        self.emit(HostCommand::RequestFullscreen);
        Ok(())
    }
}

/// In-process backend that records every submission it receives.
#[derive(Default)]
pub(crate) struct RecordingBackend {
    delay: Mutex<Duration>,
    score: Mutex<Option<f64>>,
    failures: Mutex<VecDeque<BackendError>>,
    statuses: Mutex<HashMap<String, QuestionStatus>>,
    assignment_requests: Mutex<Vec<SubmitAssignmentRequest>>,
    mcq_requests: Mutex<Vec<SubmitMcqRequest>>,
    idempotency_keys: Mutex<Vec<Uuid>>,
}

impl RecordingBackend {
    pub(crate) fn set_delay(&self, delay: Duration) {
        *locked(&self.delay) = delay;
    }

    pub(crate) fn set_score(&self, score: Option<f64>) {
        *locked(&self.score) = score;
    }

    /// The next submission fails with `err`; later ones succeed again.
    pub(crate) fn fail_next(&self, err: BackendError) {
        locked(&self.failures).push_back(err);
    }

    pub(crate) fn set_status(&self, question_id: &str, is_completed: bool) {
        locked(&self.statuses).insert(question_id.to_string(), QuestionStatus { is_completed });
    }

    pub(crate) fn submit_calls(&self) -> usize {
        locked(&self.idempotency_keys).len()
    }

    pub(crate) fn assignment_requests(&self) -> Vec<SubmitAssignmentRequest> {
        locked(&self.assignment_requests).clone()
    }

    pub(crate) fn mcq_requests(&self) -> Vec<SubmitMcqRequest> {
        locked(&self.mcq_requests).clone()
    }

    pub(crate) fn idempotency_keys(&self) -> Vec<Uuid> {
        locked(&self.idempotency_keys).clone()
    }

    async fn respond(&self, idempotency_key: Uuid) -> Result<SubmissionReceipt, BackendError> {
        locked(&self.idempotency_keys).push(idempotency_key);
        let delay = *locked(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = locked(&self.failures).pop_front();
        match failure {
            Some(err) => Err(err),
            None => Ok(SubmissionReceipt { score: *locked(&self.score) }),
        }
    }
}

#[async_trait]
impl ExamBackend for RecordingBackend {
    async fn fetch_exam(&self, _kind: ExamKind, exam_id: &str) -> Result<ExamDetail, BackendError> {
        Ok(ExamDetail { id: exam_id.to_string(), title: None, questions: Vec::new(), due_date: None })
    }

    async fn question_status(
        &self,
        _key: &AttemptKey,
        question_id: &str,
    ) -> Result<QuestionStatus, BackendError> {
        Ok(locked(&self.statuses).get(question_id).copied().unwrap_or_default())
    }

    async fn submit_assignment(
        &self,
        request: &SubmitAssignmentRequest,
        idempotency_key: Uuid,
    ) -> Result<SubmissionReceipt, BackendError> {
        locked(&self.assignment_requests).push(request.clone());
        self.respond(idempotency_key).await
    }

    async fn submit_mcq(
        &self,
        request: &SubmitMcqRequest,
        idempotency_key: Uuid,
    ) -> Result<SubmissionReceipt, BackendError> {
        locked(&self.mcq_requests).push(request.clone());
        self.respond(idempotency_key).await
    }
}
