use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::core::attempt::{AttemptKey, ExamKind};
use crate::core::config::Settings;
use crate::schemas::exam::{ExamDetail, QuestionStatus};
use crate::schemas::submission::{
    SubmissionReceipt, SubmitAssignmentRequest, SubmitAssignmentResponse, SubmitMcqRequest,
    SubmitMcqResponse,
};

#[derive(Debug, Error)]
pub(crate) enum BackendError {
    #[error("session expired (status {0})")]
    Unauthorized(u16),
    #[error("backend returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("backend rejected the submission")]
    Rejected,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl BackendError {
    pub(crate) fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

impl From<validator::ValidationErrors> for BackendError {
    fn from(err: validator::ValidationErrors) -> Self {
        BackendError::Invalid(err.to_string())
    }
}

/// REST contracts the exam core depends on.
#[async_trait]
pub(crate) trait ExamBackend: Send + Sync {
    async fn fetch_exam(&self, kind: ExamKind, exam_id: &str) -> Result<ExamDetail, BackendError>;

    async fn question_status(
        &self,
        key: &AttemptKey,
        question_id: &str,
    ) -> Result<QuestionStatus, BackendError>;

    async fn submit_assignment(
        &self,
        request: &SubmitAssignmentRequest,
        idempotency_key: Uuid,
    ) -> Result<SubmissionReceipt, BackendError>;

    async fn submit_mcq(
        &self,
        request: &SubmitMcqRequest,
        idempotency_key: Uuid,
    ) -> Result<SubmissionReceipt, BackendError>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    client: Client,
    base_url: String,
    auth_token: String,
}

impl HttpBackend {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.backend().request_timeout_seconds.max(1));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|err| anyhow::anyhow!("Failed to build backend HTTP client: {err}"))?;

        Ok(Self {
            client,
            base_url: settings.backend().base_url.trim_end_matches('/').to_string(),
            auth_token: settings.backend().auth_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.auth_token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.auth_token)
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, BackendError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        let raw_body = response.text().await?;

        if !status.is_success() {
            return Err(classify_failure(status, &raw_body));
        }

        serde_json::from_str::<T>(&raw_body)
            .map_err(|err| BackendError::Decode(format!("{err}: {}", truncate(&raw_body, 200))))
    }
}

#[async_trait]
impl ExamBackend for HttpBackend {
    async fn fetch_exam(&self, kind: ExamKind, exam_id: &str) -> Result<ExamDetail, BackendError> {
        let url = self.url(&format!("{}/{exam_id}", kind.collection()));
        self.send_json(self.client.get(url)).await
    }

    async fn question_status(
        &self,
        key: &AttemptKey,
        question_id: &str,
    ) -> Result<QuestionStatus, BackendError> {
        let url = self.url(&format!(
            "{}/{}/questions/{question_id}/status",
            key.kind.collection(),
            key.exam_id
        ));
        self.send_json(self.client.get(url).query(&[("studentId", key.student_id.as_str())])).await
    }

    async fn submit_assignment(
        &self,
        request: &SubmitAssignmentRequest,
        idempotency_key: Uuid,
    ) -> Result<SubmissionReceipt, BackendError> {
        request.validate()?;
        let url = self.url("assignments/submit");
        let builder = self
            .client
            .post(url)
            .header("Idempotency-Key", idempotency_key.to_string())
            .json(request);

        let response: SubmitAssignmentResponse = self.send_json(builder).await?;
        if response.ok == Some(false) {
            return Err(BackendError::Rejected);
        }
        Ok(SubmissionReceipt { score: None })
    }

    async fn submit_mcq(
        &self,
        request: &SubmitMcqRequest,
        idempotency_key: Uuid,
    ) -> Result<SubmissionReceipt, BackendError> {
        request.validate()?;
        let url = self.url("mcqs/submit");
        let builder = self
            .client
            .post(url)
            .header("Idempotency-Key", idempotency_key.to_string())
            .json(request);

        let response: SubmitMcqResponse = self.send_json(builder).await?;
        Ok(SubmissionReceipt { score: response.submission.score })
    }
}

fn classify_failure(status: StatusCode, raw_body: &str) -> BackendError {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return BackendError::Unauthorized(status.as_u16());
    }

    let message = serde_json::from_str::<Value>(raw_body)
        .ok()
        .and_then(|parsed| extract_error_message(&parsed))
        .unwrap_or_else(|| truncate(raw_body, 200).to_string());

    BackendError::Status { status: status.as_u16(), message }
}

fn extract_error_message(value: &Value) -> Option<String> {
    ["detail", "message", "error"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
