pub(crate) mod core;
pub(crate) mod host;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod store;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::attempt::AttemptKey;
use crate::core::config::Settings;
use crate::core::time::SystemClock;
use crate::core::{shutdown, telemetry};
use crate::host::{Navigator, StdioHost};
use crate::services::attempt::{AttemptConfig, AttemptSession};
use crate::services::backend::{ExamBackend, HttpBackend};

/// Drives one attempt: host events are read from stdin until the host closes it or a
/// shutdown signal arrives.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let attempt = settings.attempt();
    let key = AttemptKey::new(attempt.exam_kind, attempt.exam_id.clone(), attempt.student_id.clone());
    let host = Arc::new(StdioHost::default());
    let backend: Arc<dyn ExamBackend> = Arc::new(HttpBackend::from_settings(&settings)?);

    match backend.fetch_exam(key.kind, &key.exam_id).await {
        Ok(exam) => tracing::info!(
            attempt = %key,
            title = exam.title.as_deref().unwrap_or(""),
            questions = exam.questions.len(),
            due_date = exam.due_date.as_deref().unwrap_or(""),
            "Exam loaded"
        ),
        Err(err) if err.is_auth() => {
            host.logout(&err.to_string());
            return Err(err.into());
        }
        Err(err) => {
            tracing::warn!(attempt = %key, error = %err, "Exam details unavailable; starting anyway")
        }
    }

    let store = store::from_settings(&settings).await;
    tracing::info!(
        environment = settings.runtime().environment.as_str(),
        store = settings.store().kind.as_str(),
        "examguard runner ready"
    );

    let session = AttemptSession::start(
        key,
        AttemptConfig::from_settings(&settings),
        store.clone(),
        backend,
        host,
        Arc::new(SystemClock),
    )
    .await;

    let mut shutdown = shutdown::broadcast();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match host::parse_event(line) {
                        Ok(event) => session.handle(event).await,
                        Err(err) => tracing::warn!(error = %err, "Ignoring malformed host event"),
                    }
                }
                Ok(None) => {
                    tracing::info!(attempt = %session.key(), "Host closed input");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "Failed to read host input");
                    break;
                }
            }
        }
    }

    session.shutdown().await;
    store.close().await;
    core::metrics::log_snapshot();

    Ok(())
}
