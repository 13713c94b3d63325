//! Wire protocol between the runner and the shell that embeds it.
//!
//! The shell forwards browser events as JSON lines on stdin and renders the JSON-line
//! commands written to stdout.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::countdown::CountdownView;
use crate::services::lockdown::{DomEvent, Disposition, KeyChord, LockdownScope, Surface};
use crate::services::progress::QuestionAvailability;

#[derive(Debug, Error)]
pub(crate) enum HostError {
    #[error("fullscreen request denied: {0}")]
    FullscreenDenied(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum HostEvent {
    VisibilityChange {
        hidden: bool,
    },
    Blur,
    Focus,
    #[serde(rename = "domEvent")]
    Dom {
        surface: Surface,
        event: DomEvent,
    },
    KeyChord(KeyChord),
    OpenQuestion {
        #[serde(rename = "questionId")]
        question_id: String,
    },
    QuestionCompleted {
        #[serde(rename = "questionId")]
        question_id: String,
    },
    Answer {
        #[serde(rename = "questionId")]
        question_id: String,
        #[serde(rename = "selectedOption")]
        selected_option: String,
    },
    Submit,
    FullscreenDenied {
        #[serde(default)]
        reason: Option<String>,
    },
    EngageLockdown {
        scope: LockdownScope,
    },
    ReleaseLockdown {
        scope: LockdownScope,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum Destination {
    Dashboard,
    Login,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum HostCommand {
    Countdown(CountdownView),
    Violation {
        count: u32,
        #[serde(rename = "maxViolations")]
        max_violations: u32,
    },
    EventDisposition(Disposition),
    QuestionAvailability(QuestionAvailability),
    RequestFullscreen,
    SubmissionState {
        state: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<f64>,
    },
    Rejected {
        reason: String,
    },
    Navigate {
        destination: Destination,
    },
    Logout {
        reason: String,
    },
}

pub(crate) trait HostSink: Send + Sync {
    fn emit(&self, command: HostCommand);
}

pub(crate) trait Navigator: Send + Sync {
    fn navigate(&self, destination: Destination);

    fn logout(&self, reason: &str);
}

#[async_trait]
pub(crate) trait FullscreenGate: Send + Sync {
    async fn request_fullscreen(&self) -> Result<(), HostError>;
}

/// Host reached over this process's stdout.
#[derive(Debug, Default)]
pub(crate) struct StdioHost {
    out: Mutex<()>,
}

impl HostSink for StdioHost {
    fn emit(&self, command: HostCommand) {
        let line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode host command");
                return;
            }
        };

        let _guard = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
            tracing::error!(error = %err, "Failed to write host command");
        }
    }
}

impl Navigator for StdioHost {
    fn navigate(&self, destination: Destination) {
        self.emit(HostCommand::Navigate { destination });
    }

    fn logout(&self, reason: &str) {
        self.emit(HostCommand::Logout { reason: reason.to_string() });
        self.emit(HostCommand::Navigate { destination: Destination::Login });
    }
}

#[async_trait]
impl FullscreenGate for StdioHost {
    /// The shell answers asynchronously; a refusal arrives later as `fullscreenDenied`.
    async fn request_fullscreen(&self) -> Result<(), HostError> {
        self.emit(HostCommand::RequestFullscreen);
        Ok(())
    }
}

pub(crate) fn parse_event(line: &str) -> Result<HostEvent, serde_json::Error> {
    serde_json::from_str(line)
}
