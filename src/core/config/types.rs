use thiserror::Error;

use crate::core::attempt::ExamKind;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) backend: BackendSettings,
    pub(super) store: StoreSettings,
    pub(super) redis: RedisSettings,
    pub(super) attempt: AttemptSettings,
    pub(super) exam: ExamSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct BackendSettings {
    pub(crate) base_url: String,
    pub(crate) auth_token: String,
    pub(crate) request_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct StoreSettings {
    pub(crate) kind: StoreKind,
    pub(crate) path: String,
}

#[derive(Debug, Clone)]
pub(crate) struct RedisSettings {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) db: u16,
    pub(crate) password: String,
}

/// Identity of the attempt this runner drives.
#[derive(Debug, Clone)]
pub(crate) struct AttemptSettings {
    pub(crate) exam_id: String,
    pub(crate) exam_kind: ExamKind,
    pub(crate) student_id: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ExamSettings {
    pub(crate) assignment_duration_minutes: u64,
    pub(crate) mcq_duration_minutes: u64,
    pub(crate) max_violations: u32,
    pub(crate) violation_debounce_ms: u64,
    pub(crate) tick_interval_ms: u64,
    pub(crate) redirect_delay_ms: u64,
    pub(crate) timer_clear_policy: TimerClearPolicy,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreKind {
    Memory,
    File,
    Redis,
}

impl StoreKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Redis => "redis",
        }
    }
}

/// What happens to the persisted timer start once a submission succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerClearPolicy {
    Clear,
    Retain,
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl ExamSettings {
    pub(crate) fn duration_ms(&self, kind: ExamKind) -> i64 {
        let minutes = match kind {
            ExamKind::Assignment => self.assignment_duration_minutes,
            ExamKind::Mcq => self.mcq_duration_minutes,
        };
        (minutes as i64) * 60_000
    }
}

impl RedisSettings {
    pub(crate) fn redis_url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}
