use super::parsing::{
    env_optional, env_or_default, env_required, parse_bool, parse_environment, parse_exam_kind,
    parse_store_kind, parse_timer_clear_policy, parse_u16, parse_u32, parse_u64,
};
use super::types::{
    AttemptSettings, BackendSettings, ConfigError, ExamSettings, RedisSettings, RuntimeSettings,
    Settings, StoreKind, StoreSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(
            env_optional("EXAMGUARD_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("EXAMGUARD_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let base_url = env_or_default("EXAMGUARD_BACKEND_URL", "http://localhost:8080/api");
        let auth_token = env_or_default("EXAMGUARD_AUTH_TOKEN", "");
        let request_timeout_seconds = parse_u64(
            "EXAMGUARD_REQUEST_TIMEOUT_SECONDS",
            env_or_default("EXAMGUARD_REQUEST_TIMEOUT_SECONDS", "30"),
        )?;

        let store_kind = parse_store_kind(env_or_default("EXAMGUARD_STORE", "file"))?;
        let store_path = env_or_default("EXAMGUARD_STORE_PATH", ".examguard/local_storage.json");

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let exam_id = env_required("EXAMGUARD_EXAM_ID")?;
        let exam_kind = parse_exam_kind(env_or_default("EXAMGUARD_EXAM_KIND", "assignment"))?;
        let student_id = env_required("EXAMGUARD_STUDENT_ID")?;

        let assignment_duration_minutes = parse_u64(
            "EXAMGUARD_ASSIGNMENT_DURATION_MINUTES",
            env_or_default("EXAMGUARD_ASSIGNMENT_DURATION_MINUTES", "90"),
        )?;
        let mcq_duration_minutes = parse_u64(
            "EXAMGUARD_MCQ_DURATION_MINUTES",
            env_or_default("EXAMGUARD_MCQ_DURATION_MINUTES", "60"),
        )?;
        let max_violations = parse_u32(
            "EXAMGUARD_MAX_VIOLATIONS",
            env_or_default("EXAMGUARD_MAX_VIOLATIONS", "2"),
        )?;
        let violation_debounce_ms = parse_u64(
            "EXAMGUARD_VIOLATION_DEBOUNCE_MS",
            env_or_default("EXAMGUARD_VIOLATION_DEBOUNCE_MS", "1000"),
        )?;
        let tick_interval_ms = parse_u64(
            "EXAMGUARD_TICK_INTERVAL_MS",
            env_or_default("EXAMGUARD_TICK_INTERVAL_MS", "1000"),
        )?;
        let redirect_delay_ms = parse_u64(
            "EXAMGUARD_REDIRECT_DELAY_MS",
            env_or_default("EXAMGUARD_REDIRECT_DELAY_MS", "2000"),
        )?;
        let timer_clear_policy =
            parse_timer_clear_policy(env_or_default("EXAMGUARD_TIMER_CLEAR_POLICY", "clear"))?;

        let log_level = env_or_default("EXAMGUARD_LOG_LEVEL", "info");
        let json = env_optional("EXAMGUARD_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            backend: BackendSettings { base_url, auth_token, request_timeout_seconds },
            store: StoreSettings { kind: store_kind, path: store_path },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            attempt: AttemptSettings { exam_id, exam_kind, student_id },
            exam: ExamSettings {
                assignment_duration_minutes,
                mcq_duration_minutes,
                max_violations,
                violation_debounce_ms,
                tick_interval_ms,
                redirect_delay_ms,
                timer_clear_policy,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn backend(&self) -> &BackendSettings {
        &self.backend
    }

    pub(crate) fn store(&self) -> &StoreSettings {
        &self.store
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn attempt(&self) -> &AttemptSettings {
        &self.attempt
    }

    pub(crate) fn exam(&self) -> &ExamSettings {
        &self.exam
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.exam.assignment_duration_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAMGUARD_ASSIGNMENT_DURATION_MINUTES",
                value: "0".to_string(),
            });
        }
        if self.exam.mcq_duration_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAMGUARD_MCQ_DURATION_MINUTES",
                value: "0".to_string(),
            });
        }
        if self.exam.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAMGUARD_TICK_INTERVAL_MS",
                value: "0".to_string(),
            });
        }

        let base_url = self.backend.base_url.to_ascii_lowercase();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "EXAMGUARD_BACKEND_URL",
                value: self.backend.base_url.clone(),
            });
        }

        if self.store.kind == StoreKind::File && self.store.path.trim().is_empty() {
            return Err(ConfigError::Missing("EXAMGUARD_STORE_PATH"));
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.backend.auth_token.is_empty() {
            return Err(ConfigError::MissingSecret("EXAMGUARD_AUTH_TOKEN"));
        }
        if !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "EXAMGUARD_BACKEND_URL",
                value: self.backend.base_url.clone(),
            });
        }

        Ok(())
    }
}
