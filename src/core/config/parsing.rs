use std::env;

use super::types::{ConfigError, Environment, StoreKind, TimerClearPolicy};
use crate::core::attempt::ExamKind;

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn env_required(key: &'static str) -> Result<String, ConfigError> {
    env_optional(key).ok_or(ConfigError::Missing(key))
}

pub(super) fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|val| val.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

pub(super) fn parse_store_kind(value: String) -> Result<StoreKind, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "memory" | "mem" => Ok(StoreKind::Memory),
        "file" | "local" => Ok(StoreKind::File),
        "redis" => Ok(StoreKind::Redis),
        _ => Err(ConfigError::InvalidValue { field: "EXAMGUARD_STORE", value }),
    }
}

pub(super) fn parse_exam_kind(value: String) -> Result<ExamKind, ConfigError> {
    ExamKind::parse(&value).ok_or(ConfigError::InvalidValue { field: "EXAMGUARD_EXAM_KIND", value })
}

pub(super) fn parse_timer_clear_policy(value: String) -> Result<TimerClearPolicy, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "clear" | "delete" => Ok(TimerClearPolicy::Clear),
        "retain" | "keep" => Ok(TimerClearPolicy::Retain),
        _ => Err(ConfigError::InvalidValue { field: "EXAMGUARD_TIMER_CLEAR_POLICY", value }),
    }
}
