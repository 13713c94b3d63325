use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Wall-clock source in epoch milliseconds.
pub(crate) trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

pub(crate) fn format_epoch_ms(value: i64) -> String {
    match OffsetDateTime::from_unix_timestamp_nanos(value as i128 * 1_000_000) {
        Ok(moment) => moment.format(&Rfc3339).unwrap_or_else(|_| moment.to_string()),
        Err(_) => value.to_string(),
    }
}
