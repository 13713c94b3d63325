use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder when enabled. Without it every counter is a no-op.
pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);

    metrics::describe_counter!(
        "proctoring_violations_total",
        "Accepted focus-loss violations, by signal source"
    );
    metrics::describe_counter!("submissions_total", "Submission attempts by trigger and status");
    metrics::describe_counter!("countdown_expired_total", "Attempts whose countdown reached zero");
    metrics::describe_counter!("lockdown_events_total", "Suppressed clipboard and context events");
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

/// Writes the final counter snapshot to the log.
pub(crate) fn log_snapshot() {
    if let Some(snapshot) = render() {
        tracing::info!(metrics = %snapshot.trim_end(), "Final metrics snapshot");
    }
}
