pub(crate) mod attempt;
pub(crate) mod config;
pub(crate) mod metrics;
pub(crate) mod shutdown;
pub(crate) mod telemetry;
pub(crate) mod time;
