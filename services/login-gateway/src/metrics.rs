//! Prometheus metrics exposition
//!
//! The auth core emits through the `metrics` facade:
//!
//! - `auth_login_total` (counter): label `outcome` (success, denied, failed)
//! - `auth_token_refresh_total` (counter): label `outcome` (success, rejected, error)

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;
    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!(
        "auth_login_total",
        "Completed login attempts by outcome"
    );
    metrics::describe_counter!(
        "auth_token_refresh_total",
        "Access token refresh attempts by outcome"
    );
}
