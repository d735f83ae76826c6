//! # Metrics Collection
//!
//! Prometheus metrics for the provider. Every outbound RPC (token issuance,
//! token exchange, impersonation, secret access, parameter render) runs
//! through [`observe_call`], which records a latency histogram and an outcome
//! counter keyed by call kind. Recording never alters control flow.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tonic::Code;
use tracing::info;

use crate::errors::{ProviderError, Result};

/// Install the Prometheus exporter on the given address and register metric
/// descriptions.
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ProviderError::config(format!("failed to install metrics exporter: {}", e)))?;

    describe_counter!(
        "outbound_calls_total",
        Unit::Count,
        "Outbound backend RPCs by call kind and outcome"
    );
    describe_histogram!(
        "outbound_call_duration_seconds",
        Unit::Seconds,
        "Latency of outbound backend RPCs by call kind"
    );
    describe_counter!("mount_requests_total", Unit::Count, "Mount RPCs handled");

    info!(metrics_addr = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

/// Outcome label derived from a result: "ok", "not_found", or "error".
fn status_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) if e.code() == Code::NotFound => "not_found",
        Err(_) => "error",
    }
}

/// Run an outbound call future, recording its latency and outcome under the
/// given call-kind label. The result passes through untouched.
pub async fn observe_call<T, F>(call: &'static str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = fut.await;

    let labels = [
        ("call", call.to_string()),
        ("status", status_label(&result).to_string()),
    ];
    counter!("outbound_calls_total", &labels).increment(1);
    histogram!("outbound_call_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());

    result
}

/// Record one handled mount RPC.
pub fn record_mount(success: bool) {
    let labels = [("status", if success { "ok" } else { "error" }.to_string())];
    counter!("mount_requests_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observe_call_passes_results_through() {
        let ok: Result<u32> = observe_call("test_ok", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32> = observe_call("test_err", async {
            Err(ProviderError::fetch(Code::NotFound, "missing"))
        })
        .await;
        assert_eq!(err.unwrap_err().code(), Code::NotFound);
    }

    #[test]
    fn status_labels_cover_the_three_outcomes() {
        assert_eq!(status_label(&Ok(())), "ok");
        assert_eq!(
            status_label::<()>(&Err(ProviderError::fetch(Code::NotFound, "x"))),
            "not_found"
        );
        assert_eq!(status_label::<()>(&Err(ProviderError::auth("x"))), "error");
    }
}
