//! Prometheus metrics HTTP listener.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`.
//! The endpoint is only started when `[metrics] enabled = true`.

use std::net::SocketAddr;

use anyhow::Result;
use felix_core::config::MetricsConfig;
use felix_core::metrics as m;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

/// Parse the configured listen address.
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process. Every `metrics::counter!()` and friends records
/// into the Prometheus registry afterwards.
///
/// # Errors
///
/// - Invalid listen address
/// - Socket binding fails
/// - A global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("_seconds".to_owned()),
            &m::SYNC_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();
    record_build_info();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

/// Publish the build info gauge.
pub fn record_build_info() {
    metrics::gauge!(m::AGENT_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_combines_host_and_port() {
        let config = MetricsConfig {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9091,
        };
        assert_eq!(listen_addr(&config).unwrap().to_string(), "127.0.0.1:9091");
    }

    #[test]
    fn invalid_listen_addr_is_rejected() {
        let config = MetricsConfig {
            enabled: true,
            listen_addr: "999.999.999.999".to_owned(),
            port: 9091,
        };
        assert!(listen_addr(&config).is_err());
        assert!(install_metrics_recorder(&config).is_err());
    }
}
