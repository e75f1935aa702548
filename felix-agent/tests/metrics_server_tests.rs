//! Integration tests for the Prometheus listener.

use felix_agent::metrics_server;
use felix_core::config::MetricsConfig;
use serial_test::serial;

#[test]
#[serial]
fn recorder_installs_once_per_process() {
    let config = MetricsConfig {
        enabled: true,
        listen_addr: "127.0.0.1".to_owned(),
        port: 19191,
    };

    let first = metrics_server::install_metrics_recorder(&config);
    assert!(first.is_ok(), "first install should succeed: {:?}", first.err());

    let second = metrics_server::install_metrics_recorder(&MetricsConfig {
        port: 19192,
        ..config
    });
    assert!(second.is_err(), "global recorder can only be installed once");
}
