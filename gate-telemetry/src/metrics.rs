use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Installs the global metrics recorder and serves it at `[::]:{port}/metrics`.
///
/// Every metric carries a `service` label.
pub fn init_metrics(service: &str, port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port))
        .add_global_label("service", service)
        .install()
}
