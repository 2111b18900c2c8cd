use plc_config::{ConnectionString, DriverConfig};
use std::time::Duration;

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("PLC_DEFAULT_TTL_MS", "2500");
        std::env::set_var("PLC_MAX_CONCURRENT_REQUESTS", "3");
        std::env::set_var("PLC_WORKER_COUNT", "2");
    }

    let config = DriverConfig::from_env().expect("config");
    assert_eq!(config.default_ttl(), Duration::from_millis(2500));
    assert_eq!(config.max_concurrent_requests, 3);
    assert_eq!(config.worker_count, 2);
    assert_eq!(config.keepalive_interval(), Duration::from_secs(60));
    assert_eq!(config.work_queue_capacity, 100);
}

#[test]
fn json_config_uses_defaults() {
    let config = DriverConfig::from_json(r#"{"worker_count": 8}"#).expect("json");
    assert_eq!(config.worker_count, 8);
    assert_eq!(config.default_ttl_ms, 10_000);
    assert_eq!(config.connect_timeout(), Duration::from_millis(5000));
}

#[test]
fn knx_connection_string_defaults_port() {
    let parsed =
        ConnectionString::parse("knxnet-ip://192.168.1.20?connect-timeout=750").expect("parse");
    assert_eq!(parsed.socket_address().expect("addr"), "192.168.1.20:3671");
    assert_eq!(
        parsed.connect_timeout().expect("timeout"),
        Some(Duration::from_millis(750))
    );
}

#[test]
fn unknown_scheme_without_port_has_no_address() {
    let parsed = ConnectionString::parse("custom://device").expect("parse");
    assert_eq!(parsed.port_or_default(), None);
    assert!(parsed.socket_address().is_err());
}
