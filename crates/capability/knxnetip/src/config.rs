use plc_config::{ConfigError, DriverConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// KNXnet/IP 连接配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnxConnectionConfig {
    /// 请求超时（毫秒），握手、ping、读写共用
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// 保活间隔（秒）
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// 同时执行的读写事务上限
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// 分发循环空闲轮询间隔（毫秒）
    #[serde(default = "default_dispatch_poll_interval_ms")]
    pub dispatch_poll_interval_ms: u64,
    /// 订阅通道容量
    #[serde(default = "default_subscription_capacity")]
    pub subscription_capacity: usize,
}

fn default_ttl_ms() -> u64 {
    10_000
}

fn default_keepalive_interval_secs() -> u64 {
    60
}

fn default_max_concurrent_requests() -> usize {
    1
}

fn default_dispatch_poll_interval_ms() -> u64 {
    10
}

fn default_subscription_capacity() -> usize {
    64
}

impl Default for KnxConnectionConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            dispatch_poll_interval_ms: default_dispatch_poll_interval_ms(),
            subscription_capacity: default_subscription_capacity(),
        }
    }
}

impl KnxConnectionConfig {
    pub fn from_driver_config(config: &DriverConfig) -> Self {
        Self {
            default_ttl_ms: config.default_ttl_ms,
            keepalive_interval_secs: config.keepalive_interval_secs,
            max_concurrent_requests: config.max_concurrent_requests,
            dispatch_poll_interval_ms: config.dispatch_poll_interval_ms,
            subscription_capacity: default_subscription_capacity(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json)
            .map_err(|err| ConfigError::Invalid("knx connection config".to_string(), err.to_string()))
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn dispatch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_interval_ms)
    }
}
