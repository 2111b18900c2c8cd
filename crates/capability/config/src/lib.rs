//! 驱动运行配置加载。

mod connection_string;

pub use connection_string::{ConnectionString, default_port_for};

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
}

/// 驱动运行配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// 请求默认超时（毫秒）
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// 保活间隔（秒）
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// 并发请求上限
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// 工作池大小
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// 工作队列容量
    #[serde(default = "default_work_queue_capacity")]
    pub work_queue_capacity: usize,
    /// 分发循环空闲轮询间隔（毫秒）
    #[serde(default = "default_dispatch_poll_interval_ms")]
    pub dispatch_poll_interval_ms: u64,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
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

fn default_worker_count() -> usize {
    4
}

fn default_work_queue_capacity() -> usize {
    100
}

fn default_dispatch_poll_interval_ms() -> u64 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            worker_count: default_worker_count(),
            work_queue_capacity: default_work_queue_capacity(),
            dispatch_poll_interval_ms: default_dispatch_poll_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl DriverConfig {
    /// 先加载本地 `.env`（若存在），再从环境变量读取。
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    /// 从环境变量读取配置，缺省项使用默认值。
    pub fn from_env() -> Result<Self, ConfigError> {
        let default_ttl_ms = read_u64_with_default("PLC_DEFAULT_TTL_MS", default_ttl_ms())?;
        let keepalive_interval_secs = read_u64_with_default(
            "PLC_KEEPALIVE_INTERVAL_SECS",
            default_keepalive_interval_secs(),
        )?;
        let max_concurrent_requests = read_usize_with_default(
            "PLC_MAX_CONCURRENT_REQUESTS",
            default_max_concurrent_requests(),
        )?;
        let worker_count = read_usize_with_default("PLC_WORKER_COUNT", default_worker_count())?;
        let work_queue_capacity =
            read_usize_with_default("PLC_WORK_QUEUE_CAPACITY", default_work_queue_capacity())?;
        let dispatch_poll_interval_ms = read_u64_with_default(
            "PLC_DISPATCH_POLL_INTERVAL_MS",
            default_dispatch_poll_interval_ms(),
        )?;
        let connect_timeout_ms =
            read_u64_with_default("PLC_CONNECT_TIMEOUT_MS", default_connect_timeout_ms())?;

        if worker_count == 0 {
            return Err(ConfigError::Invalid(
                "PLC_WORKER_COUNT".to_string(),
                "0".to_string(),
            ));
        }
        if work_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "PLC_WORK_QUEUE_CAPACITY".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            default_ttl_ms,
            keepalive_interval_secs,
            max_concurrent_requests,
            worker_count,
            work_queue_capacity,
            dispatch_poll_interval_ms,
            connect_timeout_ms,
        })
    }

    /// 从 JSON 字符串解析。
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json)
            .map_err(|err| ConfigError::Invalid("driver config".to_string(), err.to_string()))
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

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}
