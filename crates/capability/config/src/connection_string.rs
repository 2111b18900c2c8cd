//! 连接字符串：`scheme://host[:port][?k=v&k=v2]`。

use crate::ConfigError;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// 协议默认端口。
pub fn default_port_for(scheme: &str) -> Option<u16> {
    match scheme {
        "knxnet-ip" => Some(3671),
        "s7" => Some(102),
        "modbus-tcp" => Some(502),
        "bacnet-ip" => Some(47808),
        _ => None,
    }
}

/// 解析后的连接字符串。选项为多值映射，同名键按出现顺序保留。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub options: HashMap<String, Vec<String>>,
}

impl ConnectionString {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidConnectionString(input.to_string());

        let (scheme, rest) = input.split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty() {
            return Err(invalid());
        }
        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let authority = authority.trim_end_matches('/');
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid())?;
                (host, Some(port))
            }
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(invalid());
        }

        let mut options: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                if key.is_empty() {
                    return Err(invalid());
                }
                options
                    .entry(key.to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            port,
            options,
        })
    }

    /// 显式端口，否则回退到协议默认端口。
    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or_else(|| default_port_for(&self.scheme))
    }

    /// `host:port` 形式的地址。
    pub fn socket_address(&self) -> Result<String, ConfigError> {
        let port = self
            .port_or_default()
            .ok_or_else(|| ConfigError::InvalidConnectionString(self.to_string()))?;
        Ok(format!("{}:{}", self.host, port))
    }

    /// 选项的第一个值。
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// 选项的全部值。
    pub fn option_values(&self, key: &str) -> &[String] {
        self.options.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `connect-timeout` 选项（毫秒）。
    pub fn connect_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        match self.option("connect-timeout") {
            Some(value) => value
                .parse::<u64>()
                .map(|ms| Some(Duration::from_millis(ms)))
                .map_err(|_| ConfigError::Invalid("connect-timeout".to_string(), value.to_string())),
            None => Ok(None),
        }
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        let mut keys: Vec<&String> = self.options.keys().collect();
        keys.sort();
        let mut first = true;
        for key in keys {
            for value in &self.options[key] {
                f.write_str(if first { "?" } else { "&" })?;
                write!(f, "{}={}", key, value)?;
                first = false;
            }
        }
        Ok(())
    }
}
