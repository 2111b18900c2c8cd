use serde::{Deserialize, Serialize};

/// 单个字段的响应码。
///
/// 一个多字段请求可能部分成功，因此每个字段单独携带响应码，
/// 而不是让整批请求失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Ok,
    InvalidAddress,
    InvalidData,
    InternalError,
    RemoteBusy,
    RemoteError,
    Unsupported,
    Timeout,
}

impl ResponseCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::InvalidData => "INVALID_DATA",
            Self::InternalError => "INTERNAL_ERROR",
            Self::RemoteBusy => "REMOTE_BUSY",
            Self::RemoteError => "REMOTE_ERROR",
            Self::Unsupported => "UNSUPPORTED",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}

/// 单个字段的读取/写入结果（原始字节，不做值模型映射）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldResponse {
    pub name: String,
    pub code: ResponseCode,
    pub payload: Option<Vec<u8>>,
}

impl FieldResponse {
    pub fn ok(name: impl Into<String>, payload: Option<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            code: ResponseCode::Ok,
            payload,
        }
    }

    pub fn failed(name: impl Into<String>, code: ResponseCode) -> Self {
        Self {
            name: name.into(),
            code,
            payload: None,
        }
    }
}

/// 值缓存更新通知。
///
/// 无论值是否变化都会下发，`changed` 交给订阅方自行过滤。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChange {
    pub address: u16,
    pub payload: Vec<u8>,
    pub changed: bool,
}
