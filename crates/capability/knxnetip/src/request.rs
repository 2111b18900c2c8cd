//! 读写请求构造器
//!
//! 每个字段单独作为一个事务提交，逐字段返回响应码，单个字段失败不影响整批。

use crate::{ConnectionError, KnxGroupAddress, KnxNetIpConnection};
use domain::{FieldResponse, ResponseCode};
use plc_transactions::RequestTransaction;
use tracing::warn;

/// 字段名 → 响应，保持添加顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadResponse {
    pub fields: Vec<FieldResponse>,
}

impl ReadResponse {
    pub fn get(&self, name: &str) -> Option<&FieldResponse> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn response_code(&self, name: &str) -> Option<ResponseCode> {
        self.get(name).map(|field| field.code)
    }

    pub fn value(&self, name: &str) -> Option<&[u8]> {
        self.get(name).and_then(|field| field.payload.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResponse {
    pub fields: Vec<FieldResponse>,
}

impl WriteResponse {
    pub fn response_code(&self, name: &str) -> Option<ResponseCode> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.code)
    }

    pub fn all_ok(&self) -> bool {
        self.fields.iter().all(|field| field.code.is_ok())
    }
}

pub struct ReadRequestBuilder {
    connection: KnxNetIpConnection,
    fields: Vec<(String, String)>,
}

impl ReadRequestBuilder {
    pub(crate) fn new(connection: KnxNetIpConnection) -> Self {
        Self {
            connection,
            fields: Vec::new(),
        }
    }

    /// `address` 为组地址文本，例如 `1/2/3`。
    pub fn add_field(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.fields.push((name.into(), address.into()));
        self
    }

    pub fn build(self) -> ReadRequest {
        ReadRequest {
            connection: self.connection,
            fields: self.fields,
        }
    }
}

pub struct ReadRequest {
    connection: KnxNetIpConnection,
    fields: Vec<(String, String)>,
}

impl ReadRequest {
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// 未连接时整体返回 `NotConnected`；地址无效的字段返回 `InvalidAddress`。
    pub async fn execute(&self) -> Result<ReadResponse, ConnectionError> {
        if !self.connection.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let pending: Vec<_> = self
            .fields
            .iter()
            .map(|(name, address)| {
                let transaction = address
                    .parse::<KnxGroupAddress>()
                    .map(|address| self.connection.submit_read(name.clone(), address))
                    .map_err(|_| ResponseCode::InvalidAddress);
                (name.clone(), transaction)
            })
            .collect();
        Ok(ReadResponse {
            fields: collect_fields(pending).await,
        })
    }
}

pub struct WriteRequestBuilder {
    connection: KnxNetIpConnection,
    fields: Vec<(String, String, Vec<u8>)>,
}

impl WriteRequestBuilder {
    pub(crate) fn new(connection: KnxNetIpConnection) -> Self {
        Self {
            connection,
            fields: Vec::new(),
        }
    }

    pub fn add_field(
        mut self,
        name: impl Into<String>,
        address: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        self.fields.push((name.into(), address.into(), payload.into()));
        self
    }

    pub fn build(self) -> WriteRequest {
        WriteRequest {
            connection: self.connection,
            fields: self.fields,
        }
    }
}

pub struct WriteRequest {
    connection: KnxNetIpConnection,
    fields: Vec<(String, String, Vec<u8>)>,
}

impl WriteRequest {
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _, _)| name.as_str()).collect()
    }

    /// 空值字段返回 `InvalidData`，地址无效返回 `InvalidAddress`。
    pub async fn execute(&self) -> Result<WriteResponse, ConnectionError> {
        if !self.connection.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let pending: Vec<_> = self
            .fields
            .iter()
            .map(|(name, address, payload)| {
                let transaction = match address.parse::<KnxGroupAddress>() {
                    Err(_) => Err(ResponseCode::InvalidAddress),
                    Ok(_) if payload.is_empty() => Err(ResponseCode::InvalidData),
                    Ok(address) => {
                        Ok(self
                            .connection
                            .submit_write(name.clone(), address, payload.clone()))
                    }
                };
                (name.clone(), transaction)
            })
            .collect();
        Ok(WriteResponse {
            fields: collect_fields(pending).await,
        })
    }
}

type PendingField = (String, Result<RequestTransaction<FieldResponse>, ResponseCode>);

/// 按提交顺序等待每个事务；未提交的字段直接带上拒绝原因。
async fn collect_fields(pending: Vec<PendingField>) -> Vec<FieldResponse> {
    let mut fields = Vec::with_capacity(pending.len());
    for (name, transaction) in pending {
        let field = match transaction {
            Err(code) => FieldResponse::failed(name, code),
            Ok(transaction) => match transaction.await_completion().await {
                Ok(field) => field,
                Err(err) => {
                    warn!(target: "plc.knxnetip", field = %name, "field transaction failed: {}", err);
                    FieldResponse::failed(name, ResponseCode::InternalError)
                }
            },
        };
        fields.push(field);
    }
    fields
}
