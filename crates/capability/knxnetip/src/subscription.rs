//! 订阅构造器

use crate::{KnxGroupAddress, KnxNetIpConnection, SubscriptionFilter};
use domain::{FieldResponse, ResponseCode, ValueChange};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// 订阅事件：字段名 + 值变化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub name: String,
    pub address: KnxGroupAddress,
    pub payload: Vec<u8>,
    pub changed: bool,
}

pub struct SubscriptionRequestBuilder {
    connection: KnxNetIpConnection,
    fields: Vec<(String, String)>,
    changes_only: bool,
    capacity: Option<usize>,
}

impl SubscriptionRequestBuilder {
    pub(crate) fn new(connection: KnxNetIpConnection) -> Self {
        Self {
            connection,
            fields: Vec::new(),
            changes_only: false,
            capacity: None,
        }
    }

    pub fn add_field(mut self, name: impl Into<String>, address: impl Into<String>) -> Self {
        self.fields.push((name.into(), address.into()));
        self
    }

    /// 只接收值发生变化的通知。
    pub fn changes_only(mut self, changes_only: bool) -> Self {
        self.changes_only = changes_only;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// 不添加字段表示订阅所有组地址。无效地址在 `responses()` 中标为 `InvalidAddress`。
    pub fn build(self) -> Subscription {
        let mut names = HashMap::new();
        let mut responses = Vec::with_capacity(self.fields.len());
        for (name, address) in self.fields.iter() {
            match address.parse::<KnxGroupAddress>() {
                Ok(address) => {
                    names.insert(address.raw(), name.clone());
                    responses.push(FieldResponse::ok(name.clone(), None));
                }
                Err(_) => responses.push(FieldResponse::failed(
                    name.clone(),
                    ResponseCode::InvalidAddress,
                )),
            }
        }
        let addresses = if self.fields.is_empty() {
            None
        } else {
            Some(names.keys().copied().collect::<HashSet<u16>>())
        };
        let capacity = self
            .capacity
            .unwrap_or_else(|| self.connection.subscription_capacity());
        let (id, receiver) = self.connection.cache().subscribe(
            SubscriptionFilter {
                addresses,
                changes_only: self.changes_only,
            },
            capacity,
        );
        Subscription {
            id,
            names,
            responses,
            receiver,
        }
    }
}

/// 活动订阅；通过 `KnxNetIpConnection::unsubscribe(id)` 取消。
pub struct Subscription {
    id: u64,
    names: HashMap<u16, String>,
    responses: Vec<FieldResponse>,
    receiver: mpsc::Receiver<ValueChange>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 每个字段的订阅结果。
    pub fn responses(&self) -> &[FieldResponse] {
        &self.responses
    }

    /// 等待下一个事件；取消订阅后返回 `None`。
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        let change = self.receiver.recv().await?;
        Some(self.event(change))
    }

    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        let change = self.receiver.try_recv().ok()?;
        Some(self.event(change))
    }

    fn event(&self, change: ValueChange) -> SubscriptionEvent {
        let address = KnxGroupAddress::from_raw(change.address);
        SubscriptionEvent {
            name: self
                .names
                .get(&change.address)
                .cloned()
                .unwrap_or_else(|| address.to_string()),
            address,
            payload: change.payload,
            changed: change.changed,
        }
    }
}
