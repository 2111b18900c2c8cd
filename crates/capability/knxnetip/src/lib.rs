//! KNXnet/IP 隧道连接
//!
//! - `KnxNetIpConnection`: 握手、保活、断开
//! - `ValueCache`: 组地址 → 最近一次值，变化检测与订阅通知
//! - `ReadRequestBuilder` / `WriteRequestBuilder` / `SubscriptionRequestBuilder`

mod address;
mod cache;
mod config;
mod connection;
mod error;
mod frames;
mod interceptor;
mod request;
mod subscription;

pub use address::KnxGroupAddress;
pub use cache::{SubscriptionFilter, ValueCache};
pub use config::KnxConnectionConfig;
pub use connection::{ConnectionMetadata, KnxNetIpConnection};
pub use error::ConnectionError;
pub use request::{
    ReadRequest, ReadRequestBuilder, ReadResponse, WriteRequest, WriteRequestBuilder,
    WriteResponse,
};
pub use subscription::{Subscription, SubscriptionEvent, SubscriptionRequestBuilder};
