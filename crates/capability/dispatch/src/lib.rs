//! 消息分发能力模块
//!
//! - `MessageDispatcher`: 独占传输实例，串行化写出，后台循环负责成帧、解析、匹配与超时
//! - `Expectation`: 谓词 + 处理函数 + TTL
//! - `FrameInterceptor`: 协议层钩子（如自动应答）

mod dispatcher;
mod error;
mod expectation;

pub use dispatcher::{DEFAULT_POLL_INTERVAL, FrameInterceptor, MessageDispatcher};
pub use error::DispatchError;
pub use expectation::Expectation;
