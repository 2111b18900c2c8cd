//! 请求事务能力模块
//!
//! - `WorkerPool`: 固定数量的工作任务 + 有界共享队列
//! - `RequestTransactionManager`: 并发上限 + FIFO 准入
//! - `RequestTransaction`: 单个事务的句柄（取消、等待完成）

mod error;
mod manager;
mod pool;
mod transaction;

pub use error::TransactionError;
pub use manager::RequestTransactionManager;
pub use pool::{IDLE_BACKOFF, Job, WorkerPool};
pub use transaction::RequestTransaction;
