/// 事务错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction cancelled")]
    Cancelled,
    #[error("transaction manager shut down")]
    Shutdown,
    #[error("transaction failed: {0}")]
    Failed(String),
    #[error("transaction panicked")]
    Panicked,
    #[error("worker queue full")]
    QueueFull,
    #[error("transaction completion dropped")]
    CompletionDropped,
}
