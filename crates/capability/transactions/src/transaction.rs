use crate::TransactionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

pub(crate) type Outcome<T> = Result<T, TransactionError>;

/// 完成通道的发送端，被工作任务与关闭路径共享，只会完成一次。
pub(crate) struct Completion<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<Outcome<T>>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> Completion<T> {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Outcome<T>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// 返回 false 表示已被完成过。
    pub(crate) fn finish(&self, outcome: Outcome<T>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// 已提交事务的句柄。
#[derive(Debug)]
pub struct RequestTransaction<T> {
    id: u64,
    cancel: Arc<AtomicBool>,
    completion: oneshot::Receiver<Outcome<T>>,
}

impl<T> RequestTransaction<T> {
    pub(crate) fn new(
        id: u64,
        cancel: Arc<AtomicBool>,
        completion: oneshot::Receiver<Outcome<T>>,
    ) -> Self {
        Self {
            id,
            cancel,
            completion,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 请求取消。仅对尚未开始执行的事务生效。
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// 等待事务完成。
    pub async fn await_completion(self) -> Result<T, TransactionError> {
        self.completion
            .await
            .map_err(|_| TransactionError::CompletionDropped)?
    }
}
