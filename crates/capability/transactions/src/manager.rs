//! 请求事务管理器：并发上限 + FIFO 准入

use crate::pool::{Job, WorkerPool};
use crate::transaction::{Completion, Outcome, RequestTransaction};
use crate::TransactionError;
use futures::FutureExt;
use plc_telemetry::{
    record_transaction_cancelled, record_transaction_completed, record_transaction_failed,
    record_transaction_submitted,
};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

type Abort = Box<dyn FnOnce(TransactionError) + Send>;

struct Queued {
    id: u64,
    job: Job,
    abort: Abort,
}

struct State {
    worklog: VecDeque<Queued>,
    running: HashSet<u64>,
    ceiling: usize,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    next_id: AtomicU64,
    pool: Arc<WorkerPool>,
    idle: Notify,
}

/// 在并发上限内执行事务。
///
/// - 提交、完成、上限提高时都会触发准入
/// - 准入严格按提交顺序从 worklog 队首取出
/// - 上限降低不会打断运行中的事务
#[derive(Clone)]
pub struct RequestTransactionManager {
    shared: Arc<Shared>,
}

impl RequestTransactionManager {
    pub fn new(ceiling: usize, pool: Arc<WorkerPool>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    worklog: VecDeque::new(),
                    running: HashSet::new(),
                    ceiling,
                    closed: false,
                }),
                next_id: AtomicU64::new(1),
                pool,
                idle: Notify::new(),
            }),
        }
    }

    /// 提交一个操作，立即返回句柄。
    ///
    /// 操作在工作池中执行；执行前若已请求取消则直接以 `Cancelled` 完成。
    pub fn submit<T, F, Fut>(&self, operation: F) -> RequestTransaction<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TransactionError>> + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(AtomicBool::new(false));
        let (completion, receiver) = Completion::channel();
        let transaction = RequestTransaction::new(id, cancel.clone(), receiver);
        record_transaction_submitted();

        let job = transaction_job(
            id,
            operation,
            cancel,
            completion.clone(),
            Arc::downgrade(&self.shared),
        );
        let abort: Abort = Box::new(move |err| {
            record_transaction_cancelled();
            completion.finish(Err(err));
        });

        {
            let mut state = self.shared.lock();
            if state.closed {
                drop(state);
                debug!(target: "plc.transactions", transaction_id = id, "submit after close");
                abort(TransactionError::Shutdown);
                return transaction;
            }
            state.worklog.push_back(Queued { id, job, abort });
            debug!(
                target: "plc.transactions",
                transaction_id = id,
                queued = state.worklog.len(),
                "transaction_submitted"
            );
        }
        self.shared.admit();
        transaction
    }

    /// 调整并发上限。低于当前运行数时只告警，提高时立即补位。
    pub fn set_concurrency_ceiling(&self, ceiling: usize) {
        let raised = {
            let mut state = self.shared.lock();
            let previous = state.ceiling;
            state.ceiling = ceiling;
            if ceiling < state.running.len() {
                warn!(
                    target: "plc.transactions",
                    ceiling,
                    running = state.running.len(),
                    "concurrency ceiling below running count, running transactions continue"
                );
            }
            ceiling > previous
        };
        if raised {
            self.shared.admit();
        }
    }

    pub fn concurrency_ceiling(&self) -> usize {
        self.shared.lock().ceiling
    }

    pub fn running_count(&self) -> usize {
        self.shared.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.lock().worklog.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// 关闭：排队中的事务以 `Shutdown` 失败，运行中的事务自然结束。
    pub fn close(&self) {
        let aborted: Vec<Queued> = {
            let mut state = self.shared.lock();
            state.closed = true;
            state.worklog.drain(..).collect()
        };
        let count = aborted.len();
        for queued in aborted {
            (queued.abort)(TransactionError::Shutdown);
        }
        info!(target: "plc.transactions", aborted = count, "transaction_manager_closed");
        self.shared.idle.notify_waiters();
    }

    /// 等待运行中与排队中的事务全部完成后关闭。超时返回 false，仍然关闭。
    pub async fn close_graceful(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let drained = loop {
            let notified = self.shared.idle.notified();
            if self.shared.is_idle() {
                break true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break self.shared.is_idle();
            }
        };
        if !drained {
            warn!(
                target: "plc.transactions",
                timeout_ms = timeout.as_millis() as u64,
                "graceful close timed out"
            );
        }
        self.close();
        drained
    }
}

impl fmt::Display for RequestTransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        write!(
            f,
            "RequestTransactionManager{{ceiling: {}, running: {}, queued: {}, closed: {}}}",
            state.ceiling,
            state.running.len(),
            state.worklog.len(),
            state.closed
        )
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        let state = self.lock();
        state.running.is_empty() && state.worklog.is_empty()
    }

    /// 准入：运行数低于上限时从队首取出并投递到工作池。
    ///
    /// 投递在持锁期间完成，并发的准入调用不会打乱投递顺序。
    fn admit(&self) {
        let mut state = self.lock();
        while !state.closed && state.running.len() < state.ceiling {
            let Some(queued) = state.worklog.pop_front() else {
                break;
            };
            let Queued { id, job, abort } = queued;
            match self.pool.try_submit(job) {
                Ok(()) => {
                    state.running.insert(id);
                    debug!(
                        target: "plc.transactions",
                        transaction_id = id,
                        running = state.running.len(),
                        "transaction_admitted"
                    );
                }
                Err(TrySendError::Full(job)) => {
                    state.worklog.push_front(Queued { id, job, abort });
                    warn!(
                        target: "plc.transactions",
                        transaction_id = id,
                        "worker queue full, transaction stays queued"
                    );
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(target: "plc.transactions", transaction_id = id, "worker pool stopped");
                    abort(TransactionError::Shutdown);
                }
            }
        }
    }

    fn complete(&self, id: u64) {
        {
            let mut state = self.lock();
            state.running.remove(&id);
        }
        self.admit();
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }
}

fn transaction_job<T, F, Fut>(
    id: u64,
    operation: F,
    cancel: Arc<AtomicBool>,
    completion: Completion<T>,
    shared: Weak<Shared>,
) -> Job
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, TransactionError>> + Send + 'static,
{
    async move {
        let outcome: Outcome<T> = if cancel.load(Ordering::SeqCst) {
            record_transaction_cancelled();
            debug!(target: "plc.transactions", transaction_id = id, "transaction_cancelled");
            Err(TransactionError::Cancelled)
        } else {
            match AssertUnwindSafe(async move { operation().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => {
                    record_transaction_completed();
                    Ok(value)
                }
                Ok(Err(err)) => {
                    record_transaction_failed();
                    debug!(target: "plc.transactions", transaction_id = id, "transaction failed: {}", err);
                    Err(err)
                }
                Err(_) => {
                    record_transaction_failed();
                    warn!(target: "plc.transactions", transaction_id = id, "transaction panicked");
                    Err(TransactionError::Panicked)
                }
            }
        };
        completion.finish(outcome);
        if let Some(shared) = shared.upgrade() {
            shared.complete(id);
        }
    }
    .boxed()
}
