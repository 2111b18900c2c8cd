//! 固定大小工作池

use futures::FutureExt;
use futures::future::BoxFuture;
use plc_config::DriverConfig;
use plc_telemetry::record_worker_panic;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 空闲工作任务的轮询间隔。
pub const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// 一个工作单元。
pub type Job = BoxFuture<'static, ()>;

type SharedQueue = Arc<Mutex<mpsc::Receiver<Job>>>;

/// N 个工作任务从同一个有界队列取任务；单个任务 panic 不会终止工作任务。
///
/// 必须在 tokio runtime 内构造。
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopping: Arc<AtomicBool>,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let queue: SharedQueue = Arc::new(Mutex::new(receiver));
        let stopping = Arc::new(AtomicBool::new(false));
        let workers = (0..worker_count)
            .map(|index| tokio::spawn(run_worker(index, queue.clone(), stopping.clone())))
            .collect();
        info!(target: "plc.transactions", worker_count, queue_capacity, "worker_pool_started");
        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            stopping,
            worker_count,
        }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(config.worker_count, config.work_queue_capacity)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// 非阻塞入队。队列满返回 `Full(job)`，已停止返回 `Closed(job)`。
    pub fn try_submit(&self, job: Job) -> Result<(), TrySendError<Job>> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.try_send(job),
            None => Err(TrySendError::Closed(job)),
        }
    }

    /// 停止接收新任务；工作任务处理完队列中剩余任务后退出。
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(target: "plc.transactions", "worker join failed: {}", err);
            }
        }
        info!(target: "plc.transactions", "worker_pool_stopped");
    }
}

async fn run_worker(index: usize, queue: SharedQueue, stopping: Arc<AtomicBool>) {
    debug!(target: "plc.transactions", worker = index, "worker_started");
    loop {
        let next = {
            let mut receiver = queue.lock().unwrap_or_else(PoisonError::into_inner);
            receiver.try_recv()
        };
        match next {
            Ok(job) => {
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    record_worker_panic();
                    error!(target: "plc.transactions", worker = index, "job panicked, worker continues");
                }
            }
            Err(TryRecvError::Empty) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(IDLE_BACKOFF).await;
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }
    debug!(target: "plc.transactions", worker = index, "worker_stopped");
}
