//! 消息分发器与后台循环。

use crate::error::DispatchError;
use crate::expectation::Expectation;
use async_trait::async_trait;
use futures::FutureExt;
use plc_codec::FramedMessage;
use plc_telemetry::{
    record_expectation_timeout, record_frame_malformed, record_frame_received, record_frame_sent,
    record_frame_unhandled, record_handler_error, record_loop_restart,
};
use plc_transport::{TransportError, TransportInstance};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 默认空闲轮询间隔。
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// 协议层钩子：在期望匹配之前查看每个入站帧。
///
/// 返回 `None` 表示帧已被消费（例如已自动应答）；返回 `Some` 则继续匹配。
#[async_trait]
pub trait FrameInterceptor<M: FramedMessage>: Send + Sync {
    async fn intercept(&self, dispatcher: &MessageDispatcher<M>, message: M) -> Option<M>;
}

#[derive(Default)]
struct Lifecycle {
    handle: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

struct Inner<M: FramedMessage> {
    transport: tokio::sync::Mutex<Box<dyn TransportInstance>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    registrations: Mutex<Option<mpsc::UnboundedSender<Expectation<M>>>>,
    default_channel: Mutex<Option<mpsc::Sender<M>>>,
    interceptor: RwLock<Option<Arc<dyn FrameInterceptor<M>>>>,
    running: AtomicBool,
    poll_interval: Duration,
}

/// 消息分发器。
///
/// 独占一个传输实例：写路径经互斥锁串行化，读路径只由后台循环驱动。
/// 期望按注册顺序尝试，先注册者先匹配。
pub struct MessageDispatcher<M: FramedMessage> {
    inner: Arc<Inner<M>>,
}

impl<M: FramedMessage> Clone for MessageDispatcher<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

enum Step {
    Idle,
    Progress,
    /// 对端关闭了传输，循环结束。
    Closed,
}

impl<M: FramedMessage> MessageDispatcher<M> {
    pub fn new(transport: Box<dyn TransportInstance>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: tokio::sync::Mutex::new(transport),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
                registrations: Mutex::new(None),
                default_channel: Mutex::new(None),
                interceptor: RwLock::new(None),
                running: AtomicBool::new(false),
                poll_interval,
            }),
        }
    }

    /// 安装协议层钩子，替换已有钩子。
    pub fn set_interceptor(&self, interceptor: Arc<dyn FrameInterceptor<M>>) {
        if let Ok(mut slot) = self.inner.interceptor.write() {
            *slot = Some(interceptor);
        }
    }

    /// 接入未请求帧的消费者；再次调用会替换上一个。
    pub fn default_incoming_messages(&self, capacity: usize) -> mpsc::Receiver<M> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        if let Ok(mut slot) = self.inner.default_channel.lock() {
            *slot = Some(tx);
        }
        rx
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// 传输实例的本地地址（握手报文中的 HPAI 需要）。
    pub async fn local_address(&self) -> Option<SocketAddr> {
        self.inner.transport.lock().await.local_address()
    }

    /// 打开传输实例并启动唯一的后台循环；已运行时直接返回。
    pub async fn connect(&self) -> Result<(), DispatchError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if let Some(handle) = &lifecycle.handle
            && !handle.is_finished()
        {
            return Ok(());
        }
        self.inner.transport.lock().await.connect().await?;

        let (registration_tx, registration_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if let Ok(mut slot) = self.inner.registrations.lock() {
            *slot = Some(registration_tx);
        }
        self.inner.running.store(true, Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);
        let poll_interval = self.inner.poll_interval;
        lifecycle.handle = Some(tokio::spawn(run_loop(
            weak,
            registration_rx,
            shutdown_rx,
            poll_interval,
        )));
        lifecycle.shutdown = Some(shutdown_tx);
        info!(target: "plc.dispatch", "dispatcher_started");
        Ok(())
    }

    /// 停止后台循环，所有挂起期望以 `Closed` 失败，然后关闭传输实例。
    pub async fn disconnect(&self) -> Result<(), DispatchError> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if let Ok(mut slot) = self.inner.registrations.lock() {
            slot.take();
        }
        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = lifecycle.handle.take() {
            if let Err(err) = handle.await {
                warn!(target: "plc.dispatch", "dispatcher loop join failed: {}", err);
            }
        }
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.transport.lock().await.close().await?;
        info!(target: "plc.dispatch", "dispatcher_stopped");
        Ok(())
    }

    /// 序列化并写出一帧；并发发送者经传输锁串行化。
    pub async fn send(&self, message: &M) -> Result<(), DispatchError> {
        let bytes = message.to_bytes()?;
        let mut transport = self.inner.transport.lock().await;
        transport.write(&bytes).await?;
        record_frame_sent();
        Ok(())
    }

    /// 注册期望，立即返回。循环未运行时返回 `NotConnected`，处理函数不会被调用。
    pub fn expect(&self, expectation: Expectation<M>) -> Result<(), DispatchError> {
        let sender = self.registration_sender()?;
        if let Err(rejected) = sender.send(expectation) {
            rejected.0.fail(DispatchError::Closed);
        }
        Ok(())
    }

    /// 先发送后注册；仅当写出成功时才注册期望。
    ///
    /// 注册发生在释放传输锁之前，循环读到应答时期望必然已入队。
    pub async fn send_request(
        &self,
        message: &M,
        expectation: Expectation<M>,
    ) -> Result<(), DispatchError> {
        let bytes = message.to_bytes()?;
        let sender = self.registration_sender()?;
        let mut transport = self.inner.transport.lock().await;
        transport.write(&bytes).await?;
        record_frame_sent();
        if let Err(rejected) = sender.send(expectation) {
            rejected.0.fail(DispatchError::Closed);
        }
        Ok(())
    }

    /// `send_request` 的异步便捷形式：等待首个满足 `accepts` 的帧。
    pub async fn request<A>(&self, message: &M, accepts: A, ttl: Duration) -> Result<M, DispatchError>
    where
        A: Fn(&M) -> bool + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let expectation = Expectation::with_completion(
            accepts,
            move |result| {
                let _ = tx.send(result);
            },
            ttl,
        );
        self.send_request(message, expectation).await?;
        rx.await.map_err(|_| DispatchError::Closed)?
    }

    /// 读取一帧：头部不足或整帧未到齐时返回 `None`，不会部分消费。
    ///
    /// 头部无法识别时丢弃已缓冲的全部字节以重新同步。
    pub async fn receive(&self) -> Result<Option<M>, DispatchError> {
        let mut transport = self.inner.transport.lock().await;
        if !transport.is_connected() {
            return Err(DispatchError::NotConnected);
        }
        let header = match transport.peek(M::HEADER_SIZE).await {
            Ok(header) => header,
            Err(TransportError::NotEnoughData { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let frame_length = match M::frame_length(&header) {
            Ok(length) => length,
            Err(err) => {
                let available = transport.readable_byte_count().await?;
                transport.read(available).await?;
                record_frame_malformed();
                warn!(
                    target: "plc.dispatch",
                    discarded = available,
                    "invalid frame header, resynchronising: {}",
                    err
                );
                return Err(err.into());
            }
        };
        match transport.peek(frame_length).await {
            Ok(_) => {}
            Err(TransportError::NotEnoughData { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        }
        let bytes = transport.read(frame_length).await?;
        drop(transport);
        record_frame_received();
        match M::from_bytes(&bytes) {
            Ok((message, _)) => Ok(Some(message)),
            Err(err) => {
                record_frame_malformed();
                Err(err.into())
            }
        }
    }

    fn registration_sender(&self) -> Result<mpsc::UnboundedSender<Expectation<M>>, DispatchError> {
        self.inner
            .registrations
            .lock()
            .map_err(|_| DispatchError::Closed)?
            .clone()
            .ok_or(DispatchError::NotConnected)
    }

    fn interceptor(&self) -> Option<Arc<dyn FrameInterceptor<M>>> {
        self.inner
            .interceptor
            .read()
            .ok()
            .and_then(|slot| slot.clone())
    }

    fn forward_unsolicited(&self, message: M) {
        let mut slot = match self.inner.default_channel.lock() {
            Ok(slot) => slot,
            Err(_) => return,
        };
        let Some(sender) = slot.as_ref() else {
            record_frame_unhandled();
            warn!(target: "plc.dispatch", "no consumer attached, dropping unsolicited frame");
            return;
        };
        match sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                record_frame_unhandled();
                warn!(target: "plc.dispatch", "default channel full, dropping unsolicited frame");
            }
            Err(TrySendError::Closed(_)) => {
                slot.take();
                record_frame_unhandled();
                warn!(target: "plc.dispatch", "default channel closed, dropping unsolicited frame");
            }
        }
    }

    /// 单次迭代：过期 → 读取 → 收取新注册 → 钩子 → 匹配 → 转发。
    async fn step(
        &self,
        pending: &mut Vec<Expectation<M>>,
        registrations: &mut mpsc::UnboundedReceiver<Expectation<M>>,
    ) -> Step {
        let now = Instant::now();
        let (expired, live): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|expectation| expectation.is_expired(now));
        *pending = live;
        for expectation in expired {
            record_expectation_timeout();
            let ttl = expectation.ttl();
            debug!(target: "plc.dispatch", ttl_ms = ttl.as_millis() as u64, "expectation_expired");
            expectation.fail(DispatchError::Timeout(ttl));
        }

        let received = self.receive().await;
        while let Ok(expectation) = registrations.try_recv() {
            pending.push(expectation);
        }
        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => return Step::Idle,
            Err(DispatchError::Malformed(err)) => {
                warn!(target: "plc.dispatch", "dropping malformed frame: {}", err);
                return Step::Progress;
            }
            Err(DispatchError::NotConnected) => {
                debug!(target: "plc.dispatch", "transport not connected, waiting");
                return Step::Idle;
            }
            Err(DispatchError::Transport(TransportError::Closed)) => {
                warn!(target: "plc.dispatch", "transport closed by peer, stopping dispatcher loop");
                return Step::Closed;
            }
            Err(err) => {
                warn!(target: "plc.dispatch", "receive failed: {}", err);
                return Step::Idle;
            }
        };

        let message = match self.interceptor() {
            Some(interceptor) => match interceptor.intercept(self, message).await {
                Some(message) => message,
                None => return Step::Progress,
            },
            None => message,
        };

        match pending.iter().position(|expectation| expectation.accepts(&message)) {
            Some(index) => {
                let expectation = pending.remove(index);
                if !expectation.complete(message) {
                    record_handler_error();
                    warn!(target: "plc.dispatch", "expectation handler failed, routed to on_error");
                }
            }
            None => self.forward_unsolicited(message),
        }
        Step::Progress
    }
}

/// 后台循环。每次迭代都在 `catch_unwind` 中执行，意外 panic 只重启迭代，挂起期望保留。
async fn run_loop<M: FramedMessage>(
    inner: Weak<Inner<M>>,
    mut registrations: mpsc::UnboundedReceiver<Expectation<M>>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    let mut pending: Vec<Expectation<M>> = Vec::new();
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let dispatcher = MessageDispatcher { inner };
        let step = AssertUnwindSafe(dispatcher.step(&mut pending, &mut registrations))
            .catch_unwind()
            .await;
        drop(dispatcher);
        match step {
            Ok(Step::Closed) => break,
            Ok(Step::Progress) => tokio::task::yield_now().await,
            Ok(Step::Idle) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(_) => {
                record_loop_restart();
                error!(target: "plc.dispatch", "dispatcher loop panicked, restarting");
            }
        }
    }

    registrations.close();
    while let Ok(expectation) = registrations.try_recv() {
        pending.push(expectation);
    }
    let dropped = pending.len();
    for expectation in pending.drain(..) {
        expectation.fail(DispatchError::Closed);
    }
    if let Some(inner) = inner.upgrade() {
        if let Ok(mut slot) = inner.registrations.lock() {
            slot.take();
        }
        inner.running.store(false, Ordering::SeqCst);
    }
    info!(target: "plc.dispatch", pending_failed = dropped, "dispatcher_loop_exited");
}
