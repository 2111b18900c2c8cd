//! 追踪初始化、连接 ID 与驱动指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 驱动指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_malformed: u64,
    pub frames_unhandled: u64,
    pub expectation_timeouts: u64,
    pub handler_errors: u64,
    pub loop_restarts: u64,
    pub transactions_submitted: u64,
    pub transactions_completed: u64,
    pub transactions_failed: u64,
    pub transactions_cancelled: u64,
    pub worker_panics: u64,
    pub keepalive_failures: u64,
    pub cache_updates: u64,
}

/// 驱动指标（进程级计数器）。
pub struct DriverMetrics {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_malformed: AtomicU64,
    frames_unhandled: AtomicU64,
    expectation_timeouts: AtomicU64,
    handler_errors: AtomicU64,
    loop_restarts: AtomicU64,
    transactions_submitted: AtomicU64,
    transactions_completed: AtomicU64,
    transactions_failed: AtomicU64,
    transactions_cancelled: AtomicU64,
    worker_panics: AtomicU64,
    keepalive_failures: AtomicU64,
    cache_updates: AtomicU64,
}

impl DriverMetrics {
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_malformed: AtomicU64::new(0),
            frames_unhandled: AtomicU64::new(0),
            expectation_timeouts: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            loop_restarts: AtomicU64::new(0),
            transactions_submitted: AtomicU64::new(0),
            transactions_completed: AtomicU64::new(0),
            transactions_failed: AtomicU64::new(0),
            transactions_cancelled: AtomicU64::new(0),
            worker_panics: AtomicU64::new(0),
            keepalive_failures: AtomicU64::new(0),
            cache_updates: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            frames_unhandled: self.frames_unhandled.load(Ordering::Relaxed),
            expectation_timeouts: self.expectation_timeouts.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            loop_restarts: self.loop_restarts.load(Ordering::Relaxed),
            transactions_submitted: self.transactions_submitted.load(Ordering::Relaxed),
            transactions_completed: self.transactions_completed.load(Ordering::Relaxed),
            transactions_failed: self.transactions_failed.load(Ordering::Relaxed),
            transactions_cancelled: self.transactions_cancelled.load(Ordering::Relaxed),
            worker_panics: self.worker_panics.load(Ordering::Relaxed),
            keepalive_failures: self.keepalive_failures.load(Ordering::Relaxed),
            cache_updates: self.cache_updates.load(Ordering::Relaxed),
        }
    }
}

impl Default for DriverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<DriverMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static DriverMetrics {
    METRICS.get_or_init(DriverMetrics::new)
}

/// 初始化 tracing（默认 info），重复调用无副作用。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 connection_id。
pub fn new_connection_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 记录发送帧次数。
pub fn record_frame_sent() {
    metrics().frames_sent.fetch_add(1, Ordering::Relaxed);
}

/// 记录接收帧次数。
pub fn record_frame_received() {
    metrics().frames_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录解析失败帧次数。
pub fn record_frame_malformed() {
    metrics().frames_malformed.fetch_add(1, Ordering::Relaxed);
}

/// 记录无人消费而丢弃的帧次数。
pub fn record_frame_unhandled() {
    metrics().frames_unhandled.fetch_add(1, Ordering::Relaxed);
}

/// 记录期望超时次数。
pub fn record_expectation_timeout() {
    metrics().expectation_timeouts.fetch_add(1, Ordering::Relaxed);
}

/// 记录 on_match 返回错误的次数。
pub fn record_handler_error() {
    metrics().handler_errors.fetch_add(1, Ordering::Relaxed);
}

/// 记录分发循环因 panic 重启的次数。
pub fn record_loop_restart() {
    metrics().loop_restarts.fetch_add(1, Ordering::Relaxed);
}

/// 记录提交的事务数。
pub fn record_transaction_submitted() {
    metrics()
        .transactions_submitted
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录成功完成的事务数。
pub fn record_transaction_completed() {
    metrics()
        .transactions_completed
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录以错误结束的事务数。
pub fn record_transaction_failed() {
    metrics().transactions_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录被取消的事务数。
pub fn record_transaction_cancelled() {
    metrics()
        .transactions_cancelled
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录工作单元 panic 次数。
pub fn record_worker_panic() {
    metrics().worker_panics.fetch_add(1, Ordering::Relaxed);
}

/// 记录保活失败次数。
pub fn record_keepalive_failure() {
    metrics().keepalive_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录值缓存实际变更次数。
pub fn record_cache_update() {
    metrics().cache_updates.fetch_add(1, Ordering::Relaxed);
}
