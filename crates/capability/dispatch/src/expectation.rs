//! 期望：谓词 + 处理函数 + 过期时间。

use crate::error::DispatchError;
use std::time::Duration;
use tokio::time::Instant;

type Predicate<M> = Box<dyn Fn(&M) -> bool + Send>;
type MatchHandler<M> = Box<dyn FnOnce(M) -> Result<(), DispatchError> + Send>;
type ErrorHandler = Box<dyn FnOnce(DispatchError) + Send>;
type CompletionHandler<M> = Box<dyn FnOnce(Result<M, DispatchError>) + Send>;

enum Handlers<M> {
    Split {
        on_match: MatchHandler<M>,
        on_error: ErrorHandler,
    },
    Completion(CompletionHandler<M>),
}

/// 挂起的期望。处理函数按值消费，`on_match` 与 `on_error` 恰好触发其一且仅一次。
pub struct Expectation<M> {
    accepts: Predicate<M>,
    handlers: Handlers<M>,
    ttl: Duration,
    expires_at: Instant,
}

impl<M> Expectation<M> {
    pub fn new<A, H, E>(accepts: A, on_match: H, on_error: E, ttl: Duration) -> Self
    where
        A: Fn(&M) -> bool + Send + 'static,
        H: FnOnce(M) -> Result<(), DispatchError> + Send + 'static,
        E: FnOnce(DispatchError) + Send + 'static,
    {
        Self {
            accepts: Box::new(accepts),
            handlers: Handlers::Split {
                on_match: Box::new(on_match),
                on_error: Box::new(on_error),
            },
            ttl,
            expires_at: Instant::now() + ttl,
        }
    }

    /// 单一完成回调：匹配得到 `Ok(frame)`，超时或关闭得到 `Err`。
    pub fn with_completion<A, C>(accepts: A, done: C, ttl: Duration) -> Self
    where
        A: Fn(&M) -> bool + Send + 'static,
        C: FnOnce(Result<M, DispatchError>) + Send + 'static,
    {
        Self {
            accepts: Box::new(accepts),
            handlers: Handlers::Completion(Box::new(done)),
            ttl,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) fn accepts(&self, message: &M) -> bool {
        (self.accepts)(message)
    }

    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// 匹配成功；`on_match` 返回的错误转交同一期望的 `on_error`，此时返回 false。
    pub(crate) fn complete(self, message: M) -> bool {
        match self.handlers {
            Handlers::Split { on_match, on_error } => match on_match(message) {
                Ok(()) => true,
                Err(err) => {
                    on_error(err);
                    false
                }
            },
            Handlers::Completion(done) => {
                done(Ok(message));
                true
            }
        }
    }

    pub(crate) fn fail(self, err: DispatchError) {
        match self.handlers {
            Handlers::Split { on_error, .. } => on_error(err),
            Handlers::Completion(done) => done(Err(err)),
        }
    }
}

impl<M> std::fmt::Debug for Expectation<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Expectation")
            .field("ttl", &self.ttl)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
