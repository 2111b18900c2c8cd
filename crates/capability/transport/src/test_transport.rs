//! 内存测试传输

use crate::{TransportError, TransportInstance, peek_buffer, take_buffer};
use async_trait::async_trait;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct TestState {
    connected: bool,
    fail_writes: bool,
    read_buffer: BytesMut,
    writes: VecDeque<Vec<u8>>,
}

struct Shared {
    state: Mutex<TestState>,
    written: Notify,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, TestState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::Io(std::io::Error::other("lock failed")))
    }
}

/// 内存传输实例：读缓冲由测试注入，写入内容按次记录。
pub struct TestTransport {
    shared: Arc<Shared>,
}

/// 测试侧句柄，与 `TestTransport` 共享状态。
#[derive(Clone)]
pub struct TestTransportHandle {
    shared: Arc<Shared>,
}

impl TestTransport {
    pub fn new() -> (Self, TestTransportHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(TestState::default()),
            written: Notify::new(),
        });
        (
            Self {
                shared: shared.clone(),
            },
            TestTransportHandle { shared },
        )
    }
}

impl TestTransportHandle {
    /// 追加待读取的字节。
    pub fn fill_read_buffer(&self, bytes: &[u8]) {
        if let Ok(mut state) = self.shared.lock() {
            state.read_buffer.extend_from_slice(bytes);
        }
    }

    /// 取出全部已写入字节（按写入顺序拼接）。
    pub fn drain_write_buffer(&self) -> Vec<u8> {
        self.drain_writes().concat()
    }

    /// 取出全部已写入的帧（每次 `write` 一项）。
    pub fn drain_writes(&self) -> Vec<Vec<u8>> {
        match self.shared.lock() {
            Ok(mut state) => state.writes.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// 等待下一次写入，超时返回 `None`。
    pub async fn next_write(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.written.notified();
            if let Ok(mut state) = self.shared.lock() {
                if let Some(frame) = state.writes.pop_front() {
                    return Some(frame);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    pub fn readable_len(&self) -> usize {
        self.shared.lock().map(|state| state.read_buffer.len()).unwrap_or(0)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().map(|state| state.connected).unwrap_or(false)
    }

    /// 让后续写入失败，模拟链路中断。
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut state) = self.shared.lock() {
            state.fail_writes = fail;
        }
    }
}

#[async_trait]
impl TransportInstance for TestTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.shared.lock()?.connected = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.shared.lock()?.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().map(|state| state.connected).unwrap_or(false)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        {
            let mut state = self.shared.lock()?;
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.fail_writes {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "write failed",
                )));
            }
            state.writes.push_back(data.to_vec());
        }
        self.shared.written.notify_waiters();
        Ok(())
    }

    async fn peek(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        let state = self.shared.lock()?;
        peek_buffer(&state.read_buffer, count)
    }

    async fn read(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.shared.lock()?;
        take_buffer(&mut state.read_buffer, count)
    }

    async fn readable_byte_count(&mut self) -> Result<usize, TransportError> {
        Ok(self.shared.lock()?.read_buffer.len())
    }

    fn local_address(&self) -> Option<SocketAddr> {
        None
    }
}
