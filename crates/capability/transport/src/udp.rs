//! UDP 传输实例

use crate::{TransportError, TransportInstance, peek_buffer, resolve, take_buffer};
use async_trait::async_trait;
use bytes::BytesMut;
use plc_config::{ConfigError, ConnectionString};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

const MAX_DATAGRAM: usize = 65_535;

/// 已 connect 到对端的 UDP 套接字；收到的数据报按顺序追加到读缓冲。
pub struct UdpTransport {
    address: String,
    connect_timeout: Duration,
    socket: Option<UdpSocket>,
    buffer: BytesMut,
    datagram: Vec<u8>,
}

impl UdpTransport {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            socket: None,
            buffer: BytesMut::new(),
            datagram: vec![0; MAX_DATAGRAM],
        }
    }

    /// 连接字符串中的 `connect-timeout` 优先于 `default_timeout`。
    pub fn from_connection_string(
        connection: &ConnectionString,
        default_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let timeout = connection.connect_timeout()?.unwrap_or(default_timeout);
        Ok(Self::new(connection.socket_address()?, timeout))
    }

    fn fill_buffer(&mut self) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        loop {
            match socket.try_recv(&mut self.datagram) {
                Ok(len) => self.buffer.extend_from_slice(&self.datagram[..len]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl TransportInstance for UdpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let remote = tokio::time::timeout(self.connect_timeout, resolve(&self.address))
            .await
            .map_err(|_| TransportError::ConnectTimeout(timeout_ms))??;
        let bind: SocketAddr = if remote.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(remote).await?;
        info!(
            target: "plc.transport",
            address = %self.address,
            local = ?socket.local_addr().ok(),
            "udp transport connected"
        );
        self.socket = Some(socket);
        self.buffer.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.socket.take().is_some() {
            debug!(target: "plc.transport", address = %self.address, "udp transport closed");
        }
        self.buffer.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        socket.send(data).await?;
        Ok(())
    }

    async fn peek(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        if self.buffer.len() < count {
            self.fill_buffer()?;
        }
        peek_buffer(&self.buffer, count)
    }

    async fn read(&mut self, count: usize) -> Result<Vec<u8>, TransportError> {
        if self.buffer.len() < count {
            self.fill_buffer()?;
        }
        take_buffer(&mut self.buffer, count)
    }

    async fn readable_byte_count(&mut self) -> Result<usize, TransportError> {
        self.fill_buffer()?;
        Ok(self.buffer.len())
    }

    fn local_address(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }
}
