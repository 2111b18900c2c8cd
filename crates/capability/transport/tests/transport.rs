use plc_config::ConnectionString;
use plc_transport::{
    TcpTransport, TestTransport, TransportError, TransportInstance, UdpTransport,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};

#[tokio::test]
async fn test_transport_peek_is_non_destructive() {
    let (mut transport, handle) = TestTransport::new();
    transport.connect().await.expect("connect");
    handle.fill_read_buffer(&[1, 2, 3]);

    assert!(matches!(
        transport.peek(4).await,
        Err(TransportError::NotEnoughData {
            requested: 4,
            available: 3
        })
    ));
    assert_eq!(transport.peek(2).await.expect("peek"), vec![1, 2]);
    assert_eq!(transport.readable_byte_count().await.expect("count"), 3);
    assert_eq!(transport.read(2).await.expect("read"), vec![1, 2]);
    assert_eq!(handle.readable_len(), 1);
}

#[tokio::test]
async fn test_transport_records_writes() {
    let (mut transport, handle) = TestTransport::new();
    assert!(matches!(
        transport.write(&[0xAA]).await,
        Err(TransportError::NotConnected)
    ));

    transport.connect().await.expect("connect");
    transport.write(&[0x01, 0x02]).await.expect("write");
    transport.write(&[0x03]).await.expect("write");
    assert_eq!(handle.drain_write_buffer(), vec![0x01, 0x02, 0x03]);
    assert!(handle.drain_writes().is_empty());

    handle.set_fail_writes(true);
    assert!(transport.write(&[0x04]).await.is_err());
    transport.close().await.expect("close");
    assert!(!handle.is_connected());
}

#[tokio::test]
async fn next_write_waits_for_frame() {
    let (mut transport, handle) = TestTransport::new();
    transport.connect().await.expect("connect");

    let waiter = handle.clone();
    let task = tokio::spawn(async move { waiter.next_write(Duration::from_secs(1)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    transport.write(&[0x06, 0x10]).await.expect("write");

    assert_eq!(task.await.expect("join"), Some(vec![0x06, 0x10]));
    assert_eq!(handle.next_write(Duration::from_millis(20)).await, None);
}

#[tokio::test]
async fn tcp_transport_exchanges_bytes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut request = [0u8; 4];
        socket.read_exact(&mut request).await.expect("read");
        socket.write_all(&[0x03, 0x00, 0x00, 0x04]).await.expect("write");
        request
    });

    let connection =
        ConnectionString::parse(&format!("s7://127.0.0.1:{}", address.port())).expect("parse");
    let mut transport =
        TcpTransport::from_connection_string(&connection, Duration::from_secs(1)).expect("transport");
    transport.connect().await.expect("connect");
    assert!(transport.local_address().is_some());
    transport.write(&[1, 2, 3, 4]).await.expect("write");

    let mut header = None;
    for _ in 0..100 {
        match transport.peek(4).await {
            Ok(bytes) => {
                header = Some(bytes);
                break;
            }
            Err(TransportError::NotEnoughData { .. }) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(err) => panic!("peek failed: {err}"),
        }
    }
    assert_eq!(header, Some(vec![0x03, 0x00, 0x00, 0x04]));
    assert_eq!(transport.read(4).await.expect("read"), vec![0x03, 0x00, 0x00, 0x04]);
    assert_eq!(server.await.expect("join"), [1, 2, 3, 4]);
    transport.close().await.expect("close");
    assert!(!transport.is_connected());
}

async fn tcp_peer_that_sends_then_hangs_up(payload: &'static [u8]) -> TcpTransport {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        socket.write_all(payload).await.expect("write");
        socket.shutdown().await.expect("shutdown");
    });
    let mut transport = TcpTransport::new(address.to_string(), Duration::from_secs(1));
    transport.connect().await.expect("connect");
    server.await.expect("join");
    transport
}

#[tokio::test]
async fn tcp_buffered_bytes_survive_peer_close() {
    let mut transport = tcp_peer_that_sends_then_hangs_up(&[1, 2, 3, 4]).await;

    let mut count = 0;
    for _ in 0..100 {
        count = transport.readable_byte_count().await.expect("count");
        if count == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(count, 4);
    assert_eq!(transport.readable_byte_count().await.expect("count"), 4);
    assert_eq!(transport.peek(4).await.expect("peek"), vec![1, 2, 3, 4]);
    assert_eq!(transport.read(4).await.expect("read"), vec![1, 2, 3, 4]);
    assert!(transport.is_connected());

    assert!(matches!(
        transport.readable_byte_count().await,
        Err(TransportError::Closed)
    ));
    assert!(!transport.is_connected());
    assert!(matches!(
        transport.readable_byte_count().await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn tcp_truncated_frame_after_peer_close_reports_closed() {
    let mut transport = tcp_peer_that_sends_then_hangs_up(&[0x03, 0x00]).await;

    let mut result = transport.peek(4).await;
    for _ in 0..100 {
        if !matches!(result, Err(TransportError::NotEnoughData { .. })) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        result = transport.peek(4).await;
    }
    assert!(matches!(result, Err(TransportError::Closed)), "{result:?}");
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn udp_transport_appends_datagrams() {
    let peer = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let address = peer.local_addr().expect("addr");
    let mut transport = UdpTransport::new(address.to_string(), Duration::from_secs(1));
    transport.connect().await.expect("connect");
    transport.write(&[0x06, 0x10]).await.expect("write");

    let mut datagram = [0u8; 16];
    let (len, from) = peer.recv_from(&mut datagram).await.expect("recv");
    assert_eq!(&datagram[..len], &[0x06, 0x10]);
    peer.send_to(&[0xA1, 0xA2], from).await.expect("send");
    peer.send_to(&[0xA3], from).await.expect("send");

    let mut count = 0;
    for _ in 0..100 {
        count = transport.readable_byte_count().await.expect("count");
        if count == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(count, 3);
    assert_eq!(transport.read(3).await.expect("read"), vec![0xA1, 0xA2, 0xA3]);
}

#[tokio::test]
async fn connect_to_unresolvable_host_fails() {
    let mut transport = UdpTransport::new("no-such-host.invalid:3671", Duration::from_secs(2));
    assert!(transport.connect().await.is_err());
}
