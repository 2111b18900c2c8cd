use async_trait::async_trait;
use plc_codec::Message;
use plc_codec::knxnetip::{
    Apdu, ApduData, Cemi, Hpai, KnxAddress, KnxNetIpMessage, LDataFrame, LDataMessage, Status,
    TunnelingRequestDataBlock, TunnelingResponseDataBlock,
};
use plc_dispatch::{DispatchError, Expectation, FrameInterceptor, MessageDispatcher};
use plc_transport::{TcpTransport, TestTransport, TestTransportHandle, TransportInstance};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

type Dispatcher = MessageDispatcher<KnxNetIpMessage>;

fn state_request(channel_id: u8) -> KnxNetIpMessage {
    KnxNetIpMessage::ConnectionStateRequest {
        channel_id,
        control_endpoint: Hpai::unspecified(),
    }
}

fn state_response(channel_id: u8) -> Vec<u8> {
    KnxNetIpMessage::ConnectionStateResponse {
        channel_id,
        status: Status::NoError,
    }
    .to_bytes()
    .expect("serialize")
}

fn is_state_response(message: &KnxNetIpMessage) -> bool {
    matches!(message, KnxNetIpMessage::ConnectionStateResponse { .. })
}

async fn connected() -> (Dispatcher, TestTransportHandle) {
    let (transport, handle) = TestTransport::new();
    let dispatcher = MessageDispatcher::new(Box::new(transport), Duration::from_millis(1));
    dispatcher.connect().await.expect("connect");
    (dispatcher, handle)
}

async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn counting(hits: &Arc<AtomicUsize>, errors: &Arc<AtomicUsize>) -> Expectation<KnxNetIpMessage> {
    let hits = hits.clone();
    let errors = errors.clone();
    Expectation::new(
        is_state_response,
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        move |_| {
            errors.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn receive_returns_none_until_frame_complete() {
    let (mut transport, handle) = TestTransport::new();
    transport.connect().await.expect("connect");
    let dispatcher: Dispatcher = MessageDispatcher::new(Box::new(transport), Duration::from_millis(1));
    let bytes = state_response(3);

    handle.fill_read_buffer(&bytes[..3]);
    assert!(dispatcher.receive().await.expect("receive").is_none());
    handle.fill_read_buffer(&bytes[3..6]);
    assert!(dispatcher.receive().await.expect("receive").is_none());
    assert_eq!(handle.readable_len(), 6);

    handle.fill_read_buffer(&bytes[6..]);
    let message = dispatcher.receive().await.expect("receive").expect("frame");
    assert_eq!(
        message,
        KnxNetIpMessage::ConnectionStateResponse {
            channel_id: 3,
            status: Status::NoError,
        }
    );
    assert_eq!(handle.readable_len(), 0);
}

#[tokio::test]
async fn first_registered_expectation_wins() {
    let (dispatcher, handle) = connected().await;
    let (first_hits, first_errors) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let (second_hits, second_errors) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    dispatcher.expect(counting(&first_hits, &first_errors)).expect("expect");
    dispatcher.expect(counting(&second_hits, &second_errors)).expect("expect");

    handle.fill_read_buffer(&state_response(1));
    eventually(|| first_hits.load(Ordering::SeqCst) == 1).await;
    assert_eq!(second_hits.load(Ordering::SeqCst), 0);

    handle.fill_read_buffer(&state_response(1));
    eventually(|| second_hits.load(Ordering::SeqCst) == 1).await;
    assert_eq!(first_hits.load(Ordering::SeqCst), 1);
    assert_eq!(first_errors.load(Ordering::SeqCst), 0);
    assert_eq!(second_errors.load(Ordering::SeqCst), 0);
    dispatcher.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn expired_expectation_errors_exactly_once() {
    let (dispatcher, _handle) = connected().await;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    dispatcher
        .expect(Expectation::new(
            |_: &KnxNetIpMessage| false,
            |_| Ok(()),
            move |err| sink.lock().expect("lock").push(err),
            Duration::from_millis(30),
        ))
        .expect("expect");

    tokio::time::sleep(Duration::from_millis(150)).await;
    let errors = errors.lock().expect("lock");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_timeout());
}

#[tokio::test]
async fn handler_error_is_routed_to_on_error() {
    let (dispatcher, handle) = connected().await;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    dispatcher
        .expect(Expectation::new(
            is_state_response,
            |_| Err(DispatchError::Handler("unexpected channel".to_string())),
            move |err| sink.lock().expect("lock").push(err.to_string()),
            Duration::from_secs(5),
        ))
        .expect("expect");

    handle.fill_read_buffer(&state_response(9));
    eventually(|| errors.lock().expect("lock").len() == 1).await;
    assert_eq!(
        errors.lock().expect("lock")[0],
        "handler error: unexpected channel"
    );
}

#[tokio::test]
async fn unmatched_frames_go_to_default_channel() {
    let (dispatcher, handle) = connected().await;
    let mut incoming = dispatcher.default_incoming_messages(4);

    handle.fill_read_buffer(&state_response(2));
    let message = tokio::time::timeout(Duration::from_secs(1), incoming.recv())
        .await
        .expect("timely")
        .expect("frame");
    assert!(is_state_response(&message));
}

#[tokio::test]
async fn request_awaits_matching_response() {
    let (dispatcher, handle) = connected().await;
    let gateway = handle.clone();
    let responder = tokio::spawn(async move {
        let frame = gateway
            .next_write(Duration::from_secs(1))
            .await
            .expect("request written");
        let (request, _) = KnxNetIpMessage::from_bytes(&frame).expect("parse");
        assert_eq!(request, state_request(4));
        gateway.fill_read_buffer(&state_response(4));
    });

    let response = dispatcher
        .request(
            &state_request(4),
            |message| {
                matches!(
                    message,
                    KnxNetIpMessage::ConnectionStateResponse { channel_id: 4, .. }
                )
            },
            Duration::from_secs(1),
        )
        .await
        .expect("response");
    responder.await.expect("responder");
    assert!(is_state_response(&response));
}

#[tokio::test]
async fn request_times_out_without_response() {
    let (dispatcher, _handle) = connected().await;
    let result = dispatcher
        .request(&state_request(1), is_state_response, Duration::from_millis(30))
        .await;
    assert!(matches!(result, Err(DispatchError::Timeout(_))));
}

#[tokio::test]
async fn failed_write_registers_nothing() {
    let (dispatcher, handle) = connected().await;
    handle.set_fail_writes(true);
    let (hits, errors) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));

    let result = dispatcher
        .send_request(&state_request(1), counting(&hits, &errors))
        .await;
    assert!(matches!(result, Err(DispatchError::Transport(_))));

    let mut incoming = dispatcher.default_incoming_messages(4);
    handle.fill_read_buffer(&state_response(1));
    tokio::time::timeout(Duration::from_secs(1), incoming.recv())
        .await
        .expect("timely")
        .expect("frame");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disconnect_fails_pending_expectations() {
    let (dispatcher, handle) = connected().await;
    let (hits, errors) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    dispatcher.expect(counting(&hits, &errors)).expect("expect");
    assert!(dispatcher.is_running());

    dispatcher.disconnect().await.expect("disconnect");
    assert!(!dispatcher.is_running());
    assert!(!handle.is_connected());
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(matches!(
        dispatcher.expect(counting(&hits, &errors)),
        Err(DispatchError::NotConnected)
    ));
}

#[tokio::test]
async fn peer_close_delivers_last_frame_then_stops_loop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        go_rx.await.expect("go");
        socket.write_all(&state_response(4)).await.expect("write");
        socket.shutdown().await.expect("shutdown");
    });

    let transport = TcpTransport::new(address.to_string(), Duration::from_secs(1));
    let dispatcher: Dispatcher = MessageDispatcher::new(Box::new(transport), Duration::from_millis(1));
    dispatcher.connect().await.expect("connect");
    let mut incoming = dispatcher.default_incoming_messages(4);
    let (hits, errors) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let (hits_in, errors_in) = (hits.clone(), errors.clone());
    dispatcher
        .expect(Expectation::new(
            |message| matches!(message, KnxNetIpMessage::DisconnectResponse { .. }),
            move |_| {
                hits_in.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            move |err| {
                if matches!(err, DispatchError::Closed) {
                    errors_in.fetch_add(1, Ordering::SeqCst);
                }
            },
            Duration::from_secs(30),
        ))
        .expect("expect");
    go_tx.send(()).expect("signal");
    server.await.expect("join");

    let message = tokio::time::timeout(Duration::from_secs(2), incoming.recv())
        .await
        .expect("timely")
        .expect("frame");
    assert!(is_state_response(&message));
    eventually(|| !dispatcher.is_running()).await;
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(matches!(
        dispatcher.expect(counting(&hits, &errors)),
        Err(DispatchError::NotConnected)
    ));
    dispatcher.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn connect_twice_keeps_single_loop() {
    let (dispatcher, handle) = connected().await;
    dispatcher.connect().await.expect("second connect");
    let mut incoming = dispatcher.default_incoming_messages(4);
    handle.fill_read_buffer(&state_response(1));
    handle.fill_read_buffer(&state_response(2));

    let first = incoming.recv().await.expect("first");
    let second = incoming.recv().await.expect("second");
    assert_eq!(
        (first, second),
        (
            KnxNetIpMessage::ConnectionStateResponse {
                channel_id: 1,
                status: Status::NoError
            },
            KnxNetIpMessage::ConnectionStateResponse {
                channel_id: 2,
                status: Status::NoError
            }
        )
    );
}

#[tokio::test]
async fn garbage_header_is_discarded() {
    let (dispatcher, handle) = connected().await;
    let mut incoming = dispatcher.default_incoming_messages(4);
    handle.fill_read_buffer(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    eventually(|| handle.readable_len() == 0).await;

    handle.fill_read_buffer(&state_response(5));
    let message = tokio::time::timeout(Duration::from_secs(1), incoming.recv())
        .await
        .expect("timely")
        .expect("frame");
    assert!(is_state_response(&message));
}

#[tokio::test]
async fn panicking_handler_does_not_stop_loop() {
    let (dispatcher, handle) = connected().await;
    dispatcher
        .expect(Expectation::new(
            is_state_response,
            |_| panic!("handler bug"),
            |_| {},
            Duration::from_secs(5),
        ))
        .expect("expect");
    handle.fill_read_buffer(&state_response(1));
    eventually(|| handle.readable_len() == 0).await;

    let (hits, errors) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    dispatcher.expect(counting(&hits, &errors)).expect("expect");
    handle.fill_read_buffer(&state_response(1));
    eventually(|| hits.load(Ordering::SeqCst) == 1).await;
    assert!(dispatcher.is_running());
}

struct AutoAck;

#[async_trait]
impl FrameInterceptor<KnxNetIpMessage> for AutoAck {
    async fn intercept(
        &self,
        dispatcher: &MessageDispatcher<KnxNetIpMessage>,
        message: KnxNetIpMessage,
    ) -> Option<KnxNetIpMessage> {
        match message {
            KnxNetIpMessage::TunnelingRequest { header, .. } => {
                let ack = KnxNetIpMessage::TunnelingResponse {
                    header: TunnelingResponseDataBlock {
                        channel_id: header.channel_id,
                        sequence_counter: header.sequence_counter,
                        status: Status::NoError,
                    },
                };
                dispatcher.send(&ack).await.expect("ack");
                None
            }
            other => Some(other),
        }
    }
}

#[tokio::test]
async fn interceptor_consumes_claimed_frames() {
    let (dispatcher, handle) = connected().await;
    dispatcher.set_interceptor(Arc::new(AutoAck));
    let mut incoming = dispatcher.default_incoming_messages(4);

    let indication = KnxNetIpMessage::TunnelingRequest {
        header: TunnelingRequestDataBlock {
            channel_id: 1,
            sequence_counter: 7,
        },
        cemi: Cemi::LDataInd(LDataMessage::new(LDataFrame::group(
            KnxAddress::new(1, 1, 5),
            [0x09, 0x01],
            Apdu::data(ApduData::group_value_write(&[0x01])),
        ))),
    };
    handle.fill_read_buffer(&indication.to_bytes().expect("serialize"));
    let ack = handle.next_write(Duration::from_secs(1)).await.expect("ack");
    let (ack, _) = KnxNetIpMessage::from_bytes(&ack).expect("parse");
    assert!(matches!(
        ack,
        KnxNetIpMessage::TunnelingResponse {
            header: TunnelingResponseDataBlock {
                sequence_counter: 7,
                ..
            }
        }
    ));

    handle.fill_read_buffer(&state_response(1));
    let next = incoming.recv().await.expect("frame");
    assert!(is_state_response(&next));
}
