use domain::{ConnectionState, ResponseCode};
use plc_codec::Message;
use plc_codec::knxnetip::{
    Apdu, ApduData, Cemi, ConnectionResponseDataBlock, DibDeviceInfo, DibSuppSvcFamilies,
    HostProtocolCode, Hpai, KnxAddress, KnxNetIpMessage, LDataFrame, LDataMessage, ServiceFamily,
    ServiceId, Status, TunnelingRequestDataBlock, TunnelingResponseDataBlock,
};
use plc_knxnetip::{ConnectionError, KnxConnectionConfig, KnxNetIpConnection};
use plc_transactions::WorkerPool;
use plc_transport::{TestTransport, TestTransportHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

const CHANNEL_ID: u8 = 7;

#[derive(Clone)]
struct Behaviour {
    supports_tunneling: bool,
    connect_status: Status,
    ping_status: Status,
    write_status: Status,
    values: HashMap<u16, Vec<u8>>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            supports_tunneling: true,
            connect_status: Status::NoError,
            ping_status: Status::NoError,
            write_status: Status::NoError,
            values: HashMap::new(),
        }
    }
}

/// 模拟网关：读取连接写出的每一帧并按行为表应答。
struct MockGateway {
    handle: TestTransportHandle,
    received: Arc<Mutex<Vec<KnxNetIpMessage>>>,
    _task: JoinHandle<()>,
}

impl MockGateway {
    fn spawn(handle: TestTransportHandle, behaviour: Behaviour) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let wire = handle.clone();
        let task = tokio::spawn(async move {
            let mut sequence_counter: u8 = 0;
            while let Some(frame) = wire.next_write(Duration::from_secs(10)).await {
                let (message, _) = KnxNetIpMessage::from_bytes(&frame).expect("client frame");
                log.lock().expect("lock").push(message.clone());
                for reply in respond(&behaviour, &message, &mut sequence_counter) {
                    wire.fill_read_buffer(&reply.to_bytes().expect("reply"));
                }
            }
        });
        Self {
            handle,
            received,
            _task: task,
        }
    }

    fn count(&self, filter: impl Fn(&KnxNetIpMessage) -> bool) -> usize {
        self.received
            .lock()
            .expect("lock")
            .iter()
            .filter(|message| filter(message))
            .count()
    }

    fn received(&self) -> Vec<KnxNetIpMessage> {
        self.received.lock().expect("lock").clone()
    }

    /// 网关主动推送总线上的组报文。
    fn push_indication(&self, sequence_counter: u8, destination: [u8; 2], data: ApduData) {
        let frame = indication(sequence_counter, destination, data);
        self.handle
            .fill_read_buffer(&frame.to_bytes().expect("indication"));
    }
}

fn gateway_endpoint() -> Hpai {
    Hpai {
        host_protocol: HostProtocolCode::Ipv4Udp,
        ip_address: [192, 168, 1, 10],
        port: 3671,
    }
}

fn device_info() -> DibDeviceInfo {
    let mut friendly_name = [0u8; 30];
    friendly_name[..12].copy_from_slice(b"mock-gateway");
    DibDeviceInfo {
        knx_medium: 0x02,
        programming_mode: false,
        knx_address: KnxAddress::new(1, 1, 0),
        project_installation_identifier: 0x0011,
        serial_number: [0x00, 0xC5, 0x01, 0x02, 0x03, 0x04],
        multicast_address: [224, 0, 23, 12],
        mac_address: [0x00, 0x24, 0x6D, 0x01, 0x02, 0x03],
        friendly_name,
    }
}

fn indication(sequence_counter: u8, destination: [u8; 2], data: ApduData) -> KnxNetIpMessage {
    KnxNetIpMessage::TunnelingRequest {
        header: TunnelingRequestDataBlock {
            channel_id: CHANNEL_ID,
            sequence_counter,
        },
        cemi: Cemi::LDataInd(LDataMessage::new(LDataFrame::group(
            KnxAddress::new(1, 1, 5),
            destination,
            Apdu::data(data),
        ))),
    }
}

fn respond(
    behaviour: &Behaviour,
    message: &KnxNetIpMessage,
    sequence_counter: &mut u8,
) -> Vec<KnxNetIpMessage> {
    match message {
        KnxNetIpMessage::SearchRequest { .. } => {
            let mut service_ids = vec![ServiceId {
                family: ServiceFamily::Core,
                version: 1,
            }];
            if behaviour.supports_tunneling {
                service_ids.push(ServiceId {
                    family: ServiceFamily::Tunneling,
                    version: 1,
                });
            }
            vec![KnxNetIpMessage::SearchResponse {
                control_endpoint: gateway_endpoint(),
                device_info: device_info(),
                supported_services: DibSuppSvcFamilies { service_ids },
            }]
        }
        KnxNetIpMessage::ConnectionRequest { .. } => {
            let accepted = behaviour.connect_status == Status::NoError;
            vec![KnxNetIpMessage::ConnectionResponse {
                channel_id: CHANNEL_ID,
                status: behaviour.connect_status,
                data_endpoint: accepted.then(gateway_endpoint),
                data_block: accepted.then_some(ConnectionResponseDataBlock::Tunnel {
                    knx_address: KnxAddress::new(1, 1, 250),
                }),
            }]
        }
        KnxNetIpMessage::ConnectionStateRequest { channel_id, .. } => {
            vec![KnxNetIpMessage::ConnectionStateResponse {
                channel_id: *channel_id,
                status: behaviour.ping_status,
            }]
        }
        KnxNetIpMessage::DisconnectRequest { channel_id, .. } => {
            vec![KnxNetIpMessage::DisconnectResponse {
                channel_id: *channel_id,
                status: Status::NoError,
            }]
        }
        KnxNetIpMessage::TunnelingRequest { header, cemi } => {
            let frame = &cemi.l_data().frame;
            let mut replies = vec![KnxNetIpMessage::TunnelingResponse {
                header: TunnelingResponseDataBlock {
                    channel_id: header.channel_id,
                    sequence_counter: header.sequence_counter,
                    status: match &frame.apdu {
                        Apdu::Data {
                            data: ApduData::GroupValueWrite { .. },
                            ..
                        } => behaviour.write_status,
                        _ => Status::NoError,
                    },
                },
            }];
            if let Apdu::Data {
                data: ApduData::GroupValueRead,
                ..
            } = &frame.apdu
            {
                if let Some(value) = behaviour.values.get(&frame.destination_u16()) {
                    replies.push(indication(
                        *sequence_counter,
                        frame.destination,
                        ApduData::group_value_response(value),
                    ));
                    *sequence_counter = sequence_counter.wrapping_add(1);
                }
            }
            replies
        }
        _ => Vec::new(),
    }
}

fn test_config() -> KnxConnectionConfig {
    KnxConnectionConfig {
        default_ttl_ms: 300,
        dispatch_poll_interval_ms: 1,
        ..KnxConnectionConfig::default()
    }
}

fn connection_with(config: KnxConnectionConfig) -> (KnxNetIpConnection, TestTransportHandle) {
    let (transport, handle) = TestTransport::new();
    let pool = Arc::new(WorkerPool::new(2, 16));
    (
        KnxNetIpConnection::new(Box::new(transport), config, pool),
        handle,
    )
}

async fn connected(behaviour: Behaviour) -> (KnxNetIpConnection, MockGateway) {
    let (connection, handle) = connection_with(test_config());
    let gateway = MockGateway::spawn(handle, behaviour);
    connection.connect().await.expect("connect");
    (connection, gateway)
}

async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn is_ack(message: &KnxNetIpMessage, sequence_counter: u8) -> bool {
    matches!(
        message,
        KnxNetIpMessage::TunnelingResponse { header }
            if header.channel_id == CHANNEL_ID && header.sequence_counter == sequence_counter
    )
}

#[tokio::test]
async fn connect_runs_search_then_connection_request() {
    let (connection, gateway) = connected(Behaviour::default()).await;

    assert_eq!(connection.state(), ConnectionState::Connected);
    assert!(connection.is_connected());
    let received = gateway.received();
    assert!(matches!(received[0], KnxNetIpMessage::SearchRequest { .. }));
    assert!(matches!(received[1], KnxNetIpMessage::ConnectionRequest { .. }));

    let metadata = connection.metadata().expect("metadata");
    assert_eq!(metadata.channel_id, CHANNEL_ID);
    assert_eq!(metadata.gateway_name, "mock-gateway");
    assert_eq!(metadata.gateway_knx_address, KnxAddress::new(1, 1, 0));
    assert_eq!(metadata.client_knx_address, KnxAddress::new(1, 1, 250));
    assert!(metadata.supported_services.contains(&ServiceFamily::Tunneling));
    let attributes = metadata.attributes();
    assert_eq!(attributes["ClientKnxAddress"], "1.1.250");
    assert_eq!(attributes["DeviceMulticastAddress"], "224.0.23.12");
}

#[tokio::test]
async fn rejected_handshake_returns_to_disconnected() {
    let (connection, handle) = connection_with(test_config());
    let _gateway = MockGateway::spawn(
        handle.clone(),
        Behaviour {
            connect_status: Status::NoMoreConnections,
            ..Behaviour::default()
        },
    );

    let result = connection.connect().await;
    assert!(matches!(
        result,
        Err(ConnectionError::HandshakeRejected(Status::NoMoreConnections))
    ));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!handle.is_connected());
    assert!(connection.metadata().is_none());
}

#[tokio::test]
async fn gateway_without_tunneling_is_refused() {
    let (connection, handle) = connection_with(test_config());
    let gateway = MockGateway::spawn(
        handle,
        Behaviour {
            supports_tunneling: false,
            ..Behaviour::default()
        },
    );

    let result = connection.connect().await;
    assert!(matches!(result, Err(ConnectionError::TunnelingNotSupported)));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(
        gateway.count(|message| matches!(message, KnxNetIpMessage::ConnectionRequest { .. })),
        0
    );
}

#[tokio::test]
async fn silent_gateway_times_out_handshake() {
    let (connection, _handle) = connection_with(test_config());
    let result = connection.connect().await;
    assert!(result.as_ref().is_err_and(|err| err.is_timeout()), "{result:?}");
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let (connection, _gateway) = connected(Behaviour::default()).await;
    assert!(matches!(
        connection.connect().await,
        Err(ConnectionError::UnexpectedState(ConnectionState::Connected))
    ));
}

#[tokio::test]
async fn ping_uses_connection_state_request() {
    let (connection, gateway) = connected(Behaviour::default()).await;
    connection.ping().await.expect("ping");
    assert_eq!(
        gateway.count(|message| matches!(
            message,
            KnxNetIpMessage::ConnectionStateRequest { channel_id: CHANNEL_ID, .. }
        )),
        1
    );
}

#[tokio::test]
async fn ping_requires_connection() {
    let (connection, _handle) = connection_with(test_config());
    assert!(matches!(
        connection.ping().await,
        Err(ConnectionError::NotConnected)
    ));
}

#[tokio::test]
async fn rejected_ping_surfaces_status() {
    let (connection, _gateway) = connected(Behaviour {
        ping_status: Status::InvalidConnectionId,
        ..Behaviour::default()
    })
    .await;
    assert!(matches!(
        connection.ping().await,
        Err(ConnectionError::PingRejected(Status::InvalidConnectionId))
    ));
}

#[tokio::test]
async fn indications_are_acknowledged_and_cached() {
    let (connection, gateway) = connected(Behaviour::default()).await;
    let mut subscription = connection.subscription_request_builder().build();

    gateway.push_indication(0, [0x00, 0x01], ApduData::group_value_write(&[0x01]));
    gateway.push_indication(1, [0x00, 0x01], ApduData::group_value_write(&[0x01]));
    gateway.push_indication(2, [0x00, 0x01], ApduData::group_value_write(&[0x02]));

    let mut flags = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .expect("timely")
            .expect("event");
        assert_eq!(event.address.raw(), 1);
        flags.push(event.changed);
    }
    assert_eq!(flags, vec![true, false, true]);
    assert_eq!(connection.cache().get(1), Some(vec![0x02]));

    eventually(|| (0..3).all(|sequence| gateway.count(|message| is_ack(message, sequence)) == 1))
        .await;
}

#[tokio::test]
async fn subscription_filters_by_address_and_change() {
    let (connection, gateway) = connected(Behaviour::default()).await;
    let mut subscription = connection
        .subscription_request_builder()
        .add_field("light", "1/2/3")
        .add_field("broken", "1/9/3")
        .changes_only(true)
        .build();
    assert_eq!(subscription.responses()[0].code, ResponseCode::Ok);
    assert_eq!(subscription.responses()[1].code, ResponseCode::InvalidAddress);

    gateway.push_indication(0, [0x0A, 0x03], ApduData::group_value_write(&[0x01]));
    gateway.push_indication(1, [0x0A, 0x03], ApduData::group_value_write(&[0x01]));
    gateway.push_indication(2, [0x0A, 0x04], ApduData::group_value_write(&[0x01]));
    gateway.push_indication(3, [0x0A, 0x03], ApduData::group_value_write(&[0x00]));

    let first = subscription.recv().await.expect("first");
    assert_eq!(first.name, "light");
    assert_eq!(first.payload, vec![0x01]);
    let second = subscription.recv().await.expect("second");
    assert_eq!(second.payload, vec![0x00]);
    assert!(second.changed);
    eventually(|| connection.cache().len() == 2).await;
    assert!(subscription.try_recv().is_none());

    assert!(connection.unsubscribe(subscription.id()));
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn read_request_reports_per_field_codes() {
    let (connection, gateway) = connected(Behaviour {
        values: HashMap::from([(0x0A03, vec![0x01]), (0x0A04, vec![0x0C, 0x1A])]),
        ..Behaviour::default()
    })
    .await;

    let response = connection
        .read_request_builder()
        .add_field("switch", "1/2/3")
        .add_field("temperature", "1/2/4")
        .add_field("missing", "1/2/5")
        .add_field("typo", "1/2/x")
        .build()
        .execute()
        .await
        .expect("read");

    assert_eq!(response.fields.len(), 4);
    assert_eq!(response.value("switch"), Some(&[0x01][..]));
    assert_eq!(response.value("temperature"), Some(&[0x0C, 0x1A][..]));
    assert_eq!(response.response_code("missing"), Some(ResponseCode::Timeout));
    assert_eq!(response.response_code("typo"), Some(ResponseCode::InvalidAddress));
    assert_eq!(
        connection.cached_value("1/2/4".parse().expect("address")),
        Some(vec![0x0C, 0x1A])
    );
    assert_eq!(
        gateway.count(|message| matches!(message, KnxNetIpMessage::TunnelingRequest { .. })),
        3
    );
}

#[tokio::test]
async fn read_requires_connection() {
    let (connection, _handle) = connection_with(test_config());
    let result = connection
        .read_request_builder()
        .add_field("switch", "1/2/3")
        .build()
        .execute()
        .await;
    assert!(matches!(result, Err(ConnectionError::NotConnected)));
}

#[tokio::test]
async fn write_request_waits_for_gateway_ack() {
    let (connection, gateway) = connected(Behaviour::default()).await;
    let response = connection
        .write_request_builder()
        .add_field("switch", "1/2/3", vec![0x01])
        .add_field("empty", "1/2/4", Vec::new())
        .build()
        .execute()
        .await
        .expect("write");

    assert_eq!(response.response_code("switch"), Some(ResponseCode::Ok));
    assert_eq!(response.response_code("empty"), Some(ResponseCode::InvalidData));
    assert!(!response.all_ok());

    let writes: Vec<_> = gateway
        .received()
        .into_iter()
        .filter_map(|message| match message {
            KnxNetIpMessage::TunnelingRequest { cemi, .. } => Some(cemi.l_data().frame.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].destination, [0x0A, 0x03]);
    assert_eq!(writes[0].source, KnxAddress::new(1, 1, 250));
    assert!(matches!(
        &writes[0].apdu,
        Apdu::Data { data, .. } if data.payload() == Some(vec![0x01])
    ));
}

#[tokio::test]
async fn rejected_write_reports_unsupported_option() {
    let (connection, _gateway) = connected(Behaviour {
        write_status: Status::ConnectionOptionNotSupported,
        ..Behaviour::default()
    })
    .await;
    let response = connection
        .write_request_builder()
        .add_field("switch", "1/2/3", vec![0x01])
        .build()
        .execute()
        .await
        .expect("write");
    assert_eq!(response.response_code("switch"), Some(ResponseCode::Unsupported));
}

#[tokio::test]
async fn busy_gateway_write_reports_remote_busy() {
    let (connection, _gateway) = connected(Behaviour {
        write_status: Status::NoMoreConnections,
        ..Behaviour::default()
    })
    .await;
    let response = connection
        .write_request_builder()
        .add_field("switch", "1/2/3", vec![0x01])
        .build()
        .execute()
        .await
        .expect("write");
    assert_eq!(response.response_code("switch"), Some(ResponseCode::RemoteBusy));
}

#[tokio::test]
async fn disconnect_sends_request_and_closes() {
    let (connection, gateway) = connected(Behaviour::default()).await;
    connection.disconnect().await.expect("disconnect");

    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(!gateway.handle.is_connected());
    assert_eq!(
        gateway.count(|message| matches!(message, KnxNetIpMessage::DisconnectRequest { .. })),
        1
    );
    connection.disconnect().await.expect("second disconnect is a no-op");
    assert!(matches!(
        connection.ping().await,
        Err(ConnectionError::NotConnected)
    ));
}

#[tokio::test]
async fn keepalive_pings_periodically() {
    let (connection, handle) = connection_with(KnxConnectionConfig {
        keepalive_interval_secs: 1,
        ..test_config()
    });
    let gateway = MockGateway::spawn(handle, Behaviour::default());
    connection.connect().await.expect("connect");

    eventually(|| {
        gateway.count(|message| matches!(message, KnxNetIpMessage::ConnectionStateRequest { .. }))
            >= 1
    })
    .await;
    assert!(connection.is_connected());
}

#[tokio::test]
async fn failed_keepalive_stops_pinging() {
    let (connection, handle) = connection_with(KnxConnectionConfig {
        keepalive_interval_secs: 1,
        ..test_config()
    });
    let gateway = MockGateway::spawn(
        handle,
        Behaviour {
            ping_status: Status::InvalidConnectionId,
            ..Behaviour::default()
        },
    );
    connection.connect().await.expect("connect");

    tokio::time::sleep(Duration::from_millis(2600)).await;
    assert_eq!(
        gateway.count(|message| matches!(message, KnxNetIpMessage::ConnectionStateRequest { .. })),
        1
    );
    assert!(plc_telemetry::metrics().snapshot().keepalive_failures >= 1);
}
