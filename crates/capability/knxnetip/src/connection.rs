//! KNXnet/IP 隧道连接状态机

use crate::frames::{
    group_request, group_value_response, status_response_code, tunneling_ack_status,
};
use crate::interceptor::TunnelInterceptor;
use crate::{
    ConnectionError, KnxConnectionConfig, KnxGroupAddress, ReadRequestBuilder,
    SubscriptionRequestBuilder, ValueCache, WriteRequestBuilder,
};
use domain::{ConnectionState, FieldResponse, ResponseCode};
use plc_codec::knxnetip::{
    ApduData, ConnectionRequestInformation, ConnectionResponseDataBlock, DibDeviceInfo,
    HostProtocolCode, Hpai, KnxAddress, KnxLayer, KnxNetIpMessage, ServiceFamily, Status,
};
use plc_config::{ConfigError, ConnectionString, DriverConfig};
use plc_dispatch::{DispatchError, MessageDispatcher};
use plc_telemetry::{new_connection_id, record_keepalive_failure};
use plc_transactions::{RequestTransaction, RequestTransactionManager, WorkerPool};
use plc_transport::{TransportInstance, UdpTransport};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SCHEME: &str = "knxnet-ip";
const UNSOLICITED_CAPACITY: usize = 64;

/// 握手得到的网关信息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMetadata {
    pub gateway_name: String,
    pub gateway_knx_address: KnxAddress,
    pub client_knx_address: KnxAddress,
    pub channel_id: u8,
    pub knx_medium: u8,
    pub project_installation_identifier: u16,
    pub serial_number: [u8; 6],
    pub multicast_address: [u8; 4],
    pub mac_address: [u8; 6],
    pub supported_services: Vec<ServiceFamily>,
}

impl ConnectionMetadata {
    fn from_handshake(
        device_info: &DibDeviceInfo,
        supported_services: Vec<ServiceFamily>,
        channel_id: u8,
        client_knx_address: KnxAddress,
    ) -> Self {
        Self {
            gateway_name: device_info.name(),
            gateway_knx_address: device_info.knx_address,
            client_knx_address,
            channel_id,
            knx_medium: device_info.knx_medium,
            project_installation_identifier: device_info.project_installation_identifier,
            serial_number: device_info.serial_number,
            multicast_address: device_info.multicast_address,
            mac_address: device_info.mac_address,
            supported_services,
        }
    }

    /// 以字符串形式导出的连接属性。
    pub fn attributes(&self) -> BTreeMap<&'static str, String> {
        let join = |bytes: &[u8], separator: &str, hex: bool| {
            bytes
                .iter()
                .map(|byte| if hex { format!("{byte:02x}") } else { byte.to_string() })
                .collect::<Vec<_>>()
                .join(separator)
        };
        BTreeMap::from([
            ("GatewayName", self.gateway_name.clone()),
            ("GatewayKnxAddress", self.gateway_knx_address.to_string()),
            ("ClientKnxAddress", self.client_knx_address.to_string()),
            ("ChannelId", self.channel_id.to_string()),
            ("KnxMedium", self.knx_medium.to_string()),
            (
                "ProjectInstallationIdentifier",
                self.project_installation_identifier.to_string(),
            ),
            ("DeviceSerialNumber", join(&self.serial_number, "", true)),
            ("DeviceMulticastAddress", join(&self.multicast_address, ".", false)),
            ("DeviceMacAddress", join(&self.mac_address, ":", true)),
            (
                "SupportedServices",
                self.supported_services
                    .iter()
                    .map(|family| format!("{family:?}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        ])
    }
}

#[derive(Debug, Clone)]
struct Session {
    channel_id: u8,
    local_endpoint: Hpai,
    metadata: ConnectionMetadata,
}

struct ConnectionInner {
    connection_id: String,
    config: KnxConnectionConfig,
    dispatcher: MessageDispatcher<KnxNetIpMessage>,
    transactions: RequestTransactionManager,
    cache: Arc<ValueCache>,
    state: RwLock<ConnectionState>,
    session: RwLock<Option<Session>>,
    sequence_counter: AtomicU8,
    lifecycle: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// KNXnet/IP 隧道连接。
///
/// 状态：`Disconnected → Connecting → Connected → Disconnecting → Disconnected`，
/// 握手失败经 `Failed` 回到 `Disconnected` 并把错误返回给调用方，不自动重试。
#[derive(Clone)]
pub struct KnxNetIpConnection {
    inner: Arc<ConnectionInner>,
}

impl KnxNetIpConnection {
    pub fn new(
        transport: Box<dyn TransportInstance>,
        config: KnxConnectionConfig,
        pool: Arc<WorkerPool>,
    ) -> Self {
        let dispatcher = MessageDispatcher::new(transport, config.dispatch_poll_interval());
        let transactions = RequestTransactionManager::new(config.max_concurrent_requests, pool);
        Self {
            inner: Arc::new(ConnectionInner {
                connection_id: new_connection_id(),
                config,
                dispatcher,
                transactions,
                cache: Arc::new(ValueCache::new()),
                state: RwLock::new(ConnectionState::Disconnected),
                session: RwLock::new(None),
                sequence_counter: AtomicU8::new(0),
                lifecycle: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 由连接字符串 `knxnet-ip://host[:port]` 创建 UDP 连接，端口缺省 3671。
    pub fn from_connection_string(
        connection: &ConnectionString,
        driver: &DriverConfig,
        pool: Arc<WorkerPool>,
    ) -> Result<Self, ConnectionError> {
        if connection.scheme != SCHEME {
            return Err(ConfigError::InvalidConnectionString(format!(
                "unsupported scheme {}",
                connection.scheme
            ))
            .into());
        }
        let transport = UdpTransport::from_connection_string(connection, driver.connect_timeout())?;
        Ok(Self::new(
            Box::new(transport),
            KnxConnectionConfig::from_driver_config(driver),
            pool,
        ))
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn config(&self) -> &KnxConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 以状态为准，不额外发送 ping。
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn metadata(&self) -> Option<ConnectionMetadata> {
        self.session().map(|session| session.metadata)
    }

    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.inner.cache
    }

    pub fn cached_value(&self, address: KnxGroupAddress) -> Option<Vec<u8>> {
        self.inner.cache.get(address.raw())
    }

    pub fn transactions(&self) -> &RequestTransactionManager {
        &self.inner.transactions
    }

    pub fn read_request_builder(&self) -> ReadRequestBuilder {
        ReadRequestBuilder::new(self.clone())
    }

    pub fn write_request_builder(&self) -> WriteRequestBuilder {
        WriteRequestBuilder::new(self.clone())
    }

    pub fn subscription_request_builder(&self) -> SubscriptionRequestBuilder {
        SubscriptionRequestBuilder::new(self.clone())
    }

    pub fn unsubscribe(&self, subscription_id: u64) -> bool {
        self.inner.cache.unsubscribe(subscription_id)
    }

    /// 握手：SearchRequest → SearchResponse → ConnectionRequest → ConnectionResponse。
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let current = self.state();
        if !current.can_connect() {
            return Err(ConnectionError::UnexpectedState(current));
        }
        self.set_state(ConnectionState::Connecting);
        info!(target: "plc.knxnetip", connection_id = %self.inner.connection_id, "knx_connecting");

        match self.handshake().await {
            Ok(session) => {
                let channel_id = session.channel_id;
                self.inner.dispatcher.set_interceptor(Arc::new(TunnelInterceptor::new(
                    channel_id,
                    self.inner.cache.clone(),
                )));
                self.inner.sequence_counter.store(0, Ordering::SeqCst);
                *self
                    .inner
                    .session
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(session);
                self.set_state(ConnectionState::Connected);
                self.spawn_background_tasks();
                info!(
                    target: "plc.knxnetip",
                    connection_id = %self.inner.connection_id,
                    channel_id,
                    "knx_connected"
                );
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::Failed);
                warn!(
                    target: "plc.knxnetip",
                    connection_id = %self.inner.connection_id,
                    "knx handshake failed: {}", err
                );
                if let Err(close_err) = self.inner.dispatcher.disconnect().await {
                    warn!(target: "plc.knxnetip", "error closing connection: {}", close_err);
                }
                self.set_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// ConnectionStateRequest / ConnectionStateResponse。
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        let session = self.session().ok_or(ConnectionError::NotConnected)?;
        let channel_id = session.channel_id;
        let request = KnxNetIpMessage::ConnectionStateRequest {
            channel_id,
            control_endpoint: session.local_endpoint,
        };
        let response = self
            .inner
            .dispatcher
            .request(
                &request,
                move |message| {
                    matches!(
                        message,
                        KnxNetIpMessage::ConnectionStateResponse { channel_id: id, .. } if *id == channel_id
                    )
                },
                self.inner.config.default_ttl(),
            )
            .await?;
        match response {
            KnxNetIpMessage::ConnectionStateResponse {
                status: Status::NoError,
                ..
            } => Ok(()),
            KnxNetIpMessage::ConnectionStateResponse { status, .. } => {
                Err(ConnectionError::PingRejected(status))
            }
            other => Err(unexpected_response("connection state", &other)),
        }
    }

    /// 停止保活，尽力发送 DisconnectRequest（不重试），关闭传输。
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        match self.state() {
            ConnectionState::Disconnected => return Ok(()),
            ConnectionState::Connected => {}
            other => return Err(ConnectionError::UnexpectedState(other)),
        }
        self.set_state(ConnectionState::Disconnecting);
        self.stop_background_tasks();

        if let Some(session) = self.session() {
            let channel_id = session.channel_id;
            let request = KnxNetIpMessage::DisconnectRequest {
                channel_id,
                control_endpoint: session.local_endpoint,
            };
            let sent = self
                .inner
                .dispatcher
                .request(
                    &request,
                    move |message| {
                        matches!(
                            message,
                            KnxNetIpMessage::DisconnectResponse { channel_id: id, .. } if *id == channel_id
                        )
                    },
                    self.inner.config.default_ttl(),
                )
                .await;
            if let Err(err) = sent {
                warn!(target: "plc.knxnetip", channel_id, "disconnect request failed: {}", err);
            }
        }

        let closed = self.inner.dispatcher.disconnect().await;
        self.inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.set_state(ConnectionState::Disconnected);
        info!(target: "plc.knxnetip", connection_id = %self.inner.connection_id, "knx_disconnected");
        closed.map_err(ConnectionError::from)
    }

    /// 读组地址：GroupValueRead → 等待同地址的 GroupValueResponse。
    pub(crate) fn submit_read(
        &self,
        name: String,
        address: KnxGroupAddress,
    ) -> RequestTransaction<FieldResponse> {
        let connection = self.clone();
        self.inner.transactions.submit(move || async move {
            Ok(connection.read_group_value(name, address).await)
        })
    }

    /// 写组地址：GroupValueWrite → 等待同序号的 TunnelingResponse。
    pub(crate) fn submit_write(
        &self,
        name: String,
        address: KnxGroupAddress,
        payload: Vec<u8>,
    ) -> RequestTransaction<FieldResponse> {
        let connection = self.clone();
        self.inner.transactions.submit(move || async move {
            Ok(connection.write_group_value(name, address, payload).await)
        })
    }

    pub(crate) fn subscription_capacity(&self) -> usize {
        self.inner.config.subscription_capacity
    }

    async fn read_group_value(&self, name: String, address: KnxGroupAddress) -> FieldResponse {
        let Some(session) = self.session() else {
            return FieldResponse::failed(name, ResponseCode::InternalError);
        };
        let channel_id = session.channel_id;
        let raw = address.raw();
        let request = group_request(
            channel_id,
            self.next_sequence_counter(),
            session.metadata.client_knx_address,
            address,
            ApduData::GroupValueRead,
        );
        let result = self
            .inner
            .dispatcher
            .request(
                &request,
                move |message| group_value_response(message, channel_id, raw).is_some(),
                self.inner.config.default_ttl(),
            )
            .await;
        match result {
            Ok(message) => match group_value_response(&message, channel_id, raw) {
                Some(payload) => FieldResponse::ok(name, Some(payload)),
                None => FieldResponse::failed(name, ResponseCode::InternalError),
            },
            Err(err) => failed_field(name, address, err),
        }
    }

    async fn write_group_value(
        &self,
        name: String,
        address: KnxGroupAddress,
        payload: Vec<u8>,
    ) -> FieldResponse {
        let Some(session) = self.session() else {
            return FieldResponse::failed(name, ResponseCode::InternalError);
        };
        let channel_id = session.channel_id;
        let sequence_counter = self.next_sequence_counter();
        let request = group_request(
            channel_id,
            sequence_counter,
            session.metadata.client_knx_address,
            address,
            ApduData::group_value_write(&payload),
        );
        let result = self
            .inner
            .dispatcher
            .request(
                &request,
                move |message| tunneling_ack_status(message, channel_id, sequence_counter).is_some(),
                self.inner.config.default_ttl(),
            )
            .await;
        match result {
            Ok(message) => match tunneling_ack_status(&message, channel_id, sequence_counter) {
                Some(Status::NoError) => FieldResponse::ok(name, None),
                Some(status) => {
                    warn!(target: "plc.knxnetip", %address, "write rejected: {}", status);
                    FieldResponse::failed(name, status_response_code(status))
                }
                None => FieldResponse::failed(name, ResponseCode::InternalError),
            },
            Err(err) => failed_field(name, address, err),
        }
    }

    async fn handshake(&self) -> Result<Session, ConnectionError> {
        let dispatcher = &self.inner.dispatcher;
        let ttl = self.inner.config.default_ttl();
        dispatcher.connect().await?;
        let local_endpoint = local_endpoint(dispatcher.local_address().await);

        let search = dispatcher
            .request(
                &KnxNetIpMessage::SearchRequest {
                    discovery_endpoint: local_endpoint,
                },
                |message| matches!(message, KnxNetIpMessage::SearchResponse { .. }),
                ttl,
            )
            .await?;
        let KnxNetIpMessage::SearchResponse {
            device_info,
            supported_services,
            ..
        } = search
        else {
            return Err(unexpected_response("search", &search));
        };
        if !supported_services.supports(ServiceFamily::Tunneling) {
            return Err(ConnectionError::TunnelingNotSupported);
        }
        debug!(target: "plc.knxnetip", gateway = %device_info.name(), "gateway_discovered");

        let response = dispatcher
            .request(
                &KnxNetIpMessage::ConnectionRequest {
                    control_endpoint: local_endpoint,
                    data_endpoint: local_endpoint,
                    information: ConnectionRequestInformation::Tunnel {
                        knx_layer: KnxLayer::LinkLayer,
                    },
                },
                |message| matches!(message, KnxNetIpMessage::ConnectionResponse { .. }),
                ttl,
            )
            .await?;
        let KnxNetIpMessage::ConnectionResponse {
            channel_id,
            status,
            data_block,
            ..
        } = response
        else {
            return Err(unexpected_response("connection", &response));
        };
        if status != Status::NoError {
            return Err(ConnectionError::HandshakeRejected(status));
        }
        let client_knx_address = match data_block {
            Some(ConnectionResponseDataBlock::Tunnel { knx_address }) => knx_address,
            _ => KnxAddress::default(),
        };
        let services = supported_services
            .service_ids
            .iter()
            .map(|service| service.family)
            .collect();

        Ok(Session {
            channel_id,
            local_endpoint,
            metadata: ConnectionMetadata::from_handshake(
                &device_info,
                services,
                channel_id,
                client_knx_address,
            ),
        })
    }

    fn spawn_background_tasks(&self) {
        let keepalive = self.spawn_keepalive();
        let unsolicited = self.spawn_unsolicited_drain();
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([keepalive, unsolicited]);
    }

    fn stop_background_tasks(&self) {
        let tasks: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }

    /// 周期 ping；失败只记录并停止，不重连。
    fn spawn_keepalive(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.keepalive_interval();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let connection = KnxNetIpConnection { inner };
                match connection.ping().await {
                    Ok(()) => debug!(target: "plc.knxnetip", "keepalive_ok"),
                    Err(err) => {
                        record_keepalive_failure();
                        warn!(
                            target: "plc.knxnetip",
                            connection_id = %connection.inner.connection_id,
                            "keep-alive failed, stopping keep-alive: {}", err
                        );
                        break;
                    }
                }
            }
        })
    }

    /// 未被期望认领的帧（例如网关对读请求的确认）在这里消费掉。
    fn spawn_unsolicited_drain(&self) -> JoinHandle<()> {
        let mut incoming = self
            .inner
            .dispatcher
            .default_incoming_messages(UNSOLICITED_CAPACITY);
        tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                match message {
                    KnxNetIpMessage::TunnelingResponse { header } => debug!(
                        target: "plc.knxnetip",
                        channel_id = header.channel_id,
                        sequence_counter = header.sequence_counter,
                        "unclaimed_tunneling_response"
                    ),
                    other => warn!(
                        target: "plc.knxnetip",
                        msg_type = other.msg_type(),
                        "unhandled frame"
                    ),
                }
            }
        })
    }

    fn session(&self) -> Option<Session> {
        self.inner
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn next_sequence_counter(&self) -> u8 {
        self.inner.sequence_counter.fetch_add(1, Ordering::SeqCst)
    }
}

fn local_endpoint(address: Option<SocketAddr>) -> Hpai {
    match address {
        Some(SocketAddr::V4(address)) => Hpai {
            host_protocol: HostProtocolCode::Ipv4Udp,
            ip_address: address.ip().octets(),
            port: address.port(),
        },
        _ => Hpai::unspecified(),
    }
}

fn unexpected_response(operation: &str, message: &KnxNetIpMessage) -> ConnectionError {
    ConnectionError::Dispatch(DispatchError::Handler(format!(
        "unexpected {operation} response type {:#06x}",
        message.msg_type()
    )))
}

fn failed_field(name: String, address: KnxGroupAddress, err: DispatchError) -> FieldResponse {
    if err.is_timeout() {
        debug!(target: "plc.knxnetip", %address, "request timed out");
        return FieldResponse::failed(name, ResponseCode::Timeout);
    }
    warn!(target: "plc.knxnetip", %address, "request failed: {}", err);
    FieldResponse::failed(name, ResponseCode::InternalError)
}
