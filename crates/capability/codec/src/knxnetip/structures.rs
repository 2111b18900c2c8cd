//! KNXnet/IP 公共结构：HPAI、DIB、CRI/CRD、状态码。

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{MalformedFrameError, SerializeError};
use crate::message::{expect_consumed, read_until_position};
use std::fmt;

wire_enum! {
    /// 主机协议。
    pub enum HostProtocolCode: "host_protocol_code" {
        Ipv4Udp = 0x01,
        Ipv4Tcp = 0x02,
    }
}

wire_enum! {
    /// 服务族标识。
    pub enum ServiceFamily: "service_type" {
        Core = 0x02,
        DeviceManagement = 0x03,
        Tunneling = 0x04,
        Routing = 0x05,
        RemoteLogging = 0x06,
        RemoteConfigurationAndDiagnosis = 0x07,
        ObjectServer = 0x08,
    }
}

wire_enum! {
    /// 隧道层级。
    pub enum KnxLayer: "knx_layer" {
        LinkLayer = 0x02,
        RawLayer = 0x04,
        BusmonitorLayer = 0x80,
    }
}

wire_enum! {
    /// 响应状态码。
    pub enum Status: "status" {
        NoError = 0x00,
        ProtocolTypeNotSupported = 0x01,
        UnsupportedProtocolVersion = 0x02,
        OutOfOrderSequenceNumber = 0x04,
        InvalidConnectionId = 0x21,
        ConnectionTypeNotSupported = 0x22,
        ConnectionOptionNotSupported = 0x23,
        NoMoreConnections = 0x24,
        NoMoreUniqueConnections = 0x25,
        DataConnection = 0x26,
        KnxConnection = 0x27,
        TunnellingLayerNotSupported = 0x29,
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#04x})", self, self.value())
    }
}

/// 个体地址 `area.line.device`（4/4/8 位）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KnxAddress {
    pub main_group: u8,
    pub middle_group: u8,
    pub sub_group: u8,
}

impl KnxAddress {
    pub const LENGTH: usize = 2;

    pub fn new(main_group: u8, middle_group: u8, sub_group: u8) -> Self {
        Self {
            main_group,
            middle_group,
            sub_group,
        }
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        Ok(Self {
            main_group: buf.read_u8("main_group", 4)?,
            middle_group: buf.read_u8("middle_group", 4)?,
            sub_group: buf.read_u8("sub_group", 8)?,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("main_group", 4, self.main_group)?;
        buf.write_u8("middle_group", 4, self.middle_group)?;
        buf.write_u8("sub_group", 8, self.sub_group)
    }
}

impl fmt::Display for KnxAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.main_group, self.middle_group, self.sub_group)
    }
}

/// Host Protocol Address Information。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hpai {
    pub host_protocol: HostProtocolCode,
    pub ip_address: [u8; 4],
    pub port: u16,
}

impl Hpai {
    pub const LENGTH: usize = 8;

    /// NAT 模式下的 0.0.0.0:0 端点。
    pub fn unspecified() -> Self {
        Self {
            host_protocol: HostProtocolCode::Ipv4Udp,
            ip_address: [0; 4],
            port: 0,
        }
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        buf.read_const("hpai_structure_length", 8, Self::LENGTH as u64)?;
        Ok(Self {
            host_protocol: HostProtocolCode::parse(buf)?,
            ip_address: buf.read_byte_array("ip_address")?,
            port: buf.read_u16("port", 16)?,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("hpai_structure_length", 8, Self::LENGTH as u8)?;
        self.host_protocol.serialize(buf)?;
        buf.write_bytes("ip_address", &self.ip_address)?;
        buf.write_u16("port", 16, self.port)
    }
}

/// 设备信息 DIB（定长 54 字节）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DibDeviceInfo {
    pub knx_medium: u8,
    pub programming_mode: bool,
    pub knx_address: KnxAddress,
    pub project_installation_identifier: u16,
    pub serial_number: [u8; 6],
    pub multicast_address: [u8; 4],
    pub mac_address: [u8; 6],
    pub friendly_name: [u8; 30],
}

impl DibDeviceInfo {
    pub const LENGTH: usize = 54;
    const DESCRIPTION_TYPE: u8 = 0x01;

    /// 设备名（去掉尾部 NUL）。
    pub fn name(&self) -> String {
        let end = self
            .friendly_name
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(self.friendly_name.len());
        String::from_utf8_lossy(&self.friendly_name[..end]).into_owned()
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        buf.read_const("dib_structure_length", 8, Self::LENGTH as u64)?;
        buf.read_const("description_type", 8, u64::from(Self::DESCRIPTION_TYPE))?;
        let knx_medium = buf.read_u8("knx_medium", 8)?;
        buf.read_const("device_status_reserved", 7, 0)?;
        let programming_mode = buf.read_bit("programming_mode")?;
        Ok(Self {
            knx_medium,
            programming_mode,
            knx_address: KnxAddress::parse(buf)?,
            project_installation_identifier: buf.read_u16("project_installation_identifier", 16)?,
            serial_number: buf.read_byte_array("serial_number")?,
            multicast_address: buf.read_byte_array("multicast_address")?,
            mac_address: buf.read_byte_array("mac_address")?,
            friendly_name: buf.read_byte_array("friendly_name")?,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("dib_structure_length", 8, Self::LENGTH as u8)?;
        buf.write_u8("description_type", 8, Self::DESCRIPTION_TYPE)?;
        buf.write_u8("knx_medium", 8, self.knx_medium)?;
        buf.write_u8("device_status_reserved", 7, 0)?;
        buf.write_bit("programming_mode", self.programming_mode)?;
        self.knx_address.serialize(buf)?;
        buf.write_u16(
            "project_installation_identifier",
            16,
            self.project_installation_identifier,
        )?;
        buf.write_bytes("serial_number", &self.serial_number)?;
        buf.write_bytes("multicast_address", &self.multicast_address)?;
        buf.write_bytes("mac_address", &self.mac_address)?;
        buf.write_bytes("friendly_name", &self.friendly_name)
    }
}

/// 服务族及其版本。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceId {
    pub family: ServiceFamily,
    pub version: u8,
}

impl ServiceId {
    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        Ok(Self {
            family: ServiceFamily::parse(buf)?,
            version: buf.read_u8("service_version", 8)?,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        self.family.serialize(buf)?;
        buf.write_u8("service_version", 8, self.version)
    }
}

/// 支持的服务族 DIB，元素数由结构长度决定。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DibSuppSvcFamilies {
    pub service_ids: Vec<ServiceId>,
}

impl DibSuppSvcFamilies {
    const DESCRIPTION_TYPE: u8 = 0x02;

    pub fn supports(&self, family: ServiceFamily) -> bool {
        self.service_ids.iter().any(|id| id.family == family)
    }

    pub fn length_in_bytes(&self) -> usize {
        2 + self.service_ids.len() * 2
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let start = buf.position();
        let structure_length = buf.read_u8("dib_structure_length", 8)? as usize;
        buf.read_const("description_type", 8, u64::from(Self::DESCRIPTION_TYPE))?;
        let service_ids = read_until_position(
            buf,
            "service_ids",
            start + structure_length,
            ServiceId::parse,
        )?;
        Ok(Self { service_ids })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_length("dib_structure_length", 8, self.length_in_bytes())?;
        buf.write_u8("description_type", 8, Self::DESCRIPTION_TYPE)?;
        for id in &self.service_ids {
            id.serialize(buf)?;
        }
        Ok(())
    }
}

const CONNECTION_TYPE_DEVICE_MANAGEMENT: u8 = 0x03;
const CONNECTION_TYPE_TUNNEL: u8 = 0x04;

/// 连接请求信息（按连接类型判别）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRequestInformation {
    DeviceManagement,
    Tunnel { knx_layer: KnxLayer },
}

impl ConnectionRequestInformation {
    pub fn length_in_bytes(&self) -> usize {
        match self {
            Self::DeviceManagement => 2,
            Self::Tunnel { .. } => 4,
        }
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let start = buf.position();
        let structure_length = buf.read_u8("cri_structure_length", 8)? as usize;
        let connection_type = buf.read_u8("connection_type", 8)?;
        let cri = match connection_type {
            CONNECTION_TYPE_DEVICE_MANAGEMENT => Self::DeviceManagement,
            CONNECTION_TYPE_TUNNEL => {
                let knx_layer = KnxLayer::parse(buf)?;
                buf.read_const("cri_reserved", 8, 0)?;
                Self::Tunnel { knx_layer }
            }
            other => {
                return Err(MalformedFrameError::UnknownVariant {
                    family: "ConnectionRequestInformation",
                    discriminator: format!("{other:#04x}"),
                });
            }
        };
        expect_consumed(buf, "cri_structure_length", start, structure_length)?;
        Ok(cri)
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_length("cri_structure_length", 8, self.length_in_bytes())?;
        match self {
            Self::DeviceManagement => {
                buf.write_u8("connection_type", 8, CONNECTION_TYPE_DEVICE_MANAGEMENT)
            }
            Self::Tunnel { knx_layer } => {
                buf.write_u8("connection_type", 8, CONNECTION_TYPE_TUNNEL)?;
                knx_layer.serialize(buf)?;
                buf.write_u8("cri_reserved", 8, 0)
            }
        }
    }
}

/// 连接响应数据块（按连接类型判别）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionResponseDataBlock {
    DeviceManagement,
    Tunnel { knx_address: KnxAddress },
}

impl ConnectionResponseDataBlock {
    pub fn length_in_bytes(&self) -> usize {
        match self {
            Self::DeviceManagement => 2,
            Self::Tunnel { .. } => 4,
        }
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let start = buf.position();
        let structure_length = buf.read_u8("crd_structure_length", 8)? as usize;
        let connection_type = buf.read_u8("connection_type", 8)?;
        let crd = match connection_type {
            CONNECTION_TYPE_DEVICE_MANAGEMENT => Self::DeviceManagement,
            CONNECTION_TYPE_TUNNEL => Self::Tunnel {
                knx_address: KnxAddress::parse(buf)?,
            },
            other => {
                return Err(MalformedFrameError::UnknownVariant {
                    family: "ConnectionResponseDataBlock",
                    discriminator: format!("{other:#04x}"),
                });
            }
        };
        expect_consumed(buf, "crd_structure_length", start, structure_length)?;
        Ok(crd)
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_length("crd_structure_length", 8, self.length_in_bytes())?;
        match self {
            Self::DeviceManagement => {
                buf.write_u8("connection_type", 8, CONNECTION_TYPE_DEVICE_MANAGEMENT)
            }
            Self::Tunnel { knx_address } => {
                buf.write_u8("connection_type", 8, CONNECTION_TYPE_TUNNEL)?;
                knx_address.serialize(buf)
            }
        }
    }
}

/// 隧道请求数据块。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelingRequestDataBlock {
    pub channel_id: u8,
    pub sequence_counter: u8,
}

impl TunnelingRequestDataBlock {
    pub const LENGTH: usize = 4;

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        buf.read_const("tunnel_structure_length", 8, Self::LENGTH as u64)?;
        let channel_id = buf.read_u8("channel_id", 8)?;
        let sequence_counter = buf.read_u8("sequence_counter", 8)?;
        buf.read_const("tunnel_reserved", 8, 0)?;
        Ok(Self {
            channel_id,
            sequence_counter,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("tunnel_structure_length", 8, Self::LENGTH as u8)?;
        buf.write_u8("channel_id", 8, self.channel_id)?;
        buf.write_u8("sequence_counter", 8, self.sequence_counter)?;
        buf.write_u8("tunnel_reserved", 8, 0)
    }
}

/// 隧道应答数据块。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelingResponseDataBlock {
    pub channel_id: u8,
    pub sequence_counter: u8,
    pub status: Status,
}

impl TunnelingResponseDataBlock {
    pub const LENGTH: usize = 4;

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        buf.read_const("tunnel_structure_length", 8, Self::LENGTH as u64)?;
        Ok(Self {
            channel_id: buf.read_u8("channel_id", 8)?,
            sequence_counter: buf.read_u8("sequence_counter", 8)?,
            status: Status::parse(buf)?,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("tunnel_structure_length", 8, Self::LENGTH as u8)?;
        buf.write_u8("channel_id", 8, self.channel_id)?;
        buf.write_u8("sequence_counter", 8, self.sequence_counter)?;
        self.status.serialize(buf)
    }
}
