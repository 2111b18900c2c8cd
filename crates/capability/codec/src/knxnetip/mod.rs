//! KNXnet/IP 报文族。
//!
//! 头部：`header_length(0x06) | protocol_version(0x10) | msg_type(u16) | total_length(u16)`，
//! `total_length` 为隐式字段，序列化时由内容长度重新计算。

mod cemi;
mod structures;

pub use cemi::{
    AdditionalInformation, Apdu, ApduControl, ApduData, Cemi, LDataFrame, LDataMessage, Priority,
};
pub use structures::{
    ConnectionRequestInformation, ConnectionResponseDataBlock, DibDeviceInfo, DibSuppSvcFamilies,
    HostProtocolCode, Hpai, KnxAddress, KnxLayer, ServiceFamily, ServiceId, Status,
    TunnelingRequestDataBlock, TunnelingResponseDataBlock,
};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{MalformedFrameError, SerializeError};
use crate::message::{FramedMessage, Message, expect_consumed, read_optional};

pub const HEADER_LENGTH: usize = 6;
pub const PROTOCOL_VERSION: u8 = 0x10;

const SEARCH_REQUEST: u16 = 0x0201;
const SEARCH_RESPONSE: u16 = 0x0202;
const CONNECTION_REQUEST: u16 = 0x0205;
const CONNECTION_RESPONSE: u16 = 0x0206;
const CONNECTION_STATE_REQUEST: u16 = 0x0207;
const CONNECTION_STATE_RESPONSE: u16 = 0x0208;
const DISCONNECT_REQUEST: u16 = 0x0209;
const DISCONNECT_RESPONSE: u16 = 0x020A;
const UNKNOWN_MESSAGE: u16 = 0x020B;
const TUNNELING_REQUEST: u16 = 0x0420;
const TUNNELING_RESPONSE: u16 = 0x0421;

/// KNXnet/IP 报文，按 `msg_type` 判别。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnxNetIpMessage {
    SearchRequest {
        discovery_endpoint: Hpai,
    },
    SearchResponse {
        control_endpoint: Hpai,
        device_info: DibDeviceInfo,
        supported_services: DibSuppSvcFamilies,
    },
    ConnectionRequest {
        control_endpoint: Hpai,
        data_endpoint: Hpai,
        information: ConnectionRequestInformation,
    },
    /// `status == NoError` 时才携带数据端点与 CRD。
    ConnectionResponse {
        channel_id: u8,
        status: Status,
        data_endpoint: Option<Hpai>,
        data_block: Option<ConnectionResponseDataBlock>,
    },
    ConnectionStateRequest {
        channel_id: u8,
        control_endpoint: Hpai,
    },
    ConnectionStateResponse {
        channel_id: u8,
        status: Status,
    },
    DisconnectRequest {
        channel_id: u8,
        control_endpoint: Hpai,
    },
    DisconnectResponse {
        channel_id: u8,
        status: Status,
    },
    UnknownMessage {
        data: Vec<u8>,
    },
    TunnelingRequest {
        header: TunnelingRequestDataBlock,
        cemi: Cemi,
    },
    TunnelingResponse {
        header: TunnelingResponseDataBlock,
    },
}

impl KnxNetIpMessage {
    pub fn msg_type(&self) -> u16 {
        match self {
            Self::SearchRequest { .. } => SEARCH_REQUEST,
            Self::SearchResponse { .. } => SEARCH_RESPONSE,
            Self::ConnectionRequest { .. } => CONNECTION_REQUEST,
            Self::ConnectionResponse { .. } => CONNECTION_RESPONSE,
            Self::ConnectionStateRequest { .. } => CONNECTION_STATE_REQUEST,
            Self::ConnectionStateResponse { .. } => CONNECTION_STATE_RESPONSE,
            Self::DisconnectRequest { .. } => DISCONNECT_REQUEST,
            Self::DisconnectResponse { .. } => DISCONNECT_RESPONSE,
            Self::UnknownMessage { .. } => UNKNOWN_MESSAGE,
            Self::TunnelingRequest { .. } => TUNNELING_REQUEST,
            Self::TunnelingResponse { .. } => TUNNELING_RESPONSE,
        }
    }

    fn body_length(&self) -> usize {
        match self {
            Self::SearchRequest { .. } => Hpai::LENGTH,
            Self::SearchResponse {
                supported_services,
                ..
            } => Hpai::LENGTH + DibDeviceInfo::LENGTH + supported_services.length_in_bytes(),
            Self::ConnectionRequest { information, .. } => {
                Hpai::LENGTH * 2 + information.length_in_bytes()
            }
            Self::ConnectionResponse {
                data_endpoint,
                data_block,
                ..
            } => {
                2 + data_endpoint.map_or(0, |_| Hpai::LENGTH)
                    + data_block.map_or(0, |block| block.length_in_bytes())
            }
            Self::ConnectionStateRequest { .. } | Self::DisconnectRequest { .. } => {
                2 + Hpai::LENGTH
            }
            Self::ConnectionStateResponse { .. } | Self::DisconnectResponse { .. } => 2,
            Self::UnknownMessage { data } => data.len(),
            Self::TunnelingRequest { cemi, .. } => {
                TunnelingRequestDataBlock::LENGTH + cemi.length_in_bytes()
            }
            Self::TunnelingResponse { .. } => TunnelingResponseDataBlock::LENGTH,
        }
    }
}

impl Message for KnxNetIpMessage {
    fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let start = buf.position();
        buf.read_const("header_length", 8, HEADER_LENGTH as u64)?;
        buf.read_const("protocol_version", 8, u64::from(PROTOCOL_VERSION))?;
        let msg_type = buf.read_u16("msg_type", 16)?;
        let total_length = buf.read_u16("total_length", 16)? as usize;
        let end = start + total_length;

        let message = match msg_type {
            SEARCH_REQUEST => Self::SearchRequest {
                discovery_endpoint: Hpai::parse(buf)?,
            },
            SEARCH_RESPONSE => Self::SearchResponse {
                control_endpoint: Hpai::parse(buf)?,
                device_info: DibDeviceInfo::parse(buf)?,
                supported_services: DibSuppSvcFamilies::parse(buf)?,
            },
            CONNECTION_REQUEST => Self::ConnectionRequest {
                control_endpoint: Hpai::parse(buf)?,
                data_endpoint: Hpai::parse(buf)?,
                information: ConnectionRequestInformation::parse(buf)?,
            },
            CONNECTION_RESPONSE => {
                let channel_id = buf.read_u8("channel_id", 8)?;
                let status = Status::parse(buf)?;
                let ok = status == Status::NoError;
                Self::ConnectionResponse {
                    channel_id,
                    status,
                    data_endpoint: read_optional(buf, ok, Hpai::parse)?,
                    data_block: read_optional(buf, ok, ConnectionResponseDataBlock::parse)?,
                }
            }
            CONNECTION_STATE_REQUEST | DISCONNECT_REQUEST => {
                let channel_id = buf.read_u8("channel_id", 8)?;
                buf.read_const("reserved", 8, 0)?;
                let control_endpoint = Hpai::parse(buf)?;
                if msg_type == CONNECTION_STATE_REQUEST {
                    Self::ConnectionStateRequest {
                        channel_id,
                        control_endpoint,
                    }
                } else {
                    Self::DisconnectRequest {
                        channel_id,
                        control_endpoint,
                    }
                }
            }
            CONNECTION_STATE_RESPONSE => Self::ConnectionStateResponse {
                channel_id: buf.read_u8("channel_id", 8)?,
                status: Status::parse(buf)?,
            },
            DISCONNECT_RESPONSE => Self::DisconnectResponse {
                channel_id: buf.read_u8("channel_id", 8)?,
                status: Status::parse(buf)?,
            },
            UNKNOWN_MESSAGE => {
                let length = end.saturating_sub(buf.position());
                Self::UnknownMessage {
                    data: buf.read_bytes("unknown_data", length)?,
                }
            }
            TUNNELING_REQUEST => Self::TunnelingRequest {
                header: TunnelingRequestDataBlock::parse(buf)?,
                cemi: Cemi::parse(buf)?,
            },
            TUNNELING_RESPONSE => Self::TunnelingResponse {
                header: TunnelingResponseDataBlock::parse(buf)?,
            },
            other => {
                return Err(MalformedFrameError::UnknownVariant {
                    family: "KnxNetIpMessage",
                    discriminator: format!("{other:#06x}"),
                });
            }
        };
        expect_consumed(buf, "total_length", start, total_length)?;
        Ok(message)
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("header_length", 8, HEADER_LENGTH as u8)?;
        buf.write_u8("protocol_version", 8, PROTOCOL_VERSION)?;
        buf.write_u16("msg_type", 16, self.msg_type())?;
        buf.write_length("total_length", 16, self.length_in_bytes())?;

        match self {
            Self::SearchRequest { discovery_endpoint } => discovery_endpoint.serialize(buf),
            Self::SearchResponse {
                control_endpoint,
                device_info,
                supported_services,
            } => {
                control_endpoint.serialize(buf)?;
                device_info.serialize(buf)?;
                supported_services.serialize(buf)
            }
            Self::ConnectionRequest {
                control_endpoint,
                data_endpoint,
                information,
            } => {
                control_endpoint.serialize(buf)?;
                data_endpoint.serialize(buf)?;
                information.serialize(buf)
            }
            Self::ConnectionResponse {
                channel_id,
                status,
                data_endpoint,
                data_block,
            } => {
                buf.write_u8("channel_id", 8, *channel_id)?;
                status.serialize(buf)?;
                if let Some(endpoint) = data_endpoint {
                    endpoint.serialize(buf)?;
                }
                if let Some(block) = data_block {
                    block.serialize(buf)?;
                }
                Ok(())
            }
            Self::ConnectionStateRequest {
                channel_id,
                control_endpoint,
            }
            | Self::DisconnectRequest {
                channel_id,
                control_endpoint,
            } => {
                buf.write_u8("channel_id", 8, *channel_id)?;
                buf.write_u8("reserved", 8, 0)?;
                control_endpoint.serialize(buf)
            }
            Self::ConnectionStateResponse { channel_id, status }
            | Self::DisconnectResponse { channel_id, status } => {
                buf.write_u8("channel_id", 8, *channel_id)?;
                status.serialize(buf)
            }
            Self::UnknownMessage { data } => buf.write_bytes("unknown_data", data),
            Self::TunnelingRequest { header, cemi } => {
                header.serialize(buf)?;
                cemi.serialize(buf)
            }
            Self::TunnelingResponse { header } => header.serialize(buf),
        }
    }

    fn length_in_bytes(&self) -> usize {
        HEADER_LENGTH + self.body_length()
    }
}

impl FramedMessage for KnxNetIpMessage {
    const HEADER_SIZE: usize = HEADER_LENGTH;

    fn frame_length(header: &[u8]) -> Result<usize, MalformedFrameError> {
        let mut buf = ReadBuffer::new(header);
        buf.read_const("header_length", 8, HEADER_LENGTH as u64)?;
        buf.read_const("protocol_version", 8, u64::from(PROTOCOL_VERSION))?;
        buf.read_u16("msg_type", 16)?;
        let total_length = buf.read_u16("total_length", 16)? as usize;
        if total_length < HEADER_LENGTH {
            return Err(MalformedFrameError::LengthMismatch {
                field: "total_length",
                declared: total_length,
                consumed: HEADER_LENGTH,
            });
        }
        Ok(total_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_length_reads_total_length() {
        let header = [0x06, 0x10, 0x02, 0x07, 0x00, 0x10];
        assert_eq!(KnxNetIpMessage::frame_length(&header).expect("length"), 16);
    }

    #[test]
    fn frame_length_rejects_foreign_header() {
        let header = [0x03, 0x00, 0x00, 0x16, 0x11, 0xE0];
        assert!(matches!(
            KnxNetIpMessage::frame_length(&header),
            Err(MalformedFrameError::ConstMismatch {
                field: "header_length",
                ..
            })
        ));
    }

    #[test]
    fn unknown_msg_type_is_unknown_variant() {
        let bytes = [0x06, 0x10, 0x05, 0x30, 0x00, 0x06];
        let err = KnxNetIpMessage::from_bytes(&bytes).expect_err("unknown");
        assert!(matches!(err, MalformedFrameError::UnknownVariant { .. }));
    }
}
