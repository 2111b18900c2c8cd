//! COTP（ISO 8073）TPDU 与参数。

use super::message::S7Message;
use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{MalformedFrameError, SerializeError};
use crate::message::{Message, expect_consumed, read_optional, read_until_position};

const TPDU_DATA: u8 = 0xF0;
const TPDU_CONNECTION_REQUEST: u8 = 0xE0;
const TPDU_CONNECTION_RESPONSE: u8 = 0xD0;
const TPDU_DISCONNECT_REQUEST: u8 = 0x80;
const TPDU_DISCONNECT_RESPONSE: u8 = 0xC0;
const TPDU_ERROR: u8 = 0x70;

const PARAMETER_TPDU_SIZE: u8 = 0xC0;
const PARAMETER_CALLING_TSAP: u8 = 0xC1;
const PARAMETER_CALLED_TSAP: u8 = 0xC2;
const PARAMETER_CHECKSUM: u8 = 0xC4;
const PARAMETER_DISCONNECT_ADDITIONAL_INFORMATION: u8 = 0xE0;

/// COTP 参数，按参数类型判别；长度字节为隐式字段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CotpParameter {
    TpduSize(u8),
    CallingTsap(u16),
    CalledTsap(u16),
    Checksum(u8),
    DisconnectAdditionalInformation(Vec<u8>),
}

impl CotpParameter {
    fn value_length(&self) -> usize {
        match self {
            Self::TpduSize(_) | Self::Checksum(_) => 1,
            Self::CallingTsap(_) | Self::CalledTsap(_) => 2,
            Self::DisconnectAdditionalInformation(data) => data.len(),
        }
    }

    pub fn length_in_bytes(&self) -> usize {
        2 + self.value_length()
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let parameter_type = buf.read_u8("parameter_type", 8)?;
        let parameter_length = buf.read_u8("parameter_length", 8)? as usize;
        let start = buf.position();
        let parameter = match parameter_type {
            PARAMETER_TPDU_SIZE => Self::TpduSize(buf.read_u8("tpdu_size", 8)?),
            PARAMETER_CALLING_TSAP => Self::CallingTsap(buf.read_u16("tsap_id", 16)?),
            PARAMETER_CALLED_TSAP => Self::CalledTsap(buf.read_u16("tsap_id", 16)?),
            PARAMETER_CHECKSUM => Self::Checksum(buf.read_u8("crc", 8)?),
            PARAMETER_DISCONNECT_ADDITIONAL_INFORMATION => Self::DisconnectAdditionalInformation(
                buf.read_bytes("additional_information", parameter_length)?,
            ),
            other => {
                return Err(MalformedFrameError::UnknownVariant {
                    family: "CotpParameter",
                    discriminator: format!("{other:#04x}"),
                });
            }
        };
        expect_consumed(buf, "parameter_length", start, parameter_length)?;
        Ok(parameter)
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        let parameter_type = match self {
            Self::TpduSize(_) => PARAMETER_TPDU_SIZE,
            Self::CallingTsap(_) => PARAMETER_CALLING_TSAP,
            Self::CalledTsap(_) => PARAMETER_CALLED_TSAP,
            Self::Checksum(_) => PARAMETER_CHECKSUM,
            Self::DisconnectAdditionalInformation(_) => PARAMETER_DISCONNECT_ADDITIONAL_INFORMATION,
        };
        buf.write_u8("parameter_type", 8, parameter_type)?;
        buf.write_length("parameter_length", 8, self.value_length())?;
        match self {
            Self::TpduSize(size) => buf.write_u8("tpdu_size", 8, *size),
            Self::CallingTsap(id) | Self::CalledTsap(id) => buf.write_u16("tsap_id", 16, *id),
            Self::Checksum(crc) => buf.write_u8("crc", 8, *crc),
            Self::DisconnectAdditionalInformation(data) => {
                buf.write_bytes("additional_information", data)
            }
        }
    }
}

/// COTP TPDU 类型及其专有字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CotpTpdu {
    Data {
        eot: bool,
        tpdu_ref: u8,
    },
    ConnectionRequest {
        destination_reference: u16,
        source_reference: u16,
        protocol_class: u8,
    },
    ConnectionResponse {
        destination_reference: u16,
        source_reference: u16,
        protocol_class: u8,
    },
    DisconnectRequest {
        destination_reference: u16,
        source_reference: u16,
        protocol_class: u8,
    },
    DisconnectResponse {
        destination_reference: u16,
        source_reference: u16,
    },
    TpduError {
        destination_reference: u16,
        reject_cause: u8,
    },
}

impl CotpTpdu {
    fn code(&self) -> u8 {
        match self {
            Self::Data { .. } => TPDU_DATA,
            Self::ConnectionRequest { .. } => TPDU_CONNECTION_REQUEST,
            Self::ConnectionResponse { .. } => TPDU_CONNECTION_RESPONSE,
            Self::DisconnectRequest { .. } => TPDU_DISCONNECT_REQUEST,
            Self::DisconnectResponse { .. } => TPDU_DISCONNECT_RESPONSE,
            Self::TpduError { .. } => TPDU_ERROR,
        }
    }

    fn fields_length(&self) -> usize {
        match self {
            Self::Data { .. } => 1,
            Self::ConnectionRequest { .. }
            | Self::ConnectionResponse { .. }
            | Self::DisconnectRequest { .. } => 5,
            Self::DisconnectResponse { .. } => 4,
            Self::TpduError { .. } => 3,
        }
    }

    fn parse(buf: &mut ReadBuffer<'_>, code: u8) -> Result<Self, MalformedFrameError> {
        Ok(match code {
            TPDU_DATA => Self::Data {
                eot: buf.read_bit("eot")?,
                tpdu_ref: buf.read_u8("tpdu_ref", 7)?,
            },
            TPDU_CONNECTION_REQUEST => Self::ConnectionRequest {
                destination_reference: buf.read_u16("destination_reference", 16)?,
                source_reference: buf.read_u16("source_reference", 16)?,
                protocol_class: buf.read_u8("protocol_class", 8)?,
            },
            TPDU_CONNECTION_RESPONSE => Self::ConnectionResponse {
                destination_reference: buf.read_u16("destination_reference", 16)?,
                source_reference: buf.read_u16("source_reference", 16)?,
                protocol_class: buf.read_u8("protocol_class", 8)?,
            },
            TPDU_DISCONNECT_REQUEST => Self::DisconnectRequest {
                destination_reference: buf.read_u16("destination_reference", 16)?,
                source_reference: buf.read_u16("source_reference", 16)?,
                protocol_class: buf.read_u8("protocol_class", 8)?,
            },
            TPDU_DISCONNECT_RESPONSE => Self::DisconnectResponse {
                destination_reference: buf.read_u16("destination_reference", 16)?,
                source_reference: buf.read_u16("source_reference", 16)?,
            },
            TPDU_ERROR => Self::TpduError {
                destination_reference: buf.read_u16("destination_reference", 16)?,
                reject_cause: buf.read_u8("reject_cause", 8)?,
            },
            other => {
                return Err(MalformedFrameError::UnknownVariant {
                    family: "CotpPacket",
                    discriminator: format!("{other:#04x}"),
                });
            }
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        match *self {
            Self::Data { eot, tpdu_ref } => {
                buf.write_bit("eot", eot)?;
                buf.write_u8("tpdu_ref", 7, tpdu_ref)
            }
            Self::ConnectionRequest {
                destination_reference,
                source_reference,
                protocol_class,
            }
            | Self::ConnectionResponse {
                destination_reference,
                source_reference,
                protocol_class,
            }
            | Self::DisconnectRequest {
                destination_reference,
                source_reference,
                protocol_class,
            } => {
                buf.write_u16("destination_reference", 16, destination_reference)?;
                buf.write_u16("source_reference", 16, source_reference)?;
                buf.write_u8("protocol_class", 8, protocol_class)
            }
            Self::DisconnectResponse {
                destination_reference,
                source_reference,
            } => {
                buf.write_u16("destination_reference", 16, destination_reference)?;
                buf.write_u16("source_reference", 16, source_reference)
            }
            Self::TpduError {
                destination_reference,
                reject_cause,
            } => {
                buf.write_u16("destination_reference", 16, destination_reference)?;
                buf.write_u8("reject_cause", 8, reject_cause)
            }
        }
    }
}

/// COTP 报文：头部长度（隐式）+ TPDU + 参数（字节预算）+ 可选 S7 载荷。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CotpPacket {
    pub tpdu: CotpTpdu,
    pub parameters: Vec<CotpParameter>,
    pub payload: Option<S7Message>,
}

impl CotpPacket {
    fn header_length(&self) -> usize {
        1 + self.tpdu.fields_length()
            + self
                .parameters
                .iter()
                .map(CotpParameter::length_in_bytes)
                .sum::<usize>()
    }

    pub fn length_in_bytes(&self) -> usize {
        1 + self.header_length() + self.payload.as_ref().map_or(0, Message::length_in_bytes)
    }

    /// `end_position` 由外层 TPKT 长度减去已消费的头部得到。
    pub fn parse(buf: &mut ReadBuffer<'_>, end_position: usize) -> Result<Self, MalformedFrameError> {
        let header_length = buf.read_u8("cotp_header_length", 8)? as usize;
        let header_end = buf.position() + header_length;
        let code = buf.read_u8("tpdu_code", 8)?;
        let tpdu = CotpTpdu::parse(buf, code)?;
        let parameters = read_until_position(buf, "parameters", header_end, CotpParameter::parse)?;
        let has_payload = buf.position() < end_position;
        let payload = read_optional(buf, has_payload, S7Message::parse)?;
        Ok(Self {
            tpdu,
            parameters,
            payload,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_length("cotp_header_length", 8, self.header_length())?;
        buf.write_u8("tpdu_code", 8, self.tpdu.code())?;
        self.tpdu.serialize(buf)?;
        for parameter in &self.parameters {
            parameter.serialize(buf)?;
        }
        if let Some(payload) = &self.payload {
            payload.serialize(buf)?;
        }
        Ok(())
    }
}
