//! cEMI 帧：L_Data 请求/指示/确认，位压缩控制字段与 APDU。

use super::structures::KnxAddress;
use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{MalformedFrameError, SerializeError};
use crate::message::read_until_position;

const MESSAGE_CODE_L_DATA_REQ: u8 = 0x11;
const MESSAGE_CODE_L_DATA_IND: u8 = 0x29;
const MESSAGE_CODE_L_DATA_CON: u8 = 0x2E;

/// cEMI 报文，按 message code 判别。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cemi {
    LDataReq(LDataMessage),
    LDataInd(LDataMessage),
    LDataCon(LDataMessage),
}

impl Cemi {
    pub fn l_data(&self) -> &LDataMessage {
        match self {
            Self::LDataReq(message) | Self::LDataInd(message) | Self::LDataCon(message) => message,
        }
    }

    pub fn length_in_bytes(&self) -> usize {
        1 + self.l_data().length_in_bytes()
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let message_code = buf.read_u8("message_code", 8)?;
        match message_code {
            MESSAGE_CODE_L_DATA_REQ => Ok(Self::LDataReq(LDataMessage::parse(buf)?)),
            MESSAGE_CODE_L_DATA_IND => Ok(Self::LDataInd(LDataMessage::parse(buf)?)),
            MESSAGE_CODE_L_DATA_CON => Ok(Self::LDataCon(LDataMessage::parse(buf)?)),
            other => Err(MalformedFrameError::UnknownVariant {
                family: "Cemi",
                discriminator: format!("{other:#04x}"),
            }),
        }
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        let code = match self {
            Self::LDataReq(_) => MESSAGE_CODE_L_DATA_REQ,
            Self::LDataInd(_) => MESSAGE_CODE_L_DATA_IND,
            Self::LDataCon(_) => MESSAGE_CODE_L_DATA_CON,
        };
        buf.write_u8("message_code", 8, code)?;
        self.l_data().serialize(buf)
    }
}

/// 附加信息项，数据长度为显式计数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditionalInformation {
    pub type_id: u8,
    pub data: Vec<u8>,
}

impl AdditionalInformation {
    pub fn length_in_bytes(&self) -> usize {
        2 + self.data.len()
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let type_id = buf.read_u8("additional_information_type", 8)?;
        let length = buf.read_u8("additional_information_length", 8)? as usize;
        Ok(Self {
            type_id,
            data: buf.read_bytes("additional_information_data", length)?,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("additional_information_type", 8, self.type_id)?;
        buf.write_length("additional_information_length", 8, self.data.len())?;
        buf.write_bytes("additional_information_data", &self.data)
    }
}

/// L_Data 报文体：附加信息（字节预算）+ 数据帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LDataMessage {
    pub additional_information: Vec<AdditionalInformation>,
    pub frame: LDataFrame,
}

impl LDataMessage {
    pub fn new(frame: LDataFrame) -> Self {
        Self {
            additional_information: Vec::new(),
            frame,
        }
    }

    fn additional_information_length(&self) -> usize {
        self.additional_information
            .iter()
            .map(AdditionalInformation::length_in_bytes)
            .sum()
    }

    pub fn length_in_bytes(&self) -> usize {
        1 + self.additional_information_length() + self.frame.length_in_bytes()
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let length = buf.read_u8("additional_information_length", 8)? as usize;
        let end = buf.position() + length;
        let additional_information = read_until_position(
            buf,
            "additional_information",
            end,
            AdditionalInformation::parse,
        )?;
        Ok(Self {
            additional_information,
            frame: LDataFrame::parse(buf)?,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_length(
            "additional_information_length",
            8,
            self.additional_information_length(),
        )?;
        for info in &self.additional_information {
            info.serialize(buf)?;
        }
        self.frame.serialize(buf)
    }
}

/// 帧优先级（2 位）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    System,
    Normal,
    Urgent,
    Low,
}

impl Priority {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::System,
            1 => Self::Normal,
            2 => Self::Urgent,
            _ => Self::Low,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::System => 0,
            Self::Normal => 1,
            Self::Urgent => 2,
            Self::Low => 3,
        }
    }
}

/// 标准 L_Data 帧。两个控制字节按位展开；`data_length` 为隐式字段（APDU 长度减一）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LDataFrame {
    pub standard_frame: bool,
    pub do_not_repeat: bool,
    pub broadcast: bool,
    pub priority: Priority,
    pub acknowledge_requested: bool,
    pub error_flag: bool,
    pub group_address: bool,
    pub hop_count: u8,
    pub extended_frame_format: u8,
    pub source: KnxAddress,
    pub destination: [u8; 2],
    pub apdu: Apdu,
}

impl LDataFrame {
    /// 发往组地址的标准帧（低优先级，跳数 6）。
    pub fn group(source: KnxAddress, destination: [u8; 2], apdu: Apdu) -> Self {
        Self {
            standard_frame: true,
            do_not_repeat: true,
            broadcast: true,
            priority: Priority::Low,
            acknowledge_requested: false,
            error_flag: false,
            group_address: true,
            hop_count: 6,
            extended_frame_format: 0,
            source,
            destination,
            apdu,
        }
    }

    pub fn destination_u16(&self) -> u16 {
        u16::from_be_bytes(self.destination)
    }

    pub fn length_in_bytes(&self) -> usize {
        2 + KnxAddress::LENGTH + 2 + 1 + self.apdu.length_in_bytes()
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let standard_frame = buf.read_bit("frame_type")?;
        buf.read_const("control_reserved", 1, 0)?;
        let do_not_repeat = buf.read_bit("repeated")?;
        let broadcast = buf.read_bit("broadcast")?;
        let priority = Priority::from_bits(buf.read_u8("priority", 2)?);
        let acknowledge_requested = buf.read_bit("acknowledge_requested")?;
        let error_flag = buf.read_bit("error_flag")?;
        let group_address = buf.read_bit("group_address")?;
        let hop_count = buf.read_u8("hop_count", 3)?;
        let extended_frame_format = buf.read_u8("extended_frame_format", 4)?;
        let source = KnxAddress::parse(buf)?;
        let destination = buf.read_byte_array("destination_address")?;
        let data_length = buf.read_u8("data_length", 8)?;
        let apdu = Apdu::parse(buf, data_length)?;
        Ok(Self {
            standard_frame,
            do_not_repeat,
            broadcast,
            priority,
            acknowledge_requested,
            error_flag,
            group_address,
            hop_count,
            extended_frame_format,
            source,
            destination,
            apdu,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_bit("frame_type", self.standard_frame)?;
        buf.write_u8("control_reserved", 1, 0)?;
        buf.write_bit("repeated", self.do_not_repeat)?;
        buf.write_bit("broadcast", self.broadcast)?;
        buf.write_u8("priority", 2, self.priority.bits())?;
        buf.write_bit("acknowledge_requested", self.acknowledge_requested)?;
        buf.write_bit("error_flag", self.error_flag)?;
        buf.write_bit("group_address", self.group_address)?;
        buf.write_u8("hop_count", 3, self.hop_count)?;
        buf.write_u8("extended_frame_format", 4, self.extended_frame_format)?;
        self.source.serialize(buf)?;
        buf.write_bytes("destination_address", &self.destination)?;
        buf.write_length("data_length", 8, self.apdu.length_in_bytes() - 1)?;
        self.apdu.serialize(buf)
    }
}

/// 传输层控制类型（2 位）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApduControl {
    Connect,
    Disconnect,
    Ack,
    Nack,
}

impl ApduControl {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Connect,
            1 => Self::Disconnect,
            2 => Self::Ack,
            _ => Self::Nack,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Connect => 0,
            Self::Disconnect => 1,
            Self::Ack => 2,
            Self::Nack => 3,
        }
    }
}

/// APDU：控制位判别控制帧与数据帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apdu {
    Control {
        numbered: bool,
        counter: u8,
        control: ApduControl,
    },
    Data {
        numbered: bool,
        counter: u8,
        data: ApduData,
    },
}

impl Apdu {
    /// 非编号数据帧。
    pub fn data(data: ApduData) -> Self {
        Self::Data {
            numbered: false,
            counter: 0,
            data,
        }
    }

    pub fn length_in_bytes(&self) -> usize {
        match self {
            Self::Control { .. } => 1,
            Self::Data { data, .. } => 1 + data.length_in_bytes(),
        }
    }

    /// `data_length` 为 L_Data 帧中的长度字段（APDU 字节数减一）。
    pub fn parse(buf: &mut ReadBuffer<'_>, data_length: u8) -> Result<Self, MalformedFrameError> {
        let control = buf.read_bit("control")?;
        let numbered = buf.read_bit("numbered")?;
        let counter = buf.read_u8("counter", 4)?;
        if control {
            let control = ApduControl::from_bits(buf.read_u8("control_type", 2)?);
            if data_length != 0 {
                return Err(MalformedFrameError::LengthMismatch {
                    field: "data_length",
                    declared: data_length as usize,
                    consumed: 0,
                });
            }
            return Ok(Self::Control {
                numbered,
                counter,
                control,
            });
        }
        Ok(Self::Data {
            numbered,
            counter,
            data: ApduData::parse(buf, data_length)?,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        match self {
            Self::Control {
                numbered,
                counter,
                control,
            } => {
                buf.write_bit("control", true)?;
                buf.write_bit("numbered", *numbered)?;
                buf.write_u8("counter", 4, *counter)?;
                buf.write_u8("control_type", 2, control.bits())
            }
            Self::Data {
                numbered,
                counter,
                data,
            } => {
                buf.write_bit("control", false)?;
                buf.write_bit("numbered", *numbered)?;
                buf.write_u8("counter", 4, *counter)?;
                data.serialize(buf)
            }
        }
    }
}

const APCI_GROUP_VALUE_READ: u8 = 0x0;
const APCI_GROUP_VALUE_RESPONSE: u8 = 0x1;
const APCI_GROUP_VALUE_WRITE: u8 = 0x2;

/// 数据 APDU，按 4 位 APCI 判别。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApduData {
    GroupValueRead,
    GroupValueResponse { data_first_byte: u8, data: Vec<u8> },
    GroupValueWrite { data_first_byte: u8, data: Vec<u8> },
    Other { apci: u8, data_first_byte: u8, data: Vec<u8> },
}

impl ApduData {
    /// 不超过 6 位的单字节值放入首字节，其余放入数据区。
    fn split_payload(payload: &[u8]) -> (u8, Vec<u8>) {
        match payload {
            [value] if *value < 0x40 => (*value, Vec::new()),
            _ => (0, payload.to_vec()),
        }
    }

    /// 组写数据。空值编码为 6 位值 0，解码后 `payload()` 为 `[0]`。
    pub fn group_value_write(payload: &[u8]) -> Self {
        let (data_first_byte, data) = Self::split_payload(payload);
        Self::GroupValueWrite {
            data_first_byte,
            data,
        }
    }

    /// 组读应答数据，空值的编码同 [`ApduData::group_value_write`]。
    pub fn group_value_response(payload: &[u8]) -> Self {
        let (data_first_byte, data) = Self::split_payload(payload);
        Self::GroupValueResponse {
            data_first_byte,
            data,
        }
    }

    /// 写入/应答携带的值字节。
    pub fn payload(&self) -> Option<Vec<u8>> {
        match self {
            Self::GroupValueResponse {
                data_first_byte,
                data,
            }
            | Self::GroupValueWrite {
                data_first_byte,
                data,
            } => Some(if data.is_empty() {
                vec![*data_first_byte]
            } else {
                data.clone()
            }),
            _ => None,
        }
    }

    pub fn length_in_bytes(&self) -> usize {
        match self {
            Self::GroupValueRead => 1,
            Self::GroupValueResponse { data, .. }
            | Self::GroupValueWrite { data, .. }
            | Self::Other { data, .. } => 1 + data.len(),
        }
    }

    fn parse(buf: &mut ReadBuffer<'_>, data_length: u8) -> Result<Self, MalformedFrameError> {
        if data_length == 0 {
            return Err(MalformedFrameError::LengthMismatch {
                field: "data_length",
                declared: 0,
                consumed: 1,
            });
        }
        let apci = buf.read_u8("apci", 4)?;
        let data_first_byte = buf.read_u8("data_first_byte", 6)?;
        let data = buf.read_bytes("data", data_length as usize - 1)?;
        Ok(match apci {
            APCI_GROUP_VALUE_READ => {
                if data_first_byte != 0 {
                    return Err(MalformedFrameError::ConstMismatch {
                        field: "data_first_byte",
                        expected: 0,
                        actual: u64::from(data_first_byte),
                    });
                }
                if !data.is_empty() {
                    return Err(MalformedFrameError::LengthMismatch {
                        field: "data_length",
                        declared: data_length as usize,
                        consumed: 1,
                    });
                }
                Self::GroupValueRead
            }
            APCI_GROUP_VALUE_RESPONSE => Self::GroupValueResponse {
                data_first_byte,
                data,
            },
            APCI_GROUP_VALUE_WRITE => Self::GroupValueWrite {
                data_first_byte,
                data,
            },
            apci => Self::Other {
                apci,
                data_first_byte,
                data,
            },
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        let (apci, data_first_byte, data): (u8, u8, &[u8]) = match self {
            Self::GroupValueRead => (APCI_GROUP_VALUE_READ, 0, &[] as &[u8]),
            Self::GroupValueResponse {
                data_first_byte,
                data,
            } => (APCI_GROUP_VALUE_RESPONSE, *data_first_byte, data.as_slice()),
            Self::GroupValueWrite {
                data_first_byte,
                data,
            } => (APCI_GROUP_VALUE_WRITE, *data_first_byte, data.as_slice()),
            Self::Other {
                apci,
                data_first_byte,
                data,
            } => (*apci, *data_first_byte, data.as_slice()),
        };
        buf.write_u8("apci", 4, apci)?;
        buf.write_u8("data_first_byte", 6, data_first_byte)?;
        buf.write_bytes("data", data)
    }
}
