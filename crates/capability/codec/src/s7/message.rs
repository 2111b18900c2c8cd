//! S7 报文：头部按消息类型判别，参数按 (参数类型, 消息类型) 判别，载荷依赖参数。

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{MalformedFrameError, SerializeError};
use crate::message::{
    ArrayPosition, Message, expect_consumed, padding_len, read_counted, read_optional,
    read_padding, write_padding,
};

pub const PROTOCOL_ID: u8 = 0x32;
/// 数据项返回码：成功。
pub const RETURN_CODE_OK: u8 = 0xFF;

const MESSAGE_TYPE_REQUEST: u8 = 0x01;
const MESSAGE_TYPE_RESPONSE: u8 = 0x02;
const MESSAGE_TYPE_ACK_DATA: u8 = 0x03;
const MESSAGE_TYPE_USER_DATA: u8 = 0x07;

const PARAMETER_SETUP_COMMUNICATION: u8 = 0xF0;
const PARAMETER_READ_VAR: u8 = 0x04;
const PARAMETER_WRITE_VAR: u8 = 0x05;

const ITEM_TYPE_ADDRESS: u8 = 0x12;
const ADDRESS_TYPE_ANY: u8 = 0x10;

wire_enum! {
    /// 存储区。
    pub enum MemoryArea: "area" {
        Counters = 0x1C,
        Timers = 0x1D,
        DirectPeripheralAccess = 0x80,
        Inputs = 0x81,
        Outputs = 0x82,
        Flags = 0x83,
        DataBlocks = 0x84,
        InstanceDataBlocks = 0x85,
        LocalData = 0x86,
    }
}

wire_enum! {
    /// 载荷数据项的传输尺寸。
    pub enum DataTransportSize: "transport_size" {
        Null = 0x00,
        Bit = 0x03,
        ByteWordDword = 0x04,
        Integer = 0x05,
        DInteger = 0x06,
        Real = 0x07,
        OctetString = 0x09,
    }
}

impl DataTransportSize {
    /// 长度字段以位计数。
    pub fn size_in_bits(self) -> bool {
        matches!(self, Self::Bit | Self::ByteWordDword | Self::Integer)
    }
}

/// S7 消息类型；应答类携带错误类别与错误码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7MessageKind {
    Request,
    Response { error_class: u8, error_code: u8 },
    AckData { error_class: u8, error_code: u8 },
    UserData,
}

impl S7MessageKind {
    fn message_type(&self) -> u8 {
        match self {
            Self::Request => MESSAGE_TYPE_REQUEST,
            Self::Response { .. } => MESSAGE_TYPE_RESPONSE,
            Self::AckData { .. } => MESSAGE_TYPE_ACK_DATA,
            Self::UserData => MESSAGE_TYPE_USER_DATA,
        }
    }

    fn header_length(&self) -> usize {
        match self {
            Self::Response { .. } | Self::AckData { .. } => 12,
            Self::Request | Self::UserData => 10,
        }
    }
}

/// S7 报文。参数长度与载荷长度为隐式字段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7Message {
    pub tpdu_reference: u16,
    pub kind: S7MessageKind,
    pub parameter: Option<S7Parameter>,
    pub payload: Option<S7Payload>,
}

impl S7Message {
    fn parameter_length(&self) -> usize {
        self.parameter.as_ref().map_or(0, S7Parameter::length_in_bytes)
    }

    fn payload_length(&self) -> usize {
        self.payload.as_ref().map_or(0, S7Payload::length_in_bytes)
    }
}

impl Message for S7Message {
    fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        buf.read_const("protocol_id", 8, u64::from(PROTOCOL_ID))?;
        let message_type = buf.read_u8("message_type", 8)?;
        buf.read_const("reserved", 16, 0)?;
        let tpdu_reference = buf.read_u16("tpdu_reference", 16)?;
        let parameter_length = buf.read_u16("parameter_length", 16)? as usize;
        let payload_length = buf.read_u16("payload_length", 16)? as usize;
        let kind = match message_type {
            MESSAGE_TYPE_REQUEST => S7MessageKind::Request,
            MESSAGE_TYPE_RESPONSE => S7MessageKind::Response {
                error_class: buf.read_u8("error_class", 8)?,
                error_code: buf.read_u8("error_code", 8)?,
            },
            MESSAGE_TYPE_ACK_DATA => S7MessageKind::AckData {
                error_class: buf.read_u8("error_class", 8)?,
                error_code: buf.read_u8("error_code", 8)?,
            },
            MESSAGE_TYPE_USER_DATA => S7MessageKind::UserData,
            other => {
                return Err(MalformedFrameError::UnknownVariant {
                    family: "S7Message",
                    discriminator: format!("{other:#04x}"),
                });
            }
        };

        let start = buf.position();
        let parameter = read_optional(buf, parameter_length > 0, |buf| {
            S7Parameter::parse(buf, message_type)
        })?;
        expect_consumed(buf, "parameter_length", start, parameter_length)?;

        let start = buf.position();
        let payload = read_optional(buf, payload_length > 0, |buf| {
            S7Payload::parse(buf, message_type, parameter.as_ref())
        })?;
        expect_consumed(buf, "payload_length", start, payload_length)?;

        Ok(Self {
            tpdu_reference,
            kind,
            parameter,
            payload,
        })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("protocol_id", 8, PROTOCOL_ID)?;
        buf.write_u8("message_type", 8, self.kind.message_type())?;
        buf.write_u16("reserved", 16, 0)?;
        buf.write_u16("tpdu_reference", 16, self.tpdu_reference)?;
        buf.write_length("parameter_length", 16, self.parameter_length())?;
        buf.write_length("payload_length", 16, self.payload_length())?;
        match self.kind {
            S7MessageKind::Response {
                error_class,
                error_code,
            }
            | S7MessageKind::AckData {
                error_class,
                error_code,
            } => {
                buf.write_u8("error_class", 8, error_class)?;
                buf.write_u8("error_code", 8, error_code)?;
            }
            S7MessageKind::Request | S7MessageKind::UserData => {}
        }
        if let Some(parameter) = &self.parameter {
            parameter.serialize(buf)?;
        }
        if let Some(payload) = &self.payload {
            payload.serialize(buf)?;
        }
        Ok(())
    }

    fn length_in_bytes(&self) -> usize {
        self.kind.header_length() + self.parameter_length() + self.payload_length()
    }
}

/// S7 参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7Parameter {
    SetupCommunication {
        max_amq_caller: u16,
        max_amq_callee: u16,
        pdu_length: u16,
    },
    ReadVarRequest {
        items: Vec<S7VarRequestParameterItem>,
    },
    ReadVarResponse {
        num_items: u8,
    },
    WriteVarRequest {
        items: Vec<S7VarRequestParameterItem>,
    },
    WriteVarResponse {
        num_items: u8,
    },
}

impl S7Parameter {
    fn parameter_type(&self) -> u8 {
        match self {
            Self::SetupCommunication { .. } => PARAMETER_SETUP_COMMUNICATION,
            Self::ReadVarRequest { .. } | Self::ReadVarResponse { .. } => PARAMETER_READ_VAR,
            Self::WriteVarRequest { .. } | Self::WriteVarResponse { .. } => PARAMETER_WRITE_VAR,
        }
    }

    pub fn length_in_bytes(&self) -> usize {
        match self {
            Self::SetupCommunication { .. } => 8,
            Self::ReadVarRequest { items } | Self::WriteVarRequest { items } => {
                2 + items
                    .iter()
                    .map(S7VarRequestParameterItem::length_in_bytes)
                    .sum::<usize>()
            }
            Self::ReadVarResponse { .. } | Self::WriteVarResponse { .. } => 2,
        }
    }

    /// 参数类型与外层消息类型共同决定具体变体。
    pub fn parse(buf: &mut ReadBuffer<'_>, message_type: u8) -> Result<Self, MalformedFrameError> {
        let parameter_type = buf.read_u8("parameter_type", 8)?;
        Ok(match (parameter_type, message_type) {
            (PARAMETER_SETUP_COMMUNICATION, _) => {
                buf.read_const("setup_reserved", 8, 0)?;
                Self::SetupCommunication {
                    max_amq_caller: buf.read_u16("max_amq_caller", 16)?,
                    max_amq_callee: buf.read_u16("max_amq_callee", 16)?,
                    pdu_length: buf.read_u16("pdu_length", 16)?,
                }
            }
            (PARAMETER_READ_VAR, MESSAGE_TYPE_REQUEST) => Self::ReadVarRequest {
                items: Self::parse_items(buf)?,
            },
            (PARAMETER_READ_VAR, MESSAGE_TYPE_ACK_DATA) => Self::ReadVarResponse {
                num_items: buf.read_u8("num_items", 8)?,
            },
            (PARAMETER_WRITE_VAR, MESSAGE_TYPE_REQUEST) => Self::WriteVarRequest {
                items: Self::parse_items(buf)?,
            },
            (PARAMETER_WRITE_VAR, MESSAGE_TYPE_ACK_DATA) => Self::WriteVarResponse {
                num_items: buf.read_u8("num_items", 8)?,
            },
            (parameter_type, message_type) => {
                return Err(MalformedFrameError::UnknownVariant {
                    family: "S7Parameter",
                    discriminator: format!("({parameter_type:#04x}, {message_type:#04x})"),
                });
            }
        })
    }

    fn parse_items(
        buf: &mut ReadBuffer<'_>,
    ) -> Result<Vec<S7VarRequestParameterItem>, MalformedFrameError> {
        let count = buf.read_u8("num_items", 8)? as usize;
        read_counted(buf, count, |buf, _| S7VarRequestParameterItem::parse(buf))
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("parameter_type", 8, self.parameter_type())?;
        match self {
            Self::SetupCommunication {
                max_amq_caller,
                max_amq_callee,
                pdu_length,
            } => {
                buf.write_u8("setup_reserved", 8, 0)?;
                buf.write_u16("max_amq_caller", 16, *max_amq_caller)?;
                buf.write_u16("max_amq_callee", 16, *max_amq_callee)?;
                buf.write_u16("pdu_length", 16, *pdu_length)
            }
            Self::ReadVarRequest { items } | Self::WriteVarRequest { items } => {
                buf.write_length("num_items", 8, items.len())?;
                for item in items {
                    item.serialize(buf)?;
                }
                Ok(())
            }
            Self::ReadVarResponse { num_items } | Self::WriteVarResponse { num_items } => {
                buf.write_u8("num_items", 8, *num_items)
            }
        }
    }

    /// 载荷中数据项的数量。
    fn item_count(&self) -> usize {
        match self {
            Self::SetupCommunication { .. } => 0,
            Self::ReadVarRequest { items } | Self::WriteVarRequest { items } => items.len(),
            Self::ReadVarResponse { num_items } | Self::WriteVarResponse { num_items } => {
                *num_items as usize
            }
        }
    }
}

/// 变量请求项（当前仅地址项）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7VarRequestParameterItem {
    Address(S7Address),
}

impl S7VarRequestParameterItem {
    pub fn length_in_bytes(&self) -> usize {
        match self {
            Self::Address(address) => 2 + address.length_in_bytes(),
        }
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let item_type = buf.read_u8("item_type", 8)?;
        match item_type {
            ITEM_TYPE_ADDRESS => {
                let item_length = buf.read_u8("item_length", 8)? as usize;
                let start = buf.position();
                let address = S7Address::parse(buf)?;
                expect_consumed(buf, "item_length", start, item_length)?;
                Ok(Self::Address(address))
            }
            other => Err(MalformedFrameError::UnknownVariant {
                family: "S7VarRequestParameterItem",
                discriminator: format!("{other:#04x}"),
            }),
        }
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        match self {
            Self::Address(address) => {
                buf.write_u8("item_type", 8, ITEM_TYPE_ADDRESS)?;
                buf.write_length("item_length", 8, address.length_in_bytes())?;
                address.serialize(buf)
            }
        }
    }
}

/// S7 地址（ANY 指针）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7Address {
    Any {
        transport_size: u8,
        number_of_elements: u16,
        db_number: u16,
        area: MemoryArea,
        byte_address: u16,
        bit_address: u8,
    },
}

impl S7Address {
    pub fn length_in_bytes(&self) -> usize {
        match self {
            Self::Any { .. } => 10,
        }
    }

    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let address_type = buf.read_u8("address_type", 8)?;
        match address_type {
            ADDRESS_TYPE_ANY => {
                let transport_size = buf.read_u8("transport_size", 8)?;
                let number_of_elements = buf.read_u16("number_of_elements", 16)?;
                let db_number = buf.read_u16("db_number", 16)?;
                let area = MemoryArea::parse(buf)?;
                buf.read_const("address_reserved", 5, 0)?;
                Ok(Self::Any {
                    transport_size,
                    number_of_elements,
                    db_number,
                    area,
                    byte_address: buf.read_u16("byte_address", 16)?,
                    bit_address: buf.read_u8("bit_address", 3)?,
                })
            }
            other => Err(MalformedFrameError::UnknownVariant {
                family: "S7Address",
                discriminator: format!("{other:#04x}"),
            }),
        }
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        match *self {
            Self::Any {
                transport_size,
                number_of_elements,
                db_number,
                area,
                byte_address,
                bit_address,
            } => {
                buf.write_u8("address_type", 8, ADDRESS_TYPE_ANY)?;
                buf.write_u8("transport_size", 8, transport_size)?;
                buf.write_u16("number_of_elements", 16, number_of_elements)?;
                buf.write_u16("db_number", 16, db_number)?;
                area.serialize(buf)?;
                buf.write_u8("address_reserved", 5, 0)?;
                buf.write_u16("byte_address", 16, byte_address)?;
                buf.write_u8("bit_address", 3, bit_address)
            }
        }
    }
}

/// S7 载荷，由所属参数选择变体并提供数据项数量。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S7Payload {
    ReadVarResponse { items: Vec<S7VarPayloadDataItem> },
    WriteVarRequest { items: Vec<S7VarPayloadDataItem> },
    WriteVarResponse { items: Vec<S7VarPayloadStatusItem> },
}

impl S7Payload {
    pub fn length_in_bytes(&self) -> usize {
        match self {
            Self::ReadVarResponse { items } | Self::WriteVarRequest { items } => {
                let count = items.len();
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| item.length_in_bytes(ArrayPosition::new(index, count)))
                    .sum()
            }
            Self::WriteVarResponse { items } => items.len(),
        }
    }

    pub fn parse(
        buf: &mut ReadBuffer<'_>,
        message_type: u8,
        parameter: Option<&S7Parameter>,
    ) -> Result<Self, MalformedFrameError> {
        let unknown = |parameter_type: Option<u8>| MalformedFrameError::UnknownVariant {
            family: "S7Payload",
            discriminator: format!("({parameter_type:?}, {message_type:#04x})"),
        };
        let parameter = parameter.ok_or_else(|| unknown(None))?;
        let count = parameter.item_count();
        Ok(match (parameter.parameter_type(), message_type) {
            (PARAMETER_READ_VAR, MESSAGE_TYPE_ACK_DATA) => Self::ReadVarResponse {
                items: read_counted(buf, count, S7VarPayloadDataItem::parse)?,
            },
            (PARAMETER_WRITE_VAR, MESSAGE_TYPE_REQUEST) => Self::WriteVarRequest {
                items: read_counted(buf, count, S7VarPayloadDataItem::parse)?,
            },
            (PARAMETER_WRITE_VAR, MESSAGE_TYPE_ACK_DATA) => Self::WriteVarResponse {
                items: read_counted(buf, count, |buf, _| S7VarPayloadStatusItem::parse(buf))?,
            },
            (parameter_type, _) => return Err(unknown(Some(parameter_type))),
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        match self {
            Self::ReadVarResponse { items } | Self::WriteVarRequest { items } => {
                let count = items.len();
                for (index, item) in items.iter().enumerate() {
                    item.serialize(buf, ArrayPosition::new(index, count))?;
                }
                Ok(())
            }
            Self::WriteVarResponse { items } => {
                for item in items {
                    item.serialize(buf)?;
                }
                Ok(())
            }
        }
    }
}

/// 载荷数据项。非最后一项且数据长度为奇数时补齐到偶数边界。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S7VarPayloadDataItem {
    pub return_code: u8,
    pub transport_size: DataTransportSize,
    pub data: Vec<u8>,
}

impl S7VarPayloadDataItem {
    fn wire_length(&self) -> usize {
        match self.transport_size {
            DataTransportSize::Bit => self.data.len(),
            size if size.size_in_bits() => self.data.len() * 8,
            _ => self.data.len(),
        }
    }

    pub fn length_in_bytes(&self, position: ArrayPosition) -> usize {
        4 + self.data.len() + padding_len(self.data.len(), 2, position.is_last())
    }

    pub fn parse(
        buf: &mut ReadBuffer<'_>,
        position: ArrayPosition,
    ) -> Result<Self, MalformedFrameError> {
        let return_code = buf.read_u8("return_code", 8)?;
        let transport_size = DataTransportSize::parse(buf)?;
        let data_length = buf.read_u16("data_length", 16)? as usize;
        let byte_count = if transport_size.size_in_bits() {
            data_length.div_ceil(8)
        } else {
            data_length
        };
        let data = buf.read_bytes("data", byte_count)?;
        read_padding(buf, "padding", padding_len(byte_count, 2, position.is_last()))?;
        Ok(Self {
            return_code,
            transport_size,
            data,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer, position: ArrayPosition) -> Result<(), SerializeError> {
        buf.write_u8("return_code", 8, self.return_code)?;
        self.transport_size.serialize(buf)?;
        buf.write_length("data_length", 16, self.wire_length())?;
        buf.write_bytes("data", &self.data)?;
        write_padding(buf, "padding", padding_len(self.data.len(), 2, position.is_last()))
    }
}

/// 写应答状态项。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7VarPayloadStatusItem {
    pub return_code: u8,
}

impl S7VarPayloadStatusItem {
    pub fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        Ok(Self {
            return_code: buf.read_u8("return_code", 8)?,
        })
    }

    pub fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("return_code", 8, self.return_code)
    }
}
