//! TPKT / COTP / S7 报文族。
//!
//! TPKT 包裹 COTP，COTP 的可选载荷为 S7 报文；内层解析的字节预算
//! 由外层长度字段减去已消费的头部得到。

mod cotp;
mod message;

pub use cotp::{CotpPacket, CotpParameter, CotpTpdu};
pub use message::{
    DataTransportSize, MemoryArea, PROTOCOL_ID, RETURN_CODE_OK, S7Address, S7Message,
    S7MessageKind, S7Parameter, S7Payload, S7VarPayloadDataItem, S7VarPayloadStatusItem,
    S7VarRequestParameterItem,
};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{MalformedFrameError, SerializeError};
use crate::message::{FramedMessage, Message, expect_consumed};

const TPKT_PROTOCOL_ID: u8 = 0x03;
const TPKT_HEADER_LENGTH: usize = 4;

/// TPKT 帧（RFC 1006）。总长度为隐式字段。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpktPacket {
    pub payload: CotpPacket,
}

impl Message for TpktPacket {
    fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError> {
        let start = buf.position();
        buf.read_const("protocol_id", 8, u64::from(TPKT_PROTOCOL_ID))?;
        buf.read_const("reserved", 8, 0)?;
        let length = buf.read_u16("length", 16)? as usize;
        let payload = CotpPacket::parse(buf, start + length)?;
        expect_consumed(buf, "length", start, length)?;
        Ok(Self { payload })
    }

    fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError> {
        buf.write_u8("protocol_id", 8, TPKT_PROTOCOL_ID)?;
        buf.write_u8("reserved", 8, 0)?;
        buf.write_length("length", 16, self.length_in_bytes())?;
        self.payload.serialize(buf)
    }

    fn length_in_bytes(&self) -> usize {
        TPKT_HEADER_LENGTH + self.payload.length_in_bytes()
    }
}

impl FramedMessage for TpktPacket {
    const HEADER_SIZE: usize = TPKT_HEADER_LENGTH;

    fn frame_length(header: &[u8]) -> Result<usize, MalformedFrameError> {
        let mut buf = ReadBuffer::new(header);
        buf.read_const("protocol_id", 8, u64::from(TPKT_PROTOCOL_ID))?;
        buf.read_const("reserved", 8, 0)?;
        let length = buf.read_u16("length", 16)? as usize;
        if length < TPKT_HEADER_LENGTH {
            return Err(MalformedFrameError::LengthMismatch {
                field: "length",
                declared: length,
                consumed: TPKT_HEADER_LENGTH,
            });
        }
        Ok(length)
    }
}
