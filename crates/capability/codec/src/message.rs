//! 报文 trait 与数组、可选、填充字段的通用读写。

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{MalformedFrameError, SerializeError};

/// 可解析、可序列化的报文。
///
/// 隐式字段（长度、数量）只在线上存在：解析时读出后丢弃，
/// 序列化时由 `length_in_bytes` 等按实际内容重新计算。
pub trait Message: Sized {
    fn parse(buf: &mut ReadBuffer<'_>) -> Result<Self, MalformedFrameError>;

    fn serialize(&self, buf: &mut WriteBuffer) -> Result<(), SerializeError>;

    fn length_in_bytes(&self) -> usize;

    fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        let mut buf = WriteBuffer::with_capacity(self.length_in_bytes());
        self.serialize(&mut buf)?;
        Ok(buf.into_bytes())
    }

    /// 解析并返回消费的字节数。
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), MalformedFrameError> {
        let mut buf = ReadBuffer::new(bytes);
        let message = Self::parse(&mut buf)?;
        Ok((message, buf.position()))
    }
}

/// 带定长头部的顶层帧，分发器用头部计算整帧长度。
pub trait FramedMessage: Message + Send + 'static {
    const HEADER_SIZE: usize;

    /// 由头部字节得到整帧长度（含头部）。
    fn frame_length(header: &[u8]) -> Result<usize, MalformedFrameError>;
}

/// 数组元素在外层数组中的位置，作为元素级解析/序列化的显式参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayPosition {
    pub index: usize,
    pub count: usize,
}

impl ArrayPosition {
    pub fn new(index: usize, count: usize) -> Self {
        Self { index, count }
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.count
    }
}

/// 显式数量（或编译期定长）数组。
pub fn read_counted<'a, T>(
    buf: &mut ReadBuffer<'a>,
    count: usize,
    mut parse_item: impl FnMut(&mut ReadBuffer<'a>, ArrayPosition) -> Result<T, MalformedFrameError>,
) -> Result<Vec<T>, MalformedFrameError> {
    let mut items = Vec::with_capacity(count.min(256));
    for index in 0..count {
        items.push(parse_item(buf, ArrayPosition::new(index, count))?);
    }
    Ok(items)
}

/// 字节预算数组：一直读到游标到达 `end_position`（外层长度减去已消费字节）。
pub fn read_until_position<'a, T>(
    buf: &mut ReadBuffer<'a>,
    field: &'static str,
    end_position: usize,
    mut parse_item: impl FnMut(&mut ReadBuffer<'a>) -> Result<T, MalformedFrameError>,
) -> Result<Vec<T>, MalformedFrameError> {
    let start = buf.position();
    let mut items = Vec::new();
    while buf.position() < end_position {
        items.push(parse_item(buf)?);
    }
    if buf.position() != end_position {
        return Err(MalformedFrameError::LengthMismatch {
            field,
            declared: end_position.saturating_sub(start),
            consumed: buf.position() - start,
        });
    }
    Ok(items)
}

/// 条件可选字段：`present` 为假时不读取，返回 `None`。
pub fn read_optional<'a, T>(
    buf: &mut ReadBuffer<'a>,
    present: bool,
    parse: impl FnOnce(&mut ReadBuffer<'a>) -> Result<T, MalformedFrameError>,
) -> Result<Option<T>, MalformedFrameError> {
    if present { parse(buf).map(Some) } else { Ok(None) }
}

/// 对齐填充字节数；外层数组最后一个元素不填充。
pub fn padding_len(length: usize, align: usize, last_item: bool) -> usize {
    if last_item || align <= 1 {
        return 0;
    }
    (align - length % align) % align
}

/// 读取并丢弃填充。
pub fn read_padding(
    buf: &mut ReadBuffer<'_>,
    field: &'static str,
    count: usize,
) -> Result<(), MalformedFrameError> {
    buf.skip_bytes(field, count)
}

/// 写入零填充。
pub fn write_padding(
    buf: &mut WriteBuffer,
    field: &'static str,
    count: usize,
) -> Result<(), SerializeError> {
    for _ in 0..count {
        buf.write_u8(field, 8, 0)?;
    }
    Ok(())
}

/// 确认嵌套结构恰好消费了声明长度，用于隐式长度字段。
pub fn expect_consumed(
    buf: &ReadBuffer<'_>,
    field: &'static str,
    start: usize,
    declared: usize,
) -> Result<(), MalformedFrameError> {
    let consumed = buf.position() - start;
    if consumed != declared {
        return Err(MalformedFrameError::LengthMismatch {
            field,
            declared,
            consumed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_skips_last_item() {
        assert_eq!(padding_len(3, 2, false), 1);
        assert_eq!(padding_len(3, 2, true), 0);
        assert_eq!(padding_len(4, 2, false), 0);
    }

    #[test]
    fn budget_array_stops_at_end_position() {
        let data = [0x01, 0x02, 0x03, 0xFF];
        let mut buf = ReadBuffer::new(&data);
        let items = read_until_position(&mut buf, "items", 3, |buf| buf.read_u8("item", 8))
            .expect("items");
        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(buf.position(), 3);
    }

    #[test]
    fn budget_array_overrun_is_length_mismatch() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut buf = ReadBuffer::new(&data);
        let err = read_until_position(&mut buf, "pairs", 3, |buf| buf.read_u16("pair", 16))
            .expect_err("overrun");
        assert!(matches!(err, MalformedFrameError::LengthMismatch { .. }));
    }

    #[test]
    fn optional_absence_differs_from_empty_presence() {
        let data: [u8; 0] = [];
        let mut buf = ReadBuffer::new(&data);
        let absent = read_optional(&mut buf, false, |buf| buf.read_bytes("body", 0)).expect("absent");
        let present = read_optional(&mut buf, true, |buf| buf.read_bytes("body", 0)).expect("present");
        assert_eq!(absent, None);
        assert_eq!(present, Some(Vec::new()));
    }

    #[test]
    fn counted_array_passes_last_item_flag() {
        let data = [0x01, 0x02];
        let mut buf = ReadBuffer::new(&data);
        let flags = read_counted(&mut buf, 2, |buf, pos| {
            buf.read_u8("item", 8)?;
            Ok(pos.is_last())
        })
        .expect("flags");
        assert_eq!(flags, vec![false, true]);
    }
}
