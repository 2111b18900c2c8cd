//! 位级读写缓冲（大端，高位在前）。
//!
//! 字段宽度 1..=64 位；字节级操作要求当前位置按字节对齐。

use crate::error::{MalformedFrameError, SerializeError};

/// 只读游标。
#[derive(Debug, Clone)]
pub struct ReadBuffer<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// 已消费的字节数（向下取整）。
    pub fn position(&self) -> usize {
        self.bit_pos / 8
    }

    pub fn bit_position(&self) -> usize {
        self.bit_pos
    }

    pub fn remaining_bytes(&self) -> usize {
        self.data.len().saturating_sub(self.position())
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    pub fn is_aligned(&self) -> bool {
        self.bit_pos % 8 == 0
    }

    fn read_bits(&mut self, field: &'static str, bits: u8) -> Result<u64, MalformedFrameError> {
        debug_assert!(bits <= 64);
        let available = self.remaining_bits();
        if bits as usize > available {
            return Err(MalformedFrameError::NotEnoughData {
                field,
                needed_bits: bits as usize,
                available_bits: available,
            });
        }
        let mut value = 0u64;
        for _ in 0..bits {
            let byte = self.data[self.bit_pos / 8];
            let bit = (byte >> (7 - self.bit_pos % 8)) & 1;
            value = (value << 1) | u64::from(bit);
            self.bit_pos += 1;
        }
        Ok(value)
    }

    pub fn read_bit(&mut self, field: &'static str) -> Result<bool, MalformedFrameError> {
        Ok(self.read_bits(field, 1)? == 1)
    }

    pub fn read_u8(&mut self, field: &'static str, bits: u8) -> Result<u8, MalformedFrameError> {
        debug_assert!(bits <= 8);
        Ok(self.read_bits(field, bits)? as u8)
    }

    pub fn read_u16(&mut self, field: &'static str, bits: u8) -> Result<u16, MalformedFrameError> {
        debug_assert!(bits <= 16);
        Ok(self.read_bits(field, bits)? as u16)
    }

    pub fn read_u32(&mut self, field: &'static str, bits: u8) -> Result<u32, MalformedFrameError> {
        debug_assert!(bits <= 32);
        Ok(self.read_bits(field, bits)? as u32)
    }

    pub fn read_u64(&mut self, field: &'static str, bits: u8) -> Result<u64, MalformedFrameError> {
        self.read_bits(field, bits)
    }

    /// 读取常量字段，值不符即报错。
    pub fn read_const(
        &mut self,
        field: &'static str,
        bits: u8,
        expected: u64,
    ) -> Result<(), MalformedFrameError> {
        let actual = self.read_bits(field, bits)?;
        if actual != expected {
            return Err(MalformedFrameError::ConstMismatch {
                field,
                expected,
                actual,
            });
        }
        Ok(())
    }

    pub fn read_bytes(
        &mut self,
        field: &'static str,
        count: usize,
    ) -> Result<Vec<u8>, MalformedFrameError> {
        let start = self.aligned_start(field, count)?;
        self.bit_pos += count * 8;
        Ok(self.data[start..start + count].to_vec())
    }

    /// 定长字节数组。
    pub fn read_byte_array<const N: usize>(
        &mut self,
        field: &'static str,
    ) -> Result<[u8; N], MalformedFrameError> {
        let start = self.aligned_start(field, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[start..start + N]);
        self.bit_pos += N * 8;
        Ok(out)
    }

    /// 跳过 `count` 字节，不校验内容。
    pub fn skip_bytes(&mut self, field: &'static str, count: usize) -> Result<(), MalformedFrameError> {
        self.aligned_start(field, count)?;
        self.bit_pos += count * 8;
        Ok(())
    }

    fn aligned_start(&self, field: &'static str, count: usize) -> Result<usize, MalformedFrameError> {
        if !self.is_aligned() {
            return Err(MalformedFrameError::Unaligned { field });
        }
        let start = self.position();
        if count > self.data.len() - start {
            return Err(MalformedFrameError::NotEnoughData {
                field,
                needed_bits: count * 8,
                available_bits: self.remaining_bits(),
            });
        }
        Ok(start)
    }
}

/// 追加写游标。
#[derive(Debug, Clone, Default)]
pub struct WriteBuffer {
    data: Vec<u8>,
    bit_pos: usize,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            bit_pos: 0,
        }
    }

    /// 已写入的字节数（不足一字节按一字节计）。
    pub fn position(&self) -> usize {
        self.data.len()
    }

    pub fn is_aligned(&self) -> bool {
        self.bit_pos % 8 == 0
    }

    fn write_bits(&mut self, field: &'static str, bits: u8, value: u64) -> Result<(), SerializeError> {
        debug_assert!(bits <= 64);
        if bits < 64 && value >> bits != 0 {
            return Err(SerializeError::ValueOutOfRange { field, value, bits });
        }
        for shift in (0..bits).rev() {
            if self.bit_pos % 8 == 0 {
                self.data.push(0);
            }
            if (value >> shift) & 1 == 1 {
                let index = self.bit_pos / 8;
                self.data[index] |= 1 << (7 - self.bit_pos % 8);
            }
            self.bit_pos += 1;
        }
        Ok(())
    }

    pub fn write_bit(&mut self, field: &'static str, value: bool) -> Result<(), SerializeError> {
        self.write_bits(field, 1, u64::from(value))
    }

    pub fn write_u8(&mut self, field: &'static str, bits: u8, value: u8) -> Result<(), SerializeError> {
        self.write_bits(field, bits, u64::from(value))
    }

    pub fn write_u16(&mut self, field: &'static str, bits: u8, value: u16) -> Result<(), SerializeError> {
        self.write_bits(field, bits, u64::from(value))
    }

    pub fn write_u32(&mut self, field: &'static str, bits: u8, value: u32) -> Result<(), SerializeError> {
        self.write_bits(field, bits, u64::from(value))
    }

    pub fn write_u64(&mut self, field: &'static str, bits: u8, value: u64) -> Result<(), SerializeError> {
        self.write_bits(field, bits, value)
    }

    /// 隐式长度字段：超出位宽报 `LengthOverflow`。
    pub fn write_length(
        &mut self,
        field: &'static str,
        bits: u8,
        length: usize,
    ) -> Result<(), SerializeError> {
        let max = if bits >= 64 { usize::MAX } else { (1usize << bits) - 1 };
        if length > max {
            return Err(SerializeError::LengthOverflow { field, length, max });
        }
        self.write_bits(field, bits, length as u64)
    }

    pub fn write_bytes(&mut self, field: &'static str, bytes: &[u8]) -> Result<(), SerializeError> {
        if !self.is_aligned() {
            return Err(SerializeError::Unaligned { field });
        }
        self.data.extend_from_slice(bytes);
        self.bit_pos += bytes.len() * 8;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
