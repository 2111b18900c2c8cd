//! 编解码错误类型定义

/// 解析失败：帧被丢弃，调用方继续处理后续数据。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedFrameError {
    #[error("not enough data for {field}: need {needed_bits} bits, {available_bits} available")]
    NotEnoughData {
        field: &'static str,
        needed_bits: usize,
        available_bits: usize,
    },

    #[error("unknown {family} variant for discriminator {discriminator}")]
    UnknownVariant {
        family: &'static str,
        discriminator: String,
    },

    #[error("const mismatch for {field}: expected {expected:#x}, got {actual:#x}")]
    ConstMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("invalid enum value for {field}: {value:#x}")]
    InvalidEnumValue { field: &'static str, value: u64 },

    #[error("unaligned byte access for {field}")]
    Unaligned { field: &'static str },

    #[error("length mismatch for {field}: declared {declared}, consumed {consumed}")]
    LengthMismatch {
        field: &'static str,
        declared: usize,
        consumed: usize,
    },
}

/// 序列化失败。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
    #[error("value {value:#x} does not fit in {bits} bits for {field}")]
    ValueOutOfRange {
        field: &'static str,
        value: u64,
        bits: u8,
    },

    #[error("length {length} of {field} exceeds {max}")]
    LengthOverflow {
        field: &'static str,
        length: usize,
        max: usize,
    },

    #[error("unaligned byte access for {field}")]
    Unaligned { field: &'static str },
}
