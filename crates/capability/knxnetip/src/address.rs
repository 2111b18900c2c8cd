//! 组地址解析

use crate::ConnectionError;
use std::fmt;
use std::str::FromStr;

/// KNX 组地址（16 位）。
///
/// 支持三种写法：`main/middle/sub`（5/3/8 位）、`main/sub`（5/11 位）和自由格式的单个整数。
/// 显示时统一使用三级格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KnxGroupAddress(u16);

impl KnxGroupAddress {
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn three_level(main: u8, middle: u8, sub: u8) -> Result<Self, ConnectionError> {
        if main > 0x1F || middle > 0x07 {
            return Err(ConnectionError::InvalidAddress(format!("{main}/{middle}/{sub}")));
        }
        Ok(Self(
            (u16::from(main) << 11) | (u16::from(middle) << 8) | u16::from(sub),
        ))
    }

    pub fn two_level(main: u8, sub: u16) -> Result<Self, ConnectionError> {
        if main > 0x1F || sub > 0x07FF {
            return Err(ConnectionError::InvalidAddress(format!("{main}/{sub}")));
        }
        Ok(Self((u16::from(main) << 11) | sub))
    }

    pub fn raw(&self) -> u16 {
        self.0
    }

    pub fn main(&self) -> u8 {
        (self.0 >> 11) as u8
    }

    pub fn middle(&self) -> u8 {
        ((self.0 >> 8) & 0x07) as u8
    }

    pub fn sub(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// L_Data 帧中的目标地址字节。
    pub fn to_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl FromStr for KnxGroupAddress {
    type Err = ConnectionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || ConnectionError::InvalidAddress(text.to_string());
        let parts: Vec<&str> = text.trim().split('/').collect();
        match parts.as_slice() {
            [main, middle, sub] => Self::three_level(
                main.parse().map_err(|_| invalid())?,
                middle.parse().map_err(|_| invalid())?,
                sub.parse().map_err(|_| invalid())?,
            )
            .map_err(|_| invalid()),
            [main, sub] => Self::two_level(
                main.parse().map_err(|_| invalid())?,
                sub.parse().map_err(|_| invalid())?,
            )
            .map_err(|_| invalid()),
            [raw] => raw.parse().map(Self).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for KnxGroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_level_address() {
        let address: KnxGroupAddress = "1/2/3".parse().expect("address");
        assert_eq!(address.raw(), 0x0A03);
        assert_eq!(address.to_bytes(), [0x0A, 0x03]);
        assert_eq!(address.to_string(), "1/2/3");
    }

    #[test]
    fn parses_two_level_and_free_format() {
        let two: KnxGroupAddress = "1/515".parse().expect("two level");
        assert_eq!(two.raw(), 0x0A03);
        let free: KnxGroupAddress = "2563".parse().expect("free");
        assert_eq!(free, two);
    }

    #[test]
    fn rejects_out_of_range_levels() {
        for text in ["32/0/0", "1/8/0", "1/2/256", "1/2048", "a/b/c", "1/2/3/4", ""] {
            assert!(
                matches!(
                    text.parse::<KnxGroupAddress>(),
                    Err(ConnectionError::InvalidAddress(_))
                ),
                "{text}"
            );
        }
    }
}
