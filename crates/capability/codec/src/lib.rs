//! 位级编解码框架。
//!
//! - `buffer`: 位级读写游标
//! - `message`: `Message` / `FramedMessage` trait，数组、可选、填充字段工具
//! - `knxnetip`: KNXnet/IP 报文族
//! - `s7`: TPKT / COTP / S7 报文族

/// 单字节判别值枚举：生成取值、反查与读写函数。
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $field:literal {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub fn value(self) -> u8 {
                match self {
                    $(Self::$variant => $value),+
                }
            }

            pub fn from_value(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub(crate) fn parse(
                buf: &mut $crate::buffer::ReadBuffer<'_>,
            ) -> Result<Self, $crate::error::MalformedFrameError> {
                let value = buf.read_u8($field, 8)?;
                Self::from_value(value).ok_or($crate::error::MalformedFrameError::InvalidEnumValue {
                    field: $field,
                    value: u64::from(value),
                })
            }

            pub(crate) fn serialize(
                self,
                buf: &mut $crate::buffer::WriteBuffer,
            ) -> Result<(), $crate::error::SerializeError> {
                buf.write_u8($field, 8, self.value())
            }
        }
    };
}

pub mod buffer;
pub mod error;
pub mod knxnetip;
pub mod message;
pub mod s7;

pub use buffer::{ReadBuffer, WriteBuffer};
pub use error::{MalformedFrameError, SerializeError};
pub use message::{ArrayPosition, FramedMessage, Message};
