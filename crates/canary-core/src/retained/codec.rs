//! Pure encoding of typed values and record headers.
//!
//! Every value is stored big-endian with a fixed width determined by its
//! one-byte ASCII type tag:
//!
//! | Tag | Type | Width |
//! |-----|------|-------|
//! | `B` | u8   | 1 |
//! | `b` | i8   | 1 |
//! | `H` | u16  | 2 |
//! | `h` | i16  | 2 |
//! | `I` | u32  | 4 |
//! | `i` | i32  | 4 |
//! | `f` | f32  | 4 |
//! | `?` | bool | 1 |

use core::fmt;

use thiserror_no_std::Error;

/// Size of the per-record header: name length, data length, type tag.
pub const RECORD_HEADER_SIZE: usize = 3;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown type tag 0x{0:02x}")]
    UnknownTag(u8),
    #[error("Buffer too short: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    Bool,
}

impl TypeTag {
    pub const ALL: [TypeTag; 8] = [
        TypeTag::U8,
        TypeTag::I8,
        TypeTag::U16,
        TypeTag::I16,
        TypeTag::U32,
        TypeTag::I32,
        TypeTag::F32,
        TypeTag::Bool,
    ];

    /// ASCII code stored in the record header.
    pub const fn code(self) -> u8 {
        match self {
            TypeTag::U8 => b'B',
            TypeTag::I8 => b'b',
            TypeTag::U16 => b'H',
            TypeTag::I16 => b'h',
            TypeTag::U32 => b'I',
            TypeTag::I32 => b'i',
            TypeTag::F32 => b'f',
            TypeTag::Bool => b'?',
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            b'B' => Some(TypeTag::U8),
            b'b' => Some(TypeTag::I8),
            b'H' => Some(TypeTag::U16),
            b'h' => Some(TypeTag::I16),
            b'I' => Some(TypeTag::U32),
            b'i' => Some(TypeTag::I32),
            b'f' => Some(TypeTag::F32),
            b'?' => Some(TypeTag::Bool),
            _ => None,
        }
    }

    /// Encoded payload width in bytes.
    pub const fn width(self) -> usize {
        match self {
            TypeTag::U8 | TypeTag::I8 | TypeTag::Bool => 1,
            TypeTag::U16 | TypeTag::I16 => 2,
            TypeTag::U32 | TypeTag::I32 | TypeTag::F32 => 4,
        }
    }
}

impl TryFrom<u8> for TypeTag {
    type Error = CodecError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        TypeTag::from_code(code).ok_or(CodecError::UnknownTag(code))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.code() as char)
    }
}

/// A typed value as held in a record payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
}

impl Value {
    pub const fn tag(&self) -> TypeTag {
        match self {
            Value::U8(_) => TypeTag::U8,
            Value::I8(_) => TypeTag::I8,
            Value::U16(_) => TypeTag::U16,
            Value::I16(_) => TypeTag::I16,
            Value::U32(_) => TypeTag::U32,
            Value::I32(_) => TypeTag::I32,
            Value::F32(_) => TypeTag::F32,
            Value::Bool(_) => TypeTag::Bool,
        }
    }

    /// Write the big-endian payload into the front of `out` and return the
    /// number of bytes written.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        let width = self.tag().width();
        if out.len() < width {
            return Err(CodecError::Truncated {
                needed: width,
                available: out.len(),
            });
        }

        match *self {
            Value::U8(v) => out[0] = v,
            Value::I8(v) => out[0] = v as u8,
            Value::U16(v) => out[..2].copy_from_slice(&v.to_be_bytes()),
            Value::I16(v) => out[..2].copy_from_slice(&v.to_be_bytes()),
            Value::U32(v) => out[..4].copy_from_slice(&v.to_be_bytes()),
            Value::I32(v) => out[..4].copy_from_slice(&v.to_be_bytes()),
            Value::F32(v) => out[..4].copy_from_slice(&v.to_be_bytes()),
            Value::Bool(v) => out[0] = v as u8,
        }

        Ok(width)
    }

    /// Read a payload of type `tag` from the front of `bytes`.
    pub fn decode(tag: TypeTag, bytes: &[u8]) -> Result<Value, CodecError> {
        let width = tag.width();
        if bytes.len() < width {
            return Err(CodecError::Truncated {
                needed: width,
                available: bytes.len(),
            });
        }

        let value = match tag {
            TypeTag::U8 => Value::U8(bytes[0]),
            TypeTag::I8 => Value::I8(bytes[0] as i8),
            TypeTag::U16 => Value::U16(u16::from_be_bytes([bytes[0], bytes[1]])),
            TypeTag::I16 => Value::I16(i16::from_be_bytes([bytes[0], bytes[1]])),
            TypeTag::U32 => Value::U32(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            TypeTag::I32 => Value::I32(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            TypeTag::F32 => Value::F32(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            TypeTag::Bool => Value::Bool(bytes[0] != 0),
        };

        Ok(value)
    }

    /// Convert to the representation of `tag`, the way packing a number with
    /// a fixed format would.
    ///
    /// Integers (and booleans) convert to any integer tag they fit in and to
    /// `f32`. Floats convert to integer tags only when they carry no
    /// fractional part. Anything converts to `bool` by truthiness. Returns
    /// `None` when the value is out of range or not representable.
    pub fn coerce(self, tag: TypeTag) -> Option<Value> {
        if self.tag() == tag {
            return Some(self);
        }

        match tag {
            TypeTag::Bool => return Some(Value::Bool(self.is_truthy())),
            TypeTag::F32 => return Some(Value::F32(self.as_f64() as f32)),
            _ => {}
        }

        let integer = match self {
            Value::F32(v) => {
                if !v.is_finite() || v != (v as i64) as f32 {
                    return None;
                }
                v as i64
            }
            other => other.as_i64()?,
        };

        match tag {
            TypeTag::U8 => u8::try_from(integer).ok().map(Value::U8),
            TypeTag::I8 => i8::try_from(integer).ok().map(Value::I8),
            TypeTag::U16 => u16::try_from(integer).ok().map(Value::U16),
            TypeTag::I16 => i16::try_from(integer).ok().map(Value::I16),
            TypeTag::U32 => u32::try_from(integer).ok().map(Value::U32),
            TypeTag::I32 => i32::try_from(integer).ok().map(Value::I32),
            TypeTag::F32 | TypeTag::Bool => None,
        }
    }

    /// Integer view of any non-float value.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::U8(v) => Some(v as i64),
            Value::I8(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::Bool(v) => Some(v as i64),
            Value::F32(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::F32(v) => v as f64,
            other => other.as_i64().unwrap_or_default() as f64,
        }
    }

    fn is_truthy(&self) -> bool {
        match *self {
            Value::F32(v) => v != 0.0,
            Value::Bool(v) => v,
            other => other.as_i64().unwrap_or_default() != 0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Rust types with a native record representation.
pub trait Storable: Into<Value> + TryFrom<Value> {
    const TAG: TypeTag;
}

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }

            impl Storable for $ty {
                const TAG: TypeTag = TypeTag::$variant;
            }

            impl TryFrom<Value> for $ty {
                type Error = TypeTag;

                /// Succeeds only when the value is stored with exactly this type.
                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(other.tag()),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    f32 => F32,
    bool => Bool,
}

/// The three fixed header bytes preceding each record's name and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub name_len: u8,
    pub data_len: u8,
    pub tag_code: u8,
}

impl RecordHeader {
    pub fn new(name_len: u8, tag: TypeTag) -> Self {
        Self {
            name_len,
            data_len: tag.width() as u8,
            tag_code: tag.code(),
        }
    }

    pub const fn size() -> usize {
        RECORD_HEADER_SIZE
    }

    /// Total record size: header, name and payload.
    pub fn record_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.name_len as usize + self.data_len as usize
    }

    pub fn tag(&self) -> Result<TypeTag, CodecError> {
        TypeTag::try_from(self.tag_code)
    }

    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        [self.name_len, self.data_len, self.tag_code]
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: RECORD_HEADER_SIZE,
                available: bytes.len(),
            });
        }

        Ok(Self {
            name_len: bytes[0],
            data_len: bytes[1],
            tag_code: bytes[2],
        })
    }
}
