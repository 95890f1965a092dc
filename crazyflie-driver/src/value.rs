//! Typed values exchanged with the log and param facilities.
//!
//! Log and param TOCs use different type code tables that map onto the same
//! set of wire encodings, see [Directive].

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    pub fn to_f64(self) -> f64 {
        match self {
            Value::U8(v) => v as f64,
            Value::U16(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::U64(v) => v as f64,
            Value::I8(v) => v as f64,
            Value::I16(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
        }
    }

    /// Integer value, floats are truncated
    pub fn to_i64(self) -> i64 {
        match self {
            Value::U8(v) => v as i64,
            Value::U16(v) => v as i64,
            Value::U32(v) => v as i64,
            Value::U64(v) => v as i64,
            Value::I8(v) => v as i64,
            Value::I16(v) => v as i64,
            Value::I32(v) => v as i64,
            Value::I64(v) => v,
            Value::F32(v) => v as i64,
            Value::F64(v) => v as i64,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from!(u8 => U8, u16 => U16, u32 => U32, u64 => U64,
            i8 => I8, i16 => I16, i32 => I32, i64 => I64,
            f32 => F32, f64 => F64);

/// How a value is laid out on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    U8,
    U16Le,
    U32Le,
    U64Le,
    I8,
    I16Le,
    I32Le,
    I64Le,
    /// IEEE 754 half precision, little endian
    F16Le,
    F32Le,
    F64Be,
}

impl Directive {
    /// Size in bytes on the wire
    pub fn size(self) -> usize {
        match self {
            Directive::U8 | Directive::I8 => 1,
            Directive::U16Le | Directive::I16Le | Directive::F16Le => 2,
            Directive::U32Le | Directive::I32Le | Directive::F32Le => 4,
            Directive::U64Le | Directive::I64Le | Directive::F64Be => 8,
        }
    }

    pub fn decode<R: Read>(self, reader: &mut R) -> io::Result<Value> {
        Ok(match self {
            Directive::U8 => Value::U8(reader.read_u8()?),
            Directive::U16Le => Value::U16(reader.read_u16::<LittleEndian>()?),
            Directive::U32Le => Value::U32(reader.read_u32::<LittleEndian>()?),
            Directive::U64Le => Value::U64(reader.read_u64::<LittleEndian>()?),
            Directive::I8 => Value::I8(reader.read_i8()?),
            Directive::I16Le => Value::I16(reader.read_i16::<LittleEndian>()?),
            Directive::I32Le => Value::I32(reader.read_i32::<LittleEndian>()?),
            Directive::I64Le => Value::I64(reader.read_i64::<LittleEndian>()?),
            Directive::F16Le => Value::F32(f16_to_f32(reader.read_u16::<LittleEndian>()?)),
            Directive::F32Le => Value::F32(reader.read_f32::<LittleEndian>()?),
            Directive::F64Be => Value::F64(reader.read_f64::<BigEndian>()?),
        })
    }

    /// Decode a whole buffer, `None` when it is too short
    pub fn decode_bytes(self, mut data: &[u8]) -> Option<Value> {
        self.decode(&mut data).ok()
    }

    /// Encode `value` converted to this directive's type
    pub fn encode(self, value: Value) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        let int = value.to_i64();
        let float = value.to_f64();

        // Writing into a Vec cannot fail
        let _ = match self {
            Directive::U8 => out.write_u8(int as u8),
            Directive::U16Le => out.write_u16::<LittleEndian>(int as u16),
            Directive::U32Le => out.write_u32::<LittleEndian>(int as u32),
            Directive::U64Le => out.write_u64::<LittleEndian>(match value {
                Value::U64(v) => v,
                _ => int as u64,
            }),
            Directive::I8 => out.write_i8(int as i8),
            Directive::I16Le => out.write_i16::<LittleEndian>(int as i16),
            Directive::I32Le => out.write_i32::<LittleEndian>(int as i32),
            Directive::I64Le => out.write_i64::<LittleEndian>(int),
            Directive::F16Le => out.write_u16::<LittleEndian>(f32_to_f16(float as f32)),
            Directive::F32Le => out.write_f32::<LittleEndian>(float as f32),
            Directive::F64Be => out.write_f64::<BigEndian>(float),
        };
        out
    }
}

fn f16_to_f32(half: u16) -> f32 {
    let sign = if half & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = ((half >> 10) & 0x1F) as i32;
    let mantissa = (half & 0x03FF) as f32;

    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        0x1F if mantissa == 0.0 => sign * f32::INFINITY,
        0x1F => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}

fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x007F_FFFF;

    if exponent == 0xFF {
        let nan = if mantissa != 0 { 0x0200 } else { 0 };
        return sign | 0x7C00 | nan;
    }

    let exponent = exponent - 127 + 15;
    if exponent >= 0x1F {
        sign | 0x7C00
    } else if exponent <= 0 {
        if exponent < -10 {
            return sign;
        }
        let mantissa = (mantissa | 0x0080_0000) >> (1 - exponent);
        sign | (mantissa >> 13) as u16
    } else {
        sign | ((exponent as u16) << 10) | (mantissa >> 13) as u16
    }
}

/// A type code table of a TOC
pub trait ValueType:
    Copy + fmt::Debug + PartialEq + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static
{
    fn from_code(code: u8) -> Option<Self>;
    fn code(self) -> u8;
    /// Name of the C type in the firmware
    fn ctype(self) -> &'static str;
    fn directive(self) -> Directive;

    fn size(self) -> usize {
        self.directive().size()
    }
}

/// Type codes of log variables
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum LogType {
    Uint8 = 1,
    Uint16 = 2,
    Uint32 = 3,
    Int8 = 4,
    Int16 = 5,
    Int32 = 6,
    Float = 7,
    FP16 = 8,
}

impl ValueType for LogType {
    fn from_code(code: u8) -> Option<Self> {
        LogType::try_from(code).ok()
    }

    fn code(self) -> u8 {
        self.into()
    }

    fn ctype(self) -> &'static str {
        match self {
            LogType::Uint8 => "uint8_t",
            LogType::Uint16 => "uint16_t",
            LogType::Uint32 => "uint32_t",
            LogType::Int8 => "int8_t",
            LogType::Int16 => "int16_t",
            LogType::Int32 => "int32_t",
            LogType::Float => "float",
            LogType::FP16 => "FP16",
        }
    }

    fn directive(self) -> Directive {
        match self {
            LogType::Uint8 => Directive::U8,
            LogType::Uint16 => Directive::U16Le,
            LogType::Uint32 => Directive::U32Le,
            LogType::Int8 => Directive::I8,
            LogType::Int16 => Directive::I16Le,
            LogType::Int32 => Directive::I32Le,
            LogType::Float => Directive::F32Le,
            LogType::FP16 => Directive::F16Le,
        }
    }
}

/// Type codes of parameters
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum ParamType {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    FP16 = 5,
    Float = 6,
    Double = 7,
    Uint8 = 8,
    Uint16 = 9,
    Uint32 = 10,
    Uint64 = 11,
}

impl ValueType for ParamType {
    fn from_code(code: u8) -> Option<Self> {
        ParamType::try_from(code).ok()
    }

    fn code(self) -> u8 {
        self.into()
    }

    fn ctype(self) -> &'static str {
        match self {
            ParamType::Int8 => "int8_t",
            ParamType::Int16 => "int16_t",
            ParamType::Int32 => "int32_t",
            ParamType::Int64 => "int64_t",
            ParamType::FP16 => "FP16",
            ParamType::Float => "float",
            ParamType::Double => "double",
            ParamType::Uint8 => "uint8_t",
            ParamType::Uint16 => "uint16_t",
            ParamType::Uint32 => "uint32_t",
            ParamType::Uint64 => "uint64_t",
        }
    }

    fn directive(self) -> Directive {
        match self {
            ParamType::Int8 => Directive::I8,
            ParamType::Int16 => Directive::I16Le,
            ParamType::Int32 => Directive::I32Le,
            ParamType::Int64 => Directive::I64Le,
            ParamType::FP16 => Directive::F16Le,
            ParamType::Float => Directive::F32Le,
            ParamType::Double => Directive::F64Be,
            ParamType::Uint8 => Directive::U8,
            ParamType::Uint16 => Directive::U16Le,
            ParamType::Uint32 => Directive::U32Le,
            ParamType::Uint64 => Directive::U64Le,
        }
    }
}
