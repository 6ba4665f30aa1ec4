//! # Numeric Coercion
//!
//! Converts a numeric [`Value`] into a differently-typed numeric kind.
//!
//! Two checks run in order before anything is produced:
//! 1. **Sign change**: a negative source cannot become an unsigned kind.
//! 2. **Range**: the source must fit the destination's minimum and maximum.
//!
//! Float and double destinations accept every numeric source and may drop
//! fractional or low-order precision. Float sources into integer kinds are
//! truncated toward zero, then range checked.
//!
//! Every ordered pair of kinds in [`DataType::NUMERIC`] is handled by the same
//! path, and every branch returns either a value or a specific error.

use crate::core::types::{DataType, Value};
use crate::error::{ProtocolError, Result, Status};

/// Widened view of a numeric source
#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Result<Self> {
        let number = match *value {
            Value::Size(v) => Number::Unsigned(v as u64),
            Value::Pid(v) => Number::Unsigned(u64::from(v)),
            Value::Int8(v) => Number::Signed(i64::from(v)),
            Value::Int16(v) => Number::Signed(i64::from(v)),
            Value::Int32(v) => Number::Signed(i64::from(v)),
            Value::Int64(v) => Number::Signed(v),
            Value::UInt8(v) => Number::Unsigned(u64::from(v)),
            Value::UInt16(v) => Number::Unsigned(u64::from(v)),
            Value::UInt32(v) => Number::Unsigned(u64::from(v)),
            Value::UInt64(v) => Number::Unsigned(v),
            Value::Float(v) => Number::Float(f64::from(v)),
            Value::Double(v) => Number::Float(v),
            Value::Rank(v) => Number::Unsigned(u64::from(v)),
            Value::Status(Status(v)) => Number::Signed(i64::from(v)),
            ref other => {
                return Err(ProtocolError::BadParam(format!(
                    "{} is not a numeric kind",
                    other.data_type()
                )))
            }
        };
        Ok(number)
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Signed(v) => v as f64,
            Number::Unsigned(v) => v as f64,
            Number::Float(v) => v,
        }
    }
}

/// Representable range of an integer kind, `None` for floating kinds
fn integer_bounds(kind: DataType) -> Option<(i128, i128)> {
    let bounds = match kind {
        DataType::Size => (0, usize::MAX as i128),
        DataType::Pid | DataType::UInt32 | DataType::Rank => (0, i128::from(u32::MAX)),
        DataType::Int8 => (i128::from(i8::MIN), i128::from(i8::MAX)),
        DataType::Int16 => (i128::from(i16::MIN), i128::from(i16::MAX)),
        DataType::Int32 | DataType::Status => (i128::from(i32::MIN), i128::from(i32::MAX)),
        DataType::Int64 => (i128::from(i64::MIN), i128::from(i64::MAX)),
        DataType::UInt8 => (0, i128::from(u8::MAX)),
        DataType::UInt16 => (0, i128::from(u16::MAX)),
        DataType::UInt64 => (0, i128::from(u64::MAX)),
        _ => return None,
    };
    Some(bounds)
}

/// Build an integer value of `kind`; `v` is already range checked
fn integer_value(kind: DataType, v: i128) -> Result<Value> {
    let value = match kind {
        DataType::Size => Value::Size(v as usize),
        DataType::Pid => Value::Pid(v as u32),
        DataType::Int8 => Value::Int8(v as i8),
        DataType::Int16 => Value::Int16(v as i16),
        DataType::Int32 => Value::Int32(v as i32),
        DataType::Int64 => Value::Int64(v as i64),
        DataType::UInt8 => Value::UInt8(v as u8),
        DataType::UInt16 => Value::UInt16(v as u16),
        DataType::UInt32 => Value::UInt32(v as u32),
        DataType::UInt64 => Value::UInt64(v as u64),
        DataType::Rank => Value::Rank(v as u32),
        DataType::Status => Value::Status(Status(v as i32)),
        other => {
            return Err(ProtocolError::BadParam(format!(
                "{other} is not an integer kind"
            )))
        }
    };
    Ok(value)
}

/// Convert `value` to the numeric kind `dest`.
///
/// Same-kind requests return a copy. Non-numeric source or destination kinds
/// are rejected with [`ProtocolError::BadParam`].
pub fn get_number(value: &Value, dest: DataType) -> Result<Value> {
    let from = value.data_type();
    if !dest.is_numeric() {
        return Err(ProtocolError::BadParam(format!(
            "{dest} is not a numeric kind"
        )));
    }
    let number = Number::of(value)?;
    if from == dest {
        return Ok(value.clone());
    }

    let Some((min, max)) = integer_bounds(dest) else {
        return match dest {
            DataType::Float => Ok(Value::Float(number.as_f64() as f32)),
            _ => Ok(Value::Double(number.as_f64())),
        };
    };
    let unsigned_dest = min == 0;

    let wide = match number {
        Number::Signed(v) => {
            if v < 0 && unsigned_dest {
                return Err(ProtocolError::SignChange { from, to: dest });
            }
            i128::from(v)
        }
        Number::Unsigned(v) => i128::from(v),
        Number::Float(v) => {
            if v.is_nan() {
                return Err(ProtocolError::LostPrecision { from, to: dest });
            }
            if v < 0.0 && unsigned_dest {
                return Err(ProtocolError::SignChange { from, to: dest });
            }
            // saturating cast; infinities land outside every range below
            v.trunc() as i128
        }
    };

    if wide < min || wide > max {
        return Err(ProtocolError::LostPrecision { from, to: dest });
    }
    integer_value(dest, wide)
}

/// Rust scalar types with a numeric wire kind
pub trait Numeric: Sized + Copy {
    const KIND: DataType;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! numeric_impl {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl Numeric for $ty {
            const KIND: DataType = DataType::$kind;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

numeric_impl!(i8, Int8, Int8);
numeric_impl!(i16, Int16, Int16);
numeric_impl!(i32, Int32, Int32);
numeric_impl!(i64, Int64, Int64);
numeric_impl!(u8, UInt8, UInt8);
numeric_impl!(u16, UInt16, UInt16);
numeric_impl!(u32, UInt32, UInt32);
numeric_impl!(u64, UInt64, UInt64);
numeric_impl!(usize, Size, Size);
numeric_impl!(f32, Float, Float);
numeric_impl!(f64, Double, Double);
numeric_impl!(Status, Status, Status);

/// Convert `value` into `dest`, writing only when the conversion succeeds
pub fn load_number<T: Numeric>(value: &Value, dest: &mut T) -> Result<()> {
    let converted = get_number(value, T::KIND)?;
    *dest = T::from_value(&converted).ok_or_else(|| ProtocolError::TypeMismatch {
        expected: T::KIND,
        found: converted.data_type(),
    })?;
    Ok(())
}

impl Value {
    /// See [`get_number`]
    pub fn get_number(&self, dest: DataType) -> Result<Value> {
        get_number(self, dest)
    }

    /// See [`load_number`]
    pub fn load_number<T: Numeric>(&self, dest: &mut T) -> Result<()> {
        load_number(self, dest)
    }
}
