//! # Codec
//!
//! Public `pack`/`unpack` entry points. Downstream code exchanges values only
//! through these functions and never touches buffer internals.
//!
//! ## Wire Format
//! ```text
//! self-describing: [INT32 tag][count: i32][tag: u16][value]...
//! condensed:                  [count: i32]          [value]...
//! ```
//!
//! Both operations are atomic: on failure the buffer's cursors are restored
//! to where they were before the call.

use crate::core::buffer::Buffer;
use crate::core::coerce::get_number;
use crate::core::registry::Registry;
use crate::core::types::{DataType, Info, ProcId, Value};
use crate::core::unpack::read_tag;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use std::slice;

/// Pack `values`, all of kind `tag`, as one counted group
pub fn pack(buf: &mut Buffer, tag: DataType, values: &[Value]) -> Result<()> {
    let checkpoint = buf.checkpoint();
    let result = pack_group(buf, tag, values);
    if result.is_err() {
        buf.restore(checkpoint);
        global_metrics().codec_error();
    }
    result
}

/// Pack a single value under its own tag
pub fn pack_one(buf: &mut Buffer, value: &Value) -> Result<()> {
    pack(buf, value.data_type(), slice::from_ref(value))
}

fn pack_group(buf: &mut Buffer, tag: DataType, values: &[Value]) -> Result<()> {
    if let Some(bad) = values.iter().find(|v| v.data_type() != tag) {
        return Err(ProtocolError::TypeMismatch {
            expected: tag,
            found: bad.data_type(),
        });
    }
    let count = i32::try_from(values.len())
        .map_err(|_| ProtocolError::BadParam("too many values in one pack call".into()))?;
    let entry = Registry::global().entry(tag)?;

    if buf.is_self_describing() {
        buf.store_data_type(DataType::Int32.code())?;
    }
    buf.write_bytes(&count.to_be_bytes())?;
    if buf.is_self_describing() {
        buf.store_data_type(tag.code())?;
    }
    for value in values {
        (entry.pack)(buf, value)?;
    }
    Ok(())
}

/// Unpack one counted group of kind `tag`, accepting at most `max` values.
///
/// In self-describing buffers a group stored under a different numeric kind
/// is converted through the coercion engine; any other tag disagreement is a
/// type mismatch.
pub fn unpack(buf: &mut Buffer, tag: DataType, max: usize) -> Result<Vec<Value>> {
    let checkpoint = buf.checkpoint();
    let result = unpack_group(buf, tag, max);
    if result.is_err() {
        buf.restore(checkpoint);
        global_metrics().codec_error();
    }
    result
}

/// Unpack a group that must hold exactly one value
pub fn unpack_one(buf: &mut Buffer, tag: DataType) -> Result<Value> {
    let checkpoint = buf.checkpoint();
    let mut values = unpack(buf, tag, 1)?;
    match values.pop() {
        Some(value) => Ok(value),
        None => {
            buf.restore(checkpoint);
            Err(ProtocolError::UnpackFailure("empty value group".into()))
        }
    }
}

fn unpack_group(buf: &mut Buffer, tag: DataType, max: usize) -> Result<Vec<Value>> {
    if buf.is_self_describing() {
        let count_tag = read_tag(buf)?;
        if count_tag != DataType::Int32 {
            return Err(ProtocolError::TypeMismatch {
                expected: DataType::Int32,
                found: count_tag,
            });
        }
    }
    let count = i32::from_be_bytes(buf.read_array()?);
    let count = usize::try_from(count)
        .map_err(|_| ProtocolError::UnpackFailure(constants::ERR_NEGATIVE_COUNT.into()))?;
    if count > max {
        return Err(ProtocolError::InadequateSpace {
            required: count,
            available: max,
        });
    }

    let stored = if buf.is_self_describing() {
        read_tag(buf)?
    } else {
        tag
    };
    let convert = stored != tag;
    if convert && !(stored.is_numeric() && tag.is_numeric()) {
        return Err(ProtocolError::TypeMismatch {
            expected: tag,
            found: stored,
        });
    }

    let entry = Registry::global().entry(stored)?;
    let mut values = Vec::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        let value = (entry.unpack)(buf)?;
        values.push(if convert {
            get_number(&value, tag)?
        } else {
            value
        });
    }
    Ok(values)
}

/// Tag of the next packed group, without consuming anything
pub fn peek_type(buf: &Buffer) -> Result<DataType> {
    let count_tag = buf.peek_data_type()?;
    if count_tag != DataType::Int32.code() {
        return DataType::from_code(count_tag).ok_or(ProtocolError::UnknownType(count_tag));
    }
    let mut probe = Buffer::from_bytes(buf.mode(), buf.unread().to_vec());
    probe.get_data_type()?;
    probe.read_array::<4>()?;
    read_tag(&mut probe)
}

/// Rust types with a fixed wire kind
pub trait WireType: Sized {
    const TAG: DataType;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self>;
}

fn wrong_value(expected: DataType, value: &Value) -> ProtocolError {
    ProtocolError::TypeMismatch {
        expected,
        found: value.data_type(),
    }
}

macro_rules! wire_type {
    ($ty:ty, $variant:ident) => {
        impl WireType for $ty {
            const TAG: DataType = DataType::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(wrong_value(Self::TAG, &other)),
                }
            }
        }
    };
}

wire_type!(bool, Bool);
wire_type!(i8, Int8);
wire_type!(i16, Int16);
wire_type!(i32, Int32);
wire_type!(i64, Int64);
wire_type!(u8, UInt8);
wire_type!(u16, UInt16);
wire_type!(u32, UInt32);
wire_type!(u64, UInt64);
wire_type!(usize, Size);
wire_type!(f32, Float);
wire_type!(f64, Double);
wire_type!(Option<String>, String);
wire_type!(ProcId, Proc);
wire_type!(Vec<u8>, ByteObject);

impl WireType for String {
    const TAG: DataType = DataType::String;

    fn into_value(self) -> Value {
        Value::String(Some(self))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(Some(s)) => Ok(s),
            Value::String(None) => Err(ProtocolError::UnpackFailure(
                "expected a string, found an absent string".into(),
            )),
            other => Err(wrong_value(Self::TAG, &other)),
        }
    }
}

impl WireType for Info {
    const TAG: DataType = DataType::Info;

    fn into_value(self) -> Value {
        Value::from(self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Info(info) => Ok(*info),
            other => Err(wrong_value(Self::TAG, &other)),
        }
    }
}

impl Buffer {
    /// Pack native values as one group
    pub fn pack_values<T: WireType + Clone>(&mut self, values: &[T]) -> Result<()> {
        let values: Vec<Value> = values.iter().cloned().map(T::into_value).collect();
        pack(self, T::TAG, &values)
    }

    /// Unpack one group into native values
    pub fn unpack_values<T: WireType>(&mut self, max: usize) -> Result<Vec<T>> {
        let checkpoint = self.checkpoint();
        let converted = unpack(self, T::TAG, max)
            .and_then(|values| values.into_iter().map(T::from_value).collect());
        if converted.is_err() {
            self.restore(checkpoint);
        }
        converted
    }
}
