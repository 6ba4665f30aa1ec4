//! Element decoders registered in the type registry.
//!
//! Decoders never trust a length or count read from the stream: every read is
//! bounds checked against the unread region, and nested composites are limited
//! to [`MAX_NESTING_DEPTH`] levels.

use crate::core::buffer::Buffer;
use crate::core::coerce::get_number;
use crate::core::registry::Registry;
use crate::core::types::{
    check_key, DataArray, DataType, Info, KeyValue, ProcId, TimeVal, Value,
};
use crate::error::{constants, ProtocolError, Result, Status};

/// Deepest nesting of info, key/value and array records accepted on unpack
pub const MAX_NESTING_DEPTH: usize = 32;

macro_rules! unpack_be {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub(crate) fn $name(buf: &mut Buffer) -> Result<Value> {
            Ok(Value::$variant(<$ty>::from_be_bytes(buf.read_array()?)))
        }
    };
}

unpack_be!(unpack_byte, Byte, u8);
unpack_be!(unpack_int8, Int8, i8);
unpack_be!(unpack_int16, Int16, i16);
unpack_be!(unpack_int32, Int32, i32);
unpack_be!(unpack_int64, Int64, i64);
unpack_be!(unpack_uint8, UInt8, u8);
unpack_be!(unpack_uint16, UInt16, u16);
unpack_be!(unpack_uint32, UInt32, u32);
unpack_be!(unpack_uint64, UInt64, u64);
unpack_be!(unpack_float, Float, f32);
unpack_be!(unpack_double, Double, f64);
unpack_be!(unpack_time, Time, u64);
unpack_be!(unpack_rank, Rank, u32);

pub(crate) fn unpack_undef(_buf: &mut Buffer) -> Result<Value> {
    Ok(Value::Undef)
}

pub(crate) fn unpack_bool(buf: &mut Buffer) -> Result<Value> {
    match buf.read_array::<1>()? {
        [0] => Ok(Value::Bool(false)),
        [1] => Ok(Value::Bool(true)),
        _ => Err(ProtocolError::UnpackFailure(
            constants::ERR_INVALID_BOOL.into(),
        )),
    }
}

pub(crate) fn read_tag(buf: &mut Buffer) -> Result<DataType> {
    let code = buf.get_data_type()?;
    DataType::from_code(code).ok_or(ProtocolError::UnknownType(code))
}

/// Read a platform-width value: the sender's concrete width tag, then the
/// value, converted to `target` with sign and range checks
fn read_sized(buf: &mut Buffer, target: DataType) -> Result<Value> {
    let remote = read_tag(buf)?;
    let raw = match remote {
        DataType::Int8 => unpack_int8(buf)?,
        DataType::Int16 => unpack_int16(buf)?,
        DataType::Int32 => unpack_int32(buf)?,
        DataType::Int64 => unpack_int64(buf)?,
        DataType::UInt8 => unpack_uint8(buf)?,
        DataType::UInt16 => unpack_uint16(buf)?,
        DataType::UInt32 => unpack_uint32(buf)?,
        DataType::UInt64 => unpack_uint64(buf)?,
        other => {
            return Err(ProtocolError::TypeMismatch {
                expected: target,
                found: other,
            })
        }
    };
    get_number(&raw, target)
}

pub(crate) fn read_size(buf: &mut Buffer) -> Result<usize> {
    match read_sized(buf, DataType::Size)? {
        Value::Size(n) => Ok(n),
        other => Err(ProtocolError::TypeMismatch {
            expected: DataType::Size,
            found: other.data_type(),
        }),
    }
}

pub(crate) fn unpack_size(buf: &mut Buffer) -> Result<Value> {
    read_size(buf).map(Value::Size)
}

pub(crate) fn unpack_pid(buf: &mut Buffer) -> Result<Value> {
    read_sized(buf, DataType::Pid)
}

pub(crate) fn unpack_status(buf: &mut Buffer) -> Result<Value> {
    Ok(Value::Status(Status(i32::from_be_bytes(buf.read_array()?))))
}

pub(crate) fn unpack_data_type(buf: &mut Buffer) -> Result<Value> {
    read_tag(buf).map(Value::DataType)
}

pub(crate) fn unpack_timeval(buf: &mut Buffer) -> Result<Value> {
    let sec = i64::from_be_bytes(buf.read_array()?);
    let usec = i64::from_be_bytes(buf.read_array()?);
    Ok(Value::TimeVal(TimeVal { sec, usec }))
}

/// Counterpart of `pack::write_str`; a zero count decodes to `None`
pub(crate) fn read_str(buf: &mut Buffer) -> Result<Option<String>> {
    let len = i32::from_be_bytes(buf.read_array()?);
    if len < 0 {
        return Err(ProtocolError::UnpackFailure(
            constants::ERR_NEGATIVE_COUNT.into(),
        ));
    }
    if len == 0 {
        return Ok(None);
    }
    let bytes = buf.read_bytes(len as usize)?;
    let Some((&0, text)) = bytes.split_last() else {
        return Err(ProtocolError::UnpackFailure(
            constants::ERR_STRING_NOT_TERMINATED.into(),
        ));
    };
    String::from_utf8(text.to_vec())
        .map(Some)
        .map_err(|_| ProtocolError::UnpackFailure(constants::ERR_STRING_NOT_UTF8.into()))
}

fn read_required_str(buf: &mut Buffer, what: &str) -> Result<String> {
    read_str(buf)?.ok_or_else(|| ProtocolError::UnpackFailure(format!("{what} is absent")))
}

pub(crate) fn unpack_string(buf: &mut Buffer) -> Result<Value> {
    read_str(buf).map(Value::String)
}

pub(crate) fn unpack_byte_object(buf: &mut Buffer) -> Result<Value> {
    let len = read_size(buf)?;
    Ok(Value::ByteObject(buf.read_bytes(len)?.to_vec()))
}

pub(crate) fn unpack_proc(buf: &mut Buffer) -> Result<Value> {
    let nspace = read_required_str(buf, "namespace")?;
    let rank = u32::from_be_bytes(buf.read_array()?);
    ProcId::new(nspace, rank)
        .map(Value::Proc)
        .map_err(|e| ProtocolError::UnpackFailure(e.to_string()))
}

/// Run a nested decode with the depth limit applied
fn nested<T>(buf: &mut Buffer, f: impl FnOnce(&mut Buffer) -> Result<T>) -> Result<T> {
    if buf.depth >= MAX_NESTING_DEPTH {
        return Err(ProtocolError::UnpackFailure(
            constants::ERR_NESTING_TOO_DEEP.into(),
        ));
    }
    buf.depth += 1;
    let result = f(buf);
    buf.depth -= 1;
    result
}

/// Counterpart of `pack::pack_tagged`
pub(crate) fn unpack_tagged(buf: &mut Buffer) -> Result<Value> {
    let code = buf.get_data_type()?;
    let entry = Registry::global().lookup(code)?;
    nested(buf, entry.unpack)
}

pub(crate) fn unpack_info(buf: &mut Buffer) -> Result<Value> {
    let key = read_required_str(buf, "info key")?;
    check_key(&key).map_err(|e| ProtocolError::UnpackFailure(e.to_string()))?;
    let directives = u32::from_be_bytes(buf.read_array()?);
    let value = unpack_tagged(buf)?;
    Ok(Value::Info(Box::new(Info {
        key,
        directives,
        value,
    })))
}

pub(crate) fn unpack_kval(buf: &mut Buffer) -> Result<Value> {
    let key = read_required_str(buf, "key")?;
    check_key(&key).map_err(|e| ProtocolError::UnpackFailure(e.to_string()))?;
    let value = unpack_tagged(buf)?;
    Ok(Value::KeyValue(Box::new(KeyValue { key, value })))
}

pub(crate) fn unpack_data_array(buf: &mut Buffer) -> Result<Value> {
    let kind = read_tag(buf)?;
    if kind == DataType::Undef {
        return Err(ProtocolError::UnpackFailure(
            "data array of UNDEF elements".into(),
        ));
    }
    let count = read_size(buf)?;
    // every remaining element kind occupies at least one byte
    if count > buf.remaining() {
        return Err(ProtocolError::ReadPastEnd);
    }
    let entry = Registry::global().entry(kind)?;
    let items = nested(buf, |buf| {
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push((entry.unpack)(buf)?);
        }
        Ok(items)
    })?;
    DataArray::new(kind, items).map(Value::from)
}
