//! Element encoders registered in the type registry.
//!
//! Each function writes one value whose tag the caller has already handled.
//! Multi-byte integers are written big-endian. Floats are written as their
//! IEEE-754 bit patterns, so they round-trip exactly.

use crate::core::buffer::Buffer;
use crate::core::registry::Registry;
use crate::core::types::{check_key, DataType, Value, MAX_NSLEN};
use crate::error::{constants, ProtocolError, Result};

fn mismatch(expected: DataType, found: &Value) -> ProtocolError {
    ProtocolError::TypeMismatch {
        expected,
        found: found.data_type(),
    }
}

macro_rules! pack_be {
    ($name:ident, $variant:ident) => {
        pub(crate) fn $name(buf: &mut Buffer, value: &Value) -> Result<()> {
            match value {
                Value::$variant(v) => buf.write_bytes(&v.to_be_bytes()),
                other => Err(mismatch(DataType::$variant, other)),
            }
        }
    };
}

pack_be!(pack_byte, Byte);
pack_be!(pack_int8, Int8);
pack_be!(pack_int16, Int16);
pack_be!(pack_int32, Int32);
pack_be!(pack_int64, Int64);
pack_be!(pack_uint8, UInt8);
pack_be!(pack_uint16, UInt16);
pack_be!(pack_uint32, UInt32);
pack_be!(pack_uint64, UInt64);
pack_be!(pack_float, Float);
pack_be!(pack_double, Double);
pack_be!(pack_time, Time);
pack_be!(pack_rank, Rank);

pub(crate) fn pack_undef(_buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::Undef => Ok(()),
        other => Err(mismatch(DataType::Undef, other)),
    }
}

pub(crate) fn pack_bool(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::Bool(v) => buf.write_bytes(&[u8::from(*v)]),
        other => Err(mismatch(DataType::Bool, other)),
    }
}

/// Platform-width values always carry their concrete wire width
pub(crate) fn write_size(buf: &mut Buffer, size: usize) -> Result<()> {
    buf.store_data_type(DataType::UInt64.code())?;
    buf.write_bytes(&(size as u64).to_be_bytes())
}

pub(crate) fn pack_size(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::Size(v) => write_size(buf, *v),
        other => Err(mismatch(DataType::Size, other)),
    }
}

pub(crate) fn pack_pid(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::Pid(v) => {
            buf.store_data_type(DataType::UInt32.code())?;
            buf.write_bytes(&v.to_be_bytes())
        }
        other => Err(mismatch(DataType::Pid, other)),
    }
}

pub(crate) fn pack_status(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::Status(status) => buf.write_bytes(&status.code().to_be_bytes()),
        other => Err(mismatch(DataType::Status, other)),
    }
}

pub(crate) fn pack_data_type(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::DataType(tag) => buf.store_data_type(tag.code()),
        other => Err(mismatch(DataType::DataType, other)),
    }
}

pub(crate) fn pack_timeval(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::TimeVal(tv) => {
            buf.write_bytes(&tv.sec.to_be_bytes())?;
            buf.write_bytes(&tv.usec.to_be_bytes())
        }
        other => Err(mismatch(DataType::TimeVal, other)),
    }
}

/// Length-prefixed string; the count includes the terminating NUL and an
/// absent string is a zero count
pub(crate) fn write_str(buf: &mut Buffer, s: Option<&str>) -> Result<()> {
    let Some(s) = s else {
        return buf.write_bytes(&0i32.to_be_bytes());
    };
    let len = s
        .len()
        .checked_add(1)
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| ProtocolError::BadParam(constants::ERR_STRING_TOO_LONG.into()))?;
    buf.write_bytes(&len.to_be_bytes())?;
    buf.write_bytes(s.as_bytes())?;
    buf.write_bytes(&[0])
}

pub(crate) fn pack_string(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => write_str(buf, s.as_deref()),
        other => Err(mismatch(DataType::String, other)),
    }
}

pub(crate) fn pack_byte_object(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::ByteObject(bytes) => {
            write_size(buf, bytes.len())?;
            buf.write_bytes(bytes)
        }
        other => Err(mismatch(DataType::ByteObject, other)),
    }
}

pub(crate) fn pack_proc(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::Proc(proc_id) => {
            if proc_id.nspace.len() > MAX_NSLEN {
                return Err(ProtocolError::BadParam(format!(
                    "namespace exceeds {MAX_NSLEN} bytes"
                )));
            }
            write_str(buf, Some(&proc_id.nspace))?;
            buf.write_bytes(&proc_id.rank.to_be_bytes())
        }
        other => Err(mismatch(DataType::Proc, other)),
    }
}

/// Tag followed by payload, for fields whose kind varies per value
pub(crate) fn pack_tagged(buf: &mut Buffer, value: &Value) -> Result<()> {
    let entry = Registry::global().entry(value.data_type())?;
    buf.store_data_type(entry.tag.code())?;
    (entry.pack)(buf, value)
}

pub(crate) fn pack_info(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::Info(info) => {
            check_key(&info.key)?;
            write_str(buf, Some(&info.key))?;
            buf.write_bytes(&info.directives.to_be_bytes())?;
            pack_tagged(buf, &info.value)
        }
        other => Err(mismatch(DataType::Info, other)),
    }
}

pub(crate) fn pack_kval(buf: &mut Buffer, value: &Value) -> Result<()> {
    match value {
        Value::KeyValue(kv) => {
            check_key(&kv.key)?;
            write_str(buf, Some(&kv.key))?;
            pack_tagged(buf, &kv.value)
        }
        other => Err(mismatch(DataType::KeyValue, other)),
    }
}

pub(crate) fn pack_data_array(buf: &mut Buffer, value: &Value) -> Result<()> {
    let Value::DataArray(array) = value else {
        return Err(mismatch(DataType::DataArray, value));
    };
    if array.kind() == DataType::Undef {
        return Err(ProtocolError::BadParam(
            "data arrays of UNDEF elements are not encodable".into(),
        ));
    }
    let entry = Registry::global().entry(array.kind())?;
    buf.store_data_type(entry.tag.code())?;
    write_size(buf, array.len())?;
    for item in array.items() {
        (entry.pack)(buf, item)?;
    }
    Ok(())
}
