//! Human-readable rendering of tagged values, used for `Display` and in
//! diagnostics.

use crate::core::registry::Registry;
use crate::core::types::Value;

/// Render any value through its registry entry
pub fn render(value: &Value) -> String {
    match Registry::global().entry(value.data_type()) {
        Ok(entry) => (entry.display)(value),
        Err(_) => format!("Data type: {}\tValue: <unregistered>", value.data_type()),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Undef => "UNDEF".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Byte(v) => format!("{v:#04x}"),
        Value::Size(v) => v.to_string(),
        Value::Pid(v) => v.to_string(),
        Value::Int8(v) => v.to_string(),
        Value::Int16(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::UInt8(v) => v.to_string(),
        Value::UInt16(v) => v.to_string(),
        Value::UInt32(v) => v.to_string(),
        Value::UInt64(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::TimeVal(tv) => format!("{}.{:06}", tv.sec, tv.usec),
        Value::Time(v) => v.to_string(),
        Value::Status(s) => s.to_string(),
        Value::Proc(p) => p.to_string(),
        Value::Rank(r) => r.to_string(),
        Value::DataType(t) => t.to_string(),
        other => render(other),
    }
}

pub(crate) fn display_scalar(value: &Value) -> String {
    format!("Data type: {}\tValue: {}", value.data_type(), scalar_text(value))
}

pub(crate) fn display_string(value: &Value) -> String {
    match value {
        Value::String(Some(s)) => format!("Data type: STRING\tValue: {s}"),
        _ => "Data type: STRING\tValue: NULL".to_string(),
    }
}

pub(crate) fn display_byte_object(value: &Value) -> String {
    match value {
        Value::ByteObject(bytes) => format!("Data type: BYTE_OBJECT\tSize: {}", bytes.len()),
        other => display_scalar(other),
    }
}

pub(crate) fn display_info(value: &Value) -> String {
    match value {
        Value::Info(info) => format!(
            "Data type: INFO\tKey: {}\tDirectives: {:#x}\t{}",
            info.key,
            info.directives,
            render(&info.value)
        ),
        other => display_scalar(other),
    }
}

pub(crate) fn display_kval(value: &Value) -> String {
    match value {
        Value::KeyValue(kv) => format!("Data type: KVAL\tKey: {}\t{}", kv.key, render(&kv.value)),
        other => display_scalar(other),
    }
}

pub(crate) fn display_data_array(value: &Value) -> String {
    match value {
        Value::DataArray(array) => {
            let items: Vec<String> = array.items().iter().map(render).collect();
            format!(
                "Data type: DATA_ARRAY\tKind: {}\tSize: {}\n{}",
                array.kind(),
                array.len(),
                items.join("\n")
            )
        }
        other => display_scalar(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Info, KeyValue};

    #[test]
    fn renders_scalars_and_composites() {
        assert_eq!(
            Value::Int32(-5).to_string(),
            "Data type: INT32\tValue: -5"
        );
        assert_eq!(
            Value::String(None).to_string(),
            "Data type: STRING\tValue: NULL"
        );
        let info = Value::from(Info::new("k", Value::UInt8(3)).required());
        assert_eq!(
            info.to_string(),
            "Data type: INFO\tKey: k\tDirectives: 0x1\tData type: UINT8\tValue: 3"
        );
        let kv = Value::from(KeyValue::new("x", Value::Bool(true)));
        assert!(kv.to_string().starts_with("Data type: KVAL\tKey: x"));
    }
}
