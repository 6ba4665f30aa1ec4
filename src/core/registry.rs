//! # Type Registry
//!
//! Fixed-size table mapping every [`DataType`] code to its codec entry. The
//! table is built once on first use and never mutated afterwards, so lookups
//! are a bounds check plus an index.

use crate::core::buffer::Buffer;
use crate::core::types::{DataType, Value};
use crate::core::{pack, print, unpack};
use crate::error::{ProtocolError, Result};
use once_cell::sync::Lazy;

/// Encode one element whose tag has already been handled
pub type PackFn = fn(&mut Buffer, &Value) -> Result<()>;
/// Decode one element whose tag has already been handled
pub type UnpackFn = fn(&mut Buffer) -> Result<Value>;
/// Human-readable rendering of one element
pub type DisplayFn = fn(&Value) -> String;

/// Codec routines for one tag
#[derive(Clone, Copy)]
pub struct CodecEntry {
    pub tag: DataType,
    pub name: &'static str,
    pub pack: PackFn,
    pub unpack: UnpackFn,
    pub display: DisplayFn,
}

impl std::fmt::Debug for CodecEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecEntry")
            .field("tag", &self.tag)
            .field("name", &self.name)
            .finish()
    }
}

const TABLE_SIZE: usize = 64;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::build);

/// Lookup table from tag code to [`CodecEntry`]
#[derive(Debug)]
pub struct Registry {
    table: [Option<CodecEntry>; TABLE_SIZE],
}

impl Registry {
    /// The process-wide registry
    pub fn global() -> &'static Registry {
        &REGISTRY
    }

    fn build() -> Self {
        let mut table = [None; TABLE_SIZE];
        for tag in DataType::ALL {
            table[usize::from(tag.code())] = Some(entry_for(tag));
        }
        Self { table }
    }

    /// Resolve a raw tag code read from the wire
    pub fn lookup(&self, code: u16) -> Result<&CodecEntry> {
        self.table
            .get(usize::from(code))
            .and_then(Option::as_ref)
            .ok_or(ProtocolError::UnknownType(code))
    }

    /// Resolve a known tag
    pub fn entry(&self, tag: DataType) -> Result<&CodecEntry> {
        self.lookup(tag.code())
    }

    /// Number of registered tags
    pub fn len(&self) -> usize {
        self.table.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn entry_for(tag: DataType) -> CodecEntry {
    match tag {
        DataType::Undef => entry(tag, pack::pack_undef, unpack::unpack_undef, print::display_scalar),
        DataType::Bool => entry(tag, pack::pack_bool, unpack::unpack_bool, print::display_scalar),
        DataType::Byte => entry(tag, pack::pack_byte, unpack::unpack_byte, print::display_scalar),
        DataType::String => entry(tag, pack::pack_string, unpack::unpack_string, print::display_string),
        DataType::Size => entry(tag, pack::pack_size, unpack::unpack_size, print::display_scalar),
        DataType::Pid => entry(tag, pack::pack_pid, unpack::unpack_pid, print::display_scalar),
        DataType::Int8 => entry(tag, pack::pack_int8, unpack::unpack_int8, print::display_scalar),
        DataType::Int16 => entry(tag, pack::pack_int16, unpack::unpack_int16, print::display_scalar),
        DataType::Int32 => entry(tag, pack::pack_int32, unpack::unpack_int32, print::display_scalar),
        DataType::Int64 => entry(tag, pack::pack_int64, unpack::unpack_int64, print::display_scalar),
        DataType::UInt8 => entry(tag, pack::pack_uint8, unpack::unpack_uint8, print::display_scalar),
        DataType::UInt16 => entry(tag, pack::pack_uint16, unpack::unpack_uint16, print::display_scalar),
        DataType::UInt32 => entry(tag, pack::pack_uint32, unpack::unpack_uint32, print::display_scalar),
        DataType::UInt64 => entry(tag, pack::pack_uint64, unpack::unpack_uint64, print::display_scalar),
        DataType::Float => entry(tag, pack::pack_float, unpack::unpack_float, print::display_scalar),
        DataType::Double => entry(tag, pack::pack_double, unpack::unpack_double, print::display_scalar),
        DataType::TimeVal => entry(tag, pack::pack_timeval, unpack::unpack_timeval, print::display_scalar),
        DataType::Time => entry(tag, pack::pack_time, unpack::unpack_time, print::display_scalar),
        DataType::Status => entry(tag, pack::pack_status, unpack::unpack_status, print::display_scalar),
        DataType::Proc => entry(tag, pack::pack_proc, unpack::unpack_proc, print::display_scalar),
        DataType::Info => entry(tag, pack::pack_info, unpack::unpack_info, print::display_info),
        DataType::ByteObject => entry(tag, pack::pack_byte_object, unpack::unpack_byte_object, print::display_byte_object),
        DataType::KeyValue => entry(tag, pack::pack_kval, unpack::unpack_kval, print::display_kval),
        DataType::DataArray => entry(tag, pack::pack_data_array, unpack::unpack_data_array, print::display_data_array),
        DataType::Rank => entry(tag, pack::pack_rank, unpack::unpack_rank, print::display_scalar),
        DataType::DataType => entry(tag, pack::pack_data_type, unpack::unpack_data_type, print::display_scalar),
    }
}

fn entry(tag: DataType, pack: PackFn, unpack: UnpackFn, display: DisplayFn) -> CodecEntry {
    CodecEntry {
        tag,
        name: tag.name(),
        pack,
        unpack,
        display,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_is_registered_once() {
        let registry = Registry::global();
        assert_eq!(registry.len(), DataType::ALL.len());
        for tag in DataType::ALL {
            let entry = registry.entry(tag).unwrap();
            assert_eq!(entry.tag, tag);
            assert_eq!(entry.name, tag.name());
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        let registry = Registry::global();
        assert!(matches!(
            registry.lookup(6),
            Err(ProtocolError::UnknownType(6))
        ));
        assert!(matches!(
            registry.lookup(u16::MAX),
            Err(ProtocolError::UnknownType(u16::MAX))
        ));
    }
}
