//! Value kinds carried by the codec.
//!
//! [`DataType`] is the wire tag, [`Value`] is the closed sum type whose active
//! variant always agrees with its tag. Composite records ([`ProcId`], [`Info`],
//! [`KeyValue`], [`DataArray`]) nest values recursively.

use crate::error::{ProtocolError, Result, Status};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process rank within a namespace
pub type Rank = u32;

/// Rank value meaning "not yet known"
pub const RANK_UNDEF: Rank = u32::MAX;
/// Rank value addressing every process in a namespace
pub const RANK_WILDCARD: Rank = u32::MAX - 1;
/// Rank value addressing every process on the local node
pub const RANK_LOCAL_NODE: Rank = u32::MAX - 2;

/// Longest namespace accepted on the wire, excluding the terminating NUL
pub const MAX_NSLEN: usize = 255;
/// Longest info/key-value key accepted on the wire, excluding the terminating NUL
pub const MAX_KEYLEN: usize = 511;

/// Wire tag identifying a value kind.
///
/// Codes are stable and travel as a 2-byte big-endian field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum DataType {
    Undef = 0,
    Bool = 1,
    Byte = 2,
    String = 3,
    Size = 4,
    Pid = 5,
    Int8 = 7,
    Int16 = 8,
    Int32 = 9,
    Int64 = 10,
    UInt8 = 12,
    UInt16 = 13,
    UInt32 = 14,
    UInt64 = 15,
    Float = 16,
    Double = 17,
    TimeVal = 18,
    Time = 19,
    Status = 20,
    Proc = 22,
    Info = 24,
    ByteObject = 27,
    KeyValue = 28,
    DataArray = 39,
    Rank = 40,
    DataType = 41,
}

impl DataType {
    /// Every defined tag, in code order
    pub const ALL: [DataType; 26] = [
        DataType::Undef,
        DataType::Bool,
        DataType::Byte,
        DataType::String,
        DataType::Size,
        DataType::Pid,
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::UInt8,
        DataType::UInt16,
        DataType::UInt32,
        DataType::UInt64,
        DataType::Float,
        DataType::Double,
        DataType::TimeVal,
        DataType::Time,
        DataType::Status,
        DataType::Proc,
        DataType::Info,
        DataType::ByteObject,
        DataType::KeyValue,
        DataType::DataArray,
        DataType::Rank,
        DataType::DataType,
    ];

    /// Kinds the coercion engine converts between
    pub const NUMERIC: [DataType; 14] = [
        DataType::Size,
        DataType::Pid,
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::UInt8,
        DataType::UInt16,
        DataType::UInt32,
        DataType::UInt64,
        DataType::Float,
        DataType::Double,
        DataType::Rank,
        DataType::Status,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        let tag = match code {
            0 => DataType::Undef,
            1 => DataType::Bool,
            2 => DataType::Byte,
            3 => DataType::String,
            4 => DataType::Size,
            5 => DataType::Pid,
            7 => DataType::Int8,
            8 => DataType::Int16,
            9 => DataType::Int32,
            10 => DataType::Int64,
            12 => DataType::UInt8,
            13 => DataType::UInt16,
            14 => DataType::UInt32,
            15 => DataType::UInt64,
            16 => DataType::Float,
            17 => DataType::Double,
            18 => DataType::TimeVal,
            19 => DataType::Time,
            20 => DataType::Status,
            22 => DataType::Proc,
            24 => DataType::Info,
            27 => DataType::ByteObject,
            28 => DataType::KeyValue,
            39 => DataType::DataArray,
            40 => DataType::Rank,
            41 => DataType::DataType,
            _ => return None,
        };
        Some(tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Undef => "UNDEF",
            DataType::Bool => "BOOL",
            DataType::Byte => "BYTE",
            DataType::String => "STRING",
            DataType::Size => "SIZE",
            DataType::Pid => "PID",
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::UInt8 => "UINT8",
            DataType::UInt16 => "UINT16",
            DataType::UInt32 => "UINT32",
            DataType::UInt64 => "UINT64",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::TimeVal => "TIMEVAL",
            DataType::Time => "TIME",
            DataType::Status => "STATUS",
            DataType::Proc => "PROC",
            DataType::Info => "INFO",
            DataType::ByteObject => "BYTE_OBJECT",
            DataType::KeyValue => "KVAL",
            DataType::DataArray => "DATA_ARRAY",
            DataType::Rank => "PROC_RANK",
            DataType::DataType => "DATA_TYPE",
        }
    }

    /// Whether values of this kind take part in numeric coercion
    pub fn is_numeric(self) -> bool {
        Self::NUMERIC.contains(&self)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Seconds and microseconds, as carried by a timeval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeVal {
    pub sec: i64,
    pub usec: i64,
}

/// Process identifier: namespace plus rank
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcId {
    pub nspace: String,
    pub rank: Rank,
}

impl ProcId {
    /// Build an identifier, rejecting namespaces that do not fit the wire limit
    pub fn new(nspace: impl Into<String>, rank: Rank) -> Result<Self> {
        let id = Self {
            nspace: nspace.into(),
            rank,
        };
        id.validate()?;
        Ok(id)
    }

    /// Check the namespace against the wire limit.
    ///
    /// Needed for identifiers built with a struct literal.
    pub fn validate(&self) -> Result<()> {
        if self.nspace.len() > MAX_NSLEN || self.nspace.contains('\0') {
            return Err(ProtocolError::BadParam(format!(
                "namespace must be at most {MAX_NSLEN} bytes without NUL"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank {
            RANK_UNDEF => write!(f, "{}:UNDEF", self.nspace),
            RANK_WILDCARD => write!(f, "{}:WILDCARD", self.nspace),
            RANK_LOCAL_NODE => write!(f, "{}:LOCAL_NODE", self.nspace),
            rank => write!(f, "{}:{}", self.nspace, rank),
        }
    }
}

/// Keyed value with directive flags
#[derive(Debug, Clone, PartialEq)]
pub struct Info {
    pub key: String,
    pub directives: u32,
    pub value: Value,
}

impl Info {
    /// Directive: the receiver must honor this entry
    pub const REQUIRED: u32 = 0x0001;
    /// Directive: this entry terminates an info array
    pub const END: u32 = 0x0002;

    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            directives: 0,
            value,
        }
    }

    pub fn required(mut self) -> Self {
        self.directives |= Self::REQUIRED;
        self
    }

    pub fn is_required(&self) -> bool {
        self.directives & Self::REQUIRED != 0
    }
}

/// Key plus tagged value
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Homogeneous array of values of one declared kind
#[derive(Debug, Clone, PartialEq)]
pub struct DataArray {
    kind: DataType,
    items: Vec<Value>,
}

impl DataArray {
    /// Build an array, checking every element carries `kind`
    pub fn new(kind: DataType, items: Vec<Value>) -> Result<Self> {
        if let Some(bad) = items.iter().find(|v| v.data_type() != kind) {
            return Err(ProtocolError::TypeMismatch {
                expected: kind,
                found: bad.data_type(),
            });
        }
        Ok(Self { kind, items })
    }

    /// Array of info records
    pub fn of_infos(infos: Vec<Info>) -> Self {
        Self {
            kind: DataType::Info,
            items: infos.into_iter().map(|i| Value::Info(Box::new(i))).collect(),
        }
    }

    pub fn kind(&self) -> DataType {
        self.kind
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }
}

/// A tagged value.
///
/// The variant determines the tag; there is no way to read a payload under
/// a different tag except through the coercion engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undef,
    Bool(bool),
    Byte(u8),
    /// `None` is the absent string, distinct from `Some("")`
    String(Option<String>),
    Size(usize),
    Pid(u32),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    TimeVal(TimeVal),
    Time(u64),
    Status(Status),
    Proc(ProcId),
    Info(Box<Info>),
    ByteObject(Vec<u8>),
    KeyValue(Box<KeyValue>),
    DataArray(Box<DataArray>),
    Rank(Rank),
    DataType(DataType),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Undef => DataType::Undef,
            Value::Bool(_) => DataType::Bool,
            Value::Byte(_) => DataType::Byte,
            Value::String(_) => DataType::String,
            Value::Size(_) => DataType::Size,
            Value::Pid(_) => DataType::Pid,
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::UInt8(_) => DataType::UInt8,
            Value::UInt16(_) => DataType::UInt16,
            Value::UInt32(_) => DataType::UInt32,
            Value::UInt64(_) => DataType::UInt64,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::TimeVal(_) => DataType::TimeVal,
            Value::Time(_) => DataType::Time,
            Value::Status(_) => DataType::Status,
            Value::Proc(_) => DataType::Proc,
            Value::Info(_) => DataType::Info,
            Value::ByteObject(_) => DataType::ByteObject,
            Value::KeyValue(_) => DataType::KeyValue,
            Value::DataArray(_) => DataType::DataArray,
            Value::Rank(_) => DataType::Rank,
            Value::DataType(_) => DataType::DataType,
        }
    }

    /// Convenience constructor for a present string
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Some(s.into()))
    }

    pub fn is_numeric(&self) -> bool {
        self.data_type().is_numeric()
    }
}

impl From<Info> for Value {
    fn from(info: Info) -> Self {
        Value::Info(Box::new(info))
    }
}

impl From<KeyValue> for Value {
    fn from(kv: KeyValue) -> Self {
        Value::KeyValue(Box::new(kv))
    }
}

impl From<DataArray> for Value {
    fn from(array: DataArray) -> Self {
        Value::DataArray(Box::new(array))
    }
}

impl From<ProcId> for Value {
    fn from(proc_id: ProcId) -> Self {
        Value::Proc(proc_id)
    }
}

/// Check a key against the wire limit
pub(crate) fn check_key(key: &str) -> Result<()> {
    if key.len() > MAX_KEYLEN || key.contains('\0') {
        return Err(ProtocolError::BadParam(format!(
            "key must be at most {MAX_KEYLEN} bytes without NUL"
        )));
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::core::print::render(self))
    }
}
