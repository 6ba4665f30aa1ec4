//! # Identity Message Framer
//!
//! Builds and parses the first message a connecting peer sends. The tail
//! length is computed from every field before anything is written, and the
//! header carries exactly that length.
//!
//! ## Tail Layout
//! ```text
//! security module name  NUL terminated
//! credential length     u32 BE, then that many bytes
//! flag                  u8
//! uid, gid              u32 BE each     (every flag except simple client)
//! namespace, rank       NUL terminated + u32 BE   (flags carrying an id)
//! version               NUL terminated
//! codec module name     NUL terminated  ┐
//! buffer mode           u8              │ absent for 2.0 peers
//! store module name     NUL terminated  │
//! info blob             remaining bytes ┘
//! ```

use crate::config::PROTOCOL_VERSION;
use crate::core::buffer::{Buffer, BufferMode};
use crate::core::codec::{pack, unpack, unpack_one};
use crate::core::types::{DataType, Info, ProcId, Value};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::header::{WireHeader, WireMessage, IDENTITY_TAG, UNASSIGNED_INDEX};
use crate::protocol::identity::{IdentityFlag, ProtocolVersion};
use bytes::Bytes;
use tracing::{debug, instrument};

/// Codec module name advertised by this implementation
pub const CODEC_MODULE: &str = "v41";

/// Store module name advertised by this implementation
pub const STORE_MODULE: &str = "hash";

/// Module names assumed for peers that stop after the version string
const SHORT_TAIL_CODEC: &str = "v20";
const SHORT_TAIL_STORE: &str = "ds12,hash";

/// Everything a peer declares about itself when connecting
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub flag: IdentityFlag,
    pub security: String,
    pub credential: Option<Vec<u8>>,
    pub uid: u32,
    pub gid: u32,
    pub proc_id: Option<ProcId>,
    pub version: String,
    pub codec: String,
    pub buffer_mode: BufferMode,
    pub store: String,
    pub info: Vec<Info>,
}

impl ConnectRequest {
    pub fn new(flag: IdentityFlag) -> Self {
        let (uid, gid) = process_ids();
        Self {
            flag,
            security: "none".to_string(),
            credential: None,
            uid,
            gid,
            proc_id: None,
            version: PROTOCOL_VERSION.to_string(),
            codec: CODEC_MODULE.to_string(),
            buffer_mode: BufferMode::default(),
            store: STORE_MODULE.to_string(),
            info: Vec::new(),
        }
    }

    pub fn with_proc(mut self, proc_id: ProcId) -> Self {
        self.proc_id = Some(proc_id);
        self
    }

    pub fn with_security(mut self, module: impl Into<String>, credential: Option<Vec<u8>>) -> Self {
        self.security = module.into();
        self.credential = credential;
        self
    }

    pub fn with_ids(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_buffer_mode(mut self, mode: BufferMode) -> Self {
        self.buffer_mode = mode;
        self
    }

    pub fn with_info(mut self, info: Vec<Info>) -> Self {
        self.info = info;
        self
    }

    /// Parsed form of the declared version
    pub fn protocol_version(&self) -> Result<ProtocolVersion> {
        self.version.parse()
    }

    fn short_tail(&self) -> bool {
        self.protocol_version()
            .map(|v| v.has_short_tail())
            .unwrap_or(false)
    }

    fn validate(&self) -> Result<()> {
        if self.flag.carries_proc() && self.proc_id.is_none() {
            return Err(ProtocolError::BadParam(format!(
                "{} ({})",
                constants::ERR_MISSING_IDENTITY,
                self.flag
            )));
        }
        for (field, text) in [
            ("security", &self.security),
            ("version", &self.version),
            ("codec", &self.codec),
            ("store", &self.store),
        ] {
            if text.contains('\0') {
                return Err(ProtocolError::BadParam(format!("{field} contains NUL")));
            }
        }
        self.protocol_version()?;
        Ok(())
    }

    fn info_blob(&self) -> Result<Vec<u8>> {
        if self.info.is_empty() {
            return Ok(Vec::new());
        }
        let mut buf = Buffer::new(BufferMode::SelfDescribing);
        pack(&mut buf, DataType::Size, &[Value::Size(self.info.len())])?;
        let values: Vec<Value> = self.info.iter().cloned().map(Value::from).collect();
        pack(&mut buf, DataType::Info, &values)?;
        Ok(buf.unload())
    }

    /// Exact tail length for the given info blob
    fn tail_len(&self, blob: &[u8]) -> usize {
        let mut len = self.security.len() + 1;
        len += 4 + self.credential.as_ref().map_or(0, Vec::len);
        len += 1;
        if self.flag.carries_credentials() {
            len += 8;
        }
        if let Some(id) = self.proc_id.as_ref().filter(|_| self.flag.carries_proc()) {
            len += id.nspace.len() + 1 + 4;
        }
        len += self.version.len() + 1;
        if !self.short_tail() {
            len += self.codec.len() + 1;
            len += 1;
            len += self.store.len() + 1;
            len += blob.len();
        }
        len
    }

    /// Serialize into a header plus tail ready to send
    #[instrument(skip(self), fields(flag = %self.flag))]
    pub fn frame(&self) -> Result<WireMessage> {
        self.validate()?;
        let blob = self.info_blob()?;
        let expected = self.tail_len(&blob);

        let mut tail = Vec::with_capacity(expected);
        put_str(&mut tail, &self.security);
        let credential = self.credential.as_deref().unwrap_or_default();
        let cred_len = u32::try_from(credential.len())
            .map_err(|_| ProtocolError::BadParam("credential too large".into()))?;
        tail.extend_from_slice(&cred_len.to_be_bytes());
        tail.extend_from_slice(credential);
        tail.push(self.flag.code());
        if self.flag.carries_credentials() {
            tail.extend_from_slice(&self.uid.to_be_bytes());
            tail.extend_from_slice(&self.gid.to_be_bytes());
        }
        if self.flag.carries_proc() {
            if let Some(id) = &self.proc_id {
                put_str(&mut tail, &id.nspace);
                tail.extend_from_slice(&id.rank.to_be_bytes());
            }
        }
        put_str(&mut tail, &self.version);
        if !self.short_tail() {
            put_str(&mut tail, &self.codec);
            tail.push(self.buffer_mode.code());
            put_str(&mut tail, &self.store);
            tail.extend_from_slice(&blob);
        }

        if tail.len() != expected {
            return Err(ProtocolError::Framing(format!(
                "{}: computed {expected}, wrote {}",
                constants::ERR_LENGTH_DIVERGED,
                tail.len()
            )));
        }
        let nbytes = u32::try_from(expected)
            .map_err(|_| ProtocolError::Framing(constants::ERR_OVERSIZED_TAIL.into()))?;
        debug!(nbytes, "Framed identity message");
        Ok(WireMessage {
            header: WireHeader::new(UNASSIGNED_INDEX, IDENTITY_TAG, nbytes),
            payload: Bytes::from(tail),
        })
    }

    /// Parse an identity message received by the server
    pub fn unframe(msg: &WireMessage) -> Result<Self> {
        if msg.header.tag != IDENTITY_TAG {
            return Err(ProtocolError::Framing(format!(
                "{}: {}",
                constants::ERR_UNEXPECTED_TAG,
                msg.header.tag
            )));
        }
        if msg.header.payload_len() != msg.payload.len() {
            return Err(ProtocolError::Framing(constants::ERR_LENGTH_DIVERGED.into()));
        }

        let mut tail = TailReader::new(&msg.payload);
        let security = tail.string()?;
        let cred_len = tail.u32()? as usize;
        let credential = tail.bytes(cred_len)?;
        let flag = IdentityFlag::from_code(tail.u8()?)?;
        let (uid, gid) = if flag.carries_credentials() {
            (tail.u32()?, tail.u32()?)
        } else {
            (0, 0)
        };
        let proc_id = if flag.carries_proc() {
            let nspace = tail.string()?;
            let rank = tail.u32()?;
            Some(ProcId::new(nspace, rank)?)
        } else {
            None
        };
        let version = tail.string()?;
        let parsed: ProtocolVersion = version.parse()?;

        let mut request = ConnectRequest {
            flag,
            security,
            credential: (cred_len > 0).then(|| credential.to_vec()),
            uid,
            gid,
            proc_id,
            version,
            codec: SHORT_TAIL_CODEC.to_string(),
            buffer_mode: BufferMode::default(),
            store: SHORT_TAIL_STORE.to_string(),
            info: Vec::new(),
        };
        if parsed.has_short_tail() {
            return Ok(request);
        }

        request.codec = tail.string()?;
        let mode = tail.u8()?;
        request.buffer_mode = BufferMode::from_code(mode)
            .ok_or_else(|| ProtocolError::NotSupported(format!("buffer mode {mode}")))?;
        request.store = tail.string()?;
        let blob = tail.rest();
        if !blob.is_empty() {
            request.info = parse_info_blob(blob)?;
        }
        Ok(request)
    }
}

fn parse_info_blob(blob: &[u8]) -> Result<Vec<Info>> {
    let mut buf = Buffer::from_bytes(BufferMode::SelfDescribing, blob.to_vec());
    let count = match unpack_one(&mut buf, DataType::Size)? {
        Value::Size(n) => n,
        other => {
            return Err(ProtocolError::TypeMismatch {
                expected: DataType::Size,
                found: other.data_type(),
            })
        }
    };
    unpack(&mut buf, DataType::Info, count)?
        .into_iter()
        .map(|value| match value {
            Value::Info(info) => Ok(*info),
            other => Err(ProtocolError::TypeMismatch {
                expected: DataType::Info,
                found: other.data_type(),
            }),
        })
        .collect()
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Cursor over a received tail; every read is bounds checked
struct TailReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TailReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn truncated() -> ProtocolError {
        ProtocolError::UnpackFailure(constants::ERR_TRUNCATED_TAIL.into())
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(Self::truncated)?;
        let out = self.data.get(self.pos..end).ok_or_else(Self::truncated)?;
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.bytes(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn string(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ProtocolError::UnpackFailure(constants::ERR_STRING_NOT_TERMINATED.into()))?;
        let text = std::str::from_utf8(&rest[..nul])
            .map_err(|_| ProtocolError::UnpackFailure(constants::ERR_STRING_NOT_UTF8.into()))?
            .to_string();
        self.pos += nul + 1;
        Ok(text)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }
}

/// Effective uid and gid of this process, where the platform exposes them
#[cfg(target_os = "linux")]
pub fn process_ids() -> (u32, u32) {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self")
        .map(|m| (m.uid(), m.gid()))
        .unwrap_or((0, 0))
}

#[cfg(not(target_os = "linux"))]
pub fn process_ids() -> (u32, u32) {
    (0, 0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn job() -> ProcId {
        ProcId::new("job-1", 3).unwrap()
    }

    #[test]
    fn simple_client_layout() {
        let msg = ConnectRequest::new(IdentityFlag::SimpleClient)
            .with_proc(job())
            .with_version("4.2.0")
            .frame()
            .unwrap();
        let mut expected = b"none\0".to_vec();
        expected.extend_from_slice(&0u32.to_be_bytes());
        expected.push(0);
        expected.extend_from_slice(b"job-1\0");
        expected.extend_from_slice(&3u32.to_be_bytes());
        expected.extend_from_slice(b"4.2.0\0v41\0");
        expected.push(2);
        expected.extend_from_slice(b"hash\0");
        assert_eq!(&msg.payload[..], &expected[..]);
        assert_eq!(msg.header.payload_len(), expected.len());
        assert_eq!(msg.header.pindex, UNASSIGNED_INDEX);
    }

    #[test]
    fn missing_identity_is_rejected() {
        let err = ConnectRequest::new(IdentityFlag::ToolGivenId).frame().unwrap_err();
        assert!(matches!(err, ProtocolError::BadParam(_)));
    }

    #[test]
    fn short_tail_for_old_peers() {
        let msg = ConnectRequest::new(IdentityFlag::LegacyTool)
            .with_ids(10, 20)
            .with_version("2.0.4")
            .frame()
            .unwrap();
        assert!(msg.payload.ends_with(b"2.0.4\0"));
        let parsed = ConnectRequest::unframe(&msg).unwrap();
        assert_eq!(parsed.codec, SHORT_TAIL_CODEC);
        assert_eq!((parsed.uid, parsed.gid), (10, 20));
    }

    #[test]
    fn truncated_tail_is_an_error() {
        let mut msg = ConnectRequest::new(IdentityFlag::SimpleClient)
            .with_proc(job())
            .frame()
            .unwrap();
        msg.payload = msg.payload.slice(..8);
        msg.header.nbytes = 8;
        assert!(matches!(
            ConnectRequest::unframe(&msg),
            Err(ProtocolError::UnpackFailure(_))
        ));
    }

    #[test]
    fn wrong_tag_is_rejected() {
        let mut msg = ConnectRequest::new(IdentityFlag::ToolNeedsId).frame().unwrap();
        msg.header.tag = 5;
        assert!(matches!(ConnectRequest::unframe(&msg), Err(ProtocolError::Framing(_))));
    }
}
