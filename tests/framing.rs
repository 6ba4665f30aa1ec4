//! Identity message framing
//!
//! Covers the header length for every identity flag, field layout of the
//! tail, parity between framing and parsing, and the stream codec used once
//! a session is running.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use launchwire::core::{BufferMode, Info, ProcId, Value};
use launchwire::protocol::header::{IDENTITY_TAG, UNASSIGNED_INDEX};
use launchwire::protocol::{ConnectRequest, IdentityFlag, MessageCodec, WireHeader, WireMessage};
use launchwire::ProtocolError;
use tokio_util::codec::{Decoder, Encoder};

fn request_for(flag: IdentityFlag) -> ConnectRequest {
    let request = ConnectRequest::new(flag).with_ids(501, 20);
    if flag.carries_proc() {
        request.with_proc(ProcId::new("job-42", 3).unwrap())
    } else {
        request
    }
}

/// Tail length worked out field by field
fn expected_tail_len(request: &ConnectRequest) -> usize {
    let mut len = "none".len() + 1; // security name
    len += 4; // credential length, no credential bytes
    len += 1; // flag
    if request.flag.carries_credentials() {
        len += 4 + 4;
    }
    if request.flag.carries_proc() {
        len += "job-42".len() + 1 + 4;
    }
    len += request.version.len() + 1;
    len += "v41".len() + 1;
    len += 1; // buffer mode
    len += "hash".len() + 1;
    len
}

#[test]
fn test_header_length_exact_for_every_flag() {
    for flag in IdentityFlag::ALL {
        let request = request_for(flag);
        let msg = request.frame().unwrap();

        assert_eq!(msg.header.pindex, UNASSIGNED_INDEX, "{flag}");
        assert_eq!(msg.header.tag, IDENTITY_TAG, "{flag}");
        assert_eq!(msg.header.payload_len(), msg.payload.len(), "{flag}");
        assert_eq!(msg.payload.len(), expected_tail_len(&request), "{flag}");
    }
}

#[test]
fn test_flag_byte_follows_credential() {
    for flag in IdentityFlag::ALL {
        let msg = request_for(flag).frame().unwrap();
        // "none\0" then a zero credential length
        assert_eq!(&msg.payload[..5], b"none\0");
        assert_eq!(&msg.payload[5..9], &[0, 0, 0, 0]);
        assert_eq!(msg.payload[9], flag.code());
    }
}

#[test]
fn test_uid_gid_precede_namespace() {
    let msg = request_for(IdentityFlag::ToolGivenId).frame().unwrap();
    let tail = &msg.payload[10..];
    assert_eq!(&tail[..4], &501u32.to_be_bytes());
    assert_eq!(&tail[4..8], &20u32.to_be_bytes());
    assert_eq!(&tail[8..15], b"job-42\0");
    assert_eq!(&tail[15..19], &3u32.to_be_bytes());
}

#[test]
fn test_unframe_restores_every_flag() {
    for flag in IdentityFlag::ALL {
        let request = request_for(flag);
        let parsed = ConnectRequest::unframe(&request.frame().unwrap()).unwrap();

        assert_eq!(parsed.flag, flag);
        assert_eq!(parsed.security, "none");
        assert_eq!(parsed.credential, None);
        assert_eq!(parsed.version, request.version);
        assert_eq!(parsed.codec, request.codec);
        assert_eq!(parsed.store, request.store);
        assert_eq!(parsed.buffer_mode, request.buffer_mode);
        if flag.carries_credentials() {
            assert_eq!((parsed.uid, parsed.gid), (501, 20));
        }
        if flag.carries_proc() {
            assert_eq!(parsed.proc_id, request.proc_id);
        } else {
            assert_eq!(parsed.proc_id, None);
        }
    }
}

#[test]
fn test_credential_and_info_survive() {
    let info = vec![
        Info::new("launchwire.job.size", Value::UInt32(64)),
        Info::new("launchwire.host", Value::string("node017")).required(),
    ];
    let request = request_for(IdentityFlag::LauncherGivenId)
        .with_security("shared-key", Some(vec![0xAB; 32]))
        .with_buffer_mode(BufferMode::Condensed)
        .with_info(info.clone());

    let msg = request.frame().unwrap();
    assert_eq!(msg.header.payload_len(), msg.payload.len());

    let parsed = ConnectRequest::unframe(&msg).unwrap();
    assert_eq!(parsed.credential, Some(vec![0xAB; 32]));
    assert_eq!(parsed.buffer_mode, BufferMode::Condensed);
    assert_eq!(parsed.info, info);
}

#[test]
fn test_short_tail_versions_stop_after_version() {
    let request = request_for(IdentityFlag::ToolNeedsId).with_version("2.0.3");
    let msg = request.frame().unwrap();
    assert!(msg.payload.ends_with(b"2.0.3\0"));

    let parsed = ConnectRequest::unframe(&msg).unwrap();
    assert_eq!(parsed.codec, "v20");
    assert_eq!(parsed.store, "ds12,hash");
}

#[test]
fn test_missing_identity_is_rejected() {
    for flag in IdentityFlag::ALL.into_iter().filter(|f| f.carries_proc()) {
        let result = ConnectRequest::new(flag).frame();
        assert!(matches!(result, Err(ProtocolError::BadParam(_))), "{flag}");
    }
}

#[test]
fn test_truncated_tail_is_rejected() {
    let msg = request_for(IdentityFlag::Scheduler).frame().unwrap();
    for cut in [3, 9, 12, 20, msg.payload.len() - 6] {
        let short = WireMessage::new(UNASSIGNED_INDEX, IDENTITY_TAG, msg.payload.slice(..cut)).unwrap();
        assert!(ConnectRequest::unframe(&short).is_err(), "cut at {cut}");
    }
}

#[test]
fn test_unknown_flag_is_rejected() {
    let mut payload = request_for(IdentityFlag::LegacyTool).frame().unwrap().payload.to_vec();
    payload[9] = 11;
    let msg = WireMessage::new(UNASSIGNED_INDEX, IDENTITY_TAG, payload).unwrap();
    assert!(matches!(
        ConnectRequest::unframe(&msg),
        Err(ProtocolError::NotSupported(_))
    ));
}

#[test]
fn test_header_encoding_is_big_endian() {
    let header = WireHeader::new(UNASSIGNED_INDEX, IDENTITY_TAG, 0x0102_0304);
    assert_eq!(
        header.encode(),
        [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x02, 0x03, 0x04]
    );
    assert_eq!(WireHeader::decode(&header.encode()), header);
}

#[test]
fn test_codec_waits_for_complete_message() {
    let msg = request_for(IdentityFlag::ToolClient).frame().unwrap();
    let wire = msg.to_bytes();
    let mut codec = MessageCodec::default();

    let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
    assert!(codec.decode(&mut partial).unwrap().is_none());

    partial.extend_from_slice(&wire[wire.len() - 1..]);
    let decoded = codec.decode(&mut partial).unwrap().unwrap();
    assert_eq!(decoded, msg);
    assert!(partial.is_empty());
}

#[test]
fn test_codec_preserves_order() {
    let mut codec = MessageCodec::default();
    let mut wire = BytesMut::new();
    for tag in 1..=3u32 {
        let msg = WireMessage::new(4, tag, vec![tag as u8; tag as usize]).unwrap();
        codec.encode(msg, &mut wire).unwrap();
    }
    for tag in 1..=3u32 {
        let msg = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(msg.tag(), tag);
        assert_eq!(msg.payload.len(), tag as usize);
    }
    assert!(codec.decode(&mut wire).unwrap().is_none());
}

#[test]
fn test_codec_rejects_oversized_payload() {
    let mut codec = MessageCodec::new(16);
    let header = WireHeader::new(0, 1, 17);
    let mut wire = BytesMut::from(&header.encode()[..]);
    assert!(matches!(
        codec.decode(&mut wire),
        Err(ProtocolError::Framing(_))
    ));
}
