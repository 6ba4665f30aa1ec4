//! Property-based tests using proptest
//!
//! These tests validate buffer and codec invariants across a wide range of
//! randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use launchwire::core::buffer::grown_capacity;
use launchwire::core::coerce::get_number;
use launchwire::core::{pack_one, unpack, unpack_one, Buffer, BufferMode, DataType, ProcId, Value};
use launchwire::protocol::{ConnectRequest, IdentityFlag};
use launchwire::ProtocolError;
use proptest::prelude::*;

fn mode() -> impl Strategy<Value = BufferMode> {
    prop_oneof![Just(BufferMode::SelfDescribing), Just(BufferMode::Condensed)]
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i8>().prop_map(Value::Int8),
        any::<i16>().prop_map(Value::Int16),
        any::<i32>().prop_map(Value::Int32),
        any::<i64>().prop_map(Value::Int64),
        any::<u16>().prop_map(Value::UInt16),
        any::<u64>().prop_map(Value::UInt64),
        any::<usize>().prop_map(Value::Size),
        any::<u32>().prop_map(Value::Pid),
        "[a-z0-9 ]{0,40}".prop_map(|s: String| Value::String(Some(s))),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::ByteObject),
        ("[a-z]{1,12}", any::<u32>()).prop_map(|(ns, rank)| Value::Proc(ProcId::new(ns, rank).unwrap())),
    ]
}

// Property: growth never shrinks and always covers the request
proptest! {
    #[test]
    fn prop_growth_is_monotonic(
        capacity in 0usize..100_000,
        used_frac in 0usize..=100,
        requested in 0usize..100_000,
        initial in 1usize..4096,
        threshold in 1usize..65_536,
    ) {
        let used = capacity * used_frac / 100;
        let grown = grown_capacity(capacity, used, requested, initial, threshold).unwrap();
        prop_assert!(grown >= capacity);
        prop_assert!(grown >= used + requested);
        if used + requested >= threshold && grown > capacity {
            prop_assert_eq!(grown % threshold, 0);
        }
    }
}

// Property: overflowing requests are refused instead of wrapping
proptest! {
    #[test]
    fn prop_growth_overflow_is_none(used in 1usize..1024) {
        prop_assert!(grown_capacity(used, used, usize::MAX, 128, 1024).is_none());
    }
}

// Property: any sequence of scalars round trips in either mode
proptest! {
    #[test]
    fn prop_scalar_sequence_roundtrip(mode in mode(), values in prop::collection::vec(scalar(), 0..32)) {
        let mut buf = Buffer::new(mode);
        for value in &values {
            pack_one(&mut buf, value).unwrap();
            prop_assert!(buf.unpack_cursor() <= buf.pack_cursor());
            prop_assert!(buf.pack_cursor() <= buf.used());
            prop_assert!(buf.used() <= buf.allocated());
        }
        for value in &values {
            let back = unpack_one(&mut buf, value.data_type()).unwrap();
            prop_assert_eq!(&back, value);
            prop_assert!(buf.unpack_cursor() <= buf.pack_cursor());
        }
        prop_assert_eq!(buf.remaining(), 0);
    }
}

// Property: unpacking arbitrary bytes fails cleanly and never moves the cursor on error
proptest! {
    #[test]
    fn prop_garbage_unpack_is_atomic(mode in mode(), bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut buf = Buffer::from_bytes(mode, bytes);
        for tag in DataType::ALL {
            let before = buf.unpack_cursor();
            if unpack(&mut buf, tag, 16).is_err() {
                prop_assert_eq!(buf.unpack_cursor(), before);
            }
        }
    }
}

// Property: a successful conversion is exact for integer destinations
proptest! {
    #[test]
    fn prop_i64_coercion_matches_try_from(n in any::<i64>()) {
        let value = Value::Int64(n);
        match get_number(&value, DataType::Int16) {
            Ok(Value::Int16(v)) => prop_assert_eq!(i64::from(v), n),
            Ok(other) => prop_assert!(false, "unexpected {:?}", other),
            Err(ProtocolError::LostPrecision { .. }) => prop_assert!(i16::try_from(n).is_err()),
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
        match get_number(&value, DataType::UInt32) {
            Ok(Value::UInt32(v)) => prop_assert_eq!(i64::from(v), n),
            Ok(other) => prop_assert!(false, "unexpected {:?}", other),
            Err(ProtocolError::SignChange { .. }) => prop_assert!(n < 0),
            Err(ProtocolError::LostPrecision { .. }) => prop_assert!(n > i64::from(u32::MAX)),
            Err(e) => prop_assert!(false, "unexpected error {}", e),
        }
    }
}

// Property: identity messages parse back to what was framed
proptest! {
    #[test]
    fn prop_identity_frame_roundtrip(
        code in 0u8..11,
        uid in any::<u32>(),
        gid in any::<u32>(),
        nspace in "[a-z][a-z0-9.-]{0,30}",
        rank in any::<u32>(),
        credential in prop::option::of(prop::collection::vec(any::<u8>(), 1..64)),
    ) {
        let flag = IdentityFlag::from_code(code).unwrap();
        let request = ConnectRequest::new(flag)
            .with_ids(uid, gid)
            .with_proc(ProcId::new(nspace, rank).unwrap())
            .with_security("shared-key", credential.clone());

        let msg = request.frame().unwrap();
        prop_assert_eq!(msg.header.payload_len(), msg.payload.len());

        let parsed = ConnectRequest::unframe(&msg).unwrap();
        prop_assert_eq!(parsed.flag, flag);
        prop_assert_eq!(parsed.credential, credential);
        if flag.carries_credentials() {
            prop_assert_eq!((parsed.uid, parsed.gid), (uid, gid));
        }
        if flag.carries_proc() {
            prop_assert_eq!(parsed.proc_id, request.proc_id);
        }
    }
}
