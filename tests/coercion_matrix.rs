//! Numeric coercion across every ordered pair of numeric kinds
//!
//! For each (source, destination) pair the engine must either produce the
//! converted value or report one specific error; nothing falls through.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use launchwire::core::coerce::{get_number, load_number};
use launchwire::core::{DataType, Value};
use launchwire::{ProtocolError, Status};

/// Build a value of `kind` holding `n`, which must fit
fn value_of(kind: DataType, n: i128) -> Value {
    match kind {
        DataType::Size => Value::Size(n as usize),
        DataType::Pid => Value::Pid(n as u32),
        DataType::Int8 => Value::Int8(n as i8),
        DataType::Int16 => Value::Int16(n as i16),
        DataType::Int32 => Value::Int32(n as i32),
        DataType::Int64 => Value::Int64(n as i64),
        DataType::UInt8 => Value::UInt8(n as u8),
        DataType::UInt16 => Value::UInt16(n as u16),
        DataType::UInt32 => Value::UInt32(n as u32),
        DataType::UInt64 => Value::UInt64(n as u64),
        DataType::Float => Value::Float(n as f32),
        DataType::Double => Value::Double(n as f64),
        DataType::Rank => Value::Rank(n as u32),
        DataType::Status => Value::Status(Status(n as i32)),
        other => panic!("{other} is not numeric"),
    }
}

/// Integer range of `kind`, `None` for floating kinds
fn bounds(kind: DataType) -> Option<(i128, i128)> {
    let b = match kind {
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
    Some(b)
}

fn is_unsigned(kind: DataType) -> bool {
    bounds(kind).is_some_and(|(min, _)| min == 0)
}

#[test]
fn test_every_pair_converts_small_values() {
    for from in DataType::NUMERIC {
        for to in DataType::NUMERIC {
            let converted = get_number(&value_of(from, 100), to)
                .unwrap_or_else(|e| panic!("{from} -> {to}: {e}"));
            assert_eq!(converted, value_of(to, 100), "{from} -> {to}");
            assert_eq!(converted.data_type(), to);
        }
    }
}

#[test]
fn test_every_pair_checks_range_of_source_maximum() {
    for from in DataType::NUMERIC {
        let Some((_, max)) = bounds(from) else {
            continue;
        };
        for to in DataType::NUMERIC {
            let result = get_number(&value_of(from, max), to);
            match bounds(to) {
                None => assert!(result.is_ok(), "{from} -> {to}"),
                Some((_, dest_max)) if max <= dest_max => {
                    assert_eq!(result.unwrap(), value_of(to, max), "{from} -> {to}");
                }
                Some(_) => assert!(
                    matches!(result, Err(ProtocolError::LostPrecision { .. })),
                    "{from} -> {to}"
                ),
            }
        }
    }
}

#[test]
fn test_every_pair_checks_sign_before_range() {
    let signed = DataType::NUMERIC
        .into_iter()
        .filter(|kind| !is_unsigned(*kind));
    for from in signed {
        let minus_one = value_of(from, -1);
        for to in DataType::NUMERIC {
            let result = get_number(&minus_one, to);
            if is_unsigned(to) {
                assert!(
                    matches!(result, Err(ProtocolError::SignChange { .. })),
                    "{from} -> {to}"
                );
            } else {
                assert_eq!(result.unwrap(), value_of(to, -1), "{from} -> {to}");
            }
        }
    }
}

#[test]
fn test_errors_name_both_kinds() {
    let err = get_number(&Value::Int64(-5), DataType::Size).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::SignChange {
            from: DataType::Int64,
            to: DataType::Size
        }
    ));
    assert_eq!(err.status(), Status::SIGN_CHANGE);

    let err = get_number(&Value::UInt16(300), DataType::UInt8).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::LostPrecision {
            from: DataType::UInt16,
            to: DataType::UInt8
        }
    ));
    assert_eq!(err.status(), Status::LOST_PRECISION);
}

#[test]
fn test_load_number_only_writes_on_success() {
    let mut small: i32 = 11;
    assert!(load_number(&Value::UInt64(5_000_000_000), &mut small).is_err());
    assert_eq!(small, 11);
    load_number(&Value::UInt64(100), &mut small).unwrap();
    assert_eq!(small, 100);

    let mut unsigned: u16 = 3;
    assert!(load_number(&Value::Int8(-1), &mut unsigned).is_err());
    assert_eq!(unsigned, 3);

    let mut size: usize = 0;
    load_number(&Value::Rank(42), &mut size).unwrap();
    assert_eq!(size, 42);

    let mut status = Status::SUCCESS;
    load_number(&Value::Int8(-3), &mut status).unwrap();
    assert_eq!(status, Status::TEMP_UNAVAILABLE);
}

#[test]
fn test_non_numeric_pairs_are_rejected() {
    let non_numeric = DataType::ALL.into_iter().filter(|kind| !kind.is_numeric());
    for kind in non_numeric {
        assert!(
            matches!(
                get_number(&Value::Int32(1), kind),
                Err(ProtocolError::BadParam(_))
            ),
            "{kind}"
        );
    }
    assert!(get_number(&Value::Bool(true), DataType::Int32).is_err());
}
