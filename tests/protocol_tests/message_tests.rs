//! Message Tests
//!
//! Tests for payload building, popping, and the packed wire layout.

use netframe::protocol::{Message, HEADER_LEN};
use netframe::NetframeError;

// =============================================================================
// Payload Tests
// =============================================================================

#[test]
fn test_new_message_is_empty() {
    let msg = Message::new(7);
    assert_eq!(msg.id(), 7);
    assert_eq!(msg.size(), 0);
    assert!(msg.payload().is_empty());
    assert_eq!(msg.remaining(), 0);
}

#[test]
fn test_append_grows_size() {
    let mut msg = Message::new(1);
    msg.append(b"abc").unwrap();
    msg.append(b"de").unwrap();

    assert_eq!(msg.size(), 5);
    assert_eq!(msg.payload(), b"abcde");
}

#[test]
fn test_pop_reads_fields_in_order() {
    let mut msg = Message::new(1);
    msg.append(&42u32.to_le_bytes()).unwrap();
    msg.append(b"name").unwrap();

    let value = msg.pop(4).unwrap();
    assert_eq!(u32::from_le_bytes(value.try_into().unwrap()), 42);
    assert_eq!(msg.pop(4).unwrap(), b"name");
    assert_eq!(msg.remaining(), 0);
}

#[test]
fn test_pop_past_end_fails_without_consuming() {
    let mut msg = Message::with_payload(1, b"xyz");
    msg.pop(1).unwrap();

    let err = msg.pop(5).unwrap_err();
    assert!(matches!(
        err,
        NetframeError::OutOfRange {
            requested: 5,
            remaining: 2
        }
    ));
    assert_eq!(msg.remaining(), 2);
    assert_eq!(msg.pop(2).unwrap(), b"yz");
}

#[test]
fn test_pop_zero_bytes() {
    let mut msg = Message::new(1);
    assert!(msg.pop(0).unwrap().is_empty());
}

#[test]
fn test_set_id() {
    let mut msg = Message::new(1);
    msg.set_id(0xBEEF);
    assert_eq!(msg.id(), 0xBEEF);
}

#[test]
fn test_equality_ignores_pop_cursor() {
    let mut a = Message::with_payload(3, b"abc");
    let b = Message::with_payload(3, b"abc");
    a.pop(2).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, Message::with_payload(4, b"abc"));
}

// =============================================================================
// Wire Layout Tests
// =============================================================================

#[test]
fn test_pack_layout_is_little_endian() {
    let mut msg = Message::new(1);
    msg.append(b"123").unwrap();

    assert_eq!(
        msg.pack().as_ref(),
        &[0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x31, 0x32, 0x33]
    );
}

#[test]
fn test_pack_empty_message_is_header_only() {
    let packed = Message::new(0x0102).pack();
    assert_eq!(packed.len(), HEADER_LEN);
    assert_eq!(packed.as_ref(), &[0x02, 0x01, 0, 0, 0, 0]);
}

#[test]
fn test_unpack_restores_message() {
    let original = Message::with_payload(513, b"payload bytes");
    let unpacked = Message::unpack(&original.pack()).unwrap();

    assert_eq!(unpacked.id(), 513);
    assert_eq!(unpacked.size(), 13);
    assert_eq!(unpacked.payload(), b"payload bytes");
}

#[test]
fn test_unpack_ignores_trailing_bytes() {
    let mut buf = Message::with_payload(2, b"ab").pack().to_vec();
    buf.extend_from_slice(b"trailing");

    let msg = Message::unpack(&buf).unwrap();
    assert_eq!(msg.payload(), b"ab");
}

#[test]
fn test_unpack_short_header() {
    let err = Message::unpack(&[0x01, 0x00, 0x03]).unwrap_err();
    assert!(matches!(
        err,
        NetframeError::TruncatedFrame {
            expected: 6,
            actual: 3
        }
    ));
}

#[test]
fn test_unpack_short_payload() {
    let packed = Message::with_payload(1, b"hello").pack();
    let err = Message::unpack(&packed[..8]).unwrap_err();
    assert!(matches!(
        err,
        NetframeError::TruncatedFrame {
            expected: 11,
            actual: 8
        }
    ));
}

#[test]
fn test_large_payload() {
    let payload = vec![0xAB; 1024 * 1024];
    let msg = Message::with_payload(9, &payload);
    let packed = msg.pack();

    assert_eq!(packed.len(), HEADER_LEN + payload.len());
    assert_eq!(Message::unpack(&packed).unwrap(), msg);
}
