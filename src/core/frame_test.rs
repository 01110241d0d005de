use bytes::Bytes;

use super::*;

#[test]
fn test_begin_payload_accessors() {
    let frame = Frame::begin(0x03, 0x0000_0002_0000_0001, 0x02);
    assert_eq!(frame.begin_binding_id(), Some(0x0000_0002_0000_0001));
    assert_eq!(frame.begin_reply_to(), Some(0x02));
    assert_eq!(frame.window_budget_id(), None);
}

#[test]
fn test_window_payload_accessors() {
    let frame = Frame::window(0x02, 99, 6);
    assert_eq!(frame.window_budget_id(), Some(99));
    assert_eq!(frame.window_credit(), Some(6));
    assert_eq!(frame.begin_binding_id(), None);
}

#[test]
fn test_payload_only_accessors_reject_other_kinds() {
    let frame = Frame::data(0x02, Bytes::from_static(b"hello"));
    assert_eq!(frame.begin_binding_id(), None);
    assert_eq!(frame.begin_reply_to(), None);
    assert_eq!(frame.window_budget_id(), None);
    assert_eq!(frame.window_credit(), None);
}

#[test]
fn test_control_frames_carry_no_payload() {
    for frame in [Frame::flush(1), Frame::end(1), Frame::abort(1), Frame::reset(1)] {
        assert!(frame.payload.is_empty());
    }
}

#[test]
fn test_terminal_kinds() {
    assert!(FrameKind::End.is_terminal());
    assert!(FrameKind::Abort.is_terminal());
    assert!(FrameKind::Reset.is_terminal());
    assert!(!FrameKind::Begin.is_terminal());
    assert!(!FrameKind::Data.is_terminal());
    assert!(!FrameKind::Window.is_terminal());
}
