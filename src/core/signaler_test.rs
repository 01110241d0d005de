use std::time::{Duration, Instant};

use super::*;

#[test]
fn test_one_shot_fires_once() {
    let mut signals = SignalQueue::new();
    let id = signals.schedule(0x11, Duration::from_millis(0), None);

    let now = Instant::now() + Duration::from_millis(1);
    assert_eq!(signals.pop_due(now), Some((id, 0x11)));
    assert_eq!(signals.pop_due(now), None);
    assert_eq!(signals.pending(), 0);
}

#[test]
fn test_not_due_yet() {
    let mut signals = SignalQueue::new();
    signals.schedule(0x11, Duration::from_secs(60), None);
    assert_eq!(signals.pop_due(Instant::now()), None);
    assert_eq!(signals.pending(), 1);
}

#[test]
fn test_cancel_before_fire() {
    let mut signals = SignalQueue::new();
    let id = signals.schedule(0x11, Duration::from_millis(0), None);
    assert!(signals.cancel(id));

    let now = Instant::now() + Duration::from_millis(1);
    assert_eq!(signals.pop_due(now), None);
}

#[test]
fn test_cancel_after_fire_is_noop() {
    let mut signals = SignalQueue::new();
    let id = signals.schedule(0x11, Duration::from_millis(0), None);
    let now = Instant::now() + Duration::from_millis(1);
    assert!(signals.pop_due(now).is_some());
    assert!(!signals.cancel(id));
}

#[test]
fn test_repeating_signal_reschedules() {
    let mut signals = SignalQueue::new();
    let id = signals.schedule(0x22, Duration::from_millis(0), Some(Duration::from_millis(5)));

    let now = Instant::now() + Duration::from_millis(1);
    assert_eq!(signals.pop_due(now), Some((id, 0x22)));
    // Not due again until a period elapses.
    assert_eq!(signals.pop_due(now), None);
    assert_eq!(signals.pop_due(now + Duration::from_millis(6)), Some((id, 0x22)));

    // Repeating signals stay cancellable between firings.
    assert!(signals.cancel(id));
    assert_eq!(signals.pop_due(now + Duration::from_millis(20)), None);
}

#[test]
fn test_due_order_is_deadline_order() {
    let mut signals = SignalQueue::new();
    let late = signals.schedule(0x01, Duration::from_millis(20), None);
    let early = signals.schedule(0x02, Duration::from_millis(1), None);

    let now = Instant::now() + Duration::from_millis(30);
    assert_eq!(signals.pop_due(now), Some((early, 0x02)));
    assert_eq!(signals.pop_due(now), Some((late, 0x01)));
}
