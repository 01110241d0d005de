use std::time::Duration;

use super::*;

#[test]
fn test_escalation_order() {
    let mut idle = IdleStrategy::new(2, 3, Duration::from_micros(1));
    assert_eq!(idle.phase(), IdlePhase::Spinning);

    idle.idle();
    idle.idle();
    assert_eq!(idle.phase(), IdlePhase::Yielding);

    idle.idle();
    idle.idle();
    idle.idle();
    assert_eq!(idle.phase(), IdlePhase::Parking);

    // Parking is the ceiling; further idles stay parked.
    idle.idle();
    assert_eq!(idle.phase(), IdlePhase::Parking);
}

#[test]
fn test_reset_returns_to_spinning() {
    let mut idle = IdleStrategy::new(1, 1, Duration::from_micros(1));
    idle.idle();
    idle.idle();
    assert_eq!(idle.phase(), IdlePhase::Parking);

    idle.reset();
    assert_eq!(idle.phase(), IdlePhase::Spinning);
}

#[test]
fn test_zero_limits_park_immediately() {
    let mut idle = IdleStrategy::new(0, 0, Duration::from_micros(1));
    assert_eq!(idle.phase(), IdlePhase::Parking);
    idle.idle();
    assert_eq!(idle.phase(), IdlePhase::Parking);
}
