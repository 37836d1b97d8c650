//! Operation durations measured on the real stations.

use std::time::Duration;

pub const MIN_OPERATION: Duration = Duration::from_millis(1000);
pub const BAND_INPUT_TO_MID: Duration = Duration::from_millis(1538);
pub const BAND_MID_TO_OUTPUT: Duration = Duration::from_millis(2656);
pub const CAP_OPERATION: Duration = Duration::from_millis(17500);
pub const STORAGE_OPERATION: Duration = Duration::from_millis(17500);
pub const RING_MOUNT: Duration = Duration::from_millis(17308);
pub const READY_AT_OUTPUT: Duration = Duration::from_millis(15000);
pub const BASE_DISPENSE: Duration = Duration::from_secs(1);

/// `duration / exec_speed` rounded to milliseconds, never below [`MIN_OPERATION`].
pub fn scaled(duration: Duration, exec_speed: f32) -> Duration {
    let millis = (duration.as_millis() as f64 / f64::from(exec_speed)).round();
    Duration::from_millis(millis as u64).max(MIN_OPERATION)
}

/// Delivery takes one second plus one second per slot, scaled.
pub fn delivery(slot: u16, exec_speed: f32) -> Duration {
    let slot_secs = (f64::from(slot) / f64::from(exec_speed)).ceil();
    Duration::from_secs(1 + slot_secs as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling() {
        assert_eq!(scaled(CAP_OPERATION, 1.0), Duration::from_millis(17500));
        assert_eq!(scaled(RING_MOUNT, 2.0), Duration::from_millis(8654));
        assert_eq!(scaled(BAND_INPUT_TO_MID, 4.0), MIN_OPERATION);
    }

    #[test]
    fn test_delivery() {
        assert_eq!(delivery(2, 1.0), Duration::from_secs(3));
        assert_eq!(delivery(3, 2.0), Duration::from_secs(3));
        assert_eq!(delivery(1, 10.0), Duration::from_secs(2));
    }
}
