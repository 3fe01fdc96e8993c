//! Topic naming and routing.
//!
//! Each sensor's samples travel on their own topic so that a subscriber
//! interested in one sensor never sees another sensor's data. Topics are
//! derived deterministically from the sensor id and never renumbered
//! mid-session.

use crate::error::WireError;

/// Prefix for per-sensor sample topics
pub const SENSOR_TOPIC_PREFIX: &str = "sensor/em/";

/// Control topic published once when a non-looping replay finishes
pub const CONTROL_DONE_TOPIC: &str = "control/done";

/// Topic for one sensor's sample stream, e.g. `sensor/em/2`
pub fn sensor_topic(sensor_id: u32) -> String {
    format!("{}{}", SENSOR_TOPIC_PREFIX, sensor_id)
}

/// Parse the sensor id back out of a sample topic.
///
/// Returns `None` for control topics and anything else that is not a
/// well-formed sensor topic.
pub fn sensor_from_topic(topic: &str) -> Option<u32> {
    topic
        .strip_prefix(SENSOR_TOPIC_PREFIX)
        .and_then(|suffix| suffix.parse().ok())
}

/// Validate a topic string for transport framing (must fit in a u16 length
/// prefix; in practice topics are tiny).
pub fn check_topic_len(topic: &str) -> Result<(), WireError> {
    if topic.len() > u16::MAX as usize {
        return Err(WireError::LengthMismatch {
            expected: u16::MAX as usize,
            actual: topic.len(),
        });
    }
    Ok(())
}
