//! Binary wire codec for sample payloads.
//!
//! Fixed 40-byte little-endian layout, agreed between publisher and
//! subscribers:
//!
//! ```text
//! ┌────────────┬──────────────────────┬──────────────────────────────┐
//! │ 0..4       │ 4..12                │ 12..40                       │
//! │ i32 sensor │ i64 timestamp (µs)   │ 7 × f32 pose                 │
//! │            │                      │ x y z qw qx qy qz            │
//! └────────────┴──────────────────────┴──────────────────────────────┘
//! ```
//!
//! The sensor id is redundant with the topic; carrying it in the payload
//! lets a consumer sanity-check routing and decode messages it archived
//! without their topic.

use crate::error::WireError;
use crate::sample::{Pose, Sample, POSE_ARITY};

/// Encoded sample size in bytes
pub const SAMPLE_WIRE_LEN: usize = 4 + 8 + POSE_ARITY * 4;

const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Encode a sample into its fixed wire layout
pub fn encode_sample(sample: &Sample) -> [u8; SAMPLE_WIRE_LEN] {
    let mut buf = [0u8; SAMPLE_WIRE_LEN];

    // Sensor id (4 bytes)
    buf[0..4].copy_from_slice(&(sample.sensor_id as i32).to_le_bytes());
    // Timestamp in microseconds (8 bytes)
    let micros = (sample.timestamp * MICROS_PER_SEC).round() as i64;
    buf[4..12].copy_from_slice(&micros.to_le_bytes());
    // Pose fields (7 x 4 bytes)
    for (i, field) in sample.pose.to_array().iter().enumerate() {
        let off = 12 + i * 4;
        buf[off..off + 4].copy_from_slice(&field.to_le_bytes());
    }

    buf
}

/// Decode a sample from its fixed wire layout.
///
/// The payload must be exactly [`SAMPLE_WIRE_LEN`] bytes; trailing bytes
/// indicate a framing bug, not a usable message.
pub fn decode_sample(payload: &[u8]) -> Result<Sample, WireError> {
    if payload.len() < SAMPLE_WIRE_LEN {
        return Err(WireError::TooShort {
            expected: SAMPLE_WIRE_LEN,
            actual: payload.len(),
        });
    }
    if payload.len() > SAMPLE_WIRE_LEN {
        return Err(WireError::LengthMismatch {
            expected: SAMPLE_WIRE_LEN,
            actual: payload.len(),
        });
    }

    let sensor_id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    if sensor_id < 0 {
        return Err(WireError::InvalidSensorId(sensor_id));
    }

    let micros = i64::from_le_bytes([
        payload[4], payload[5], payload[6], payload[7], payload[8], payload[9], payload[10],
        payload[11],
    ]);

    let mut fields = [0f32; POSE_ARITY];
    for (i, field) in fields.iter_mut().enumerate() {
        let off = 12 + i * 4;
        *field = f32::from_le_bytes([
            payload[off],
            payload[off + 1],
            payload[off + 2],
            payload[off + 3],
        ]);
    }

    Ok(Sample {
        sensor_id: sensor_id as u32,
        timestamp: micros as f64 / MICROS_PER_SEC,
        pose: Pose::from_array(fields),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_len() {
        assert_eq!(SAMPLE_WIRE_LEN, 40);
    }

    #[test]
    fn test_encode_decode() {
        let sample = Sample::new(
            3,
            1.234567,
            Pose {
                x: 0.1,
                y: -0.2,
                z: 0.3,
                qw: 0.9,
                qx: 0.1,
                qy: 0.0,
                qz: -0.4,
            },
        );

        let decoded = decode_sample(&encode_sample(&sample)).unwrap();
        assert_eq!(decoded.sensor_id, 3);
        // Timestamp survives with microsecond precision
        assert!((decoded.timestamp - sample.timestamp).abs() < 1e-6);
        assert_eq!(decoded.pose, sample.pose);
    }

    #[test]
    fn test_decode_too_short() {
        let err = decode_sample(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            WireError::TooShort {
                expected: SAMPLE_WIRE_LEN,
                actual: 10
            }
        );
    }

    #[test]
    fn test_decode_trailing_bytes() {
        let mut buf = encode_sample(&Sample::new(0, 0.0, Pose::IDENTITY)).to_vec();
        buf.push(0xFF);
        let err = decode_sample(&buf).unwrap_err();
        assert_eq!(
            err,
            WireError::LengthMismatch {
                expected: SAMPLE_WIRE_LEN,
                actual: SAMPLE_WIRE_LEN + 1
            }
        );
    }

    #[test]
    fn test_decode_negative_sensor_id() {
        let mut buf = encode_sample(&Sample::new(0, 0.0, Pose::IDENTITY));
        buf[0..4].copy_from_slice(&(-1i32).to_le_bytes());
        assert_eq!(decode_sample(&buf).unwrap_err(), WireError::InvalidSensorId(-1));
    }

    #[test]
    fn test_timestamp_zero() {
        let decoded = decode_sample(&encode_sample(&Sample::new(1, 0.0, Pose::IDENTITY))).unwrap();
        assert_eq!(decoded.timestamp, 0.0);
    }
}
