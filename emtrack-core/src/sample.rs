//! Sample, stream and recording data structures.
//!
//! These structures represent recorded motion-tracker data independent of
//! any I/O or networking code. A [`Recording`] is read-only after
//! [`Recording::finalize`]; the replay scheduler owns it for the lifetime
//! of one session and no locking is needed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of pose fields per sample (position + quaternion)
pub const POSE_ARITY: usize = 7;

/// Position and orientation of one sensor at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub qw: f32,
    pub qx: f32,
    pub qy: f32,
    pub qz: f32,
}

impl Pose {
    /// Origin position with identity orientation
    pub const IDENTITY: Pose = Pose {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        qw: 1.0,
        qx: 0.0,
        qy: 0.0,
        qz: 0.0,
    };

    /// Build a pose from a fixed-arity field array `[x, y, z, qw, qx, qy, qz]`
    pub fn from_array(v: [f32; POSE_ARITY]) -> Self {
        Pose {
            x: v[0],
            y: v[1],
            z: v[2],
            qw: v[3],
            qx: v[4],
            qy: v[5],
            qz: v[6],
        }
    }

    /// Fields in wire order `[x, y, z, qw, qx, qy, qz]`
    pub fn to_array(&self) -> [f32; POSE_ARITY] {
        [self.x, self.y, self.z, self.qw, self.qx, self.qy, self.qz]
    }
}

/// One recorded observation for one sensor at one instant.
///
/// Immutable once loaded; samples cross task boundaries by value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// 0-based sensor index
    pub sensor_id: u32,
    /// Monotonic recorded time in seconds
    pub timestamp: f64,
    /// Position + orientation
    pub pose: Pose,
}

impl Sample {
    pub fn new(sensor_id: u32, timestamp: f64, pose: Pose) -> Self {
        Sample {
            sensor_id,
            timestamp,
            pose,
        }
    }
}

/// Time-ordered sequence of samples for one sensor.
///
/// Invariant: after [`SensorStream::sort`] (called by
/// [`Recording::finalize`]) timestamps are non-decreasing. The sort is
/// stable, so equal-timestamp samples keep their original file order.
#[derive(Debug, Clone, Default)]
pub struct SensorStream {
    samples: Vec<Sample>,
}

impl SensorStream {
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Sort by timestamp if the source interleaved rows out of order
    pub fn sort(&mut self) {
        if !self.is_sorted() {
            self.samples
                .sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.samples
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

/// The full set of sensor streams loaded from one input file.
///
/// Keyed by sensor id. Derived metadata (`sensor_count`, `duration`) is
/// computed on demand from the streams.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    streams: BTreeMap<u32, SensorStream>,
}

impl Recording {
    pub fn new() -> Self {
        Recording::default()
    }

    /// Append a sample to its sensor's stream, preserving file order
    pub fn push(&mut self, sample: Sample) {
        self.streams.entry(sample.sensor_id).or_default().push(sample);
    }

    /// Restore the per-stream ordering invariant after load
    pub fn finalize(&mut self) {
        for stream in self.streams.values_mut() {
            stream.sort();
        }
    }

    /// Number of distinct sensor indices found
    pub fn sensor_count(&self) -> usize {
        self.streams.len()
    }

    /// Sensor ids in ascending order
    pub fn sensor_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.streams.keys().copied()
    }

    pub fn stream(&self, sensor_id: u32) -> Option<&SensorStream> {
        self.streams.get(&sensor_id)
    }

    /// Max timestamp across all streams, in seconds (0.0 when empty)
    pub fn duration(&self) -> f64 {
        self.streams
            .values()
            .filter_map(|s| s.last())
            .map(|s| s.timestamp)
            .fold(0.0, f64::max)
    }

    pub fn total_samples(&self) -> usize {
        self.streams.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_samples() == 0
    }

    /// Single merged replay ordering across all streams.
    ///
    /// Sorted by ascending timestamp with a stable tie-break on lower
    /// sensor id, which is the order the scheduler emits samples in.
    pub fn merged(&self) -> Vec<Sample> {
        let mut all: Vec<Sample> = self
            .streams
            .values()
            .flat_map(|s| s.iter().copied())
            .collect();
        all.sort_by(|a, b| {
            a.timestamp
                .total_cmp(&b.timestamp)
                .then(a.sensor_id.cmp(&b.sensor_id))
        });
        all
    }
}
