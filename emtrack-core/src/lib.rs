//! # Emtrack Core
//!
//! Platform-independent data model for electromagnetic motion-tracker streams.
//!
//! This crate contains the sample/recording model and the wire codec with
//! **zero I/O dependencies**, so it can be shared between the replay server
//! and any future consumer-side tooling.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  emtrack-core (platform-independent, no tokio/async deps)  │
//! │  ├── sample/   (Sample, SensorStream, Recording)           │
//! │  ├── topic/    (topic naming & routing)                    │
//! │  ├── wire/     (binary payload codec)                      │
//! │  └── error/    (load & wire error taxonomy)                │
//! └─────────────────────────────────────────────────────────────┘
//!                           ▲
//!               ┌───────────┴───────────┐
//!               │  emtrack-server       │
//!               │  (tokio, TCP pub/sub) │
//!               └───────────────────────┘
//! ```
//!
//! ## Example: Building a Recording
//!
//! ```rust
//! use emtrack_core::{Pose, Recording, Sample};
//!
//! let mut recording = Recording::new();
//! recording.push(Sample::new(0, 0.0, Pose::IDENTITY));
//! recording.push(Sample::new(1, 0.1, Pose::IDENTITY));
//! recording.finalize();
//!
//! assert_eq!(recording.sensor_count(), 2);
//! assert_eq!(recording.duration(), 0.1);
//! ```

pub mod error;
pub mod sample;
pub mod topic;
pub mod wire;

// Re-export commonly used types
pub use error::{LoadError, WireError};
pub use sample::{Pose, Recording, Sample, SensorStream, POSE_ARITY};
pub use topic::{sensor_from_topic, sensor_topic, CONTROL_DONE_TOPIC, SENSOR_TOPIC_PREFIX};
pub use wire::{decode_sample, encode_sample, SAMPLE_WIRE_LEN};
