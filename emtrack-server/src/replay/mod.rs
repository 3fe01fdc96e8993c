//! Replay engine: loading, pacing, lifecycle.
//!
//! This module owns everything between the input file and the transport:
//!
//! - [`loader`] - reads a CSV recording into an in-memory [`Recording`]
//! - [`scheduler`] - emits samples at their recorded pace, with looping
//! - [`controller`] - lifecycle state machine and shutdown ordering
//!
//! [`Recording`]: emtrack_core::Recording

use crate::transport::TransportError;
use emtrack_core::LoadError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod controller;
pub mod loader;
pub mod scheduler;

/// Fatal replay errors. Steady-state per-message failures are logged and
/// dropped, never surfaced through this type.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// The input file did not parse into a usable recording
    #[error("Failed to load recording: {0}")]
    Load(#[from] LoadError),

    /// The pub/sub transport could not be set up
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `start` was called on a session that already ran
    #[error("Replay session already started")]
    AlreadyStarted,

    /// I/O failure reading or writing a recording file
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}
