//! # Emtrack Server
//!
//! Replay server for recorded electromagnetic motion-tracker data.
//!
//! Reads a CSV recording, reconstructs the original real-time pacing from
//! the recorded timestamps and distributes each sensor's samples on its
//! own topic over a broker-less TCP pub/sub transport, so that
//! visualization, logging and algorithm-test consumers can be exercised
//! as if the data were arriving live from hardware.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    emtrack-server                        │
//! │  ┌────────────┐  ┌───────────────┐  ┌─────────────────┐  │
//! │  │ Loader     │─▶│ Scheduler     │─▶│ Publisher       │  │
//! │  │ (CSV)      │  │ (pacing/loop) │  │ (topic fan-out) │  │
//! │  └────────────┘  └───────────────┘  └────────┬────────┘  │
//! │         ▲                ▲                   │ TCP       │
//! │  ┌──────┴────────────────┴──────┐   ┌────────▼────────┐  │
//! │  │ ReplayController             │   │ Subscriber pool │  │
//! │  │ (state machine, shutdown)    │   │ (1 task/topic)  │  │
//! │  └──────────────────────────────┘   └─────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is fire-and-forget: no acknowledgment, no persistence, no
//! replay buffering. A subscriber that connects late misses everything
//! published before its subscription.
//!
//! ## Command-Line Interface
//!
//! See [`Cli`]. Key options:
//!
//! - `-f, --file` - CSV recording to replay (omit for built-in demo data)
//! - `-r, --loop` - loop the replay indefinitely
//! - `-n, --sensors` - number of subscriber topics to pre-create
//! - `-p, --port` - TCP port for the pub/sub transport (default: 5555)

use clap::Parser;
use log::info;
use std::path::PathBuf;
use tokio_graceful_shutdown::SubsystemHandle;

pub mod replay;
pub mod subscriber;
pub mod transport;

pub use replay::controller::{ReplayController, ReplayOptions, ReplayState, ReplayStatus};
pub use replay::ReplayError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(
    name = "emtrack-server",
    version,
    about = "Replays recorded EM motion-tracker data over a TCP pub/sub transport"
)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Path to the input CSV recording; omit to replay the built-in demo data
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Loop the replay indefinitely
    #[arg(short = 'r', long = "loop")]
    pub loop_replay: bool,

    /// Number of subscriber topics to pre-create
    #[arg(short = 'n', long = "sensors", default_value_t = 4)]
    pub sensors: u32,

    /// TCP port for the pub/sub transport
    #[arg(short, long, default_value_t = transport::DEFAULT_PORT)]
    pub port: u16,
}

/// Top-level replay subsystem: runs one replay session to completion or
/// until shutdown is requested, then tears everything down in order.
pub async fn run_replay(subsys: SubsystemHandle, args: Cli) -> Result<(), ReplayError> {
    let (path, demo) = match args.file {
        Some(path) => (path, false),
        None => {
            // Interactive/demo mode: generate the built-in demo recording
            let path = std::env::temp_dir().join("emtrack-demo.csv");
            replay::loader::write_demo_csv(&path)?;
            info!("No input file given, replaying demo data from {}", path.display());
            (path, true)
        }
    };

    let options = ReplayOptions {
        path,
        loop_replay: args.loop_replay,
        sensor_count: args.sensors,
        port: args.port,
    };

    let mut controller = ReplayController::new();
    controller.start(&options).await?;

    if demo {
        info!("Demo replay running; press Ctrl-C to stop");
    }

    // Either the replay finishes on its own (non-loop mode) or shutdown
    // is requested from outside (Ctrl-C, fatal subsystem error).
    let finished = tokio::select! {
        _ = subsys.on_shutdown_requested() => false,
        _ = controller.wait() => true,
    };

    controller.stop().await;

    let status = controller.status().await;
    info!(
        "Replay {}: {}",
        if finished { "finished" } else { "stopped" },
        serde_json::to_string(&status).unwrap_or_default()
    );

    if finished {
        subsys.request_shutdown();
    }
    Ok(())
}
