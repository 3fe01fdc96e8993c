use clap::Parser;
use emtrack_server::{run_replay, Cli, VERSION};
use miette::{IntoDiagnostic, Result};
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    log::info!("emtrack-server {}", VERSION);

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("Replay", move |subsys| {
            run_replay(subsys, args)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(3))
    .await
    .into_diagnostic()
}
