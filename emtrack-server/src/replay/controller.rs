//! Replay lifecycle orchestration.
//!
//! The controller is the only component with cross-cutting authority: it
//! loads the recording, starts the transport, the subscriber pool and the
//! scheduler, and owns the shutdown ordering. The scheduler is cancelled
//! first (stop producing), then the transport is closed (which drains the
//! publisher side), then the subscribers are closed last, so no message is
//! silently unroutable mid-shutdown.

use super::scheduler;
use super::{loader, ReplayError};
use crate::subscriber;
use crate::transport::{PubServer, Publisher};
use log::{debug, info, warn};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// How long `stop` waits on any single task before abandoning it
const STOP_GRACE: Duration = Duration::from_secs(2);

/// How long `start` waits for the subscriber pool to connect
const SUBSCRIBE_GRACE: Duration = Duration::from_secs(2);

/// Replay session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// No session yet
    Idle,
    /// Reading and parsing the input file
    Loading,
    /// Emitting samples at recorded pace
    Replaying,
    /// Between passes: re-anchoring for the next loop iteration
    Looping,
    /// Non-loop replay ran to completion
    Finished,
    /// Cancelled, or a fatal error before replay started
    Stopped,
}

impl ReplayState {
    /// True once the session can never produce another sample
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayState::Finished | ReplayState::Stopped)
    }

    /// True while the scheduler task is producing
    pub fn is_active(&self) -> bool {
        matches!(self, ReplayState::Replaying | ReplayState::Looping)
    }
}

impl std::fmt::Display for ReplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayState::Idle => write!(f, "idle"),
            ReplayState::Loading => write!(f, "loading"),
            ReplayState::Replaying => write!(f, "replaying"),
            ReplayState::Looping => write!(f, "looping"),
            ReplayState::Finished => write!(f, "finished"),
            ReplayState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Options for one replay session.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Input CSV recording
    pub path: PathBuf,
    /// Restart from the first sample when the recording is exhausted
    pub loop_replay: bool,
    /// Number of subscriber pool entries to pre-create (sensor topics 0..n)
    pub sensor_count: u32,
    /// TCP port for the pub/sub transport (0 = ephemeral)
    pub port: u16,
}

/// Shared session flags: the controller writes, the scheduler reads.
///
/// This is the only state mutated concurrently across tasks; everything
/// else crosses task boundaries by value.
#[derive(Debug, Default)]
pub struct ReplaySession {
    running: AtomicBool,
    loop_enabled: AtomicBool,
    stop_requested: AtomicBool,
    passes: AtomicU32,
    position_us: AtomicU64,
}

impl ReplaySession {
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.loop_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled.load(Ordering::SeqCst)
    }

    /// Completed full passes over the merged sequence
    pub fn passes(&self) -> u32 {
        self.passes.load(Ordering::Relaxed)
    }

    pub(super) fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Replay position within the current pass, in seconds
    pub fn position(&self) -> f64 {
        self.position_us.load(Ordering::Relaxed) as f64 / 1e6
    }

    pub(super) fn set_position(&self, seconds: f64) {
        self.position_us
            .store((seconds * 1e6) as u64, Ordering::Relaxed);
    }
}

/// Serializable session status, for logging and diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStatus {
    pub state: String,
    pub file: Option<String>,
    pub sensor_count: usize,
    pub duration_secs: f64,
    pub position_secs: f64,
    pub passes: u32,
    pub loop_enabled: bool,
    pub dropped_frames: u64,
}

/// Owns all task handles and the shared session state for one replay.
pub struct ReplayController {
    state: Arc<RwLock<ReplayState>>,
    session: Arc<ReplaySession>,
    transport_shutdown: Option<watch::Sender<bool>>,
    transport: Option<JoinHandle<Result<(), crate::transport::TransportError>>>,
    scheduler: Option<JoinHandle<()>>,
    subscribers: Vec<JoinHandle<()>>,
    publisher: Option<Publisher>,
    file: Option<String>,
    sensor_count: usize,
    duration_secs: f64,
}

impl Default for ReplayController {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayController {
    pub fn new() -> Self {
        ReplayController {
            state: Arc::new(RwLock::new(ReplayState::Idle)),
            session: Arc::new(ReplaySession::default()),
            transport_shutdown: None,
            transport: None,
            scheduler: None,
            subscribers: Vec::new(),
            publisher: None,
            file: None,
            sensor_count: 0,
            duration_secs: 0.0,
        }
    }

    pub async fn state(&self) -> ReplayState {
        *self.state.read().await
    }

    pub fn session(&self) -> Arc<ReplaySession> {
        self.session.clone()
    }

    /// Start one replay session: bind the transport, pre-create the
    /// subscriber pool, load the recording and launch the scheduler.
    ///
    /// On load or transport failure the session transitions to `Stopped`
    /// and the error is surfaced; no scheduler task is started.
    pub async fn start(&mut self, options: &ReplayOptions) -> Result<(), ReplayError> {
        {
            let mut state = self.state.write().await;
            if *state != ReplayState::Idle {
                return Err(ReplayError::AlreadyStarted);
            }
            *state = ReplayState::Loading;
        }

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), options.port);
        let server = match PubServer::bind(bind_addr).await {
            Ok(server) => server,
            Err(e) => {
                *self.state.write().await = ReplayState::Stopped;
                return Err(e.into());
            }
        };
        let addr = server.local_addr()?;
        let publisher = server.publisher();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.transport = Some(tokio::spawn(server.run(shutdown_rx)));
        self.transport_shutdown = Some(shutdown_tx);

        // Pre-create the pool before replay starts so nobody misses the
        // first samples; latecomers get no replay buffering.
        self.subscribers = subscriber::spawn_pool(addr, options.sensor_count);
        self.wait_for_pool(&publisher, options.sensor_count as usize)
            .await;

        let recording = match loader::load(&options.path) {
            Ok(recording) => recording,
            Err(e) => {
                warn!("Load failed, stopping session: {}", e);
                *self.state.write().await = ReplayState::Stopped;
                self.shutdown_transport().await;
                self.close_subscribers().await;
                return Err(e);
            }
        };

        self.file = Some(options.path.display().to_string());
        self.sensor_count = recording.sensor_count();
        self.duration_secs = recording.duration();
        info!(
            "Loaded '{}': {} samples, {} sensors, {:.3}s, loop {}",
            options.path.display(),
            recording.total_samples(),
            recording.sensor_count(),
            recording.duration(),
            if options.loop_replay { "enabled" } else { "disabled" }
        );

        self.session.set_loop_enabled(options.loop_replay);
        self.session.set_running(true);
        *self.state.write().await = ReplayState::Replaying;

        self.publisher = Some(publisher.clone());
        self.scheduler = Some(tokio::spawn(scheduler::replay_task(
            recording,
            publisher,
            self.session.clone(),
            self.state.clone(),
        )));

        Ok(())
    }

    /// Wait until the scheduler task exits (replay finished in non-loop
    /// mode, or was cancelled), then reap the remaining tasks.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.scheduler.take() {
            if let Err(e) = handle.await {
                warn!("Scheduler task failed: {}", e);
            }
        }
        // Non-loop finish: subscribers exit on the done signal
        self.close_subscribers().await;
        self.shutdown_transport().await;
    }

    /// Cancel the session. Idempotent; completes within a bounded grace
    /// period even if a subscriber is unresponsive.
    pub async fn stop(&mut self) {
        self.session.request_stop();
        self.session.set_running(false);

        // 1. Scheduler first: stop producing
        if let Some(handle) = self.scheduler.take() {
            match tokio::time::timeout(STOP_GRACE, handle).await {
                Ok(Err(e)) => warn!("Scheduler task failed during stop: {}", e),
                Ok(Ok(())) => {}
                Err(_) => warn!("Scheduler did not stop within grace period"),
            }
        }

        {
            let mut state = self.state.write().await;
            if !state.is_terminal() {
                debug!("Session {} -> stopped", *state);
                *state = ReplayState::Stopped;
            }
        }

        // 2. Transport next: closes all subscriber connections
        self.shutdown_transport().await;

        // 3. Subscribers last
        self.close_subscribers().await;
    }

    pub async fn status(&self) -> ReplayStatus {
        ReplayStatus {
            state: self.state.read().await.to_string(),
            file: self.file.clone(),
            sensor_count: self.sensor_count,
            duration_secs: self.duration_secs,
            position_secs: self.session.position(),
            passes: self.session.passes(),
            loop_enabled: self.session.loop_enabled(),
            dropped_frames: self
                .publisher
                .as_ref()
                .map(|p| p.dropped_count())
                .unwrap_or(0),
        }
    }

    async fn wait_for_pool(&self, publisher: &Publisher, expected: usize) {
        let deadline = tokio::time::Instant::now() + SUBSCRIBE_GRACE;
        while publisher.connection_count() < expected {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Only {}/{} subscribers connected before replay start",
                    publisher.connection_count(),
                    expected
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Give connection tasks a moment to register the SUB lines
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    async fn shutdown_transport(&mut self) {
        if let Some(tx) = self.transport_shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.transport.take() {
            match tokio::time::timeout(STOP_GRACE, handle).await {
                Ok(Ok(Err(e))) => warn!("Transport exited with error: {}", e),
                Ok(Err(e)) => warn!("Transport task failed: {}", e),
                Ok(Ok(Ok(()))) => {}
                Err(_) => warn!("Transport did not stop within grace period"),
            }
        }
    }

    async fn close_subscribers(&mut self) {
        for handle in self.subscribers.drain(..) {
            match tokio::time::timeout(STOP_GRACE, handle).await {
                Ok(_) => {}
                Err(_) => {
                    // Bounded shutdown: never wait indefinitely on one entry
                    warn!("Subscriber did not exit within grace period, aborting");
                }
            }
        }
    }
}
