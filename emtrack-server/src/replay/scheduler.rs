//! Paced sample emission.
//!
//! The scheduler walks the merged sample sequence and publishes each sample
//! when its recorded offset from the first sample has elapsed on the wall
//! clock. Deadlines are anchored to a single pass start instant, so timing
//! error never accumulates across samples: a sample late by 3ms does not
//! push every later sample 3ms late.

use super::controller::{ReplaySession, ReplayState};
use emtrack_core::{encode_sample, sensor_topic, Recording, CONTROL_DONE_TOPIC};
use log::{debug, info, trace};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Longest uninterrupted sleep; the stop flag is re-checked at this cadence
/// so cancellation latency stays bounded even mid-gap.
const MAX_WAIT: Duration = Duration::from_millis(50);

/// Emit every sample of `recording` in merged timestamp order at recorded
/// pace, looping when the session has looping enabled.
///
/// Runs until the recording is exhausted in non-loop mode or until the
/// session requests a stop. In the non-loop case a final empty message on
/// the control topic tells subscribers the stream is complete.
pub async fn replay_task(
    recording: Recording,
    publisher: crate::transport::Publisher,
    session: Arc<ReplaySession>,
    state: Arc<RwLock<ReplayState>>,
) {
    let merged = recording.merged();
    if merged.is_empty() {
        // The loader rejects empty recordings; this only guards a direct call
        session.set_running(false);
        *state.write().await = ReplayState::Finished;
        return;
    }

    let rec_t0 = merged[0].timestamp;
    debug!(
        "Scheduler: {} samples over {:.3}s",
        merged.len(),
        recording.duration()
    );

    'passes: loop {
        let t0 = Instant::now();

        for sample in &merged {
            let target = Duration::from_secs_f64((sample.timestamp - rec_t0).max(0.0));

            // Wait in bounded slices so a stop request is honored quickly
            loop {
                if session.stop_requested() {
                    break 'passes;
                }
                let elapsed = t0.elapsed();
                if elapsed >= target {
                    break;
                }
                tokio::time::sleep((target - elapsed).min(MAX_WAIT)).await;
            }

            trace!(
                "Publish sensor {} at {:.3}s",
                sample.sensor_id,
                sample.timestamp - rec_t0
            );
            publisher.publish(&sensor_topic(sample.sensor_id), encode_sample(sample).to_vec());
            session.set_position(sample.timestamp - rec_t0);
        }

        session.record_pass();

        if !session.loop_enabled() {
            break;
        }

        // Re-anchor for the next pass; inter-sample gaps inside a pass are
        // preserved but passes follow each other back to back
        debug!("Pass {} complete, looping", session.passes());
        {
            let mut state = state.write().await;
            if *state == ReplayState::Replaying {
                *state = ReplayState::Looping;
            }
        }
        if session.stop_requested() {
            break;
        }
        {
            let mut state = state.write().await;
            if *state == ReplayState::Looping {
                *state = ReplayState::Replaying;
            }
        }
    }

    session.set_running(false);

    let mut state = state.write().await;
    if !state.is_terminal() {
        if session.stop_requested() {
            *state = ReplayState::Stopped;
        } else {
            info!(
                "Replay complete after {} pass(es), signalling done",
                session.passes()
            );
            publisher.publish(CONTROL_DONE_TOPIC, Vec::new());
            *state = ReplayState::Finished;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{PubServer, SubSocket};
    use emtrack_core::{decode_sample, Pose, Sample};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tokio::sync::watch;

    fn recording(samples: &[(u32, f64)]) -> Recording {
        let mut recording = Recording::new();
        for &(sensor_id, timestamp) in samples {
            recording.push(Sample {
                sensor_id,
                timestamp,
                pose: Pose::IDENTITY,
            });
        }
        recording.finalize();
        recording
    }

    async fn bind_server() -> (PubServer, SocketAddr) {
        let server = PubServer::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
        ))
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr)
    }

    #[tokio::test]
    async fn test_pacing_preserves_recorded_gaps() {
        let (server, _) = bind_server().await;
        let publisher = server.publisher();
        let session = Arc::new(ReplaySession::default());
        session.set_running(true);
        let state = Arc::new(RwLock::new(ReplayState::Replaying));

        let start = Instant::now();
        replay_task(
            recording(&[(0, 0.0), (0, 0.1), (0, 0.3)]),
            publisher,
            session.clone(),
            state.clone(),
        )
        .await;
        let elapsed = start.elapsed();

        // 300ms of recorded span, generous upper bound for slow CI
        assert!(elapsed >= Duration::from_millis(280), "too fast: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "too slow: {:?}", elapsed);
        assert_eq!(*state.read().await, ReplayState::Finished);
        assert_eq!(session.passes(), 1);
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_first_sample_offset_is_ignored() {
        // Recordings rarely start at t=0; the first sample must still be
        // emitted immediately
        let (server, _) = bind_server().await;
        let session = Arc::new(ReplaySession::default());
        let state = Arc::new(RwLock::new(ReplayState::Replaying));

        let start = Instant::now();
        replay_task(
            recording(&[(0, 100.0), (0, 100.05)]),
            server.publisher(),
            session,
            state,
        )
        .await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_loop_runs_multiple_passes_then_stops() {
        let (server, _) = bind_server().await;
        let session = Arc::new(ReplaySession::default());
        session.set_loop_enabled(true);
        session.set_running(true);
        let state = Arc::new(RwLock::new(ReplayState::Replaying));

        let task = tokio::spawn(replay_task(
            recording(&[(0, 0.0), (0, 0.02)]),
            server.publisher(),
            session.clone(),
            state.clone(),
        ));

        // Let several passes complete, then cancel
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.request_stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("scheduler should honor stop quickly")
            .unwrap();

        assert!(session.passes() >= 2, "only {} passes", session.passes());
        assert_eq!(*state.read().await, ReplayState::Stopped);
    }

    #[tokio::test]
    async fn test_delivery_order_and_done_signal() {
        let (server, addr) = bind_server().await;
        let publisher = server.publisher();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = tokio::spawn(server.run(shutdown_rx));

        let mut sub = SubSocket::connect(addr).await.unwrap();
        sub.subscribe(&sensor_topic(0)).await.unwrap();
        sub.subscribe(&sensor_topic(1)).await.unwrap();
        sub.subscribe(CONTROL_DONE_TOPIC).await.unwrap();
        // Let the connection task register the subscriptions
        tokio::time::sleep(Duration::from_millis(50)).await;

        let session = Arc::new(ReplaySession::default());
        session.set_running(true);
        let state = Arc::new(RwLock::new(ReplayState::Replaying));
        let task = tokio::spawn(replay_task(
            recording(&[(1, 0.01), (0, 0.0), (0, 0.02)]),
            publisher,
            session,
            state,
        ));

        let mut seen = Vec::new();
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), sub.recv())
                .await
                .expect("frame within deadline")
                .unwrap()
                .expect("stream open until done");
            if frame.topic == CONTROL_DONE_TOPIC {
                assert!(frame.payload.is_empty());
                break;
            }
            seen.push(decode_sample(&frame.payload).unwrap());
        }

        // Merged timestamp order across sensors
        let order: Vec<(u32, f64)> = seen.iter().map(|s| (s.sensor_id, s.timestamp)).collect();
        assert_eq!(order, vec![(0, 0.0), (1, 0.01), (0, 0.02)]);

        task.await.unwrap();
        let _ = shutdown_tx.send(true);
        let _ = transport.await;
    }
}
