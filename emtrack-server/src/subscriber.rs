//! Built-in subscriber pool.
//!
//! Each pool entry opens its own connection to the pub/sub transport,
//! subscribes to exactly one sensor topic plus the control topic, and
//! prints every decoded sample. The pool stands in for external consumers
//! during development and doubles as an end-to-end smoke test of the
//! transport path.

use crate::transport::{SubSocket, TransportError};
use emtrack_core::{decode_sample, sensor_from_topic, sensor_topic, CONTROL_DONE_TOPIC};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Spawn one printing subscriber per sensor id `0..sensor_count`.
///
/// Tasks exit on the done signal or when the publisher closes the
/// connection; they never outlive the transport.
pub fn spawn_pool(addr: SocketAddr, sensor_count: u32) -> Vec<JoinHandle<()>> {
    (0..sensor_count)
        .map(|sensor_id| {
            tokio::spawn(async move {
                if let Err(e) = run_printer(addr, sensor_id).await {
                    warn!("Subscriber {}: {}", sensor_id, e);
                }
            })
        })
        .collect()
}

/// Connect, subscribe to one sensor topic and the control topic, and print
/// samples until the stream ends.
pub async fn run_printer(addr: SocketAddr, sensor_id: u32) -> Result<(), TransportError> {
    let mut sub = connect_with_retry(addr).await?;
    let topic = sensor_topic(sensor_id);
    sub.subscribe(&topic).await?;
    sub.subscribe(CONTROL_DONE_TOPIC).await?;
    debug!("Subscriber {} listening on '{}'", sensor_id, topic);

    loop {
        let frame = match sub.recv().await? {
            Some(frame) => frame,
            None => {
                debug!("Subscriber {}: connection closed", sensor_id);
                return Ok(());
            }
        };

        if frame.topic == CONTROL_DONE_TOPIC {
            info!("Subscriber {}: replay complete", sensor_id);
            return Ok(());
        }

        let sample = match decode_sample(&frame.payload) {
            Ok(sample) => sample,
            Err(e) => {
                // Per-message failure: log and keep the stream alive
                warn!("Subscriber {}: undecodable payload: {}", sensor_id, e);
                continue;
            }
        };

        // The transport routes by exact topic, so a mismatch here means a
        // publisher bug, not a routing bug
        if sensor_from_topic(&frame.topic) != Some(sample.sensor_id) {
            warn!(
                "Subscriber {}: sample for sensor {} arrived on '{}'",
                sensor_id, sample.sensor_id, frame.topic
            );
        }

        let p = &sample.pose;
        info!(
            "Sensor {} t={:.3}s pos=({:.4}, {:.4}, {:.4}) quat=({:.4}, {:.4}, {:.4}, {:.4})",
            sample.sensor_id, sample.timestamp, p.x, p.y, p.z, p.qw, p.qx, p.qy, p.qz
        );
    }
}

/// The pool often starts before the listener finishes binding; retry with
/// a short delay instead of failing the whole session.
async fn connect_with_retry(addr: SocketAddr) -> Result<SubSocket, TransportError> {
    let mut last_err = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match SubSocket::connect(addr).await {
            Ok(sub) => return Ok(sub),
            Err(e) => {
                debug!("Connect attempt {}/{} failed: {}", attempt, CONNECT_ATTEMPTS, e);
                last_err = Some(e);
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
    Err(last_err.unwrap_or(TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "no connection attempts made",
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PubServer;
    use emtrack_core::{encode_sample, Pose, Sample};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_printer_exits_on_done_signal() {
        let server = PubServer::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let publisher = server.publisher();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = tokio::spawn(server.run(shutdown_rx));

        let printer = tokio::spawn(run_printer(addr, 3));
        // Wait until the subscription is registered
        while publisher.connection_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sample = Sample::new(3, 1.5, Pose::IDENTITY);
        publisher.publish(&sensor_topic(3), encode_sample(&sample).to_vec());
        publisher.publish(CONTROL_DONE_TOPIC, Vec::new());

        tokio::time::timeout(Duration::from_secs(2), printer)
            .await
            .expect("printer should exit on done")
            .unwrap()
            .unwrap();

        let _ = shutdown_tx.send(true);
        let _ = transport.await;
    }

    #[tokio::test]
    async fn test_printer_exits_when_transport_closes() {
        let server = PubServer::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let publisher = server.publisher();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = tokio::spawn(server.run(shutdown_rx));

        let printer = tokio::spawn(run_printer(addr, 0));
        while publisher.connection_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let _ = shutdown_tx.send(true);
        let _ = transport.await;

        let result = tokio::time::timeout(Duration::from_secs(2), printer)
            .await
            .expect("printer should exit when the connection drops")
            .unwrap();
        // Clean EOF or a reset, either way the task ends
        assert!(result.is_ok() || result.is_err());
    }

    #[tokio::test]
    async fn test_pool_spawns_one_task_per_sensor() {
        let server = PubServer::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let publisher = server.publisher();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let transport = tokio::spawn(server.run(shutdown_rx));

        let handles = spawn_pool(addr, 4);
        assert_eq!(handles.len(), 4);
        while publisher.connection_count() < 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        publisher.publish(CONTROL_DONE_TOPIC, Vec::new());
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("pool entry should exit on done")
                .unwrap();
        }

        let _ = shutdown_tx.send(true);
        let _ = transport.await;
    }
}
