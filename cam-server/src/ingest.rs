//! Ingestion loop: envelope -> decoder -> trajectory store.
//!
//! Every inbound message runs as its own task. Failures are logged, counted and
//! dropped; only a transport error ends the loop.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use cam_core::decode::Decoder;
use cam_core::store::TrajectoryStore;
use cam_core::types::{hex_decode, CamRecord, DecodeError};

use crate::error::{IngestError, TransportError};
use crate::transport::Transport;

/// Transport message body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Link-layer frame, hex encoded.
    pub raw: String,
}

/// Extract the frame bytes from an envelope.
pub fn parse_envelope(body: &[u8]) -> Result<Vec<u8>, IngestError> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| IngestError::Envelope(e.to_string()))?;
    hex_decode(envelope.raw.trim())
        .ok_or_else(|| IngestError::Envelope("`raw` is not a valid hex string".into()))
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    recorded: AtomicU64,
    envelope_errors: AtomicU64,
    malformed: AtomicU64,
    not_its: AtomicU64,
    missing_field: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub recorded: u64,
    pub envelope_errors: u64,
    pub malformed: u64,
    pub not_its: u64,
    pub missing_field: u64,
}

impl IngestStats {
    fn note_failure(&self, err: &IngestError) {
        let counter = match err {
            IngestError::Envelope(_) => &self.envelope_errors,
            IngestError::Decode(DecodeError::MalformedFrame(_)) => &self.malformed,
            IngestError::Decode(DecodeError::NotAnItsMessage(_)) => &self.not_its,
            IngestError::Decode(DecodeError::MissingMandatoryField { .. }) => &self.missing_field,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            envelope_errors: self.envelope_errors.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            not_its: self.not_its.load(Ordering::Relaxed),
            missing_field: self.missing_field.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Shared per-message processing, used by both the broker loop and HTTP ingest.
pub struct Pipeline {
    store: Arc<TrajectoryStore>,
    decoder: Decoder,
    decode_timeout: Duration,
    stats: IngestStats,
}

impl Pipeline {
    pub fn new(store: Arc<TrajectoryStore>, decoder: Decoder, decode_timeout: Duration) -> Self {
        Pipeline {
            store,
            decoder,
            decode_timeout,
            stats: IngestStats::default(),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<TrajectoryStore> {
        &self.store
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Decode one message body and record the position it carries.
    ///
    /// The store is only touched after decoding has finished.
    pub async fn process(&self, body: &[u8]) -> Result<CamRecord, IngestError> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let (raw_len, result) = match parse_envelope(body) {
            Ok(raw) => (raw.len(), self.decode(raw).await),
            Err(e) => (body.len(), Err(e)),
        };

        match result {
            Ok(record) => {
                self.store.record_now(&record);
                self.stats.recorded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    station_id = record.station_id,
                    lat = record.latitude,
                    lon = record.longitude,
                    "position recorded"
                );
                Ok(record)
            }
            Err(e) => {
                self.stats.note_failure(&e);
                tracing::warn!(
                    station_id = ?e.station_id(),
                    raw_len,
                    category = e.category(),
                    "dropping message: {e}"
                );
                Err(e)
            }
        }
    }

    async fn decode(&self, raw: Vec<u8>) -> Result<CamRecord, IngestError> {
        let decoder = self.decoder;
        let task = tokio::task::spawn_blocking(move || decoder.decode(&raw));
        match tokio::time::timeout(self.decode_timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join_err)) => Err(DecodeError::MalformedFrame(format!(
                "decoder task failed: {join_err}"
            ))
            .into()),
            Err(_) => Err(DecodeError::MalformedFrame("decode timed out".into()).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Pull messages until the transport ends, fails, or `shutdown` resolves.
///
/// On shutdown no further messages are taken; tasks already spawned finish
/// before this returns.
pub async fn run<T, S>(
    transport: &mut T,
    pipeline: Arc<Pipeline>,
    shutdown: S,
) -> Result<(), TransportError>
where
    T: Transport + ?Sized,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut tasks = JoinSet::new();
    tracing::info!(source = %transport.describe(), "ingest loop started");

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested, draining in-flight messages");
                break Ok(());
            }
            msg = transport.recv() => match msg {
                Ok(Some(body)) => {
                    let pipeline = Arc::clone(&pipeline);
                    tasks.spawn(async move {
                        // failures are already logged and counted
                        let _ = pipeline.process(&body).await;
                    });
                }
                Ok(None) => {
                    tracing::info!("transport closed");
                    break Ok(());
                }
                Err(e) => {
                    tracing::error!("transport failed: {e}");
                    break Err(e);
                }
            },
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    };

    while tasks.join_next().await.is_some() {}

    let stats = pipeline.stats().snapshot();
    tracing::info!(
        received = stats.received,
        recorded = stats.recorded,
        "ingest loop stopped"
    );
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cam_core::encode::CamFrameBuilder;
    use cam_core::types::hex_encode;

    use crate::transport::ChannelTransport;

    fn pipeline() -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            Arc::new(TrajectoryStore::new()),
            Decoder::default(),
            Duration::from_secs(2),
        ))
    }

    fn envelope(raw: &[u8]) -> Vec<u8> {
        serde_json::to_vec(&Envelope {
            raw: hex_encode(raw),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_envelope() {
        assert_eq!(parse_envelope(br#"{"raw": "0aff"}"#).unwrap(), vec![0x0a, 0xff]);
        assert!(matches!(
            parse_envelope(b"not json"),
            Err(IngestError::Envelope(_))
        ));
        assert!(matches!(
            parse_envelope(br#"{"frame": "00"}"#),
            Err(IngestError::Envelope(_))
        ));
        assert!(matches!(
            parse_envelope(br#"{"raw": "xyz"}"#),
            Err(IngestError::Envelope(_))
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_station_7() {
        let pipeline = pipeline();
        let (tx, mut transport) = ChannelTransport::channel(8);

        let frame = CamFrameBuilder::new(7, 45.05, 7.66).speed(Some(5.0)).build();
        tx.send(envelope(&frame)).await.unwrap();
        drop(tx);

        run(&mut transport, Arc::clone(&pipeline), std::future::pending())
            .await
            .unwrap();

        let state = pipeline.store().snapshot();
        let vehicle = state.get(&7).expect("station 7 recorded");
        assert_eq!(vehicle.positions.len(), 1);
        let p = vehicle.positions[0];
        assert!((p.latitude() - 45.05).abs() < 1e-6);
        assert!((p.longitude() - 7.66).abs() < 1e-6);
        assert!((p.speed.unwrap() - 5.0).abs() < 1e-2);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_loop() {
        let pipeline = pipeline();
        let (tx, mut transport) = ChannelTransport::channel(8);

        tx.send(b"garbage".to_vec()).await.unwrap();
        tx.send(br#"{"raw": "zz"}"#.to_vec()).await.unwrap();
        tx.send(envelope(&[0x88, 0x00, 0x01])).await.unwrap();
        tx.send(envelope(
            &CamFrameBuilder::new(1, 45.0, 7.6).message_id(1).build(),
        ))
        .await
        .unwrap();
        tx.send(envelope(
            &CamFrameBuilder::new(2, 45.0, 7.6).latitude(None).build(),
        ))
        .await
        .unwrap();
        tx.send(envelope(&CamFrameBuilder::new(3, 45.0, 7.6).build()))
            .await
            .unwrap();
        drop(tx);

        run(&mut transport, Arc::clone(&pipeline), std::future::pending())
            .await
            .unwrap();

        let state = pipeline.store().snapshot();
        assert_eq!(state.keys().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(
            pipeline.stats().snapshot(),
            StatsSnapshot {
                received: 6,
                recorded: 1,
                envelope_errors: 2,
                malformed: 1,
                not_its: 1,
                missing_field: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_duplicates_are_appended() {
        let pipeline = pipeline();
        let body = envelope(&CamFrameBuilder::new(5, 45.0, 7.6).build());
        pipeline.process(&body).await.unwrap();
        pipeline.process(&body).await.unwrap();
        assert_eq!(pipeline.store().position_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_receiving() {
        let pipeline = pipeline();
        // sender kept alive: the transport never ends on its own
        let (_tx, mut transport) = ChannelTransport::channel(1);
        run(&mut transport, Arc::clone(&pipeline), async {})
            .await
            .unwrap();
        assert_eq!(pipeline.stats().snapshot().received, 0);
    }

    /// Yields its queue, reports exhaustion, then never returns another message.
    struct StallingTransport {
        queue: std::collections::VecDeque<Vec<u8>>,
        exhausted: Option<tokio::sync::oneshot::Sender<()>>,
    }

    #[async_trait]
    impl Transport for StallingTransport {
        async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            if let Some(body) = self.queue.pop_front() {
                return Ok(Some(body));
            }
            if let Some(tx) = self.exhausted.take() {
                let _ = tx.send(());
            }
            std::future::pending().await
        }

        fn describe(&self) -> String {
            "stalling".into()
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_messages() {
        let pipeline = pipeline();
        let (exhausted_tx, exhausted_rx) = tokio::sync::oneshot::channel();
        let mut transport = StallingTransport {
            queue: (0..5u32)
                .map(|id| envelope(&CamFrameBuilder::new(100 + id, 45.0, 7.6).build()))
                .collect(),
            exhausted: Some(exhausted_tx),
        };

        // fires once every message has been handed to a task
        let shutdown = async {
            let _ = exhausted_rx.await;
        };
        run(&mut transport, Arc::clone(&pipeline), shutdown)
            .await
            .unwrap();

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.recorded, 5);
        assert_eq!(pipeline.store().len(), 5);
    }

    struct BrokenTransport;

    #[async_trait]
    impl Transport for BrokenTransport {
        async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
            Err(TransportError::Connection("reset by peer".into()))
        }

        fn describe(&self) -> String {
            "broken".into()
        }
    }

    #[tokio::test]
    async fn test_transport_error_is_fatal() {
        let result = run(&mut BrokenTransport, pipeline(), std::future::pending()).await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
