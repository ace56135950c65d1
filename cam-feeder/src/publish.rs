//! Envelope publishing: MQTT (QoS 2) or stdout for dry runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use cam_core::types::hex_encode;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker connection lost: {0}")]
    Connection(String),
    #[error("publish request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("envelope encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Envelope {
    raw: String,
}

/// `{"raw": "<hex>"}` for one frame.
pub fn envelope_json(frame: &[u8]) -> Result<String, PublishError> {
    Ok(serde_json::to_string(&Envelope {
        raw: hex_encode(frame),
    })?)
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
}

/// Where envelopes go.
pub enum Publisher {
    Mqtt(MqttPublisher),
    /// Print envelopes to stdout.
    DryRun,
}

impl Publisher {
    pub async fn publish(&mut self, frame: &[u8]) -> Result<(), PublishError> {
        let envelope = envelope_json(frame)?;
        match self {
            Publisher::Mqtt(mqtt) => mqtt.publish(envelope).await,
            Publisher::DryRun => {
                println!("{envelope}");
                Ok(())
            }
        }
    }

    /// Wait for outstanding QoS 2 handshakes, then disconnect.
    pub async fn close(self) -> Result<(), PublishError> {
        match self {
            Publisher::Mqtt(mqtt) => mqtt.close().await,
            Publisher::DryRun => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT
// ---------------------------------------------------------------------------

pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    published: u64,
    completed: Arc<AtomicU64>,
    driver: JoinHandle<Result<(), PublishError>>,
}

impl MqttPublisher {
    /// Create the client and spawn the task driving its event loop.
    pub fn connect(settings: BrokerSettings) -> Self {
        let client_id = format!(
            "{}-{}",
            settings.client_id,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let completed = Arc::new(AtomicU64::new(0));

        let driver = {
            let completed = Arc::clone(&completed);
            let host = settings.host.clone();
            tokio::spawn(async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            tracing::info!(%host, "connected to broker");
                        }
                        Ok(Event::Incoming(Packet::PubComp(_))) => {
                            completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!("broker connection lost: {e}");
                            return Err(PublishError::Connection(e.to_string()));
                        }
                    }
                }
            })
        };

        MqttPublisher {
            client,
            topic: settings.topic,
            published: 0,
            completed,
            driver,
        }
    }

    async fn publish(&mut self, envelope: String) -> Result<(), PublishError> {
        if self.driver.is_finished() {
            return Err(PublishError::Connection("event loop stopped".into()));
        }
        self.client
            .publish(self.topic.clone(), QoS::ExactlyOnce, false, envelope)
            .await?;
        self.published += 1;
        Ok(())
    }

    async fn close(self) -> Result<(), PublishError> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.completed.load(Ordering::Relaxed) < self.published
            && !self.driver.is_finished()
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let pending = self
            .published
            .saturating_sub(self.completed.load(Ordering::Relaxed));
        if pending > 0 {
            tracing::warn!(pending, "closing with unacknowledged publishes");
        }

        if !self.driver.is_finished() {
            self.client.disconnect().await?;
        }
        match self.driver.await {
            Ok(result) => result,
            Err(e) => Err(PublishError::Connection(e.to_string())),
        }
    }
}
