//! Message sources feeding the ingest loop.
//!
//! `Transport::recv` yields one opaque message body at a time. `Ok(None)` means
//! the source is exhausted; `Err` means the connection is gone and the loop
//! must stop.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::mpsc;

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// MQTT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
}

/// Subscriber on one broker topic, QoS 2.
pub struct MqttTransport {
    // held so the request channel to the event loop stays open
    _client: AsyncClient,
    eventloop: EventLoop,
    settings: MqttSettings,
}

impl MqttTransport {
    /// Queue the subscription. The broker is contacted on the first `recv`.
    pub async fn connect(settings: MqttSettings) -> Result<Self, TransportError> {
        // suffix keeps two instances on the same broker from kicking each other off
        let client_id = format!(
            "{}-{}",
            settings.client_id,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(options, 64);
        client
            .subscribe(settings.topic.clone(), QoS::ExactlyOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        Ok(MqttTransport {
            _client: client,
            eventloop,
            settings,
        })
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let event = self
                .eventloop
                .poll()
                .await
                .map_err(|e| TransportError::Connection(e.to_string()))?;

            match event {
                Event::Incoming(Packet::Publish(publish)) => {
                    return Ok(Some(publish.payload.to_vec()));
                }
                Event::Incoming(Packet::SubAck(ack)) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(TransportError::Subscribe(format!(
                            "broker refused subscription to {}",
                            self.settings.topic
                        )));
                    }
                    tracing::info!(topic = %self.settings.topic, "subscribed");
                }
                Event::Incoming(Packet::ConnAck(_)) => {
                    tracing::info!(
                        host = %self.settings.host,
                        port = self.settings.port,
                        "connected to broker"
                    );
                }
                _ => {}
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "mqtt://{}:{}/{}",
            self.settings.host, self.settings.port, self.settings.topic
        )
    }
}

// ---------------------------------------------------------------------------
// In-process channel
// ---------------------------------------------------------------------------

/// Messages pushed from inside the process.
pub struct ChannelTransport {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelTransport {
    /// Transport plus the sender that feeds it. Dropping every sender ends the stream.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, ChannelTransport { rx })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.recv().await)
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
