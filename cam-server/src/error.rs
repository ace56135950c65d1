//! Server-side error types.

use cam_core::types::DecodeError;
use thiserror::Error;

/// Per-message failure. Logged and counted; never stops the ingest loop.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("bad envelope: {0}")]
    Envelope(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl IngestError {
    pub fn category(&self) -> &'static str {
        match self {
            IngestError::Envelope(_) => "envelope",
            IngestError::Decode(e) => e.category(),
        }
    }

    pub fn station_id(&self) -> Option<u32> {
        match self {
            IngestError::Envelope(_) => None,
            IngestError::Decode(e) => e.station_id(),
        }
    }
}

/// Lost or refused broker connection. Fatal for the ingest loop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport connection failed: {0}")]
    Connection(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}
