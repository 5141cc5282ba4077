pub mod container;
pub mod engine;
pub mod router;


pub use engine::IngestionEngine;

/// A raw message as it came off the broker
pub struct SensorMessage {
    pub span: tracing::Span,
    pub topic: String,
    pub payload: Vec<u8>,
}
