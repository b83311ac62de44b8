//! Ingestion side of the pipeline.
//!
//! This module turns a stream of transport messages into canonical
//! [`Record`]s and hands them to the scheduler over a bounded channel.

pub mod actor;
pub mod normalizer;
pub mod types;

// Re-export commonly used types
pub use actor::{IngestActor, LineTransport, Transport, TransportSpec, DEFAULT_CHANNEL_CAPACITY};
pub use normalizer::{Normalizer, WireFormat};
pub use types::Record;
