//! Scheduler Interfaces Library
//! 
//! The event queue fabric connecting the scheduler to its workers, plus the
//! external collaborators at the pipeline boundary: the loopback fronthaul
//! transport and the MAC stub.

pub mod fabric;
pub mod mac;
pub mod message_types;
pub mod queue;
pub mod transport;

pub use fabric::{frame_qid, QueueFabric};
pub use queue::{EventQueue, ProducerToken, QueueError};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("Truncated message: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}
