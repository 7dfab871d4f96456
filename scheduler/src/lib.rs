//! Baseband Event Scheduler Library
//!
//! A single scheduler thread drives a frame-pipelined baseband: it counts
//! packet arrivals and task completions, and hands batched compute work
//! to a pool of workers through per-parity queues.

pub mod counters;
pub mod deferral;
pub mod doer;
pub mod pipeline;
pub mod scheduler;
pub mod stats;
pub mod worker;

pub use pipeline::run_pipeline;
pub use scheduler::{Progress, Scheduler};
pub use stats::{PhyStats, RunSummary};
pub use worker::WorkerPool;

use common::{ConfigError, EventType, FrameId, SymbolId, SymbolType};
use interfaces::{InterfaceError, QueueError};
use thiserror::Error;

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Frame {frame} (symbol {symbol}) is beyond the frame window: oldest frame {cur_proc}, window {window}")]
    WindowOverrun {
        frame: FrameId,
        symbol: SymbolId,
        cur_proc: FrameId,
        window: usize,
    },

    #[error("Unexpected event type {0:?}")]
    UnexpectedEvent(EventType),

    #[error("Unexpected {symbol_type:?} symbol {symbol} of frame {frame} in a {event_type:?} event")]
    UnexpectedSymbol {
        event_type: EventType,
        frame: FrameId,
        symbol: SymbolId,
        symbol_type: SymbolType,
    },

    #[error("Frame {frame} finished a direction while scheduling frame {cur_sche}")]
    FrontierMismatch { frame: FrameId, cur_sche: FrameId },

    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}
