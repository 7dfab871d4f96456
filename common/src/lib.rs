//! Common Utilities and Types Library
//! 
//! Shared types for the baseband scheduler: task tags, event records, the
//! frame schedule, pipeline configuration and the published run state.

pub mod config;
pub mod event;
pub mod frame;
pub mod shared;
pub mod tag;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use config::{ConfigError, PipelineConfig};
pub use event::{EventData, MAX_EVENT_TAGS};
pub use frame::FrameSchedule;
pub use shared::SharedState;
pub use tag::Tag;
pub use types::*;
pub use utils::*;
