//! Shared Run State
//!
//! Values the scheduler publishes for workers and transports. The scheduler
//! is the only writer of the frontiers; everyone else only reads them.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::types::FrameId;

/// Published run state
#[derive(Debug)]
pub struct SharedState {
    /// Process-wide running flag
    running: AtomicBool,
    /// Oldest frame whose work is still being issued
    cur_sche_frame_id: AtomicU32,
    /// Oldest frame not yet retired
    cur_proc_frame_id: AtomicU32,
    /// Modulation order in bits per symbol, updated by RAN updates
    mod_order_bits: AtomicU8,
}

impl SharedState {
    pub fn new(mod_order_bits: u8) -> Self {
        Self {
            running: AtomicBool::new(true),
            cur_sche_frame_id: AtomicU32::new(0),
            cur_proc_frame_id: AtomicU32::new(0),
            mod_order_bits: AtomicU8::new(mod_order_bits),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the running flag; every loop exits on its next iteration
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// The running flag itself, for queue fallbacks
    pub fn running_flag(&self) -> &AtomicBool {
        &self.running
    }

    pub fn cur_sche_frame_id(&self) -> FrameId {
        self.cur_sche_frame_id.load(Ordering::Acquire)
    }

    pub fn cur_proc_frame_id(&self) -> FrameId {
        self.cur_proc_frame_id.load(Ordering::Acquire)
    }

    pub fn publish_sche_frame_id(&self, frame_id: FrameId) {
        self.cur_sche_frame_id.store(frame_id, Ordering::Release);
    }

    pub fn publish_proc_frame_id(&self, frame_id: FrameId) {
        self.cur_proc_frame_id.store(frame_id, Ordering::Release);
    }

    pub fn mod_order_bits(&self) -> u8 {
        self.mod_order_bits.load(Ordering::Relaxed)
    }

    pub fn set_mod_order_bits(&self, bits: u8) {
        self.mod_order_bits.store(bits, Ordering::Relaxed);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        // 16-QAM
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_stop() {
        let state = SharedState::default();
        assert!(state.is_running());
        state.publish_sche_frame_id(5);
        state.publish_proc_frame_id(3);
        assert_eq!(state.cur_sche_frame_id(), 5);
        assert_eq!(state.cur_proc_frame_id(), 3);
        state.stop();
        assert!(!state.is_running());
        assert!(!state.running_flag().load(Ordering::Acquire));
    }
}
