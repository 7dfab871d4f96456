//! Downlink Deferral Queue
//!
//! FIFO of frames whose downlink work is waiting for admission. A frame is
//! admissible while it lies inside `[cur_proc, cur_proc + width)`.

use std::collections::VecDeque;

use common::FrameId;

/// Whether `frame_id` lies inside the admission window
pub fn is_admissible(frame_id: FrameId, cur_proc_frame_id: FrameId, width: usize) -> bool {
    u64::from(frame_id) < u64::from(cur_proc_frame_id) + width as u64
}

/// FIFO of deferred frame ids
#[derive(Debug, Default, Clone)]
pub struct DeferralQueue {
    frames: VecDeque<FrameId>,
    /// Frames ever deferred
    total_deferred: u64,
}

impl DeferralQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            total_deferred: 0,
        }
    }

    /// Append at the tail
    pub fn push(&mut self, frame_id: FrameId) {
        self.frames.push_back(frame_id);
        self.total_deferred += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn front(&self) -> Option<FrameId> {
        self.frames.front().copied()
    }

    pub fn total_deferred(&self) -> u64 {
        self.total_deferred
    }

    /// Remove the head if it is admissible. Never looks past an
    /// inadmissible head.
    pub fn pop_admissible(&mut self, cur_proc_frame_id: FrameId, width: usize) -> Option<FrameId> {
        let head = self.front()?;
        if is_admissible(head, cur_proc_frame_id, width) {
            self.frames.pop_front()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_stops_at_first_inadmissible() {
        let mut deferral = DeferralQueue::default();
        for frame in [5, 6, 9] {
            deferral.push(frame);
        }

        let mut released = Vec::new();
        while let Some(frame) = deferral.pop_admissible(2, 4) {
            released.push(frame);
        }
        assert_eq!(released, vec![5]);
        assert_eq!(deferral.front(), Some(6));
        assert_eq!(deferral.total_deferred(), 3);
    }

    #[test]
    fn test_inadmissible_head_blocks_tail() {
        let mut deferral = DeferralQueue::default();
        deferral.push(9);
        deferral.push(5);
        assert_eq!(deferral.pop_admissible(2, 4), None);
        assert_eq!(deferral.len(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let mut deferral = DeferralQueue::with_capacity(4);
        for frame in [3, 4, 5] {
            deferral.push(frame);
        }
        assert_eq!(deferral.pop_admissible(3, 2), Some(3));
        assert_eq!(deferral.pop_admissible(3, 2), Some(4));
        assert_eq!(deferral.pop_admissible(3, 2), None);
        assert_eq!(deferral.pop_admissible(4, 2), Some(5));
        assert!(deferral.is_empty());
    }

    #[test]
    fn test_admission_window() {
        assert!(is_admissible(10, 10, 2));
        assert!(is_admissible(11, 10, 2));
        assert!(!is_admissible(12, 10, 2));
        assert!(is_admissible(u32::MAX, u32::MAX, 1));
    }
}
