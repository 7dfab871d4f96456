//! Frame-Window Completion Counters
//!
//! Per stage, per in-flight frame slot: how many tasks of each symbol have
//! completed and how many symbols are done. Owned and mutated by the
//! scheduler thread only.

use common::{FrameId, SymbolId, SymbolType};

/// Completion counters of one stage
#[derive(Debug, Clone)]
pub struct FrameCounters {
    /// Number of frame slots
    window: usize,
    /// Symbol ids addressable per slot
    symbol_span: usize,
    /// Completed tasks, `[slot * symbol_span + symbol]`
    task_count: Vec<usize>,
    /// Completed symbols, `[slot]`
    symbol_count: Vec<usize>,
    /// Symbols per frame for this stage
    max_symbol_count: usize,
    /// Tasks per symbol for this stage
    max_task_count: usize,
}

impl FrameCounters {
    /// Allocate counters for `window` slots of `symbol_span` symbols each.
    /// Totals start at zero; call [`FrameCounters::init`] before use.
    pub fn new(window: usize, symbol_span: usize) -> Self {
        Self {
            window,
            symbol_span,
            task_count: vec![0; window * symbol_span],
            symbol_count: vec![0; window],
            max_symbol_count: 0,
            max_task_count: 0,
        }
    }

    /// Set the stage totals
    pub fn init(&mut self, max_symbol_count: usize, max_task_count: usize) {
        self.max_symbol_count = max_symbol_count;
        self.max_task_count = max_task_count;
    }

    fn slot(&self, frame_id: FrameId) -> usize {
        frame_id as usize % self.window
    }

    fn task_index(&self, frame_id: FrameId, symbol_id: SymbolId) -> usize {
        debug_assert!((symbol_id as usize) < self.symbol_span);
        self.slot(frame_id) * self.symbol_span + symbol_id as usize
    }

    /// Count one task. True iff this call completed the symbol.
    pub fn complete_task(&mut self, frame_id: FrameId, symbol_id: SymbolId) -> bool {
        let idx = self.task_index(frame_id, symbol_id);
        self.task_count[idx] += 1;
        self.task_count[idx] == self.max_task_count
    }

    /// Count one symbol. True iff this call completed the frame.
    pub fn complete_symbol(&mut self, frame_id: FrameId) -> bool {
        let slot = self.slot(frame_id);
        self.symbol_count[slot] += 1;
        self.symbol_count[slot] == self.max_symbol_count
    }

    /// Clear the frame's slot. Idempotent.
    pub fn reset(&mut self, frame_id: FrameId) {
        let slot = self.slot(frame_id);
        self.symbol_count[slot] = 0;
        let start = slot * self.symbol_span;
        self.task_count[start..start + self.symbol_span].fill(0);
    }

    pub fn task_count(&self, frame_id: FrameId, symbol_id: SymbolId) -> usize {
        self.task_count[self.task_index(frame_id, symbol_id)]
    }

    pub fn symbol_count(&self, frame_id: FrameId) -> usize {
        self.symbol_count[self.slot(frame_id)]
    }

    /// Whether every symbol of the frame is done. Always true for a stage
    /// with no symbols.
    pub fn is_last_symbol(&self, frame_id: FrameId) -> bool {
        self.symbol_count(frame_id) == self.max_symbol_count
    }

    pub fn max_symbol_count(&self) -> usize {
        self.max_symbol_count
    }

    pub fn max_task_count(&self) -> usize {
        self.max_task_count
    }
}

/// Transitions reported by [`RxCounters::record`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RxProgress {
    /// First packet of the frame
    pub first_packet: bool,
    /// Last pilot packet of the frame
    pub all_pilots: bool,
    /// Last calibration packet of the frame
    pub all_calibration: bool,
    /// Last packet of the frame
    pub all_packets: bool,
}

/// Received-packet counters
#[derive(Debug, Clone)]
pub struct RxCounters {
    window: usize,
    packets: Vec<usize>,
    pilot_packets: Vec<usize>,
    cal_packets: Vec<usize>,
    packets_per_frame: usize,
    pilot_packets_per_frame: usize,
    cal_packets_per_frame: usize,
}

impl RxCounters {
    pub fn new(
        window: usize,
        packets_per_frame: usize,
        pilot_packets_per_frame: usize,
        cal_packets_per_frame: usize,
    ) -> Self {
        Self {
            window,
            packets: vec![0; window],
            pilot_packets: vec![0; window],
            cal_packets: vec![0; window],
            packets_per_frame,
            pilot_packets_per_frame,
            cal_packets_per_frame,
        }
    }

    /// Count one received packet of the given symbol class
    pub fn record(&mut self, frame_id: FrameId, symbol_type: SymbolType) -> RxProgress {
        let slot = frame_id as usize % self.window;
        let mut progress = RxProgress {
            first_packet: self.packets[slot] == 0,
            ..Default::default()
        };

        match symbol_type {
            SymbolType::Pilot => {
                self.pilot_packets[slot] += 1;
                progress.all_pilots = self.pilot_packets[slot] == self.pilot_packets_per_frame;
            }
            SymbolType::CalDl | SymbolType::CalUl => {
                self.cal_packets[slot] += 1;
                progress.all_calibration = self.cal_packets[slot] == self.cal_packets_per_frame;
            }
            _ => {}
        }

        self.packets[slot] += 1;
        progress.all_packets = self.packets[slot] == self.packets_per_frame;
        progress
    }

    pub fn packets(&self, frame_id: FrameId) -> usize {
        self.packets[frame_id as usize % self.window]
    }

    pub fn packets_per_frame(&self) -> usize {
        self.packets_per_frame
    }

    /// Clear the frame's slot. Idempotent.
    pub fn reset(&mut self, frame_id: FrameId) {
        let slot = frame_id as usize % self.window;
        self.packets[slot] = 0;
        self.pilot_packets[slot] = 0;
        self.cal_packets[slot] = 0;
    }
}
