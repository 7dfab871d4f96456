//! Frame and PHY Statistics
//!
//! Milestone timestamps per in-flight frame, SNR estimates shared between
//! the demodulation workers and the scheduler, and the end-of-run summary.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use common::FrameId;
use serde::Serialize;

/// Per-frame processing milestones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    FirstRx,
    PilotAllRx,
    RcAllRx,
    RxDone,
    ProcessingStarted,
    RcDone,
    FftPilotsDone,
    ZfDone,
    DemulDone,
    DecodeDone,
    EncodeDone,
    PrecodeDone,
    IfftDone,
    TxFirst,
    TxDone,
}

impl Milestone {
    const COUNT: usize = 15;

    fn index(self) -> usize {
        self as usize
    }
}

/// Milestone timestamps and latency accounting
#[derive(Debug)]
pub struct FrameStats {
    window: usize,
    milestones: Vec<[Option<Instant>; Milestone::COUNT]>,
    frames_retired: u64,
    latency_sum_ms: f64,
    latency_max_ms: f64,
}

impl FrameStats {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            milestones: vec![[None; Milestone::COUNT]; window],
            frames_retired: 0,
            latency_sum_ms: 0.0,
            latency_max_ms: 0.0,
        }
    }

    fn slot(&self, frame_id: FrameId) -> usize {
        frame_id as usize % self.window
    }

    /// Stamp a milestone with the current time
    pub fn record(&mut self, frame_id: FrameId, milestone: Milestone) {
        let slot = self.slot(frame_id);
        self.milestones[slot][milestone.index()] = Some(Instant::now());
    }

    pub fn timestamp(&self, frame_id: FrameId, milestone: Milestone) -> Option<Instant> {
        self.milestones[self.slot(frame_id)][milestone.index()]
    }

    /// Milliseconds since the frame's first packet
    pub fn ms_since_first(&self, frame_id: FrameId) -> f64 {
        self.timestamp(frame_id, Milestone::FirstRx)
            .map(|t| t.elapsed().as_secs_f64() * 1e3)
            .unwrap_or(0.0)
    }

    /// Close the frame's slot. Returns its latency in ms when known.
    pub fn retire(&mut self, frame_id: FrameId) -> Option<f64> {
        let slot = self.slot(frame_id);
        let latency = self.milestones[slot][Milestone::FirstRx.index()]
            .or(self.milestones[slot][Milestone::ProcessingStarted.index()])
            .map(|t| t.elapsed().as_secs_f64() * 1e3);
        self.milestones[slot] = [None; Milestone::COUNT];

        self.frames_retired += 1;
        if let Some(ms) = latency {
            self.latency_sum_ms += ms;
            self.latency_max_ms = self.latency_max_ms.max(ms);
        }
        latency
    }

    pub fn frames_retired(&self) -> u64 {
        self.frames_retired
    }

    pub fn mean_latency_ms(&self) -> f64 {
        if self.frames_retired == 0 {
            0.0
        } else {
            self.latency_sum_ms / self.frames_retired as f64
        }
    }

    pub fn max_latency_ms(&self) -> f64 {
        self.latency_max_ms
    }
}

/// Per-frame, per-UE SNR estimates in dB
#[derive(Debug)]
pub struct PhyStats {
    window: usize,
    ue_num: usize,
    snr: Vec<AtomicU32>,
}

impl PhyStats {
    pub fn new(window: usize, ue_num: usize) -> Self {
        Self {
            window,
            ue_num,
            snr: (0..window * ue_num).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn index(&self, frame_id: FrameId, ue_id: usize) -> usize {
        (frame_id as usize % self.window) * self.ue_num + ue_id
    }

    pub fn set_snr(&self, frame_id: FrameId, ue_id: usize, snr_db: f32) {
        self.snr[self.index(frame_id, ue_id)].store(snr_db.to_bits(), Ordering::Relaxed);
    }

    /// Latest estimate stored in the frame's slot
    pub fn snr(&self, frame_id: FrameId, ue_id: usize) -> f32 {
        f32::from_bits(self.snr[self.index(frame_id, ue_id)].load(Ordering::Relaxed))
    }

    pub fn ue_num(&self) -> usize {
        self.ue_num
    }
}

/// End-of-run report
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    /// Whether the last configured frame was retired
    pub finished: bool,
    pub frames_retired: u64,
    pub elapsed_secs: f64,
    pub frames_per_sec: f64,
    pub mean_frame_latency_ms: f64,
    pub max_frame_latency_ms: f64,
    pub packets_received: u64,
    pub stale_packets: u64,
    /// Packets for frames already received in full
    pub duplicate_packets: u64,
    /// RAN updates ignored for an unsupported modulation order
    pub rejected_ran_updates: u64,
    pub deferred_frames: u64,
    pub snr_reports_dropped: u64,
    /// Filled in by the pipeline from the transport and MAC threads
    pub packets_sent: u64,
    pub tx_answered: u64,
    pub mac_deliveries: u64,
    pub mean_snr_db: Option<f32>,
    pub worker_tasks: u64,
}

impl RunSummary {
    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_secs = elapsed.as_secs_f64();
        if self.elapsed_secs > 0.0 {
            self.frames_per_sec = self.frames_retired as f64 / self.elapsed_secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retire_accumulates_latency() {
        let mut stats = FrameStats::new(4);
        stats.record(5, Milestone::FirstRx);
        stats.record(5, Milestone::ZfDone);
        assert!(stats.timestamp(5, Milestone::ZfDone).is_some());
        assert!(stats.timestamp(1, Milestone::ZfDone).is_some());

        let latency = stats.retire(5).unwrap();
        assert!(latency >= 0.0);
        assert!(stats.timestamp(5, Milestone::ZfDone).is_none());
        assert_eq!(stats.frames_retired(), 1);
        assert_eq!(stats.max_latency_ms(), latency);

        // no timestamps recorded
        assert_eq!(stats.retire(6), None);
        assert_eq!(stats.frames_retired(), 2);
    }

    #[test]
    fn test_phy_stats_slots() {
        let phy = PhyStats::new(4, 2);
        phy.set_snr(3, 1, 17.5);
        assert_eq!(phy.snr(3, 1), 17.5);
        assert_eq!(phy.snr(7, 1), 17.5);
        assert_eq!(phy.snr(3, 0), 0.0);
    }

    #[test]
    fn test_summary_serializes() {
        let mut summary = RunSummary {
            frames_retired: 10,
            ..Default::default()
        };
        summary.set_elapsed(Duration::from_millis(500));
        assert_eq!(summary.frames_per_sec, 20.0);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["frames_retired"], 10);
        assert!(json["mean_snr_db"].is_null());
    }
}
