//! Event Scheduler
//!
//! The scheduler thread owns all pipeline bookkeeping. It alternates
//! between draining packet I/O (and MAC responses) and draining the
//! completion queue of the oldest in-flight frame's parity. Every event
//! updates the completion counters, which in turn emit the next stage's
//! tasks.
//!
//! Two frontiers bound the pipeline:
//!
//! - `cur_proc_frame_id`: the oldest frame not yet retired
//! - `cur_sche_frame_id`: the frame whose packets are being turned into FFT
//!   tasks
//!
//! `cur_proc <= cur_sche <= cur_proc + frame_window` holds after every
//! event.

mod dispatch;
mod handlers;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use common::{
    EventData, EventType, FrameId, PipelineConfig, ScheduleProcessingFlags, SharedState,
    SymbolId, Tag, NUM_COMPUTE_STAGES, SCHEDULE_QUEUES,
};
use interfaces::{frame_qid, ProducerToken, QueueError, QueueFabric};
use tracing::{debug, error, info};

use crate::counters::{FrameCounters, RxCounters};
use crate::deferral::DeferralQueue;
use crate::stats::{FrameStats, PhyStats, RunSummary};
use crate::SchedulerError;

/// Outcome of one handled event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    /// The last configured frame was retired
    Finished,
}

impl Progress {
    fn merge(self, other: Progress) -> Progress {
        if self == Progress::Finished || other == Progress::Finished {
            Progress::Finished
        } else {
            Progress::Continue
        }
    }
}

/// Frame-pipelined event scheduler
pub struct Scheduler {
    config: Arc<PipelineConfig>,
    fabric: Arc<QueueFabric>,
    shared: Arc<SharedState>,
    phy_stats: Arc<PhyStats>,
    window: usize,

    cur_sche_frame_id: FrameId,
    cur_proc_frame_id: FrameId,
    schedule_flags: ScheduleProcessingFlags,
    /// Flags a frame starts with; absent directions count as complete
    initial_flags: ScheduleProcessingFlags,

    rx_counters: RxCounters,
    pilot_fft_counters: FrameCounters,
    uplink_fft_counters: FrameCounters,
    rc_counters: FrameCounters,
    zf_counters: FrameCounters,
    demul_counters: FrameCounters,
    decode_counters: FrameCounters,
    tomac_counters: FrameCounters,
    encode_counters: FrameCounters,
    precode_counters: FrameCounters,
    ifft_counters: FrameCounters,
    tx_counters: FrameCounters,
    mac_to_phy_counters: FrameCounters,

    /// Received packets not yet batched into FFT tasks, per slot
    fft_backlog: Vec<VecDeque<Tag>>,
    /// Packets already batched into FFT tasks, per slot
    fft_created: Vec<usize>,
    /// Pilot symbols waiting for calibration, per slot
    pilot_parked: Vec<Vec<SymbolId>>,
    /// Uplink symbols whose FFT finished, `[slot][ul_idx]`
    uplink_fft_ready: Vec<Vec<bool>>,
    /// Downlink symbols ready for precoding, `[slot][dl_idx]`
    encode_ready: Vec<Vec<bool>>,
    /// Downlink symbols whose IFFT finished, `[slot][dl_idx]`
    ifft_ready: Vec<Vec<bool>>,
    /// Next downlink symbol to transmit, per slot
    ifft_next: Vec<usize>,
    zf_last_frame: Option<FrameId>,
    rc_last_frame: Option<FrameId>,

    deferral: DeferralQueue,

    /// `[stage * SCHEDULE_QUEUES + qid]`
    stage_tokens: Vec<ProducerToken>,
    /// Transmit and MAC requests
    io_token: ProducerToken,
    events: Vec<EventData>,

    stats: FrameStats,
    packets_received: u64,
    stale_packets: u64,
    duplicate_packets: u64,
    rejected_ran_updates: u64,
    snr_reports_dropped: u64,
}

impl Scheduler {
    /// Create a scheduler for a validated configuration
    pub fn new(
        config: Arc<PipelineConfig>,
        fabric: Arc<QueueFabric>,
        shared: Arc<SharedState>,
        phy_stats: Arc<PhyStats>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let window = config.frame_window;
        let frame = &config.frame_schedule;
        let span = frame.num_total_syms();
        let (num_ul, num_dl) = (frame.num_ul_syms(), frame.num_dl_syms());
        let per_symbol = |symbols: usize, tasks: usize| {
            let mut counters = FrameCounters::new(window, span);
            counters.init(symbols, tasks);
            counters
        };
        let per_frame = |tasks: usize| {
            let mut counters = FrameCounters::new(window, 1);
            counters.init(1, tasks);
            counters
        };

        let initial_flags = ScheduleProcessingFlags::initial(num_ul > 0, num_dl > 0);

        let scheduler = Self {
            rx_counters: RxCounters::new(
                window,
                config.rx_packets_per_frame(),
                config.pilot_packets_per_frame(),
                config.cal_packets_per_frame(),
            ),
            pilot_fft_counters: per_symbol(frame.num_pilot_syms(), config.bs_ant_num),
            uplink_fft_counters: per_symbol(num_ul, config.bs_ant_num),
            rc_counters: per_frame(config.cal_packets_per_frame()),
            zf_counters: per_frame(config.zf_events_per_symbol()),
            demul_counters: per_symbol(num_ul, config.demul_events_per_symbol()),
            decode_counters: per_symbol(num_ul, config.codeblocks_per_symbol()),
            tomac_counters: per_symbol(if config.enable_mac { num_ul } else { 0 }, config.ue_ant_num),
            encode_counters: per_symbol(config.num_dl_data_syms(), config.codeblocks_per_symbol()),
            precode_counters: per_symbol(num_dl, config.demul_events_per_symbol()),
            ifft_counters: per_symbol(num_dl, config.bs_ant_num),
            tx_counters: per_symbol(num_dl, config.bs_ant_num),
            mac_to_phy_counters: per_frame(config.ue_ant_num),

            fft_backlog: vec![VecDeque::with_capacity(config.rx_packets_per_frame()); window],
            fft_created: vec![0; window],
            pilot_parked: vec![Vec::new(); window],
            uplink_fft_ready: vec![vec![false; num_ul]; window],
            encode_ready: vec![vec![false; num_dl]; window],
            ifft_ready: vec![vec![false; num_dl]; window],
            ifft_next: vec![0; window],
            zf_last_frame: None,
            rc_last_frame: None,

            deferral: DeferralQueue::with_capacity(window),

            stage_tokens: (0..NUM_COMPUTE_STAGES * SCHEDULE_QUEUES)
                .map(ProducerToken::new)
                .collect(),
            io_token: ProducerToken::new(NUM_COMPUTE_STAGES * SCHEDULE_QUEUES),
            events: Vec::with_capacity(config.dequeue_bulk_size * config.worker_thread_num.max(2)),

            stats: FrameStats::new(window),
            packets_received: 0,
            stale_packets: 0,
            duplicate_packets: 0,
            rejected_ran_updates: 0,
            snr_reports_dropped: 0,

            cur_sche_frame_id: 0,
            cur_proc_frame_id: 0,
            schedule_flags: initial_flags,
            initial_flags,
            window,
            config,
            fabric,
            shared,
            phy_stats,
        };
        scheduler.shared.publish_sche_frame_id(0);
        scheduler.shared.publish_proc_frame_id(0);
        Ok(scheduler)
    }

    pub fn cur_sche_frame_id(&self) -> FrameId {
        self.cur_sche_frame_id
    }

    pub fn cur_proc_frame_id(&self) -> FrameId {
        self.cur_proc_frame_id
    }

    /// Frames currently waiting for downlink admission
    pub fn deferred_frames(&self) -> usize {
        self.deferral.len()
    }

    /// Run until the last configured frame retires, the running flag is
    /// cleared or an event violates a scheduling precondition. Always
    /// clears the running flag on exit.
    pub fn run(&mut self) -> Result<RunSummary, SchedulerError> {
        info!(
            "Scheduler started: {} frames, window {}, schedule {}",
            self.config.frames_to_test, self.window, self.config.frame_schedule
        );
        let start = Instant::now();
        let io_bulk = self.config.dequeue_bulk_size * (self.config.socket_thread_num + 1);
        let complete_bulk = self.config.dequeue_bulk_size * self.config.worker_thread_num;

        let mut poll_io = true;
        let result = 'run: loop {
            if !self.shared.is_running() {
                break 'run Ok(false);
            }

            self.events.clear();
            if poll_io {
                self.fabric.message_queue().try_dequeue_bulk(&mut self.events, io_bulk);
                if self.config.enable_mac {
                    self.fabric
                        .mac_response_queue()
                        .try_dequeue_bulk(&mut self.events, io_bulk);
                }
            } else {
                let qid = frame_qid(self.cur_proc_frame_id);
                self.fabric
                    .complete_queue(qid)
                    .try_dequeue_bulk(&mut self.events, complete_bulk);
            }
            poll_io = !poll_io;

            for i in 0..self.events.len() {
                let event = self.events[i];
                match self.handle_event(&event) {
                    Ok(Progress::Continue) => {}
                    Ok(Progress::Finished) => break 'run Ok(true),
                    Err(e) => break 'run Err(e),
                }
            }
        };
        self.shared.stop();

        let finished = match result {
            Ok(finished) => finished,
            Err(SchedulerError::Queue(QueueError::Closed(name))) => {
                debug!("Scheduler stopped while posting to {}", name);
                false
            }
            Err(e) => {
                error!("Scheduler halted: {}", e);
                return Err(e);
            }
        };

        let mut summary = self.summary();
        summary.finished = finished;
        summary.set_elapsed(start.elapsed());
        info!(
            "Scheduler exit: {} frames retired in {:.2}s, mean latency {:.2} ms",
            summary.frames_retired, summary.elapsed_secs, summary.mean_frame_latency_ms
        );
        Ok(summary)
    }

    /// Snapshot of the run counters
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            frames_retired: self.stats.frames_retired(),
            mean_frame_latency_ms: self.stats.mean_latency_ms(),
            max_frame_latency_ms: self.stats.max_latency_ms(),
            packets_received: self.packets_received,
            stale_packets: self.stale_packets,
            duplicate_packets: self.duplicate_packets,
            rejected_ran_updates: self.rejected_ran_updates,
            deferred_frames: self.deferral.total_deferred(),
            snr_reports_dropped: self.snr_reports_dropped,
            ..Default::default()
        }
    }

    /// Apply one event. Exposed for driving the scheduler without its
    /// polling loop.
    pub fn handle_event(&mut self, event: &EventData) -> Result<Progress, SchedulerError> {
        let mut progress = Progress::Continue;
        match event.event_type {
            EventType::PacketRx => self.handle_packet_rx(event)?,
            EventType::RanUpdate => self.handle_ran_update(event),
            EventType::Fft => {
                for tag in event.tags() {
                    self.handle_fft(tag)?;
                }
            }
            EventType::Zf => {
                for tag in event.tags() {
                    self.handle_zf(tag)?;
                }
            }
            EventType::Demul => {
                for tag in event.tags() {
                    self.handle_demul(tag)?;
                }
            }
            EventType::Decode => {
                for tag in event.tags() {
                    progress = progress.merge(self.handle_decode(tag)?);
                }
            }
            EventType::Encode => {
                for tag in event.tags() {
                    self.handle_encode(tag)?;
                }
            }
            EventType::Precode => {
                for tag in event.tags() {
                    self.handle_precode(tag)?;
                }
            }
            EventType::Ifft => {
                for tag in event.tags() {
                    progress = progress.merge(self.handle_ifft(tag)?);
                }
            }
            EventType::PacketTx => {
                for tag in event.tags() {
                    progress = progress.merge(self.handle_packet_tx(tag)?);
                }
            }
            EventType::PacketToMac => {
                for tag in event.tags() {
                    progress = progress.merge(self.handle_packet_to_mac(tag)?);
                }
            }
            EventType::PacketFromMac => {
                for tag in event.tags() {
                    self.handle_packet_from_mac(tag)?;
                }
            }
            other @ EventType::SnrReport => return Err(SchedulerError::UnexpectedEvent(other)),
        }

        self.schedule_fft_backlog()?;
        debug_assert!(
            self.cur_proc_frame_id <= self.cur_sche_frame_id
                && u64::from(self.cur_sche_frame_id)
                    <= u64::from(self.cur_proc_frame_id) + self.window as u64,
            "frontiers out of order: proc {} sche {}",
            self.cur_proc_frame_id,
            self.cur_sche_frame_id
        );
        Ok(progress)
    }

    fn slot(&self, frame_id: FrameId) -> usize {
        frame_id as usize % self.window
    }

    /// Record that the scheduling frame finished issuing one direction and
    /// advance the frontier once both are done.
    fn check_increment_schedule_frame(
        &mut self,
        frame_id: FrameId,
        completed: ScheduleProcessingFlags,
    ) -> Result<(), SchedulerError> {
        if frame_id != self.cur_sche_frame_id {
            return Err(SchedulerError::FrontierMismatch {
                frame: frame_id,
                cur_sche: self.cur_sche_frame_id,
            });
        }

        self.schedule_flags |= completed;
        if self.schedule_flags == ScheduleProcessingFlags::PROCESSING_COMPLETE {
            self.cur_sche_frame_id += 1;
            self.shared.publish_sche_frame_id(self.cur_sche_frame_id);
            self.schedule_flags = self.initial_flags;
            debug!("Scheduling frame {}", self.cur_sche_frame_id);
        }
        Ok(())
    }

    /// Retire the oldest frames while each has finished transmitting and
    /// delivering its uplink data.
    fn try_retire_frames(&mut self) -> Result<Progress, SchedulerError> {
        loop {
            let frame_id = self.cur_proc_frame_id;
            let uplink_done = if self.config.enable_mac {
                self.tomac_counters.is_last_symbol(frame_id)
            } else {
                self.decode_counters.is_last_symbol(frame_id)
            };
            let complete = uplink_done
                && self.ifft_counters.is_last_symbol(frame_id)
                && self.tx_counters.is_last_symbol(frame_id);
            if !complete {
                return Ok(Progress::Continue);
            }

            self.retire_frame(frame_id)?;
            if frame_id as usize + 1 == self.config.frames_to_test {
                info!("Retired last frame {}", frame_id);
                return Ok(Progress::Finished);
            }
        }
    }

    fn retire_frame(&mut self, frame_id: FrameId) -> Result<(), SchedulerError> {
        for counters in [
            &mut self.pilot_fft_counters,
            &mut self.uplink_fft_counters,
            &mut self.rc_counters,
            &mut self.zf_counters,
            &mut self.demul_counters,
            &mut self.decode_counters,
            &mut self.tomac_counters,
            &mut self.encode_counters,
            &mut self.precode_counters,
            &mut self.ifft_counters,
            &mut self.tx_counters,
            &mut self.mac_to_phy_counters,
        ] {
            counters.reset(frame_id);
        }
        self.rx_counters.reset(frame_id);

        let slot = self.slot(frame_id);
        self.fft_backlog[slot].clear();
        self.fft_created[slot] = 0;
        self.pilot_parked[slot].clear();
        self.uplink_fft_ready[slot].fill(false);
        self.encode_ready[slot].fill(false);
        self.ifft_ready[slot].fill(false);
        self.ifft_next[slot] = 0;

        let latency = self.stats.retire(frame_id);
        debug!(
            "Frame {} retired after {:.2} ms",
            frame_id,
            latency.unwrap_or_default()
        );

        self.cur_proc_frame_id += 1;
        self.shared.publish_proc_frame_id(self.cur_proc_frame_id);

        while let Some(deferred) = self
            .deferral
            .pop_admissible(self.cur_proc_frame_id, self.config.deferral_window)
        {
            assert!(
                deferred >= self.cur_proc_frame_id,
                "deferred frame {} already retired (oldest in flight {})",
                deferred,
                self.cur_proc_frame_id
            );
            debug!("Releasing deferred downlink of frame {}", deferred);
            self.schedule_downlink_processing(deferred)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use common::FrameSchedule;

    use common::DimId;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn test_config(schedule: &str) -> PipelineConfig {
        PipelineConfig {
            frame_window: 4,
            deferral_window: 2,
            frame_schedule: FrameSchedule::parse(schedule).unwrap(),
            bs_ant_num: 4,
            ue_ant_num: 2,
            ofdm_data_num: 48,
            fft_size: 64,
            fft_block_size: 3,
            zf_block_size: 8,
            zf_batch_size: 4,
            demul_block_size: 16,
            encode_block_size: 3,
            ldpc_blocks_per_symbol: 2,
            worker_thread_num: 2,
            frames_to_test: 6,
            ..Default::default()
        }
    }

    /// Drives a scheduler synchronously, standing in for workers, the
    /// transport and the MAC.
    struct Harness {
        config: Arc<PipelineConfig>,
        fabric: Arc<QueueFabric>,
        shared: Arc<SharedState>,
        scheduler: Scheduler,
        rng: StdRng,
        /// Completions seen per (stage, tag)
        tasks: HashMap<(EventType, u64), usize>,
        transmitted: Vec<Tag>,
        /// Frames in the order their first encode task appeared
        encode_order: Vec<FrameId>,
        snr_reports: usize,
        next_frame: FrameId,
        next_mac_frame: FrameId,
        progress: Progress,
    }

    impl Harness {
        fn new(config: PipelineConfig) -> Self {
            let config = Arc::new(config);
            let fabric = Arc::new(QueueFabric::new(&config));
            let shared = Arc::new(SharedState::default());
            let phy_stats = Arc::new(PhyStats::new(config.frame_window, config.ue_ant_num));
            let scheduler =
                Scheduler::new(config.clone(), fabric.clone(), shared.clone(), phy_stats).unwrap();
            Self {
                config,
                fabric,
                shared,
                scheduler,
                rng: StdRng::seed_from_u64(42),
                tasks: HashMap::new(),
                transmitted: Vec::new(),
                encode_order: Vec::new(),
                snr_reports: 0,
                next_frame: 0,
                next_mac_frame: 0,
                progress: Progress::Continue,
            }
        }

        fn handle(&mut self, event: &EventData) -> Result<(), SchedulerError> {
            let progress = self.scheduler.handle_event(event)?;
            self.progress = self.progress.merge(progress);
            let (proc, sche) = (self.scheduler.cur_proc_frame_id(), self.scheduler.cur_sche_frame_id());
            assert!(proc <= sche && sche as usize <= proc as usize + self.config.frame_window);
            Ok(())
        }

        fn packet(&mut self, frame: FrameId, symbol: SymbolId, ant: usize) -> Result<(), SchedulerError> {
            let event = EventData::packet_rx(Tag::frm_sym_ant(frame, symbol, ant as DimId), 0);
            self.handle(&event)
        }

        /// Every received packet of `frames`, interleaved in random order.
        /// Frames still start in order, as the transport sends them.
        fn receive_frames(&mut self, frames: std::ops::Range<FrameId>) -> Result<(), SchedulerError> {
            let config = self.config.clone();
            let frames: Vec<FrameId> = frames.collect();
            let mut packets = Vec::new();
            for &frame in &frames {
                for symbol in config.frame_schedule.rx_symbols() {
                    for ant in 0..config.bs_ant_num {
                        packets.push((frame, symbol, ant));
                    }
                }
            }
            packets.shuffle(&mut self.rng);

            let mut ordered = Vec::with_capacity(packets.len());
            for &frame in &frames {
                if let Some(pos) = packets.iter().position(|p| p.0 == frame) {
                    ordered.push(packets.remove(pos));
                }
            }
            ordered.extend(packets);

            for (frame, symbol, ant) in ordered {
                self.packet(frame, symbol, ant)?;
            }
            Ok(())
        }

        fn mac_data(&mut self, frame: FrameId) -> Result<(), SchedulerError> {
            for ue in 0..self.config.ue_ant_num {
                let event = EventData::with_tag(EventType::PacketFromMac, Tag::frm_sym_ue(frame, 0, ue as DimId));
                self.handle(&event)?;
            }
            Ok(())
        }

        /// Complete every posted task in random order until nothing is
        /// pending
        fn drain(&mut self) -> Result<(), SchedulerError> {
            loop {
                let mut pending = Vec::new();
                for stage in EventType::compute_stages() {
                    for qid in 0..SCHEDULE_QUEUES {
                        let queue = self.fabric.stage_queue(stage, qid).unwrap();
                        while let Some(event) = queue.try_dequeue() {
                            let frame = event.tag(0).frame_id();
                            assert_eq!(frame_qid(frame), qid);
                            if stage == EventType::Encode && !self.encode_order.contains(&frame) {
                                self.encode_order.push(frame);
                            }
                            pending.push(event);
                        }
                    }
                }
                while let Some(event) = self.fabric.tx_queue().try_dequeue() {
                    self.transmitted.push(event.tag(0));
                    pending.push(event);
                }
                while let Some(event) = self.fabric.mac_request_queue().try_dequeue() {
                    match event.event_type {
                        EventType::SnrReport => self.snr_reports += 1,
                        _ => pending.push(event),
                    }
                }
                if pending.is_empty() {
                    return Ok(());
                }

                pending.shuffle(&mut self.rng);
                for event in pending {
                    for tag in event.tags() {
                        *self.tasks.entry((event.event_type, tag.raw())).or_default() += 1;
                    }
                    self.handle(&event)?;
                }
            }
        }

        /// Feed frames as the window allows until the run finishes
        fn run_to_completion(&mut self) -> Result<(), SchedulerError> {
            let total = self.config.frames_to_test as FrameId;
            let window = self.config.frame_window as FrameId;
            while self.progress == Progress::Continue {
                let before = self.scheduler.cur_proc_frame_id();
                let edge = (self.scheduler.cur_proc_frame_id() + window).min(total);
                if self.config.enable_mac {
                    while self.next_mac_frame < edge {
                        let frame = self.next_mac_frame;
                        self.mac_data(frame)?;
                        self.next_mac_frame += 1;
                    }
                }
                let first = self.next_frame;
                self.next_frame = edge;
                self.receive_frames(first..edge)?;
                self.drain()?;
                assert!(
                    self.progress == Progress::Finished
                        || edge > first
                        || self.scheduler.cur_proc_frame_id() > before,
                    "pipeline stalled at frame {}",
                    before
                );
            }
            Ok(())
        }

        fn count(&self, event_type: EventType) -> usize {
            self.tasks.keys().filter(|(t, _)| *t == event_type).count()
        }

        fn assert_exactly_once(&self) {
            for ((event_type, raw), n) in &self.tasks {
                assert_eq!(*n, 1, "{:?} {:?} completed {} times", event_type, Tag::from_raw(*raw), n);
            }
        }
    }

    #[test]
    fn test_mixed_frames_complete_exactly_once() {
        let mut h = Harness::new(test_config("PPUUDD"));
        h.run_to_completion().unwrap();
        h.assert_exactly_once();

        let frames = 6;
        let config = h.config.clone();
        assert_eq!(h.scheduler.cur_proc_frame_id(), frames as FrameId);
        assert_eq!(h.scheduler.cur_sche_frame_id(), frames as FrameId);
        assert_eq!(h.count(EventType::Fft), frames * 4 * 4);
        assert_eq!(h.count(EventType::Zf), frames * config.zf_events_per_symbol());
        assert_eq!(h.count(EventType::Demul), frames * 2 * 3);
        assert_eq!(h.count(EventType::Decode), frames * 2 * 4);
        assert_eq!(h.count(EventType::Encode), frames * 2 * 4);
        assert_eq!(h.count(EventType::Precode), frames * 2 * 3);
        assert_eq!(h.count(EventType::Ifft), frames * 2 * 4);
        assert_eq!(h.transmitted.len(), frames * 2 * 4);

        let summary = h.scheduler.summary();
        assert_eq!(summary.frames_retired, frames as u64);
        assert_eq!(summary.packets_received, (frames * 4 * 4) as u64);
        assert_eq!(summary.stale_packets, 0);
    }

    #[test]
    fn test_uplink_only_frames() {
        let mut h = Harness::new(test_config("PUUU"));
        h.run_to_completion().unwrap();
        h.assert_exactly_once();
        assert_eq!(h.count(EventType::Encode), 0);
        assert!(h.transmitted.is_empty());
        assert_eq!(h.scheduler.summary().deferred_frames, 0);
        assert_eq!(h.scheduler.cur_proc_frame_id(), 6);
    }

    #[test]
    fn test_downlink_only_frames_with_client_pilots() {
        let mut config = test_config("PDDD");
        config.client_dl_pilot_symbols = 1;
        let mut h = Harness::new(config);
        h.run_to_completion().unwrap();
        h.assert_exactly_once();
        assert_eq!(h.count(EventType::Decode), 0);
        // client pilot symbols skip encoding
        assert_eq!(h.count(EventType::Encode), 6 * 2 * 4);
        assert_eq!(h.count(EventType::Precode), 6 * 3 * 3);
        assert_eq!(h.transmitted.len(), 6 * 3 * 4);
    }

    #[test]
    fn test_mac_enabled_frames() {
        let mut config = test_config("PUUDD");
        config.enable_mac = true;
        let mut h = Harness::new(config);
        h.run_to_completion().unwrap();
        h.assert_exactly_once();
        // one delivery per UE per uplink symbol
        assert_eq!(h.count(EventType::PacketToMac), 6 * 2 * 2);
        // one report per UE per frame
        assert_eq!(h.snr_reports, 6 * 2);
        assert_eq!(h.scheduler.cur_proc_frame_id(), 6);
    }

    #[test]
    fn test_calibration_gates_pilots() {
        let mut h = Harness::new(test_config("PCLUD"));
        let config = h.config.clone();
        let cal_symbols = config.frame_schedule.cal_symbols().to_vec();

        // everything but the calibration packets
        for symbol in config.frame_schedule.rx_symbols() {
            if cal_symbols.contains(&symbol) {
                continue;
            }
            for ant in 0..config.bs_ant_num {
                h.packet(0, symbol, ant).unwrap();
            }
        }
        h.drain().unwrap();
        assert_eq!(h.count(EventType::Zf), 0);
        assert!(h.count(EventType::Fft) > 0);

        for &symbol in &cal_symbols {
            for ant in 0..config.bs_ant_num {
                h.packet(0, symbol, ant).unwrap();
            }
        }
        h.drain().unwrap();
        assert_eq!(h.count(EventType::Zf), config.zf_events_per_symbol());
        assert_eq!(h.scheduler.cur_proc_frame_id(), 1);
        h.assert_exactly_once();
    }

    #[test]
    fn test_window_overrun_halts() {
        let mut h = Harness::new(test_config("PPUUDD"));
        let err = h.packet(4, 0, 0).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::WindowOverrun { frame: 4, cur_proc: 0, window: 4, .. }
        ));

        // the polling loop stops on the same condition
        let mut token = ProducerToken::new(0);
        let bad = EventData::packet_rx(Tag::frm_sym_ant(9, 0, 0), 0);
        assert!(h.fabric.message_queue().try_enqueue(&mut token, bad));
        assert!(h.scheduler.run().is_err());
        assert!(!h.shared.is_running());
    }

    #[test]
    fn test_stale_packets_are_dropped() {
        let mut config = test_config("PUU");
        config.frames_to_test = 3;
        let mut h = Harness::new(config);
        h.receive_frames(0..1).unwrap();
        h.drain().unwrap();
        assert_eq!(h.scheduler.cur_proc_frame_id(), 1);

        h.packet(0, 1, 2).unwrap();
        assert_eq!(h.scheduler.summary().stale_packets, 1);
        assert_eq!(h.fabric.pending_tasks(), 0);
    }

    #[test]
    fn test_transmit_follows_symbol_order() {
        let mut config = test_config("PDDDD");
        config.bs_ant_num = 1;
        let mut h = Harness::new(config);
        let dl = h.config.frame_schedule.dl_symbols().to_vec();

        let ifft_done = |h: &mut Harness, dl_idx: usize| {
            let event = EventData::with_tag(EventType::Ifft, Tag::frm_sym_ant(0, dl[dl_idx], 0));
            h.handle(&event).unwrap();
            let mut sent = Vec::new();
            while let Some(event) = h.fabric.tx_queue().try_dequeue() {
                sent.push(event.tag(0).symbol_id());
            }
            sent
        };

        assert!(ifft_done(&mut h, 2).is_empty());
        assert_eq!(ifft_done(&mut h, 0), vec![dl[0]]);
        assert!(ifft_done(&mut h, 3).is_empty());
        assert_eq!(ifft_done(&mut h, 1), vec![dl[1], dl[2], dl[3]]);
    }

    #[test]
    fn test_fft_tail_flushes_when_frame_is_complete() {
        let mut config = test_config("PU");
        config.bs_ant_num = 3;
        config.fft_block_size = 4;
        let mut h = Harness::new(config);

        let packets = [(0, 0), (0, 1), (1, 0), (0, 2), (1, 1), (1, 2)];
        let mut posted = Vec::new();
        for (i, &(symbol, ant)) in packets.iter().enumerate() {
            h.packet(0, symbol, ant).unwrap();
            let queue = h.fabric.stage_queue(EventType::Fft, 0).unwrap();
            while let Some(event) = queue.try_dequeue() {
                posted.push((i, event.num_tags()));
            }
        }
        assert_eq!(posted, vec![(3, 4), (5, 2)]);
    }

    #[test]
    fn test_downlink_deferred_in_frame_order() {
        let mut config = test_config("PUD");
        config.deferral_window = 1;
        let mut h = Harness::new(config);

        for frame in 0..3 {
            h.packet(frame, 0, 0).unwrap();
        }
        assert_eq!(h.scheduler.deferred_frames(), 2);

        let config = h.config.clone();
        for frame in 0..3 {
            for symbol in config.frame_schedule.rx_symbols() {
                for ant in 0..config.bs_ant_num {
                    if (symbol, ant) != (0, 0) {
                        h.packet(frame, symbol, ant).unwrap();
                    }
                }
            }
        }
        h.drain().unwrap();

        assert_eq!(h.encode_order, vec![0, 1, 2]);
        assert_eq!(h.scheduler.deferred_frames(), 0);
        assert_eq!(h.scheduler.cur_proc_frame_id(), 3);
        assert_eq!(h.scheduler.summary().deferred_frames, 2);
        h.assert_exactly_once();
    }

    #[test]
    fn test_ran_update_sets_modulation() {
        let mut h = Harness::new(test_config("PUD"));
        h.handle(&EventData::ran_update(4, 6, 0)).unwrap();
        assert_eq!(h.shared.mod_order_bits(), 6);
    }

    #[test]
    fn test_ran_update_rejects_unsupported_modulation() {
        let mut h = Harness::new(test_config("PUD"));
        let before = h.shared.mod_order_bits();
        for bits in [0, 3, 10, 300] {
            h.handle(&EventData::ran_update(4, bits, 0)).unwrap();
        }
        assert_eq!(h.shared.mod_order_bits(), before);
        assert_eq!(h.scheduler.summary().rejected_ran_updates, 4);
    }

    #[test]
    fn test_duplicate_packets_are_dropped() {
        let mut config = test_config("PU");
        config.bs_ant_num = 3;
        let mut h = Harness::new(config);
        h.receive_frames(0..1).unwrap();
        for ant in 0..3 {
            h.packet(0, 1, ant).unwrap();
        }
        h.packet(0, 0, 2).unwrap();

        let summary = h.scheduler.summary();
        assert_eq!(summary.packets_received, 6);
        assert_eq!(summary.duplicate_packets, 4);

        h.drain().unwrap();
        h.assert_exactly_once();
        assert_eq!(h.count(EventType::Fft), 6);
        assert_eq!(h.scheduler.cur_proc_frame_id(), 1);

        // Once retired the frame's packets are stale
        h.packet(0, 1, 0).unwrap();
        assert_eq!(h.scheduler.summary().stale_packets, 1);
        assert_eq!(h.scheduler.summary().duplicate_packets, 4);
    }

    #[test]
    fn test_snr_report_from_scheduler_is_rejected() {
        let mut h = Harness::new(test_config("PUD"));
        let event = EventData::snr_report(Tag::frm_sym_ue(0, 0, 0), 1.0);
        assert!(matches!(
            h.handle(&event),
            Err(SchedulerError::UnexpectedEvent(EventType::SnrReport))
        ));
    }
}
