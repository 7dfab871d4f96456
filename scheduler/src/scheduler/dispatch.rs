//! Task emission: batching work items into events and posting them to the
//! stage queues of the frame's parity.

use common::{DimId, EventData, EventType, FrameId, SymbolId, Tag, SCHEDULE_QUEUES};
use interfaces::frame_qid;
use tracing::trace;

use super::Scheduler;
use crate::stats::Milestone;
use crate::SchedulerError;

impl Scheduler {
    /// Post a compute event to its stage queue for the frame's parity
    fn enqueue_task(&mut self, event: EventData, frame_id: FrameId) -> Result<(), SchedulerError> {
        let qid = frame_qid(frame_id);
        let stage = event
            .event_type
            .stage_index()
            .ok_or(SchedulerError::UnexpectedEvent(event.event_type))?;
        let queue = self
            .fabric
            .stage_queue(event.event_type, qid)
            .ok_or(SchedulerError::UnexpectedEvent(event.event_type))?;
        queue.enqueue_fallback(
            &mut self.stage_tokens[stage * SCHEDULE_QUEUES + qid],
            event,
            self.shared.running_flag(),
        )?;
        Ok(())
    }

    /// Split `count` work items into events of at most `batch` tags
    fn schedule_batched(
        &mut self,
        event_type: EventType,
        frame_id: FrameId,
        count: usize,
        batch: usize,
        tag_of: impl Fn(usize) -> Tag,
    ) -> Result<(), SchedulerError> {
        let mut first = 0;
        while first < count {
            let n = batch.min(count - first);
            let mut event = EventData::new(event_type);
            for i in first..first + n {
                event.push_tag(tag_of(i));
            }
            self.enqueue_task(event, frame_id)?;
            first += n;
        }
        Ok(())
    }

    /// Per-antenna tasks (FFT, IFFT) in batches of `fft_block_size`
    pub(super) fn schedule_antennas(
        &mut self,
        event_type: EventType,
        frame_id: FrameId,
        symbol_id: SymbolId,
    ) -> Result<(), SchedulerError> {
        let (count, batch) = (self.config.bs_ant_num, self.config.fft_block_size);
        self.schedule_batched(event_type, frame_id, count, batch, |ant| {
            Tag::frm_sym_ant(frame_id, symbol_id, ant as DimId)
        })
    }

    /// Subcarrier-block tasks. ZF events batch `zf_batch_size` blocks of
    /// `zf_block_size`; demodulation and precoding post one block of
    /// `demul_block_size` per event.
    pub(super) fn schedule_subcarriers(
        &mut self,
        event_type: EventType,
        frame_id: FrameId,
        symbol_id: SymbolId,
    ) -> Result<(), SchedulerError> {
        let config = self.config.clone();
        match event_type {
            EventType::Zf => {
                let block = config.zf_block_size;
                self.schedule_batched(
                    event_type,
                    frame_id,
                    config.zf_events_per_symbol(),
                    config.zf_batch_size,
                    |i| Tag::frm_sym_sc(frame_id, 0, (i * block) as DimId),
                )
            }
            _ => {
                let block = config.demul_block_size;
                self.schedule_batched(
                    event_type,
                    frame_id,
                    config.demul_events_per_symbol(),
                    1,
                    |i| Tag::frm_sym_sc(frame_id, symbol_id, (i * block) as DimId),
                )
            }
        }
    }

    /// Code-block tasks (encode, decode) in batches of `encode_block_size`
    pub(super) fn schedule_codeblocks(
        &mut self,
        event_type: EventType,
        frame_id: FrameId,
        symbol_id: SymbolId,
    ) -> Result<(), SchedulerError> {
        let (count, batch) = (self.config.codeblocks_per_symbol(), self.config.encode_block_size);
        self.schedule_batched(event_type, frame_id, count, batch, |cb| {
            Tag::frm_sym_cb(frame_id, symbol_id, cb as DimId)
        })
    }

    /// Pilot symbols go straight to precoding once ZF is done; data symbols
    /// start with encoding.
    pub(super) fn schedule_downlink_processing(&mut self, frame_id: FrameId) -> Result<(), SchedulerError> {
        let config = self.config.clone();
        let slot = self.slot(frame_id);
        for (dl_idx, &symbol_id) in config.frame_schedule.dl_symbols().iter().enumerate() {
            if config.is_dl_pilot(dl_idx) {
                if self.zf_last_frame == Some(frame_id) {
                    self.schedule_subcarriers(EventType::Precode, frame_id, symbol_id)?;
                } else {
                    self.encode_ready[slot][dl_idx] = true;
                }
            } else {
                self.schedule_codeblocks(EventType::Encode, frame_id, symbol_id)?;
            }
        }
        trace!("Frame {}: scheduled downlink processing", frame_id);
        Ok(())
    }

    /// One transmit request per antenna
    pub(super) fn schedule_antennas_tx(
        &mut self,
        frame_id: FrameId,
        symbol_id: SymbolId,
    ) -> Result<(), SchedulerError> {
        for ant in 0..self.config.bs_ant_num {
            let event = EventData::with_tag(
                EventType::PacketTx,
                Tag::frm_sym_ant(frame_id, symbol_id, ant as DimId),
            );
            self.fabric
                .tx_queue()
                .enqueue_fallback(&mut self.io_token, event, self.shared.running_flag())?;
        }
        trace!("Frame {}: transmitting symbol {}", frame_id, symbol_id);
        Ok(())
    }

    /// One decoded-data delivery per UE
    pub(super) fn schedule_users(
        &mut self,
        frame_id: FrameId,
        symbol_id: SymbolId,
    ) -> Result<(), SchedulerError> {
        for ue in 0..self.config.ue_ant_num {
            let event = EventData::with_tag(
                EventType::PacketToMac,
                Tag::frm_sym_ue(frame_id, symbol_id, ue as DimId),
            );
            self.fabric
                .mac_request_queue()
                .enqueue_fallback(&mut self.io_token, event, self.shared.running_flag())?;
        }
        Ok(())
    }

    /// Best-effort SNR report per UE. Uses the latest estimate, which
    /// comes from the previous frame's demodulation.
    pub(super) fn send_snr_report(&mut self, frame_id: FrameId, symbol_id: SymbolId) {
        let source = frame_id.saturating_sub(1);
        for ue in 0..self.config.ue_ant_num {
            let snr = self.phy_stats.snr(source, ue);
            let event = EventData::snr_report(Tag::frm_sym_ue(frame_id, symbol_id, ue as DimId), snr);
            if !self.fabric.mac_request_queue().try_enqueue(&mut self.io_token, event) {
                self.snr_reports_dropped += 1;
                trace!("Frame {}: dropped SNR report of UE {}", frame_id, ue);
            }
        }
    }

    /// Batch the scheduling frame's received packets into FFT tasks.
    /// Full batches go out immediately; the tail goes out once no more
    /// packets of the frame can arrive.
    pub(super) fn schedule_fft_backlog(&mut self) -> Result<(), SchedulerError> {
        let frame_id = self.cur_sche_frame_id;
        let slot = self.slot(frame_id);
        let (block, per_frame) = (self.config.fft_block_size, self.rx_counters.packets_per_frame());

        loop {
            let backlog = self.fft_backlog[slot].len();
            if backlog == 0 {
                return Ok(());
            }
            let remaining = per_frame.saturating_sub(self.fft_created[slot]);
            let n = if backlog >= block {
                block
            } else if backlog == remaining {
                backlog
            } else {
                return Ok(());
            };

            let mut event = EventData::new(EventType::Fft);
            for tag in self.fft_backlog[slot].drain(..n) {
                event.push_tag(tag);
            }
            if self.fft_created[slot] == 0 {
                self.stats.record(frame_id, Milestone::ProcessingStarted);
            }
            self.fft_created[slot] += n;
            self.enqueue_task(event, frame_id)?;
        }
    }
}
