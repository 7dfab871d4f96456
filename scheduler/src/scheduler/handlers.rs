//! Per-event handlers

use common::{
    is_supported_mod_order, EventData, EventType, FrameId, ScheduleProcessingFlags, SymbolId,
    SymbolType, Tag,
};
use tracing::{debug, info, trace, warn};

use super::{Progress, Scheduler};
use crate::deferral::is_admissible;
use crate::stats::Milestone;
use crate::SchedulerError;

impl Scheduler {
    /// Reject frames beyond the window; false for frames already retired
    fn admit_frame(&mut self, tag: Tag, source: &str) -> Result<bool, SchedulerError> {
        let (frame_id, symbol_id, _) = tag.decode();
        if u64::from(frame_id) >= u64::from(self.cur_proc_frame_id) + self.window as u64 {
            return Err(SchedulerError::WindowOverrun {
                frame: frame_id,
                symbol: symbol_id,
                cur_proc: self.cur_proc_frame_id,
                window: self.window,
            });
        }
        if frame_id < self.cur_proc_frame_id {
            warn!(
                "Dropping stale {} for frame {} (oldest in flight {})",
                source, frame_id, self.cur_proc_frame_id
            );
            self.stale_packets += 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn unexpected_symbol(&self, event_type: EventType, tag: Tag) -> SchedulerError {
        let (frame, symbol, _) = tag.decode();
        SchedulerError::UnexpectedSymbol {
            event_type,
            frame,
            symbol,
            symbol_type: self.config.frame_schedule.symbol_type(symbol),
        }
    }

    pub(super) fn handle_packet_rx(&mut self, event: &EventData) -> Result<(), SchedulerError> {
        let tag = event.tag(0);
        if !self.admit_frame(tag, "packet")? {
            return Ok(());
        }
        let (frame_id, symbol_id, _) = tag.decode();
        let symbol_type = self.config.frame_schedule.symbol_type(symbol_id);
        if !symbol_type.is_received() {
            return Err(self.unexpected_symbol(EventType::PacketRx, tag));
        }
        if self.rx_counters.packets(frame_id) >= self.rx_counters.packets_per_frame() {
            warn!(
                "Dropping duplicate packet {:?}: frame {} already received in full",
                tag, frame_id
            );
            self.duplicate_packets += 1;
            return Ok(());
        }
        trace!("Received {:?} in buffer {}", tag, event.raw(1));
        self.packets_received += 1;

        let progress = self.rx_counters.record(frame_id, symbol_type);
        if progress.first_packet {
            self.stats.record(frame_id, Milestone::FirstRx);
            debug!("Frame {}: received first packet", frame_id);
            if !self.config.enable_mac {
                self.request_downlink(frame_id)?;
            }
        }
        if progress.all_pilots {
            self.stats.record(frame_id, Milestone::PilotAllRx);
            debug!(
                "Frame {} + {:.2} ms: received all pilots",
                frame_id,
                self.stats.ms_since_first(frame_id)
            );
        }
        if progress.all_calibration {
            self.stats.record(frame_id, Milestone::RcAllRx);
        }
        if progress.all_packets {
            self.stats.record(frame_id, Milestone::RxDone);
            debug!(
                "Frame {} + {:.2} ms: received all packets",
                frame_id,
                self.stats.ms_since_first(frame_id)
            );
        }

        let slot = self.slot(frame_id);
        self.fft_backlog[slot].push_back(tag);
        Ok(())
    }

    /// Schedule the frame's downlink now or defer it behind earlier frames
    fn request_downlink(&mut self, frame_id: FrameId) -> Result<(), SchedulerError> {
        if self.config.frame_schedule.num_dl_syms() == 0 {
            return Ok(());
        }
        if !self.deferral.is_empty()
            || !is_admissible(frame_id, self.cur_proc_frame_id, self.config.deferral_window)
        {
            debug!(
                "Deferring downlink of frame {} (oldest in flight {}, {} waiting)",
                frame_id,
                self.cur_proc_frame_id,
                self.deferral.len()
            );
            self.deferral.push(frame_id);
            return Ok(());
        }
        self.schedule_downlink_processing(frame_id)
    }

    pub(super) fn handle_ran_update(&mut self, event: &EventData) {
        let (antennas, mod_order_bits, frame_id) = (event.raw(0), event.raw(1), event.raw(2));
        let bits = match u8::try_from(mod_order_bits) {
            Ok(bits) if is_supported_mod_order(bits) => bits,
            _ => {
                warn!(
                    "Ignoring RAN update at frame {}: unsupported modulation order {} bits",
                    frame_id, mod_order_bits
                );
                self.rejected_ran_updates += 1;
                return;
            }
        };
        info!(
            "RAN update at frame {}: {} antennas, {} bits per symbol",
            frame_id, antennas, bits
        );
        self.shared.set_mod_order_bits(bits);
    }

    pub(super) fn handle_fft(&mut self, tag: Tag) -> Result<(), SchedulerError> {
        let (frame_id, symbol_id, _) = tag.decode();
        match self.config.frame_schedule.symbol_type(symbol_id) {
            SymbolType::Pilot => {
                if self.pilot_fft_counters.complete_task(frame_id, symbol_id) {
                    trace!("Frame {}: FFT-ed pilot symbol {}", frame_id, symbol_id);
                    if !self.config.frame_schedule.is_rec_cal_enabled()
                        || self.rc_last_frame == Some(frame_id)
                    {
                        self.complete_pilot_symbol(frame_id, symbol_id)?;
                    } else {
                        let slot = self.slot(frame_id);
                        self.pilot_parked[slot].push(symbol_id);
                    }
                }
            }
            SymbolType::Uplink => {
                if self.uplink_fft_counters.complete_task(frame_id, symbol_id) {
                    let ul_idx = self
                        .config
                        .frame_schedule
                        .ul_symbol_idx(symbol_id)
                        .ok_or_else(|| self.unexpected_symbol(EventType::Fft, tag))?;
                    let slot = self.slot(frame_id);
                    self.uplink_fft_ready[slot][ul_idx] = true;
                    if self.zf_last_frame == Some(frame_id) {
                        self.schedule_subcarriers(EventType::Demul, frame_id, symbol_id)?;
                    }
                    if self.uplink_fft_counters.complete_symbol(frame_id) {
                        self.uplink_fft_counters.reset(frame_id);
                    }
                }
            }
            SymbolType::CalDl | SymbolType::CalUl => {
                if self.rc_counters.complete_task(frame_id, 0) {
                    self.rc_counters.reset(frame_id);
                    self.rc_last_frame = Some(frame_id);
                    self.stats.record(frame_id, Milestone::RcDone);
                    debug!(
                        "Frame {} + {:.2} ms: reciprocity calibration done",
                        frame_id,
                        self.stats.ms_since_first(frame_id)
                    );

                    let slot = self.slot(frame_id);
                    let mut parked = std::mem::take(&mut self.pilot_parked[slot]);
                    for &pilot in &parked {
                        self.complete_pilot_symbol(frame_id, pilot)?;
                    }
                    parked.clear();
                    self.pilot_parked[slot] = parked;
                }
            }
            _ => return Err(self.unexpected_symbol(EventType::Fft, tag)),
        }
        Ok(())
    }

    fn complete_pilot_symbol(
        &mut self,
        frame_id: FrameId,
        symbol_id: SymbolId,
    ) -> Result<(), SchedulerError> {
        if !self.pilot_fft_counters.complete_symbol(frame_id) {
            return Ok(());
        }
        self.pilot_fft_counters.reset(frame_id);
        self.stats.record(frame_id, Milestone::FftPilotsDone);
        debug!(
            "Frame {} + {:.2} ms: FFT-ed all pilots",
            frame_id,
            self.stats.ms_since_first(frame_id)
        );
        if self.config.enable_mac {
            self.send_snr_report(frame_id, symbol_id);
        }
        self.schedule_subcarriers(EventType::Zf, frame_id, 0)
    }

    pub(super) fn handle_zf(&mut self, tag: Tag) -> Result<(), SchedulerError> {
        let frame_id = tag.frame_id();
        if !self.zf_counters.complete_task(frame_id, 0) {
            return Ok(());
        }
        self.zf_counters.reset(frame_id);
        self.zf_last_frame = Some(frame_id);
        self.stats.record(frame_id, Milestone::ZfDone);
        debug!(
            "Frame {} + {:.2} ms: ZF done",
            frame_id,
            self.stats.ms_since_first(frame_id)
        );

        let config = self.config.clone();
        let slot = self.slot(frame_id);
        for (ul_idx, &symbol_id) in config.frame_schedule.ul_symbols().iter().enumerate() {
            if self.uplink_fft_ready[slot][ul_idx] {
                self.schedule_subcarriers(EventType::Demul, frame_id, symbol_id)?;
            }
        }
        for (dl_idx, &symbol_id) in config.frame_schedule.dl_symbols().iter().enumerate() {
            if self.encode_ready[slot][dl_idx] {
                self.schedule_subcarriers(EventType::Precode, frame_id, symbol_id)?;
            }
        }
        Ok(())
    }

    pub(super) fn handle_demul(&mut self, tag: Tag) -> Result<(), SchedulerError> {
        let (frame_id, symbol_id, _) = tag.decode();
        if !self.demul_counters.complete_task(frame_id, symbol_id) {
            return Ok(());
        }
        trace!("Frame {}: demodulated symbol {}", frame_id, symbol_id);
        self.schedule_codeblocks(EventType::Decode, frame_id, symbol_id)?;

        if self.demul_counters.complete_symbol(frame_id) {
            self.demul_counters.reset(frame_id);
            self.stats.record(frame_id, Milestone::DemulDone);
            debug!(
                "Frame {} + {:.2} ms: demodulation done",
                frame_id,
                self.stats.ms_since_first(frame_id)
            );
            self.check_increment_schedule_frame(frame_id, ScheduleProcessingFlags::UPLINK_COMPLETE)?;
        }
        Ok(())
    }

    pub(super) fn handle_decode(&mut self, tag: Tag) -> Result<Progress, SchedulerError> {
        let (frame_id, symbol_id, _) = tag.decode();
        if !self.decode_counters.complete_task(frame_id, symbol_id) {
            return Ok(Progress::Continue);
        }
        if self.config.enable_mac {
            self.schedule_users(frame_id, symbol_id)?;
        }
        if !self.decode_counters.complete_symbol(frame_id) {
            return Ok(Progress::Continue);
        }

        self.stats.record(frame_id, Milestone::DecodeDone);
        debug!(
            "Frame {} + {:.2} ms: decoding done",
            frame_id,
            self.stats.ms_since_first(frame_id)
        );
        if self.config.enable_mac {
            Ok(Progress::Continue)
        } else {
            self.try_retire_frames()
        }
    }

    pub(super) fn handle_packet_to_mac(&mut self, tag: Tag) -> Result<Progress, SchedulerError> {
        let (frame_id, symbol_id, _) = tag.decode();
        if !self.tomac_counters.complete_task(frame_id, symbol_id) {
            return Ok(Progress::Continue);
        }
        trace!("Frame {}: delivered symbol {} to MAC", frame_id, symbol_id);
        if !self.tomac_counters.complete_symbol(frame_id) {
            return Ok(Progress::Continue);
        }
        debug!("Frame {}: delivered all uplink data to MAC", frame_id);
        self.try_retire_frames()
    }

    pub(super) fn handle_packet_from_mac(&mut self, tag: Tag) -> Result<(), SchedulerError> {
        if !self.admit_frame(tag, "MAC data")? {
            return Ok(());
        }
        let frame_id = tag.frame_id();
        if self.mac_to_phy_counters.complete_task(frame_id, 0) {
            self.mac_to_phy_counters.reset(frame_id);
            debug!("Frame {}: received downlink data from MAC", frame_id);
            self.request_downlink(frame_id)?;
        }
        Ok(())
    }

    pub(super) fn handle_encode(&mut self, tag: Tag) -> Result<(), SchedulerError> {
        let (frame_id, symbol_id, _) = tag.decode();
        if !self.encode_counters.complete_task(frame_id, symbol_id) {
            return Ok(());
        }
        let dl_idx = self
            .config
            .frame_schedule
            .dl_symbol_idx(symbol_id)
            .ok_or_else(|| self.unexpected_symbol(EventType::Encode, tag))?;
        let slot = self.slot(frame_id);
        self.encode_ready[slot][dl_idx] = true;
        if self.zf_last_frame == Some(frame_id) {
            self.schedule_subcarriers(EventType::Precode, frame_id, symbol_id)?;
        }

        if self.encode_counters.complete_symbol(frame_id) {
            self.encode_counters.reset(frame_id);
            self.stats.record(frame_id, Milestone::EncodeDone);
            debug!(
                "Frame {} + {:.2} ms: encoding done",
                frame_id,
                self.stats.ms_since_first(frame_id)
            );
        }
        Ok(())
    }

    pub(super) fn handle_precode(&mut self, tag: Tag) -> Result<(), SchedulerError> {
        let (frame_id, symbol_id, _) = tag.decode();
        if !self.precode_counters.complete_task(frame_id, symbol_id) {
            return Ok(());
        }
        self.schedule_antennas(EventType::Ifft, frame_id, symbol_id)?;

        if self.precode_counters.complete_symbol(frame_id) {
            self.precode_counters.reset(frame_id);
            self.stats.record(frame_id, Milestone::PrecodeDone);
            debug!(
                "Frame {} + {:.2} ms: precoding done",
                frame_id,
                self.stats.ms_since_first(frame_id)
            );
        }
        Ok(())
    }

    pub(super) fn handle_ifft(&mut self, tag: Tag) -> Result<Progress, SchedulerError> {
        let (frame_id, symbol_id, _) = tag.decode();
        if !self.ifft_counters.complete_task(frame_id, symbol_id) {
            return Ok(Progress::Continue);
        }
        let dl_idx = self
            .config
            .frame_schedule
            .dl_symbol_idx(symbol_id)
            .ok_or_else(|| self.unexpected_symbol(EventType::Ifft, tag))?;

        // transmit strictly in symbol order
        let config = self.config.clone();
        let dl_symbols = config.frame_schedule.dl_symbols();
        let slot = self.slot(frame_id);
        self.ifft_ready[slot][dl_idx] = true;
        while self.ifft_next[slot] < dl_symbols.len() && self.ifft_ready[slot][self.ifft_next[slot]] {
            self.schedule_antennas_tx(frame_id, dl_symbols[self.ifft_next[slot]])?;
            self.ifft_next[slot] += 1;
        }

        if !self.ifft_counters.complete_symbol(frame_id) {
            return Ok(Progress::Continue);
        }
        self.stats.record(frame_id, Milestone::IfftDone);
        debug!(
            "Frame {} + {:.2} ms: IFFT done",
            frame_id,
            self.stats.ms_since_first(frame_id)
        );
        self.check_increment_schedule_frame(frame_id, ScheduleProcessingFlags::DOWNLINK_COMPLETE)?;
        self.try_retire_frames()
    }

    pub(super) fn handle_packet_tx(&mut self, tag: Tag) -> Result<Progress, SchedulerError> {
        let (frame_id, symbol_id, _) = tag.decode();
        if !self.tx_counters.complete_task(frame_id, symbol_id) {
            return Ok(Progress::Continue);
        }
        if self.config.frame_schedule.dl_symbol_idx(symbol_id) == Some(0) {
            self.stats.record(frame_id, Milestone::TxFirst);
        }
        if !self.tx_counters.complete_symbol(frame_id) {
            return Ok(Progress::Continue);
        }
        self.stats.record(frame_id, Milestone::TxDone);
        debug!(
            "Frame {} + {:.2} ms: transmitted all symbols",
            frame_id,
            self.stats.ms_since_first(frame_id)
        );
        self.try_retire_frames()
    }
}
