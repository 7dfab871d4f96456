//! MAC Stub
//!
//! Minimal MAC peer for the scheduler: acknowledges decoded-data deliveries,
//! records SNR reports and hands over downlink data for every UE of every
//! frame inside the scheduler's window.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use common::{DimId, EventData, EventType, FrameId, PipelineConfig, SharedState, Tag};
use tracing::{debug, info, trace, warn};

use crate::fabric::QueueFabric;
use crate::queue::{ProducerToken, QueueError};
use crate::InterfaceError;

/// Requests handled per poll
const MAC_BULK_SIZE: usize = 16;

/// MAC statistics
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MacStats {
    /// Decoded-data deliveries acknowledged
    pub packets_to_mac: u64,
    /// Frames whose downlink data was handed over
    pub frames_from_mac: u64,
    /// SNR reports received
    pub snr_reports: u64,
    /// Mean reported SNR in dB
    pub mean_snr_db: f32,
}

/// Running MAC stub thread
pub struct MacStub {
    handle: JoinHandle<MacStats>,
}

impl MacStub {
    /// Spawn the MAC thread
    pub fn start(
        config: Arc<PipelineConfig>,
        fabric: Arc<QueueFabric>,
        shared: Arc<SharedState>,
    ) -> Result<Self, InterfaceError> {
        info!("Starting MAC stub for {} UEs", config.ue_ant_num);
        let handle = thread::Builder::new()
            .name("mac".to_string())
            .spawn(move || MacLoop::new(config, fabric, shared).run())?;
        Ok(Self { handle })
    }

    /// Wait for the MAC thread. Call after clearing the running flag.
    pub fn join(self) -> MacStats {
        self.handle.join().unwrap_or_else(|_| {
            warn!("MAC thread panicked");
            MacStats::default()
        })
    }
}

struct MacLoop {
    config: Arc<PipelineConfig>,
    fabric: Arc<QueueFabric>,
    shared: Arc<SharedState>,
    token: ProducerToken,
    requests: Vec<EventData>,
    next_frame: FrameId,
    snr_sum: f64,
    stats: MacStats,
}

impl MacLoop {
    fn new(config: Arc<PipelineConfig>, fabric: Arc<QueueFabric>, shared: Arc<SharedState>) -> Self {
        Self {
            config,
            fabric,
            shared,
            token: ProducerToken::new(usize::MAX),
            requests: Vec::with_capacity(MAC_BULK_SIZE),
            next_frame: 0,
            snr_sum: 0.0,
            stats: MacStats::default(),
        }
    }

    fn run(mut self) -> MacStats {
        while self.shared.is_running() {
            let handled = match self.serve_requests() {
                Ok(n) => n,
                Err(e) => {
                    debug!("MAC stopping: {}", e);
                    break;
                }
            };
            let produced = match self.produce_downlink() {
                Ok(produced) => produced,
                Err(e) => {
                    debug!("MAC stopping: {}", e);
                    break;
                }
            };
            if handled == 0 && !produced {
                thread::yield_now();
            }
        }

        if self.stats.snr_reports > 0 {
            self.stats.mean_snr_db = (self.snr_sum / self.stats.snr_reports as f64) as f32;
        }
        debug!(
            "MAC exit: {} deliveries, {} downlink frames, {} SNR reports",
            self.stats.packets_to_mac, self.stats.frames_from_mac, self.stats.snr_reports
        );
        self.stats
    }

    fn serve_requests(&mut self) -> Result<usize, QueueError> {
        self.requests.clear();
        let n = self
            .fabric
            .mac_request_queue()
            .try_dequeue_bulk(&mut self.requests, MAC_BULK_SIZE);
        for i in 0..n {
            let event = self.requests[i];
            match event.event_type {
                EventType::PacketToMac => {
                    trace!("MAC: received decoded data {:?}", event.tag(0));
                    self.fabric.mac_response_queue().enqueue_fallback(
                        &mut self.token,
                        event,
                        self.shared.running_flag(),
                    )?;
                    self.stats.packets_to_mac += 1;
                }
                EventType::SnrReport => {
                    let snr = event.snr();
                    trace!("MAC: SNR report {:?} = {:.1} dB", event.tag(0), snr);
                    self.snr_sum += f64::from(snr);
                    self.stats.snr_reports += 1;
                }
                other => warn!("MAC: ignoring unexpected request {:?}", other),
            }
        }
        Ok(n)
    }

    /// Hand over the next frame's downlink data when it is inside the window
    fn produce_downlink(&mut self) -> Result<bool, QueueError> {
        if !self.config.enable_mac || self.next_frame as usize >= self.config.frames_to_test {
            return Ok(false);
        }
        let window_edge =
            u64::from(self.shared.cur_proc_frame_id()) + self.config.frame_window as u64;
        if u64::from(self.next_frame) >= window_edge {
            return Ok(false);
        }

        for ue in 0..self.config.ue_ant_num {
            let tag = Tag::frm_sym_ue(self.next_frame, 0, ue as DimId);
            self.fabric.mac_response_queue().enqueue_fallback(
                &mut self.token,
                EventData::with_tag(EventType::PacketFromMac, tag),
                self.shared.running_flag(),
            )?;
        }
        self.next_frame += 1;
        self.stats.frames_from_mac += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_mac_acknowledges_and_produces() {
        let config = Arc::new(PipelineConfig {
            enable_mac: true,
            frames_to_test: 2,
            ue_ant_num: 2,
            ..Default::default()
        });
        let fabric = Arc::new(QueueFabric::with_capacity(64, 16));
        let shared = Arc::new(SharedState::default());
        let mut token = ProducerToken::new(0);
        let delivery = EventData::with_tag(EventType::PacketToMac, Tag::frm_sym_ue(0, 3, 1));
        assert!(fabric.mac_request_queue().try_enqueue(&mut token, delivery));
        let report = EventData::snr_report(Tag::frm_sym_ue(0, 0, 0), 20.0);
        assert!(fabric.mac_request_queue().try_enqueue(&mut token, report));

        let mac = MacStub::start(config, fabric.clone(), shared.clone()).unwrap();

        let mut from_mac = Vec::new();
        let mut acked = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while (from_mac.len() < 4 || acked.is_empty()) && Instant::now() < deadline {
            if let Some(event) = fabric.mac_response_queue().try_dequeue() {
                match event.event_type {
                    EventType::PacketFromMac => from_mac.push(event.tag(0)),
                    EventType::PacketToMac => acked.push(event.tag(0)),
                    other => panic!("unexpected {:?}", other),
                }
            }
        }
        shared.stop();
        let stats = mac.join();

        assert_eq!(acked, vec![Tag::frm_sym_ue(0, 3, 1)]);
        assert_eq!(from_mac.len(), 4);
        assert_eq!(from_mac[3], Tag::frm_sym_ue(1, 0, 1));
        assert_eq!(stats.frames_from_mac, 2);
        assert_eq!(stats.snr_reports, 1);
        assert_eq!(stats.mean_snr_db, 20.0);
    }
}
