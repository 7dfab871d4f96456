//! Pipeline Configuration
//!
//! Read-only parameters shared by the scheduler, the workers and the
//! simulated collaborators. Loaded once, validated once.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::MAX_EVENT_TAGS;
use crate::frame::FrameSchedule;
use crate::tag::MAX_DIM_ID;
use crate::types::{EventType, DEFAULT_FRAME_WINDOW, SCHEDULE_QUEUES};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Frame schedule is empty")]
    EmptySchedule,

    #[error("Invalid symbol '{symbol}' at position {position} of the frame schedule")]
    InvalidSymbol { symbol: char, position: usize },

    #[error("{name} must be non-zero")]
    ZeroParameter { name: &'static str },

    #[error("{name} = {value} exceeds the event batch capacity {max}")]
    BatchTooLarge { name: &'static str, value: usize, max: usize },

    #[error("{name} = {value} does not fit the tag field (max {max})")]
    OutOfTagRange { name: &'static str, value: usize, max: usize },

    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    #[error("Frame schedule has neither uplink nor downlink data symbols")]
    NoDataSymbols,

    #[error("Frame schedule carries data symbols but no pilot symbols")]
    MissingPilots,

    #[error("client_dl_pilot_symbols = {pilots} exceeds the {dl} downlink symbols")]
    TooManyDownlinkPilots { pilots: usize, dl: usize },

    #[error("Invalid worker stage assignment: {0}")]
    InvalidWorkerStages(String),
}

fn default_frame_window() -> usize {
    DEFAULT_FRAME_WINDOW
}

fn default_deferral_window() -> usize {
    SCHEDULE_QUEUES
}

fn default_bs_ant_num() -> usize {
    8
}

fn default_ue_ant_num() -> usize {
    4
}

fn default_ofdm_data_num() -> usize {
    304
}

fn default_fft_size() -> usize {
    512
}

fn default_fft_block_size() -> usize {
    2
}

fn default_zf_block_size() -> usize {
    16
}

fn default_zf_batch_size() -> usize {
    4
}

fn default_demul_block_size() -> usize {
    48
}

fn default_encode_block_size() -> usize {
    4
}

fn default_ldpc_blocks_per_symbol() -> usize {
    1
}

fn default_code_block_bytes() -> usize {
    128
}

fn default_socket_thread_num() -> usize {
    1
}

fn default_worker_thread_num() -> usize {
    4
}

fn default_frames_to_test() -> usize {
    1000
}

fn default_dequeue_bulk_size() -> usize {
    8
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of in-flight frame slots (W)
    #[serde(default = "default_frame_window")]
    pub frame_window: usize,

    /// Width of the downlink admission window starting at the oldest frame
    #[serde(default = "default_deferral_window")]
    pub deferral_window: usize,

    /// Symbol classes of one frame
    #[serde(default)]
    pub frame_schedule: FrameSchedule,

    /// Leading downlink symbols that carry pilots and skip encoding
    #[serde(default)]
    pub client_dl_pilot_symbols: usize,

    /// Base-station antennas
    #[serde(default = "default_bs_ant_num")]
    pub bs_ant_num: usize,

    /// UE antennas (spatial streams)
    #[serde(default = "default_ue_ant_num")]
    pub ue_ant_num: usize,

    /// Data subcarriers per symbol
    #[serde(default = "default_ofdm_data_num")]
    pub ofdm_data_num: usize,

    /// OFDM FFT size
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,

    /// Antennas per FFT / IFFT event
    #[serde(default = "default_fft_block_size")]
    pub fft_block_size: usize,

    /// Subcarriers per ZF task
    #[serde(default = "default_zf_block_size")]
    pub zf_block_size: usize,

    /// ZF tasks per ZF event
    #[serde(default = "default_zf_batch_size")]
    pub zf_batch_size: usize,

    /// Subcarriers per demodulation / precoding task
    #[serde(default = "default_demul_block_size")]
    pub demul_block_size: usize,

    /// Code blocks per encode / decode event
    #[serde(default = "default_encode_block_size")]
    pub encode_block_size: usize,

    /// LDPC code blocks per UE per symbol
    #[serde(default = "default_ldpc_blocks_per_symbol")]
    pub ldpc_blocks_per_symbol: usize,

    /// Payload bytes per code block
    #[serde(default = "default_code_block_bytes")]
    pub code_block_bytes: usize,

    /// Transport threads
    #[serde(default = "default_socket_thread_num")]
    pub socket_thread_num: usize,

    /// Compute worker threads
    #[serde(default = "default_worker_thread_num")]
    pub worker_thread_num: usize,

    /// Optional per-worker stage lists, one entry per worker
    #[serde(default)]
    pub worker_stages: Option<Vec<Vec<EventType>>>,

    /// First core used for pinning
    #[serde(default)]
    pub core_offset: usize,

    /// Pin worker threads to dedicated cores
    #[serde(default)]
    pub pin_threads: bool,

    /// Frames to process before stopping
    #[serde(default = "default_frames_to_test")]
    pub frames_to_test: usize,

    /// Route decoded data to the MAC and take downlink data from it
    #[serde(default)]
    pub enable_mac: bool,

    /// Message queue capacity override
    #[serde(default)]
    pub message_queue_size: Option<usize>,

    /// Stage queue capacity override
    #[serde(default)]
    pub worker_queue_size: Option<usize>,

    /// Events drained per pass from each scheduler source
    #[serde(default = "default_dequeue_bulk_size")]
    pub dequeue_bulk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_window: default_frame_window(),
            deferral_window: default_deferral_window(),
            frame_schedule: FrameSchedule::default(),
            client_dl_pilot_symbols: 0,
            bs_ant_num: default_bs_ant_num(),
            ue_ant_num: default_ue_ant_num(),
            ofdm_data_num: default_ofdm_data_num(),
            fft_size: default_fft_size(),
            fft_block_size: default_fft_block_size(),
            zf_block_size: default_zf_block_size(),
            zf_batch_size: default_zf_batch_size(),
            demul_block_size: default_demul_block_size(),
            encode_block_size: default_encode_block_size(),
            ldpc_blocks_per_symbol: default_ldpc_blocks_per_symbol(),
            code_block_bytes: default_code_block_bytes(),
            socket_thread_num: default_socket_thread_num(),
            worker_thread_num: default_worker_thread_num(),
            worker_stages: None,
            core_offset: 0,
            pin_threads: false,
            frames_to_test: default_frames_to_test(),
            enable_mac: false,
            message_queue_size: None,
            worker_queue_size: None,
            dequeue_bulk_size: default_dequeue_bulk_size(),
        }
    }
}

impl PipelineConfig {
    /// Check every precondition the scheduler relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("frame_window", self.frame_window),
            ("deferral_window", self.deferral_window),
            ("bs_ant_num", self.bs_ant_num),
            ("ue_ant_num", self.ue_ant_num),
            ("ofdm_data_num", self.ofdm_data_num),
            ("fft_size", self.fft_size),
            ("fft_block_size", self.fft_block_size),
            ("zf_block_size", self.zf_block_size),
            ("zf_batch_size", self.zf_batch_size),
            ("demul_block_size", self.demul_block_size),
            ("encode_block_size", self.encode_block_size),
            ("ldpc_blocks_per_symbol", self.ldpc_blocks_per_symbol),
            ("code_block_bytes", self.code_block_bytes),
            ("socket_thread_num", self.socket_thread_num),
            ("worker_thread_num", self.worker_thread_num),
            ("frames_to_test", self.frames_to_test),
            ("dequeue_bulk_size", self.dequeue_bulk_size),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::ZeroParameter { name });
            }
        }

        for (name, value) in [
            ("fft_block_size", self.fft_block_size),
            ("zf_batch_size", self.zf_batch_size),
            ("encode_block_size", self.encode_block_size),
        ] {
            if value > MAX_EVENT_TAGS {
                return Err(ConfigError::BatchTooLarge { name, value, max: MAX_EVENT_TAGS });
            }
        }

        for (name, value) in [
            ("bs_ant_num", self.bs_ant_num),
            ("ue_ant_num", self.ue_ant_num),
            ("ofdm_data_num", self.ofdm_data_num),
            ("code blocks per symbol", self.codeblocks_per_symbol()),
        ] {
            if value > MAX_DIM_ID + 1 {
                return Err(ConfigError::OutOfTagRange { name, value, max: MAX_DIM_ID + 1 });
            }
        }
        if self.frames_to_test > u32::MAX as usize {
            return Err(ConfigError::OutOfTagRange {
                name: "frames_to_test",
                value: self.frames_to_test,
                max: u32::MAX as usize,
            });
        }
        if self.ofdm_data_num > self.fft_size {
            return Err(ConfigError::InvalidDimension(format!(
                "ofdm_data_num {} exceeds fft_size {}",
                self.ofdm_data_num, self.fft_size
            )));
        }

        if self.frame_window < SCHEDULE_QUEUES {
            return Err(ConfigError::InvalidWindow(format!(
                "frame_window {} is smaller than the {} queue generations",
                self.frame_window, SCHEDULE_QUEUES
            )));
        }
        if self.deferral_window > self.frame_window {
            return Err(ConfigError::InvalidWindow(format!(
                "deferral_window {} exceeds frame_window {}",
                self.deferral_window, self.frame_window
            )));
        }

        let frame = &self.frame_schedule;
        if frame.num_ul_syms() == 0 && frame.num_dl_syms() == 0 {
            return Err(ConfigError::NoDataSymbols);
        }
        if frame.num_pilot_syms() == 0 {
            return Err(ConfigError::MissingPilots);
        }
        if self.client_dl_pilot_symbols > frame.num_dl_syms() {
            return Err(ConfigError::TooManyDownlinkPilots {
                pilots: self.client_dl_pilot_symbols,
                dl: frame.num_dl_syms(),
            });
        }

        self.validate_worker_stages()
    }

    fn validate_worker_stages(&self) -> Result<(), ConfigError> {
        let Some(stages) = &self.worker_stages else {
            return Ok(());
        };
        if stages.len() != self.worker_thread_num {
            return Err(ConfigError::InvalidWorkerStages(format!(
                "{} stage lists for {} workers",
                stages.len(),
                self.worker_thread_num
            )));
        }
        for list in stages {
            if let Some(bad) = list.iter().find(|s| !s.is_compute_stage()) {
                return Err(ConfigError::InvalidWorkerStages(format!(
                    "{} is not a compute stage",
                    bad.name()
                )));
            }
        }
        for required in self.required_stages() {
            if !stages.iter().any(|list| list.contains(&required)) {
                return Err(ConfigError::InvalidWorkerStages(format!(
                    "no worker serves the {} stage",
                    required.name()
                )));
            }
        }
        Ok(())
    }

    /// Stages the frame schedule needs
    pub fn required_stages(&self) -> Vec<EventType> {
        let mut stages = vec![EventType::Zf, EventType::Fft];
        if self.frame_schedule.num_ul_syms() > 0 {
            stages.extend([EventType::Decode, EventType::Demul]);
        }
        if self.frame_schedule.num_dl_syms() > 0 {
            stages.extend([EventType::Ifft, EventType::Precode, EventType::Encode]);
        }
        stages
    }

    /// Stages served by worker `tid`
    pub fn worker_stages_for(&self, tid: usize) -> Vec<EventType> {
        match &self.worker_stages {
            Some(stages) => stages.get(tid).cloned().unwrap_or_default(),
            None => self.required_stages(),
        }
    }

    /// ZF tasks per frame
    pub fn zf_events_per_symbol(&self) -> usize {
        self.ofdm_data_num.div_ceil(self.zf_block_size)
    }

    /// Demodulation (and precoding) tasks per symbol
    pub fn demul_events_per_symbol(&self) -> usize {
        self.ofdm_data_num.div_ceil(self.demul_block_size)
    }

    /// Encode / decode tasks per symbol
    pub fn codeblocks_per_symbol(&self) -> usize {
        self.ue_ant_num * self.ldpc_blocks_per_symbol
    }

    /// Downlink symbols that carry encoded data
    pub fn num_dl_data_syms(&self) -> usize {
        self.frame_schedule.num_dl_syms() - self.client_dl_pilot_symbols
    }

    /// Whether a downlink symbol is a client pilot
    pub fn is_dl_pilot(&self, dl_symbol_idx: usize) -> bool {
        dl_symbol_idx < self.client_dl_pilot_symbols
    }

    /// Uplink plus downlink data symbols
    pub fn num_data_syms(&self) -> usize {
        self.frame_schedule.num_ul_syms() + self.frame_schedule.num_dl_syms()
    }

    /// Packets the transport delivers per frame
    pub fn rx_packets_per_frame(&self) -> usize {
        self.bs_ant_num * self.frame_schedule.num_rx_syms()
    }

    pub fn pilot_packets_per_frame(&self) -> usize {
        self.bs_ant_num * self.frame_schedule.num_pilot_syms()
    }

    pub fn cal_packets_per_frame(&self) -> usize {
        self.bs_ant_num * self.frame_schedule.num_cal_syms()
    }

    pub fn message_queue_capacity(&self) -> usize {
        self.message_queue_size
            .unwrap_or(512 * self.num_data_syms().max(1))
    }

    pub fn worker_queue_capacity(&self) -> usize {
        self.worker_queue_size
            .unwrap_or(256 * self.num_data_syms().max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_window, 40);
        assert_eq!(config.deferral_window, 2);
        assert_eq!(config.zf_events_per_symbol(), 19);
        assert_eq!(config.demul_events_per_symbol(), 7);
        assert_eq!(config.rx_packets_per_frame(), 8 * 6);
        assert_eq!(config.message_queue_capacity(), 512 * 8);
    }

    #[test]
    fn test_reject_oversized_batch() {
        let config = PipelineConfig {
            fft_block_size: MAX_EVENT_TAGS + 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BatchTooLarge { name: "fft_block_size", .. })
        ));
    }

    #[test]
    fn test_reject_small_window() {
        let config = PipelineConfig {
            frame_window: 1,
            deferral_window: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWindow(_))));
    }

    #[test]
    fn test_reject_schedules_without_work() {
        let config = PipelineConfig {
            frame_schedule: FrameSchedule::parse("PPGG").unwrap(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoDataSymbols)));

        let config = PipelineConfig {
            frame_schedule: FrameSchedule::parse("GDDD").unwrap(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingPilots)));
    }

    #[test]
    fn test_reject_out_of_range_dims() {
        let config = PipelineConfig {
            bs_ant_num: MAX_DIM_ID + 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::OutOfTagRange { .. })));

        let config = PipelineConfig {
            ue_ant_num: MAX_DIM_ID + 2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfTagRange { name: "ue_ant_num", .. })
        ));
    }

    #[test]
    fn test_reject_data_wider_than_fft() {
        let config = PipelineConfig {
            ofdm_data_num: 128,
            fft_size: 64,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDimension(_))));
    }

    #[test]
    fn test_worker_stage_assignment() {
        let mut config = PipelineConfig {
            worker_thread_num: 2,
            ..Default::default()
        };
        assert_eq!(
            config.worker_stages_for(1),
            vec![
                EventType::Zf,
                EventType::Fft,
                EventType::Decode,
                EventType::Demul,
                EventType::Ifft,
                EventType::Precode,
                EventType::Encode,
            ]
        );

        config.worker_stages = Some(vec![
            vec![EventType::Fft, EventType::Zf, EventType::Demul, EventType::Decode],
            vec![EventType::Encode, EventType::Precode],
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWorkerStages(msg)) if msg.contains("ifft")
        ));

        config.worker_stages = Some(vec![
            vec![EventType::Fft, EventType::Zf, EventType::Demul, EventType::Decode],
            vec![EventType::Encode, EventType::Precode, EventType::PacketTx],
        ]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"frame_schedule": "PUUD", "bs_ant_num": 4}"#).unwrap();
        assert_eq!(config.bs_ant_num, 4);
        assert_eq!(config.frame_schedule.num_ul_syms(), 2);
        assert_eq!(config.frame_window, DEFAULT_FRAME_WINDOW);
        assert!(config.validate().is_ok());
    }
}
