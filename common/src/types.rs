//! Common Types for the Baseband Scheduler
//!
//! Defines the identifiers, event kinds and symbol classes shared by the
//! scheduler, the worker pool and the external collaborators.

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Frame identifier, monotonically increasing over a run
pub type FrameId = u32;

/// Symbol position within a frame
pub type SymbolId = u16;

/// Sub-symbol dimension (subcarrier, antenna, code block or UE index)
pub type DimId = u16;

/// Number of queue generations selected by frame parity
pub const SCHEDULE_QUEUES: usize = 2;

/// Default number of in-flight frame slots
pub const DEFAULT_FRAME_WINDOW: usize = 40;

/// Number of compute stages served by the worker pool
pub const NUM_COMPUTE_STAGES: usize = 7;

/// Smallest modulation order in bits per symbol (QPSK)
pub const MIN_MOD_ORDER_BITS: u8 = 2;

/// Largest modulation order in bits per symbol (256QAM)
pub const MAX_MOD_ORDER_BITS: u8 = 8;

/// Square QAM orders from QPSK to 256QAM
pub fn is_supported_mod_order(bits: u8) -> bool {
    (MIN_MOD_ORDER_BITS..=MAX_MOD_ORDER_BITS).contains(&bits) && bits % 2 == 0
}

/// Kind of work unit or signal travelling through the queue fabric.
///
/// Compute stages come first so their discriminant doubles as the stage
/// queue index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Uplink OFDM demodulation of one antenna batch
    Fft = 0,
    /// Zero-forcing precoder computation for a subcarrier block
    Zf = 1,
    /// Equalization and demodulation of a subcarrier block
    Demul = 2,
    /// FEC decode of a code block
    Decode = 3,
    /// FEC encode of a code block
    Encode = 4,
    /// Downlink precoding of a subcarrier block
    Precode = 5,
    /// Downlink OFDM modulation of one antenna batch
    Ifft = 6,
    /// A packet arrived from the transport
    PacketRx = 7,
    /// Transmit request / transmit completion
    PacketTx = 8,
    /// Decoded data delivered to the MAC
    PacketToMac = 9,
    /// Downlink data handed over by the MAC
    PacketFromMac = 10,
    /// Best-effort uplink SNR report towards the MAC
    SnrReport = 11,
    /// Runtime radio parameter update
    RanUpdate = 12,
}

impl EventType {
    /// Iterate over the compute stages in queue index order
    pub fn compute_stages() -> impl Iterator<Item = EventType> {
        (0..NUM_COMPUTE_STAGES).filter_map(EventType::from_usize)
    }

    /// Stage queue index, `None` for I/O and MAC events
    pub fn stage_index(self) -> Option<usize> {
        let idx = self as usize;
        (idx < NUM_COMPUTE_STAGES).then_some(idx)
    }

    /// Whether the worker pool executes events of this kind
    pub fn is_compute_stage(self) -> bool {
        self.stage_index().is_some()
    }

    /// Short lowercase name used in logs and statistics
    pub fn name(self) -> &'static str {
        match self {
            EventType::Fft => "fft",
            EventType::Zf => "zf",
            EventType::Demul => "demul",
            EventType::Decode => "decode",
            EventType::Encode => "encode",
            EventType::Precode => "precode",
            EventType::Ifft => "ifft",
            EventType::PacketRx => "packet_rx",
            EventType::PacketTx => "packet_tx",
            EventType::PacketToMac => "packet_to_mac",
            EventType::PacketFromMac => "packet_from_mac",
            EventType::SnrReport => "snr_report",
            EventType::RanUpdate => "ran_update",
        }
    }
}

/// Static classification of a symbol slot in the frame schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolType {
    /// Beacon, carries no scheduled work
    Beacon,
    /// Uplink pilot used for channel estimation
    Pilot,
    /// Uplink data
    Uplink,
    /// Downlink data (or downlink pilot)
    Downlink,
    /// Reciprocity calibration, downlink direction
    CalDl,
    /// Reciprocity calibration, uplink direction
    CalUl,
    /// Guard interval, carries no scheduled work
    Guard,
}

impl SymbolType {
    /// Parse one character of a frame schedule string
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'B' => Some(SymbolType::Beacon),
            'P' => Some(SymbolType::Pilot),
            'U' => Some(SymbolType::Uplink),
            'D' => Some(SymbolType::Downlink),
            'C' => Some(SymbolType::CalDl),
            'L' => Some(SymbolType::CalUl),
            'G' => Some(SymbolType::Guard),
            _ => None,
        }
    }

    /// Character used for this symbol class in a schedule string
    pub fn as_char(self) -> char {
        match self {
            SymbolType::Beacon => 'B',
            SymbolType::Pilot => 'P',
            SymbolType::Uplink => 'U',
            SymbolType::Downlink => 'D',
            SymbolType::CalDl => 'C',
            SymbolType::CalUl => 'L',
            SymbolType::Guard => 'G',
        }
    }

    /// Symbols delivered by the transport as received packets
    pub fn is_received(self) -> bool {
        matches!(
            self,
            SymbolType::Pilot | SymbolType::Uplink | SymbolType::CalDl | SymbolType::CalUl
        )
    }

    /// Reciprocity calibration symbols
    pub fn is_calibration(self) -> bool {
        matches!(self, SymbolType::CalDl | SymbolType::CalUl)
    }
}

bitflags! {
    /// Issuance state of a frame. The schedule frontier advances once both
    /// directions have issued all of their work.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScheduleProcessingFlags: u8 {
        /// Every uplink demodulation task of the frame has completed
        const UPLINK_COMPLETE = 0b01;
        /// Every downlink IFFT task of the frame has completed
        const DOWNLINK_COMPLETE = 0b10;
        /// Both directions issued
        const PROCESSING_COMPLETE = Self::UPLINK_COMPLETE.bits() | Self::DOWNLINK_COMPLETE.bits();
    }
}

impl ScheduleProcessingFlags {
    /// Flags a fresh frame starts with: the absent directions are preset
    pub fn initial(has_uplink: bool, has_downlink: bool) -> Self {
        let mut flags = Self::empty();
        if !has_uplink {
            flags |= Self::UPLINK_COMPLETE;
        }
        if !has_downlink {
            flags |= Self::DOWNLINK_COMPLETE;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_mod_orders() {
        let supported: Vec<u8> = (0..=u8::MAX).filter(|&b| is_supported_mod_order(b)).collect();
        assert_eq!(supported, vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_compute_stage_indices() {
        let stages: Vec<_> = EventType::compute_stages().collect();
        assert_eq!(stages.len(), NUM_COMPUTE_STAGES);
        for (i, stage) in stages.iter().enumerate() {
            assert_eq!(stage.stage_index(), Some(i));
        }
        assert_eq!(EventType::PacketRx.stage_index(), None);
        assert!(!EventType::RanUpdate.is_compute_stage());
    }

    #[test]
    fn test_symbol_type_chars() {
        for c in "BPUDCLG".chars() {
            let ty = SymbolType::from_char(c).unwrap();
            assert_eq!(ty.as_char(), c);
        }
        assert!(SymbolType::from_char('X').is_none());
        assert!(SymbolType::CalUl.is_received());
        assert!(!SymbolType::Downlink.is_received());
    }

    #[test]
    fn test_initial_flags() {
        assert_eq!(ScheduleProcessingFlags::initial(true, true), ScheduleProcessingFlags::empty());
        assert_eq!(
            ScheduleProcessingFlags::initial(false, true),
            ScheduleProcessingFlags::UPLINK_COMPLETE
        );
        assert_eq!(
            ScheduleProcessingFlags::initial(false, false),
            ScheduleProcessingFlags::PROCESSING_COMPLETE
        );
    }

    #[test]
    fn test_event_type_serde_name() {
        let json = serde_json::to_string(&EventType::PacketFromMac).unwrap();
        assert_eq!(json, "\"packet_from_mac\"");
    }
}
