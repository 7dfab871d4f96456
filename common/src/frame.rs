//! Frame Schedule
//!
//! Static classification of every symbol of a frame, parsed from a schedule
//! string such as `"PPUUUUDDDD"`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::types::{SymbolId, SymbolType};

/// Parsed frame schedule with per-class symbol lists and index maps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameSchedule {
    /// Class of every symbol, in frame order
    symbols: Vec<SymbolType>,
    /// Pilot symbol ids
    pilot_symbols: Vec<SymbolId>,
    /// Uplink data symbol ids
    ul_symbols: Vec<SymbolId>,
    /// Downlink symbol ids (pilots first)
    dl_symbols: Vec<SymbolId>,
    /// Calibration symbol ids, both directions
    cal_symbols: Vec<SymbolId>,
    /// Symbol id -> index in `ul_symbols`
    ul_index: Vec<Option<usize>>,
    /// Symbol id -> index in `dl_symbols`
    dl_index: Vec<Option<usize>>,
    /// Symbol id -> index in `pilot_symbols`
    pilot_index: Vec<Option<usize>>,
}

impl FrameSchedule {
    /// Parse a schedule string
    pub fn parse(schedule: &str) -> Result<Self, ConfigError> {
        if schedule.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }

        let mut symbols = Vec::with_capacity(schedule.len());
        for (position, c) in schedule.chars().enumerate() {
            let ty = SymbolType::from_char(c)
                .ok_or(ConfigError::InvalidSymbol { symbol: c, position })?;
            symbols.push(ty);
        }
        if symbols.len() > crate::tag::MAX_SYMBOL_ID + 1 {
            return Err(ConfigError::OutOfTagRange {
                name: "symbols per frame",
                value: symbols.len(),
                max: crate::tag::MAX_SYMBOL_ID + 1,
            });
        }

        let collect = |ty: SymbolType| -> Vec<SymbolId> {
            symbols
                .iter()
                .enumerate()
                .filter(|(_, &s)| s == ty)
                .map(|(i, _)| i as SymbolId)
                .collect()
        };
        let pilot_symbols = collect(SymbolType::Pilot);
        let ul_symbols = collect(SymbolType::Uplink);
        let dl_symbols = collect(SymbolType::Downlink);
        let cal_symbols: Vec<SymbolId> = symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_calibration())
            .map(|(i, _)| i as SymbolId)
            .collect();

        let index_of = |list: &[SymbolId]| -> Vec<Option<usize>> {
            let mut index = vec![None; symbols.len()];
            for (i, &sym) in list.iter().enumerate() {
                index[sym as usize] = Some(i);
            }
            index
        };
        let ul_index = index_of(&ul_symbols);
        let dl_index = index_of(&dl_symbols);
        let pilot_index = index_of(&pilot_symbols);

        Ok(Self {
            symbols,
            pilot_symbols,
            ul_symbols,
            dl_symbols,
            cal_symbols,
            ul_index,
            dl_index,
            pilot_index,
        })
    }

    pub fn num_total_syms(&self) -> usize {
        self.symbols.len()
    }

    pub fn num_pilot_syms(&self) -> usize {
        self.pilot_symbols.len()
    }

    pub fn num_ul_syms(&self) -> usize {
        self.ul_symbols.len()
    }

    pub fn num_dl_syms(&self) -> usize {
        self.dl_symbols.len()
    }

    pub fn num_cal_syms(&self) -> usize {
        self.cal_symbols.len()
    }

    /// Symbols delivered by the transport (pilot, uplink, calibration)
    pub fn num_rx_syms(&self) -> usize {
        self.num_pilot_syms() + self.num_ul_syms() + self.num_cal_syms()
    }

    /// Whether reciprocity calibration gates the pilots
    pub fn is_rec_cal_enabled(&self) -> bool {
        !self.cal_symbols.is_empty()
    }

    /// Class of a symbol; ids past the end of the frame read as guard
    pub fn symbol_type(&self, symbol_id: SymbolId) -> SymbolType {
        self.symbols
            .get(symbol_id as usize)
            .copied()
            .unwrap_or(SymbolType::Guard)
    }

    pub fn pilot_symbols(&self) -> &[SymbolId] {
        &self.pilot_symbols
    }

    pub fn ul_symbols(&self) -> &[SymbolId] {
        &self.ul_symbols
    }

    pub fn dl_symbols(&self) -> &[SymbolId] {
        &self.dl_symbols
    }

    pub fn cal_symbols(&self) -> &[SymbolId] {
        &self.cal_symbols
    }

    /// Received symbols in frame order
    pub fn rx_symbols(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_received())
            .map(|(i, _)| i as SymbolId)
    }

    /// Index of an uplink symbol among the uplink symbols
    pub fn ul_symbol_idx(&self, symbol_id: SymbolId) -> Option<usize> {
        self.ul_index.get(symbol_id as usize).copied().flatten()
    }

    /// Index of a downlink symbol among the downlink symbols
    pub fn dl_symbol_idx(&self, symbol_id: SymbolId) -> Option<usize> {
        self.dl_index.get(symbol_id as usize).copied().flatten()
    }

    /// Index of a pilot symbol among the pilot symbols
    pub fn pilot_symbol_idx(&self, symbol_id: SymbolId) -> Option<usize> {
        self.pilot_index.get(symbol_id as usize).copied().flatten()
    }
}

impl Default for FrameSchedule {
    fn default() -> Self {
        // Fixed literal, always valid
        Self::parse("PPUUUUDDDD").unwrap_or_else(|_| unreachable!())
    }
}

impl TryFrom<String> for FrameSchedule {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FrameSchedule> for String {
    fn from(schedule: FrameSchedule) -> String {
        schedule.to_string()
    }
}

impl fmt::Display for FrameSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.symbols {
            write!(f, "{}", s.as_char())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_schedule() {
        let frame = FrameSchedule::parse("BPPUUGDDCL").unwrap();
        assert_eq!(frame.num_total_syms(), 10);
        assert_eq!(frame.pilot_symbols(), &[1, 2]);
        assert_eq!(frame.ul_symbols(), &[3, 4]);
        assert_eq!(frame.dl_symbols(), &[6, 7]);
        assert_eq!(frame.cal_symbols(), &[8, 9]);
        assert!(frame.is_rec_cal_enabled());
        assert_eq!(frame.num_rx_syms(), 6);
        assert_eq!(frame.rx_symbols().collect::<Vec<_>>(), vec![1, 2, 3, 4, 8, 9]);
    }

    #[test]
    fn test_index_maps() {
        let frame = FrameSchedule::parse("PUUDD").unwrap();
        assert_eq!(frame.ul_symbol_idx(2), Some(1));
        assert_eq!(frame.ul_symbol_idx(3), None);
        assert_eq!(frame.dl_symbol_idx(4), Some(1));
        assert_eq!(frame.pilot_symbol_idx(0), Some(0));
        assert_eq!(frame.symbol_type(40), SymbolType::Guard);
    }

    #[test]
    fn test_invalid_schedule() {
        assert!(matches!(FrameSchedule::parse(""), Err(ConfigError::EmptySchedule)));
        assert!(matches!(
            FrameSchedule::parse("PUX"),
            Err(ConfigError::InvalidSymbol { symbol: 'X', position: 2 })
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let frame = FrameSchedule::parse("PUD").unwrap();
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, "\"PUD\"");
        let back: FrameSchedule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
        assert!(serde_json::from_str::<FrameSchedule>("\"PQ\"").is_err());
    }
}
