//! Task Tag Codec
//!
//! A tag names one unit of work: `(frame, symbol, dim)` packed into a `u64`.
//! The meaning of `dim` (subcarrier, antenna, code block, UE) is implied by
//! the event type carrying the tag and is never stored.

use std::fmt;

use crate::types::{DimId, FrameId, SymbolId};

/// Bit width of the frame field
pub const FRAME_BITS: u32 = 32;
/// Bit width of the symbol field
pub const SYMBOL_BITS: u32 = 16;
/// Bit width of the dim field
pub const DIM_BITS: u32 = 16;

/// Largest representable symbol id
pub const MAX_SYMBOL_ID: usize = (1 << SYMBOL_BITS) - 1;
/// Largest representable dim id
pub const MAX_DIM_ID: usize = (1 << DIM_BITS) - 1;

const FRAME_SHIFT: u32 = SYMBOL_BITS + DIM_BITS;
const SYMBOL_SHIFT: u32 = DIM_BITS;
const SYMBOL_MASK: u64 = (1 << SYMBOL_BITS) - 1;
const DIM_MASK: u64 = (1 << DIM_BITS) - 1;

/// Packed task tag
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Tag(u64);

impl Tag {
    /// Pack a tag
    pub const fn new(frame_id: FrameId, symbol_id: SymbolId, dim_id: DimId) -> Self {
        Self(
            ((frame_id as u64) << FRAME_SHIFT)
                | ((symbol_id as u64) << SYMBOL_SHIFT)
                | dim_id as u64,
        )
    }

    /// Tag for a subcarrier block (ZF, demodulation, precoding)
    pub const fn frm_sym_sc(frame_id: FrameId, symbol_id: SymbolId, sc_id: DimId) -> Self {
        Self::new(frame_id, symbol_id, sc_id)
    }

    /// Tag for an antenna (received packets, FFT, IFFT, transmit)
    pub const fn frm_sym_ant(frame_id: FrameId, symbol_id: SymbolId, ant_id: DimId) -> Self {
        Self::new(frame_id, symbol_id, ant_id)
    }

    /// Tag for a code block (encode, decode)
    pub const fn frm_sym_cb(frame_id: FrameId, symbol_id: SymbolId, cb_id: DimId) -> Self {
        Self::new(frame_id, symbol_id, cb_id)
    }

    /// Tag for a UE (MAC delivery, SNR reports)
    pub const fn frm_sym_ue(frame_id: FrameId, symbol_id: SymbolId, ue_id: DimId) -> Self {
        Self::new(frame_id, symbol_id, ue_id)
    }

    /// Rebuild a tag from its raw packed value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw packed value
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Unpack into `(frame, symbol, dim)`
    pub const fn decode(self) -> (FrameId, SymbolId, DimId) {
        (self.frame_id(), self.symbol_id(), self.dim_id())
    }

    pub const fn frame_id(self) -> FrameId {
        (self.0 >> FRAME_SHIFT) as FrameId
    }

    pub const fn symbol_id(self) -> SymbolId {
        ((self.0 >> SYMBOL_SHIFT) & SYMBOL_MASK) as SymbolId
    }

    pub const fn dim_id(self) -> DimId {
        (self.0 & DIM_MASK) as DimId
    }

    pub const fn sc_id(self) -> DimId {
        self.dim_id()
    }

    pub const fn ant_id(self) -> DimId {
        self.dim_id()
    }

    pub const fn cb_id(self) -> DimId {
        self.dim_id()
    }

    pub const fn ue_id(self) -> DimId {
        self.dim_id()
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tag(frame={}, symbol={}, dim={})",
            self.frame_id(),
            self.symbol_id(),
            self.dim_id()
        )
    }
}

impl From<Tag> for u64 {
    fn from(tag: Tag) -> u64 {
        tag.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        let samples = [
            (0, 0, 0),
            (1, 2, 3),
            (u32::MAX, u16::MAX, u16::MAX),
            (123_456, 17, 1199),
        ];
        for (frame, symbol, dim) in samples {
            let tag = Tag::new(frame, symbol, dim);
            assert_eq!(tag.decode(), (frame, symbol, dim));
            assert_eq!(Tag::from_raw(tag.raw()), tag);
        }
    }

    #[test]
    fn test_fields_do_not_bleed() {
        let tag = Tag::frm_sym_ant(0, 0, u16::MAX);
        assert_eq!(tag.frame_id(), 0);
        assert_eq!(tag.symbol_id(), 0);

        let tag = Tag::frm_sym_cb(0, u16::MAX, 0);
        assert_eq!(tag.frame_id(), 0);
        assert_eq!(tag.cb_id(), 0);
    }

    #[test]
    fn test_flavor_accessors() {
        let tag = Tag::frm_sym_ue(9, 4, 2);
        assert_eq!(tag.ue_id(), 2);
        assert_eq!(tag.sc_id(), 2);
        assert_eq!(format!("{:?}", tag), "Tag(frame=9, symbol=4, dim=2)");
    }
}
