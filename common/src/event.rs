//! Event Records
//!
//! Fixed-capacity batches of tags travelling through the queue fabric.

use std::fmt;

use crate::tag::Tag;
use crate::types::{EventType, FrameId};

/// Maximum number of tags carried by one event
pub const MAX_EVENT_TAGS: usize = 32;

/// One work unit or signal.
///
/// Tags are stored raw because a few event kinds carry payload words next to
/// the tag (buffer handles, SNR bits, RAN parameters).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EventData {
    /// Event kind
    pub event_type: EventType,
    /// Number of valid entries in `tags`
    num_tags: u8,
    /// Packed tags or payload words
    tags: [u64; MAX_EVENT_TAGS],
}

impl EventData {
    /// Empty event of the given kind
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            num_tags: 0,
            tags: [0; MAX_EVENT_TAGS],
        }
    }

    /// Event carrying a single tag
    pub fn with_tag(event_type: EventType, tag: Tag) -> Self {
        let mut event = Self::new(event_type);
        event.push_raw(tag.raw());
        event
    }

    /// Packet-received event: the antenna tag followed by the transport's
    /// buffer handle
    pub fn packet_rx(tag: Tag, buffer_handle: u64) -> Self {
        let mut event = Self::with_tag(EventType::PacketRx, tag);
        event.push_raw(buffer_handle);
        event
    }

    /// SNR report: `tags[0]` is a `frm_sym_ue` tag, `tags[1]` the f32 bits
    pub fn snr_report(tag: Tag, snr: f32) -> Self {
        let mut event = Self::with_tag(EventType::SnrReport, tag);
        event.push_raw(u64::from(snr.to_bits()));
        event
    }

    /// RAN parameter update
    pub fn ran_update(antennas: u64, mod_order_bits: u64, frame_id: FrameId) -> Self {
        let mut event = Self::new(EventType::RanUpdate);
        event.push_raw(antennas);
        event.push_raw(mod_order_bits);
        event.push_raw(u64::from(frame_id));
        event
    }

    /// Append a tag. Returns false when the batch is full.
    pub fn push_tag(&mut self, tag: Tag) -> bool {
        self.push_raw(tag.raw())
    }

    /// Append a raw word. Returns false when the batch is full.
    pub fn push_raw(&mut self, value: u64) -> bool {
        if self.is_full() {
            return false;
        }
        self.tags[self.num_tags as usize] = value;
        self.num_tags += 1;
        true
    }

    pub fn num_tags(&self) -> usize {
        self.num_tags as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_tags == 0
    }

    pub fn is_full(&self) -> bool {
        self.num_tags as usize == MAX_EVENT_TAGS
    }

    /// Tag at position `i`
    pub fn tag(&self, i: usize) -> Tag {
        Tag::from_raw(self.raw(i))
    }

    /// Raw word at position `i`
    pub fn raw(&self, i: usize) -> u64 {
        debug_assert!(i < self.num_tags());
        self.tags[i]
    }

    /// Valid raw words
    pub fn raw_tags(&self) -> &[u64] {
        &self.tags[..self.num_tags()]
    }

    /// Valid entries interpreted as tags
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.raw_tags().iter().map(|&raw| Tag::from_raw(raw))
    }

    /// SNR carried by an `SnrReport`
    pub fn snr(&self) -> f32 {
        f32::from_bits(self.raw(1) as u32)
    }
}

impl fmt::Debug for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventData")
            .field("event_type", &self.event_type)
            .field("tags", &self.tags().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_until_full() {
        let mut event = EventData::new(EventType::Fft);
        for ant in 0..MAX_EVENT_TAGS as u16 {
            assert!(event.push_tag(Tag::frm_sym_ant(3, 1, ant)));
        }
        assert!(event.is_full());
        assert!(!event.push_tag(Tag::frm_sym_ant(3, 1, 99)));
        assert_eq!(event.num_tags(), MAX_EVENT_TAGS);
        assert_eq!(event.tag(31).ant_id(), 31);
    }

    #[test]
    fn test_snr_report_payload() {
        let event = EventData::snr_report(Tag::frm_sym_ue(7, 0, 3), 12.5);
        assert_eq!(event.tag(0).ue_id(), 3);
        assert_eq!(event.snr(), 12.5);
    }

    #[test]
    fn test_ran_update_payload() {
        let event = EventData::ran_update(8, 6, 42);
        assert_eq!(event.raw_tags(), &[8, 6, 42]);
    }
}
