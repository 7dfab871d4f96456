//! Channel Coding Doers
//!
//! Code blocks carry a CRC24A and are protected by a rate-1/3 repetition
//! code with majority-vote decoding.

use std::sync::Arc;

use common::{attach_crc24, check_crc24, EventType, PipelineConfig, Tag};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{trace, warn};

use super::{Doer, DoerContext};

/// Copies of each byte on the channel
const REPETITION: usize = 3;

/// Repeat every byte `REPETITION` times
fn repetition_encode(block: &[u8], coded: &mut Vec<u8>) {
    coded.clear();
    for _ in 0..REPETITION {
        coded.extend_from_slice(block);
    }
}

/// Bitwise majority vote across the copies
fn majority_decode(coded: &[u8], block: &mut Vec<u8>) {
    let len = coded.len() / REPETITION;
    block.clear();
    block.extend((0..len).map(|i| {
        let (a, b, c) = (coded[i], coded[len + i], coded[2 * len + i]);
        (a & b) | (a & c) | (b & c)
    }));
}

fn random_block(rng: &mut StdRng, bytes: usize, block: &mut Vec<u8>) {
    block.clear();
    block.extend((0..bytes).map(|_| rng.gen::<u8>()));
    attach_crc24(block);
}

/// Encodes one code block per tag
pub struct EncodeDoer {
    config: Arc<PipelineConfig>,
    rng: StdRng,
    block: Vec<u8>,
    coded: Vec<u8>,
}

impl EncodeDoer {
    pub fn new(ctx: &DoerContext) -> Self {
        let len = ctx.config.code_block_bytes + 3;
        Self {
            config: ctx.config.clone(),
            rng: ctx.rng(EventType::Encode),
            block: Vec::with_capacity(len),
            coded: Vec::with_capacity(len * REPETITION),
        }
    }
}

impl Doer for EncodeDoer {
    fn event_type(&self) -> EventType {
        EventType::Encode
    }

    fn launch(&mut self, tag: Tag) {
        random_block(&mut self.rng, self.config.code_block_bytes, &mut self.block);
        repetition_encode(&self.block, &mut self.coded);
        trace!("Encode {:?}: {} coded bytes", tag, self.coded.len());
    }
}

/// Decodes one code block per tag and checks its CRC
pub struct DecodeDoer {
    config: Arc<PipelineConfig>,
    rng: StdRng,
    block: Vec<u8>,
    coded: Vec<u8>,
    decoded: Vec<u8>,
    crc_failures: u64,
}

impl DecodeDoer {
    pub fn new(ctx: &DoerContext) -> Self {
        let len = ctx.config.code_block_bytes + 3;
        Self {
            config: ctx.config.clone(),
            rng: ctx.rng(EventType::Decode),
            block: Vec::with_capacity(len),
            coded: Vec::with_capacity(len * REPETITION),
            decoded: Vec::with_capacity(len),
            crc_failures: 0,
        }
    }

    pub fn crc_failures(&self) -> u64 {
        self.crc_failures
    }
}

impl Doer for DecodeDoer {
    fn event_type(&self) -> EventType {
        EventType::Decode
    }

    fn launch(&mut self, tag: Tag) {
        random_block(&mut self.rng, self.config.code_block_bytes, &mut self.block);
        repetition_encode(&self.block, &mut self.coded);

        // one bit error per received block
        let pos = self.rng.gen_range(0..self.coded.len());
        self.coded[pos] ^= 1u8 << self.rng.gen_range(0..8u32);

        majority_decode(&self.coded, &mut self.decoded);
        if !check_crc24(&self.decoded) {
            self.crc_failures += 1;
            warn!("Decode {:?}: CRC failure ({} so far)", tag, self.crc_failures);
        } else {
            trace!("Decode {:?}: CRC ok", tag);
        }
    }
}
