//! Compute Doers
//!
//! A doer executes one compute stage. Workers poll their doers; each doer
//! pulls one event from its stage queue, runs every tag through the
//! stage kernel and reports the event back on the completion queue.

mod beamform;
mod coding;
mod ofdm;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{EventType, PipelineConfig, SharedState, Tag};
use interfaces::{EventQueue, ProducerToken, QueueError};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::stats::PhyStats;

pub use beamform::{DemulDoer, PrecodeDoer, Qam, ZfDoer};
pub use coding::{DecodeDoer, EncodeDoer};
pub use ofdm::{FftDoer, IfftDoer, OfdmKernel};

/// One compute stage executor
pub trait Doer {
    /// Stage this doer serves
    fn event_type(&self) -> EventType;

    /// Run the stage kernel for one tag
    fn launch(&mut self, tag: Tag);

    /// Take one event from `task_queue` if available, process all of its
    /// tags and post one completion carrying the same type and tags.
    /// Returns whether an event was processed.
    fn try_launch(
        &mut self,
        task_queue: &EventQueue,
        complete_queue: &EventQueue,
        token: &mut ProducerToken,
        running: &AtomicBool,
    ) -> Result<bool, QueueError> {
        let Some(event) = task_queue.try_dequeue() else {
            return Ok(false);
        };
        debug_assert_eq!(event.event_type, self.event_type());

        for tag in event.tags() {
            self.launch(tag);
        }
        complete_queue.enqueue_fallback(token, event, running)?;
        Ok(true)
    }
}

/// Everything a doer may read while running
#[derive(Clone)]
pub struct DoerContext {
    pub tid: usize,
    pub config: Arc<PipelineConfig>,
    pub shared: Arc<SharedState>,
    pub phy_stats: Arc<PhyStats>,
}

impl DoerContext {
    /// Per-doer deterministic generator for synthetic samples
    fn rng(&self, stage: EventType) -> StdRng {
        StdRng::seed_from_u64(((self.tid as u64) << 8) | stage as u64)
    }
}

/// Build the doer for a compute stage, `None` for non-compute events
pub fn create_doer(stage: EventType, ctx: &DoerContext) -> Option<Box<dyn Doer>> {
    let doer: Box<dyn Doer> = match stage {
        EventType::Fft => Box::new(FftDoer::new(ctx)),
        EventType::Ifft => Box::new(IfftDoer::new(ctx)),
        EventType::Zf => Box::new(ZfDoer::new(ctx)),
        EventType::Demul => Box::new(DemulDoer::new(ctx)),
        EventType::Precode => Box::new(PrecodeDoer::new(ctx)),
        EventType::Encode => Box::new(EncodeDoer::new(ctx)),
        EventType::Decode => Box::new(DecodeDoer::new(ctx)),
        _ => return None,
    };
    Some(doer)
}

/// sqrt(6): scales two uniform [-0.5, 0.5) components to unit power
const UNIFORM_TO_UNIT_POWER: f32 = 2.449_489_7;

/// Unit-power complex sample
fn random_sample(rng: &mut StdRng) -> Complex32 {
    Complex32::new(rng.gen::<f32>() - 0.5, rng.gen::<f32>() - 0.5) * UNIFORM_TO_UNIT_POWER
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::EventData;

    struct CountingDoer {
        launched: Vec<Tag>,
    }

    impl Doer for CountingDoer {
        fn event_type(&self) -> EventType {
            EventType::Demul
        }

        fn launch(&mut self, tag: Tag) {
            self.launched.push(tag);
        }
    }

    pub(crate) fn test_context(config: PipelineConfig) -> DoerContext {
        let config = Arc::new(config);
        DoerContext {
            tid: 0,
            phy_stats: Arc::new(PhyStats::new(config.frame_window, config.ue_ant_num)),
            config,
            shared: Arc::new(SharedState::default()),
        }
    }

    #[test]
    fn test_try_launch_posts_one_completion_per_event() {
        let task_q = EventQueue::new("demul", 8);
        let complete_q = EventQueue::new("complete", 8);
        let running = AtomicBool::new(true);
        let mut token = ProducerToken::new(0);
        let mut doer = CountingDoer { launched: Vec::new() };

        assert!(!doer.try_launch(&task_q, &complete_q, &mut token, &running).unwrap());

        let mut event = EventData::new(EventType::Demul);
        for sc in [0, 48, 96] {
            event.push_tag(Tag::frm_sym_sc(4, 2, sc));
        }
        assert!(task_q.try_enqueue(&mut token, event));

        assert!(doer.try_launch(&task_q, &complete_q, &mut token, &running).unwrap());
        assert_eq!(doer.launched.len(), 3);
        assert_eq!(doer.launched[2], Tag::frm_sym_sc(4, 2, 96));
        assert_eq!(complete_q.len(), 1);
        assert_eq!(complete_q.try_dequeue(), Some(event));
        assert!(task_q.is_empty());
    }

    #[test]
    fn test_create_doer_covers_compute_stages() {
        let ctx = test_context(PipelineConfig {
            fft_size: 64,
            ofdm_data_num: 48,
            bs_ant_num: 4,
            ue_ant_num: 2,
            ..Default::default()
        });
        for stage in EventType::compute_stages() {
            let doer = create_doer(stage, &ctx).unwrap();
            assert_eq!(doer.event_type(), stage);
        }
        assert!(create_doer(EventType::PacketTx, &ctx).is_none());
    }

    #[test]
    fn test_every_doer_runs_a_tag() {
        let ctx = test_context(PipelineConfig {
            fft_size: 64,
            ofdm_data_num: 48,
            bs_ant_num: 4,
            ue_ant_num: 2,
            zf_block_size: 8,
            demul_block_size: 16,
            code_block_bytes: 32,
            ..Default::default()
        });
        for stage in EventType::compute_stages() {
            let mut doer = create_doer(stage, &ctx).unwrap();
            // last block of the symbol is partial
            doer.launch(Tag::new(1, 2, 40));
            doer.launch(Tag::new(1, 2, 0));
        }
    }
}
