//! Event Queue Fabric
//!
//! All queues connecting the scheduler to its collaborators:
//!
//! - one pair of task queues per compute stage, selected by frame parity
//! - one completion queue per parity, filled by the workers
//! - the I/O-origin message queue (received packets, transmit completions)
//! - the transmit request queue drained by the transport
//! - the MAC request and response queues

use common::{EventType, PipelineConfig, NUM_COMPUTE_STAGES, SCHEDULE_QUEUES};

use crate::queue::EventQueue;

/// Queue parity of a frame
pub fn frame_qid(frame_id: u32) -> usize {
    (frame_id & 0x1) as usize
}

/// Every queue of the pipeline
#[derive(Debug)]
pub struct QueueFabric {
    /// Task queues, `[stage][qid]`
    stage_queues: Vec<[EventQueue; SCHEDULE_QUEUES]>,
    /// Worker completions, by parity
    complete_queues: [EventQueue; SCHEDULE_QUEUES],
    /// Received packets and transmit completions
    message_queue: EventQueue,
    /// Transmit requests towards the transport
    tx_queue: EventQueue,
    /// Requests towards the MAC (decoded data, SNR reports)
    mac_request_queue: EventQueue,
    /// Events from the MAC
    mac_response_queue: EventQueue,
}

impl QueueFabric {
    /// Size every queue from the pipeline configuration
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_capacity(config.message_queue_capacity(), config.worker_queue_capacity())
    }

    /// Message-side queues get `message_capacity`, stage and completion
    /// queues get `worker_capacity`
    pub fn with_capacity(message_capacity: usize, worker_capacity: usize) -> Self {
        let stage_queues = EventType::compute_stages()
            .map(|stage| {
                [
                    EventQueue::new(stage.name(), worker_capacity),
                    EventQueue::new(stage.name(), worker_capacity),
                ]
            })
            .collect::<Vec<_>>();
        debug_assert_eq!(stage_queues.len(), NUM_COMPUTE_STAGES);

        Self {
            stage_queues,
            complete_queues: [
                EventQueue::new("complete_0", message_capacity),
                EventQueue::new("complete_1", message_capacity),
            ],
            message_queue: EventQueue::new("message", message_capacity),
            tx_queue: EventQueue::new("tx", message_capacity),
            mac_request_queue: EventQueue::new("mac_request", message_capacity),
            mac_response_queue: EventQueue::new("mac_response", message_capacity),
        }
    }

    /// Task queue of a compute stage for the given parity. `None` for event
    /// types the workers do not execute.
    pub fn stage_queue(&self, event_type: EventType, qid: usize) -> Option<&EventQueue> {
        let stage = event_type.stage_index()?;
        self.stage_queues.get(stage).map(|pair| &pair[qid & 0x1])
    }

    pub fn complete_queue(&self, qid: usize) -> &EventQueue {
        &self.complete_queues[qid & 0x1]
    }

    pub fn message_queue(&self) -> &EventQueue {
        &self.message_queue
    }

    pub fn tx_queue(&self) -> &EventQueue {
        &self.tx_queue
    }

    pub fn mac_request_queue(&self) -> &EventQueue {
        &self.mac_request_queue
    }

    pub fn mac_response_queue(&self) -> &EventQueue {
        &self.mac_response_queue
    }

    /// Events still sitting in stage queues, both parities
    pub fn pending_tasks(&self) -> usize {
        self.stage_queues
            .iter()
            .flat_map(|pair| pair.iter())
            .map(EventQueue::len)
            .sum()
    }
}
