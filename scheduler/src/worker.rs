//! Worker Pool
//!
//! Compute threads that poll their doers on the stage queues of one frame
//! parity at a time, moving to the other parity once the current one runs
//! dry and the scheduler has moved on.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use common::{pin_to_core, FrameId, PipelineConfig, SharedState, SCHEDULE_QUEUES};
use interfaces::{frame_qid, ProducerToken, QueueError, QueueFabric};
use tracing::{debug, error, info};

use crate::doer::{create_doer, Doer, DoerContext};
use crate::stats::PhyStats;
use crate::SchedulerError;

/// Consecutive empty polls before re-evaluating the parity
pub const EMPTY_QUEUE_ITERS: usize = 5;

/// Parity to poll next. Flip while the schedule frontier is ahead of the
/// oldest frame, otherwise follow the frontier.
pub fn select_parity(cur_qid: usize, cur_sche_frame_id: FrameId, cur_proc_frame_id: FrameId) -> usize {
    if cur_sche_frame_id != cur_proc_frame_id {
        cur_qid ^ 1
    } else {
        frame_qid(cur_sche_frame_id)
    }
}

/// Per-worker counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub tasks: u64,
    pub parity_switches: u64,
    /// Workers that unwound instead of returning
    pub panicked: usize,
}

impl WorkerStats {
    fn merge(&mut self, other: &WorkerStats) {
        self.tasks += other.tasks;
        self.parity_switches += other.parity_switches;
    }
}

/// Running worker threads
pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerStats>>,
}

impl WorkerPool {
    /// Spawn `worker_thread_num` workers
    pub fn start(
        config: Arc<PipelineConfig>,
        fabric: Arc<QueueFabric>,
        shared: Arc<SharedState>,
        phy_stats: Arc<PhyStats>,
    ) -> Result<Self, SchedulerError> {
        info!("Starting {} worker threads", config.worker_thread_num);

        let mut handles = Vec::with_capacity(config.worker_thread_num);
        for tid in 0..config.worker_thread_num {
            let ctx = DoerContext {
                tid,
                config: config.clone(),
                shared: shared.clone(),
                phy_stats: phy_stats.clone(),
            };
            let fabric = fabric.clone();
            let guard = StopOnPanic(shared.clone());
            let handle = thread::Builder::new()
                .name(format!("worker-{}", tid))
                .spawn(move || {
                    let _guard = guard;
                    Worker::new(ctx, fabric).run()
                })?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    /// Wait for every worker. Call after clearing the running flag.
    pub fn join(self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for handle in self.handles {
            match handle.join() {
                Ok(stats) => total.merge(&stats),
                Err(_) => total.panicked += 1,
            }
        }
        total
    }
}

/// Clears the running flag when the owning thread unwinds. A worker that
/// dies mid-batch never posts that batch's completion.
struct StopOnPanic(Arc<SharedState>);

impl Drop for StopOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Worker thread panicked, stopping the pipeline");
            self.0.stop();
        }
    }
}

struct Worker {
    ctx: DoerContext,
    fabric: Arc<QueueFabric>,
    doers: Vec<Box<dyn Doer>>,
    /// One completion producer per parity
    tokens: [ProducerToken; SCHEDULE_QUEUES],
    cur_qid: usize,
    stats: WorkerStats,
}

impl Worker {
    fn new(ctx: DoerContext, fabric: Arc<QueueFabric>) -> Self {
        let doers = ctx
            .config
            .worker_stages_for(ctx.tid)
            .into_iter()
            .filter_map(|stage| create_doer(stage, &ctx))
            .collect::<Vec<_>>();
        let tokens = [ProducerToken::new(ctx.tid * 2), ProducerToken::new(ctx.tid * 2 + 1)];
        Self {
            ctx,
            fabric,
            doers,
            tokens,
            cur_qid: 0,
            stats: WorkerStats::default(),
        }
    }

    fn run(mut self) -> WorkerStats {
        let config = self.ctx.config.clone();
        if config.pin_threads {
            pin_to_core(config.core_offset + 1 + config.socket_thread_num + self.ctx.tid);
        }
        debug!(
            "Worker {} serving {:?}",
            self.ctx.tid,
            self.doers.iter().map(|d| d.event_type()).collect::<Vec<_>>()
        );

        let shared = self.ctx.shared.clone();
        let mut empty_polls = 0;
        while shared.is_running() {
            match self.poll_once() {
                Ok(true) => {
                    self.stats.tasks += 1;
                    empty_polls = 0;
                }
                Ok(false) => {
                    empty_polls += 1;
                    if empty_polls == EMPTY_QUEUE_ITERS {
                        let next = select_parity(
                            self.cur_qid,
                            shared.cur_sche_frame_id(),
                            shared.cur_proc_frame_id(),
                        );
                        if next != self.cur_qid {
                            self.stats.parity_switches += 1;
                        }
                        self.cur_qid = next;
                        empty_polls = 0;
                    }
                }
                Err(e) => {
                    debug!("Worker {} stopping: {}", self.ctx.tid, e);
                    break;
                }
            }
        }

        debug!("Worker {} exit: {} tasks", self.ctx.tid, self.stats.tasks);
        self.stats
    }

    /// Offer the current parity to each doer in order; stop at the first
    /// one that processed an event.
    fn poll_once(&mut self) -> Result<bool, QueueError> {
        let qid = self.cur_qid;
        let complete_queue = self.fabric.complete_queue(qid);
        for doer in self.doers.iter_mut() {
            let Some(task_queue) = self.fabric.stage_queue(doer.event_type(), qid) else {
                continue;
            };
            if doer.try_launch(
                task_queue,
                complete_queue,
                &mut self.tokens[qid],
                self.ctx.shared.running_flag(),
            )? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{EventData, EventType, Tag};
    use std::time::{Duration, Instant};

    #[test]
    fn test_panicking_worker_stops_pipeline() {
        let shared = Arc::new(SharedState::default());
        let guard = StopOnPanic(shared.clone());
        let handle = thread::spawn(move || {
            let _guard = guard;
            panic!("doer failed");
        });
        assert!(handle.join().is_err());
        assert!(!shared.is_running());

        let shared = Arc::new(SharedState::default());
        let guard = StopOnPanic(shared.clone());
        thread::spawn(move || drop(guard)).join().unwrap();
        assert!(shared.is_running());
    }

    #[test]
    fn test_select_parity() {
        // frontier ahead of the oldest frame: alternate
        assert_eq!(select_parity(0, 5, 4), 1);
        assert_eq!(select_parity(1, 5, 4), 0);
        // caught up: follow the frontier
        assert_eq!(select_parity(0, 7, 7), 1);
        assert_eq!(select_parity(1, 8, 8), 0);
        assert_eq!(select_parity(0, 8, 8), 0);
    }

    #[test]
    fn test_workers_complete_both_parities() {
        let config = Arc::new(PipelineConfig {
            worker_thread_num: 2,
            fft_size: 64,
            ofdm_data_num: 48,
            bs_ant_num: 4,
            ue_ant_num: 2,
            ..Default::default()
        });
        let fabric = Arc::new(QueueFabric::with_capacity(64, 64));
        let shared = Arc::new(SharedState::default());
        let phy_stats = Arc::new(PhyStats::new(config.frame_window, config.ue_ant_num));

        let mut token = ProducerToken::new(99);
        for frame in [0u32, 1] {
            let task = EventData::with_tag(EventType::Fft, Tag::frm_sym_ant(frame, 0, 1));
            let queue = fabric.stage_queue(EventType::Fft, frame_qid(frame)).unwrap();
            assert!(queue.try_enqueue(&mut token, task));
        }
        // frontier ahead so workers alternate parities
        shared.publish_sche_frame_id(1);

        let pool = WorkerPool::start(config, fabric.clone(), shared.clone(), phy_stats).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut done = Vec::new();
        while done.len() < 2 && Instant::now() < deadline {
            for qid in 0..SCHEDULE_QUEUES {
                if let Some(event) = fabric.complete_queue(qid).try_dequeue() {
                    assert_eq!(frame_qid(event.tag(0).frame_id()), qid);
                    done.push(event.tag(0).frame_id());
                }
            }
        }
        shared.stop();
        let stats = pool.join();

        done.sort_unstable();
        assert_eq!(done, vec![0, 1]);
        assert_eq!(stats.tasks, 2);
    }
}
