//! Pipeline Assembly
//!
//! Wires the queue fabric, worker pool, loopback transport and MAC stub
//! around a scheduler and runs the scheduler on the calling thread.

use std::sync::Arc;

use common::{pin_to_core, PipelineConfig, SharedState};
use interfaces::mac::MacStub;
use interfaces::transport::{LoopbackTransport, TransportOptions};
use interfaces::QueueFabric;
use tracing::info;

use crate::scheduler::Scheduler;
use crate::stats::{PhyStats, RunSummary};
use crate::worker::WorkerPool;
use crate::SchedulerError;

/// Run a full pipeline until the last frame retires or `shared` is
/// stopped from outside. Every spawned thread is joined before returning.
pub fn run_pipeline(
    config: PipelineConfig,
    transport_options: TransportOptions,
    shared: Arc<SharedState>,
) -> Result<RunSummary, SchedulerError> {
    config.validate()?;
    let config = Arc::new(config);
    let fabric = Arc::new(QueueFabric::new(&config));
    let phy_stats = Arc::new(PhyStats::new(config.frame_window, config.ue_ant_num));
    let mut scheduler =
        Scheduler::new(config.clone(), fabric.clone(), shared.clone(), phy_stats.clone())?;

    info!(
        "Pipeline: {} antennas, {} UEs, {} workers, {} transport threads, MAC {}",
        config.bs_ant_num,
        config.ue_ant_num,
        config.worker_thread_num,
        config.socket_thread_num,
        if config.enable_mac { "enabled" } else { "disabled" }
    );

    let workers = WorkerPool::start(config.clone(), fabric.clone(), shared.clone(), phy_stats)?;
    let transport = match LoopbackTransport::start(
        config.clone(),
        fabric.clone(),
        shared.clone(),
        transport_options,
    ) {
        Ok(transport) => transport,
        Err(e) => {
            shared.stop();
            workers.join();
            return Err(e.into());
        }
    };
    let mac = if config.enable_mac {
        match MacStub::start(config.clone(), fabric.clone(), shared.clone()) {
            Ok(mac) => Some(mac),
            Err(e) => {
                shared.stop();
                workers.join();
                transport.join();
                return Err(e.into());
            }
        }
    } else {
        None
    };

    if config.pin_threads {
        pin_to_core(config.core_offset);
    }
    let result = scheduler.run();

    shared.stop();
    let worker_stats = workers.join();
    let transport_stats = transport.join();
    let mac_stats = mac.map(MacStub::join);

    if worker_stats.panicked > 0 {
        return Err(SchedulerError::WorkerPanicked(worker_stats.panicked));
    }
    let mut summary = result?;
    summary.worker_tasks = worker_stats.tasks;
    summary.packets_sent = transport_stats.packets_sent;
    summary.tx_answered = transport_stats.tx_answered;
    if let Some(mac_stats) = mac_stats {
        summary.mac_deliveries = mac_stats.packets_to_mac;
        if mac_stats.snr_reports > 0 {
            summary.mean_snr_db = Some(mac_stats.mean_snr_db);
        }
    }
    Ok(summary)
}
