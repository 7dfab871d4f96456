//! Loopback Fronthaul Transport
//!
//! Stands in for the radio packet I/O. Each transport thread emits raw
//! packets for its share of the antennas, parses them back on the receive
//! side and posts packet-received events to the message queue. Transmit
//! requests are answered with transmit completions.
//!
//! Frame generation is paced by a frame interval and throttled so that no
//! packet is ever emitted for a frame outside the scheduler's window.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use common::{bytes_to_hex, pin_to_core, DimId, EventData, FrameId, PipelineConfig, SharedState, SymbolId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, trace, warn};

use crate::fabric::QueueFabric;
use crate::message_types::{PacketHeader, RawPacket};
use crate::queue::{ProducerToken, QueueError};
use crate::InterfaceError;

/// Bytes per IQ sample on the wire (two i16 components)
const BYTES_PER_SAMPLE: usize = 4;

/// Transport behaviour knobs
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Time between the starts of consecutive frames, zero for as fast as
    /// the window allows
    pub frame_interval: Duration,
    /// Shuffle antenna order within each symbol
    pub shuffle: bool,
    /// Seed for the shuffle
    pub seed: u64,
    /// Transmit requests served per poll
    pub tx_bulk_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::ZERO,
            shuffle: true,
            seed: 0x5eed,
            tx_bulk_size: 8,
        }
    }
}

/// Transport statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub packets_sent: u64,
    pub tx_answered: u64,
    pub throttled_polls: u64,
    pub malformed_packets: u64,
}

impl TransportStats {
    fn merge(&mut self, other: &TransportStats) {
        self.frames_sent = self.frames_sent.max(other.frames_sent);
        self.packets_sent += other.packets_sent;
        self.tx_answered += other.tx_answered;
        self.throttled_polls += other.throttled_polls;
        self.malformed_packets += other.malformed_packets;
    }
}

/// Running transport threads
pub struct LoopbackTransport {
    handles: Vec<JoinHandle<TransportStats>>,
}

impl LoopbackTransport {
    /// Spawn `socket_thread_num` transport threads
    pub fn start(
        config: Arc<PipelineConfig>,
        fabric: Arc<QueueFabric>,
        shared: Arc<SharedState>,
        options: TransportOptions,
    ) -> Result<Self, InterfaceError> {
        info!(
            "Starting loopback transport: {} threads, frame interval {:?}",
            config.socket_thread_num, options.frame_interval
        );

        let mut handles = Vec::with_capacity(config.socket_thread_num);
        for tid in 0..config.socket_thread_num {
            let worker = TxRxWorker::new(
                tid,
                config.clone(),
                fabric.clone(),
                shared.clone(),
                options.clone(),
            );
            let handle = thread::Builder::new()
                .name(format!("txrx-{}", tid))
                .spawn(move || worker.run())?;
            handles.push(handle);
        }

        Ok(Self { handles })
    }

    /// Wait for every transport thread. Call after clearing the running flag.
    pub fn join(self) -> TransportStats {
        let mut total = TransportStats::default();
        for handle in self.handles {
            match handle.join() {
                Ok(stats) => total.merge(&stats),
                Err(_) => warn!("Transport thread panicked"),
            }
        }
        total
    }
}

/// One transport thread
struct TxRxWorker {
    tid: usize,
    config: Arc<PipelineConfig>,
    fabric: Arc<QueueFabric>,
    shared: Arc<SharedState>,
    options: TransportOptions,
    /// Antennas served by this thread
    antennas: Vec<DimId>,
    token: ProducerToken,
    rng: StdRng,
    /// Next buffer handle
    next_handle: u64,
    /// Scratch event list for transmit requests
    tx_events: Vec<EventData>,
    stats: TransportStats,
}

impl TxRxWorker {
    fn new(
        tid: usize,
        config: Arc<PipelineConfig>,
        fabric: Arc<QueueFabric>,
        shared: Arc<SharedState>,
        options: TransportOptions,
    ) -> Self {
        let antennas = (0..config.bs_ant_num)
            .filter(|ant| ant % config.socket_thread_num == tid)
            .map(|ant| ant as DimId)
            .collect();
        let rng = StdRng::seed_from_u64(options.seed.wrapping_add(tid as u64));
        let tx_events = Vec::with_capacity(options.tx_bulk_size);
        Self {
            tid,
            config,
            fabric,
            shared,
            options,
            antennas,
            token: ProducerToken::new(tid),
            rng,
            next_handle: 0,
            tx_events,
            stats: TransportStats::default(),
        }
    }

    fn run(mut self) -> TransportStats {
        if self.config.pin_threads {
            pin_to_core(self.config.core_offset + 1 + self.tid);
        }
        debug!("Transport thread {} serving antennas {:?}", self.tid, self.antennas);

        let frames_to_send = self.config.frames_to_test as u64;
        let start = Instant::now();
        let mut frame: FrameId = 0;

        while self.shared.is_running() {
            let answered = match self.serve_tx() {
                Ok(n) => n,
                Err(e) => {
                    debug!("Transport thread {} stopping: {}", self.tid, e);
                    break;
                }
            };

            if u64::from(frame) < frames_to_send && self.may_send(frame, start) {
                if let Err(e) = self.send_frame(frame) {
                    debug!("Transport thread {} stopping: {}", self.tid, e);
                    break;
                }
                frame += 1;
                self.stats.frames_sent += 1;
            } else if answered == 0 {
                thread::yield_now();
            }
        }

        debug!(
            "Transport thread {} exit: {} packets, {} transmit completions",
            self.tid, self.stats.packets_sent, self.stats.tx_answered
        );
        self.stats
    }

    /// Whether frame `frame` may be emitted now
    fn may_send(&mut self, frame: FrameId, start: Instant) -> bool {
        let window_edge =
            u64::from(self.shared.cur_proc_frame_id()) + self.config.frame_window as u64;
        if u64::from(frame) >= window_edge {
            self.stats.throttled_polls += 1;
            return false;
        }
        let due = start + self.options.frame_interval * frame;
        Instant::now() >= due
    }

    /// Emit, receive and post every packet of one frame
    fn send_frame(&mut self, frame: FrameId) -> Result<(), QueueError> {
        let symbols: Vec<SymbolId> = self.config.frame_schedule.rx_symbols().collect();
        let mut order = self.antennas.clone();
        for symbol in symbols {
            if self.options.shuffle {
                order.shuffle(&mut self.rng);
            }
            for &ant in &order {
                let wire = self.emit(frame, symbol, ant);
                self.receive(wire)?;
            }
        }
        Ok(())
    }

    /// Radio side: serialize one packet
    fn emit(&self, frame: FrameId, symbol: SymbolId, ant: DimId) -> Bytes {
        let payload_len = self.config.fft_size * BYTES_PER_SAMPLE;
        let packet = RawPacket {
            header: PacketHeader::new(frame, symbol, ant, payload_len as u32),
            payload: BytesMut::zeroed(payload_len).freeze(),
        };
        packet.to_bytes()
    }

    /// Receive side: parse a packet and hand it to the scheduler
    fn receive(&mut self, wire: Bytes) -> Result<(), QueueError> {
        let packet = match RawPacket::parse(wire.clone()) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed_packets += 1;
                warn!("Dropping malformed packet: {}", e);
                return Ok(());
            }
        };
        trace!(
            "RX thread {}: {:?} header [{}]",
            self.tid,
            packet.header,
            bytes_to_hex(&wire[..crate::message_types::PACKET_HEADER_LEN])
        );

        let handle = ((self.tid as u64) << 48) | self.next_handle;
        self.next_handle = (self.next_handle + 1) & ((1 << 48) - 1);
        let event = EventData::packet_rx(packet.header.tag(), handle);
        self.fabric
            .message_queue()
            .enqueue_fallback(&mut self.token, event, self.shared.running_flag())?;
        self.stats.packets_sent += 1;
        Ok(())
    }

    /// Answer pending transmit requests with transmit completions
    fn serve_tx(&mut self) -> Result<usize, QueueError> {
        self.tx_events.clear();
        let n = self
            .fabric
            .tx_queue()
            .try_dequeue_bulk(&mut self.tx_events, self.options.tx_bulk_size);
        for i in 0..n {
            let event = self.tx_events[i];
            trace!("TX thread {}: sent {:?}", self.tid, event.tag(0));
            self.fabric
                .message_queue()
                .enqueue_fallback(&mut self.token, event, self.shared.running_flag())?;
            self.stats.tx_answered += 1;
        }
        Ok(n)
    }
}
