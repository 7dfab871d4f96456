//! Beamforming Doers
//!
//! Zero-forcing detector computation, uplink demodulation and downlink
//! precoding over blocks of subcarriers. Matrices are row-major.

use std::sync::Arc;

use common::{EventType, PipelineConfig, SharedState, Tag, MAX_MOD_ORDER_BITS, MIN_MOD_ORDER_BITS};
use num_complex::Complex32;
use num_traits::Zero;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{trace, warn};

use super::{random_sample, Doer, DoerContext};
use crate::stats::PhyStats;

/// Noise amplitude of the synthetic uplink channel, about 20 dB SNR
const UPLINK_NOISE_AMPLITUDE: f32 = 0.1;

/// `out = A^H A` for an `rows x cols` matrix `a`
fn gram(a: &[Complex32], rows: usize, cols: usize, out: &mut [Complex32]) {
    for i in 0..cols {
        for j in 0..cols {
            out[i * cols + j] = (0..rows)
                .map(|r| a[r * cols + i].conj() * a[r * cols + j])
                .sum();
        }
    }
}

/// Gauss-Jordan inverse with partial pivoting. `a` is destroyed.
/// Returns false when the matrix is singular.
fn invert(a: &mut [Complex32], n: usize, inv: &mut [Complex32]) -> bool {
    inv.fill(Complex32::zero());
    for i in 0..n {
        inv[i * n + i] = Complex32::new(1.0, 0.0);
    }

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&x, &y| a[x * n + col].norm_sqr().total_cmp(&a[y * n + col].norm_sqr()))
            .unwrap_or(col);
        if a[pivot * n + col].norm_sqr() < 1e-12 {
            return false;
        }
        if pivot != col {
            for k in 0..n {
                a.swap(pivot * n + k, col * n + k);
                inv.swap(pivot * n + k, col * n + k);
            }
        }

        let p = a[col * n + col].inv();
        for k in 0..n {
            a[col * n + k] *= p;
            inv[col * n + k] *= p;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row * n + col];
            if factor.is_zero() {
                continue;
            }
            for k in 0..n {
                let (ak, ik) = (a[col * n + k], inv[col * n + k]);
                a[row * n + k] -= factor * ak;
                inv[row * n + k] -= factor * ik;
            }
        }
    }
    true
}

/// `out = A x` for an `rows x cols` matrix
fn mat_vec(a: &[Complex32], rows: usize, cols: usize, x: &[Complex32], out: &mut [Complex32]) {
    for r in 0..rows {
        out[r] = (0..cols).map(|c| a[r * cols + c] * x[c]).sum();
    }
}

/// Zero-forcing detector for a `bs x ue` channel
struct ZfKernel {
    bs: usize,
    ue: usize,
    gram: Vec<Complex32>,
    gram_inv: Vec<Complex32>,
}

impl ZfKernel {
    fn new(bs: usize, ue: usize) -> Self {
        Self {
            bs,
            ue,
            gram: vec![Complex32::zero(); ue * ue],
            gram_inv: vec![Complex32::zero(); ue * ue],
        }
    }

    /// `detector = (H^H H)^-1 H^H`, `ue x bs`
    fn compute(&mut self, channel: &[Complex32], detector: &mut [Complex32]) -> bool {
        let (bs, ue) = (self.bs, self.ue);
        gram(channel, bs, ue, &mut self.gram);
        if !invert(&mut self.gram, ue, &mut self.gram_inv) {
            return false;
        }
        for u in 0..ue {
            for b in 0..bs {
                detector[u * bs + b] = (0..ue)
                    .map(|v| self.gram_inv[u * ue + v] * channel[b * ue + v].conj())
                    .sum();
            }
        }
        true
    }
}

/// Synthetic `bs x ue` channel with a strong direct path per UE
fn random_channel(rng: &mut StdRng, bs: usize, ue: usize, out: &mut [Complex32]) {
    for b in 0..bs {
        for u in 0..ue {
            let direct = if b % ue == u { 2.0 } else { 0.0 };
            out[b * ue + u] = random_sample(rng) * 0.5 + direct;
        }
    }
}

/// Square QAM constellation with unit average power
#[derive(Debug, Clone, Copy)]
pub struct Qam {
    levels: usize,
    norm: f32,
}

impl Qam {
    /// Constellation for `bits` per symbol. Odd sizes round down and the
    /// order is clamped to QPSK..=256QAM.
    pub fn new(bits: u8) -> Self {
        let per_axis = u32::from(bits.clamp(MIN_MOD_ORDER_BITS, MAX_MOD_ORDER_BITS) / 2);
        let levels = 1usize << per_axis;
        let norm = (2.0 * ((levels * levels) as f32 - 1.0) / 3.0).sqrt();
        Self { levels, norm }
    }

    fn level(&self, idx: usize) -> f32 {
        (2.0 * idx as f32 - (self.levels - 1) as f32) / self.norm
    }

    fn slice(&self, v: f32) -> f32 {
        let max = (self.levels - 1) as f32;
        let idx = ((v * self.norm + max) / 2.0).round().clamp(0.0, max);
        self.level(idx as usize)
    }

    /// Nearest constellation point
    pub fn decide(&self, x: Complex32) -> Complex32 {
        Complex32::new(self.slice(x.re), self.slice(x.im))
    }

    pub fn random(&self, rng: &mut StdRng) -> Complex32 {
        Complex32::new(
            self.level(rng.gen_range(0..self.levels)),
            self.level(rng.gen_range(0..self.levels)),
        )
    }
}

/// Detector computation per block of subcarriers
pub struct ZfDoer {
    config: Arc<PipelineConfig>,
    kernel: ZfKernel,
    rng: StdRng,
    channel: Vec<Complex32>,
    detector: Vec<Complex32>,
    singular: u64,
}

impl ZfDoer {
    pub fn new(ctx: &DoerContext) -> Self {
        let (bs, ue) = (ctx.config.bs_ant_num, ctx.config.ue_ant_num);
        Self {
            config: ctx.config.clone(),
            kernel: ZfKernel::new(bs, ue),
            rng: ctx.rng(EventType::Zf),
            channel: vec![Complex32::zero(); bs * ue],
            detector: vec![Complex32::zero(); ue * bs],
            singular: 0,
        }
    }
}

impl Doer for ZfDoer {
    fn event_type(&self) -> EventType {
        EventType::Zf
    }

    fn launch(&mut self, tag: Tag) {
        let (bs, ue) = (self.config.bs_ant_num, self.config.ue_ant_num);
        let base = tag.sc_id() as usize;
        let end = (base + self.config.zf_block_size).min(self.config.ofdm_data_num);
        for _sc in base..end {
            random_channel(&mut self.rng, bs, ue, &mut self.channel);
            if !self.kernel.compute(&self.channel, &mut self.detector) {
                self.singular += 1;
                if self.singular == 1 {
                    warn!("ZF {:?}: singular channel Gram matrix ({} UEs, {} antennas)", tag, ue, bs);
                }
            }
        }
        trace!("ZF {:?}: subcarriers {}..{}", tag, base, end);
    }
}

/// Uplink equalization and hard demodulation per block of subcarriers.
/// Publishes an EVM-based SNR estimate per UE.
pub struct DemulDoer {
    config: Arc<PipelineConfig>,
    shared: Arc<SharedState>,
    phy_stats: Arc<PhyStats>,
    rng: StdRng,
    channel: Vec<Complex32>,
    detector: Vec<Complex32>,
    sent: Vec<Complex32>,
    received: Vec<Complex32>,
    equalized: Vec<Complex32>,
}

impl DemulDoer {
    pub fn new(ctx: &DoerContext) -> Self {
        let (bs, ue) = (ctx.config.bs_ant_num, ctx.config.ue_ant_num);
        let mut rng = ctx.rng(EventType::Demul);
        let mut channel = vec![Complex32::zero(); bs * ue];
        random_channel(&mut rng, bs, ue, &mut channel);
        let mut detector = vec![Complex32::zero(); ue * bs];
        if !ZfKernel::new(bs, ue).compute(&channel, &mut detector) {
            warn!("Demul: singular synthetic channel, equalizing with zeros");
        }

        Self {
            config: ctx.config.clone(),
            shared: ctx.shared.clone(),
            phy_stats: ctx.phy_stats.clone(),
            rng,
            channel,
            detector,
            sent: vec![Complex32::zero(); ue],
            received: vec![Complex32::zero(); bs],
            equalized: vec![Complex32::zero(); ue],
        }
    }
}

impl Doer for DemulDoer {
    fn event_type(&self) -> EventType {
        EventType::Demul
    }

    fn launch(&mut self, tag: Tag) {
        let (bs, ue) = (self.config.bs_ant_num, self.config.ue_ant_num);
        let qam = Qam::new(self.shared.mod_order_bits());
        let base = tag.sc_id() as usize;
        let end = (base + self.config.demul_block_size).min(self.config.ofdm_data_num);

        let mut signal = vec![0.0f32; ue];
        let mut error = vec![0.0f32; ue];
        for _sc in base..end {
            for s in self.sent.iter_mut() {
                *s = qam.random(&mut self.rng);
            }
            mat_vec(&self.channel, bs, ue, &self.sent, &mut self.received);
            for r in self.received.iter_mut() {
                *r += random_sample(&mut self.rng) * UPLINK_NOISE_AMPLITUDE;
            }
            mat_vec(&self.detector, ue, bs, &self.received, &mut self.equalized);

            for u in 0..ue {
                let decided = qam.decide(self.equalized[u]);
                signal[u] += decided.norm_sqr();
                error[u] += (self.equalized[u] - decided).norm_sqr();
            }
        }

        let frame_id = tag.frame_id();
        for u in 0..ue {
            let snr_db = 10.0 * (signal[u] / error[u].max(1e-9)).log10();
            self.phy_stats.set_snr(frame_id, u, snr_db);
        }
        trace!("Demul {:?}: subcarriers {}..{}", tag, base, end);
    }
}

/// Downlink precoding per block of subcarriers
pub struct PrecodeDoer {
    config: Arc<PipelineConfig>,
    shared: Arc<SharedState>,
    rng: StdRng,
    precoder: Vec<Complex32>,
    symbols: Vec<Complex32>,
    output: Vec<Complex32>,
}

impl PrecodeDoer {
    pub fn new(ctx: &DoerContext) -> Self {
        let (bs, ue) = (ctx.config.bs_ant_num, ctx.config.ue_ant_num);
        let mut rng = ctx.rng(EventType::Precode);
        let mut precoder = vec![Complex32::zero(); bs * ue];
        random_channel(&mut rng, bs, ue, &mut precoder);
        Self {
            config: ctx.config.clone(),
            shared: ctx.shared.clone(),
            rng,
            precoder,
            symbols: vec![Complex32::zero(); ue],
            output: vec![Complex32::zero(); bs],
        }
    }
}

impl Doer for PrecodeDoer {
    fn event_type(&self) -> EventType {
        EventType::Precode
    }

    fn launch(&mut self, tag: Tag) {
        let (bs, ue) = (self.config.bs_ant_num, self.config.ue_ant_num);
        let qam = Qam::new(self.shared.mod_order_bits());
        let base = tag.sc_id() as usize;
        let end = (base + self.config.demul_block_size).min(self.config.ofdm_data_num);
        for _sc in base..end {
            for s in self.symbols.iter_mut() {
                *s = qam.random(&mut self.rng);
            }
            mat_vec(&self.precoder, bs, ue, &self.symbols, &mut self.output);
        }
        trace!("Precode {:?}: subcarriers {}..{}", tag, base, end);
    }
}
