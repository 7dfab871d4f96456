//! OFDM Doers
//!
//! Per-antenna FFT of received symbols and IFFT of precoded symbols,
//! backed by rustfft plans created once per doer.

use std::sync::Arc;

use common::{EventType, Tag};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rustfft::{Fft, FftPlanner};
use tracing::trace;

use super::{random_sample, Doer, DoerContext};

/// FFT / IFFT between time samples and the centred data subcarriers
pub struct OfdmKernel {
    fft_size: usize,
    /// First data subcarrier bin
    data_start: usize,
    data_num: usize,
    /// 1/sqrt(N) for unitary transforms
    scale: f32,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
}

impl OfdmKernel {
    pub fn new(fft_size: usize, data_num: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());

        Self {
            fft_size,
            data_start: (fft_size - data_num) / 2,
            data_num,
            scale: 1.0 / (fft_size as f32).sqrt(),
            fft,
            ifft,
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Time samples to data subcarriers. `samples` is overwritten.
    pub fn demodulate(&mut self, samples: &mut [Complex32], data: &mut [Complex32]) {
        self.fft.process_with_scratch(samples, &mut self.scratch);
        let bins = &samples[self.data_start..self.data_start + self.data_num];
        for (d, s) in data.iter_mut().zip(bins) {
            *d = *s * self.scale;
        }
    }

    /// Data subcarriers to time samples
    pub fn modulate(&mut self, data: &[Complex32], samples: &mut [Complex32]) {
        samples.fill(Complex32::new(0.0, 0.0));
        samples[self.data_start..self.data_start + self.data_num].copy_from_slice(data);
        self.ifft.process_with_scratch(samples, &mut self.scratch);
        for s in samples.iter_mut() {
            *s *= self.scale;
        }
    }
}

/// FFT of one received antenna packet per tag
pub struct FftDoer {
    ofdm: OfdmKernel,
    rng: StdRng,
    samples: Vec<Complex32>,
    data: Vec<Complex32>,
}

impl FftDoer {
    pub fn new(ctx: &DoerContext) -> Self {
        let config = &ctx.config;
        Self {
            ofdm: OfdmKernel::new(config.fft_size, config.ofdm_data_num),
            rng: ctx.rng(EventType::Fft),
            samples: vec![Complex32::new(0.0, 0.0); config.fft_size],
            data: vec![Complex32::new(0.0, 0.0); config.ofdm_data_num],
        }
    }
}

impl Doer for FftDoer {
    fn event_type(&self) -> EventType {
        EventType::Fft
    }

    fn launch(&mut self, tag: Tag) {
        for s in self.samples.iter_mut() {
            *s = random_sample(&mut self.rng);
        }
        self.ofdm.demodulate(&mut self.samples, &mut self.data);
        trace!("FFT {:?}: dc bin {:.3}", tag, self.data[self.data.len() / 2].norm());
    }
}

/// IFFT of one precoded antenna symbol per tag
pub struct IfftDoer {
    ofdm: OfdmKernel,
    rng: StdRng,
    data: Vec<Complex32>,
    samples: Vec<Complex32>,
}

impl IfftDoer {
    pub fn new(ctx: &DoerContext) -> Self {
        let config = &ctx.config;
        Self {
            ofdm: OfdmKernel::new(config.fft_size, config.ofdm_data_num),
            rng: ctx.rng(EventType::Ifft),
            data: vec![Complex32::new(0.0, 0.0); config.ofdm_data_num],
            samples: vec![Complex32::new(0.0, 0.0); config.fft_size],
        }
    }
}

impl Doer for IfftDoer {
    fn event_type(&self) -> EventType {
        EventType::Ifft
    }

    fn launch(&mut self, tag: Tag) {
        for d in self.data.iter_mut() {
            *d = random_sample(&mut self.rng);
        }
        self.ofdm.modulate(&self.data, &mut self.samples);
        trace!("IFFT {:?}: first sample {:.3}", tag, self.samples[0].norm());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_modulate_then_demodulate_recovers_data() {
        let mut kernel = OfdmKernel::new(64, 48);
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<Complex32> = (0..48).map(|_| random_sample(&mut rng)).collect();

        let mut samples = vec![Complex32::new(0.0, 0.0); kernel.fft_size()];
        kernel.modulate(&data, &mut samples);
        let mut recovered = vec![Complex32::new(0.0, 0.0); 48];
        kernel.demodulate(&mut samples, &mut recovered);

        for (a, b) in data.iter().zip(&recovered) {
            assert!((a - b).norm() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_unitary_scaling() {
        let mut kernel = OfdmKernel::new(16, 16);
        let mut samples = vec![Complex32::new(1.0, 0.0); 16];
        let mut data = vec![Complex32::new(0.0, 0.0); 16];
        kernel.demodulate(&mut samples, &mut data);
        // all energy in bin 0, which sits at the start of the shifted range
        assert!((data[0].norm() - 4.0).abs() < 1e-4);
        let energy: f32 = data.iter().map(|d| d.norm_sqr()).sum();
        assert!((energy - 16.0).abs() < 1e-3);
    }
}
