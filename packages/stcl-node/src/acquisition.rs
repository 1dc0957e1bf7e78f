//! Acquisition/generation hardware abstraction, and a synthetic cavity
//! backend used where no FPGA acquisition board is attached. Hardware
//! bring-up itself is out of scope; this module only defines the interface
//! the lock engine drives and a faithful-enough simulator to exercise it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use stcl_types::convert::duration_ms;
use stcl_types::model::Trace;

/// Capability the lock engine and node server need from a piece of
/// acquisition hardware: triggered acquisition, decimation control, output
/// writes, and the two external gate pins.
pub trait Acquisition: Send {
    /// Trigger and acquire both channels for the current decimation. `None`
    /// means the trigger was missed or the buffer never filled.
    async fn acquire(&mut self) -> Option<Trace>;

    /// Trigger and acquire a single channel, returning the scan duration
    /// (ms) and its samples.
    async fn acquire_ch(&mut self, ch: usize) -> Option<(f64, Vec<f64>)>;

    fn set_dec(&mut self, dec: u32);
    fn dec(&self) -> u32;

    /// Write a DC offset to output `ch` (0 or 1).
    fn write_output(&mut self, ch: usize, value: f64);
    fn read_output(&self, ch: usize) -> f64;

    /// Read external gate pin `ch` (0 or 1); `false` suspends that PID.
    fn read_gpio(&self, ch: usize) -> bool;
}

/// A closed-loop synthetic cavity: two fixed master resonances and up to two
/// slave resonances, each shifted by the output currently written to its
/// driving channel, plus Gaussian measurement noise. Output channel 1 drives
/// the master/ramp resonances; output channel 0 or 1 drives a slave
/// depending on which channel it is assigned.
pub struct SyntheticCavity {
    dec: u32,
    rng: StdRng,
    outputs: [f64; 2],
    gpio: [bool; 2],
    trigger_missed_probability: f64,
    noise_sigma: f64,
    peak_width_ms: f64,
    sensitivity: f64,
    base_master: [f64; 2],
    base_slave: [Option<f64>; 2],
}

impl SyntheticCavity {
    pub fn new(seed: u64, base_master: [f64; 2]) -> Self {
        Self {
            dec: 16,
            rng: StdRng::seed_from_u64(seed),
            outputs: [0.0, 0.0],
            gpio: [true, true],
            trigger_missed_probability: 0.0,
            noise_sigma: 0.01,
            peak_width_ms: 0.02,
            sensitivity: 1.0,
            base_master,
            base_slave: [None, None],
        }
    }

    pub fn set_slave_base(&mut self, idx: usize, position_ms: f64) {
        self.base_slave[idx] = Some(position_ms);
    }

    pub fn set_trigger_missed_probability(&mut self, p: f64) {
        self.trigger_missed_probability = p;
    }

    pub fn set_gpio(&mut self, ch: usize, value: bool) {
        self.gpio[ch] = value;
    }

    fn gaussian(&self, t: f64, center: f64, height: f64) -> f64 {
        height * (-((t - center) / self.peak_width_ms).powi(2)).exp()
    }

    fn render_channel0(&mut self, times: &[f64]) -> Vec<f64> {
        let noise = Normal::new(0.0, self.noise_sigma).unwrap();
        let master_pos = [
            self.base_master[0] - self.sensitivity * self.outputs[1],
            self.base_master[1] - self.sensitivity * self.outputs[1],
        ];
        times
            .iter()
            .map(|&t| {
                let mut v = self.gaussian(t, master_pos[0], 1.0) + self.gaussian(t, master_pos[1], 1.0);
                for (ch, base) in self.base_slave.iter().enumerate() {
                    if let Some(base) = base {
                        let pos = base - self.sensitivity * self.outputs[ch];
                        v += self.gaussian(t, pos, 0.7);
                    }
                }
                v + noise.sample(&mut self.rng)
            })
            .collect()
    }
}

impl Acquisition for SyntheticCavity {
    async fn acquire(&mut self) -> Option<Trace> {
        if self.rng.gen::<f64>() < self.trigger_missed_probability {
            return None;
        }
        let duration = duration_ms(self.dec);
        let n = stcl_types::constants::N_SAMPLES;
        let times: Vec<f64> = (0..n).map(|i| i as f64 * duration / (n as f64 - 1.0)).collect();
        let ch0 = self.render_channel0(&times);
        let ch1 = vec![0.0; n];
        Some(Trace { times_ms: times, channels: vec![ch0, ch1] })
    }

    async fn acquire_ch(&mut self, ch: usize) -> Option<(f64, Vec<f64>)> {
        let trace = self.acquire().await?;
        let duration = *trace.times_ms.last().unwrap();
        Some((duration, trace.channels[ch].clone()))
    }

    fn set_dec(&mut self, dec: u32) {
        self.dec = dec;
    }

    fn dec(&self) -> u32 {
        self.dec
    }

    fn write_output(&mut self, ch: usize, value: f64) {
        self.outputs[ch] = value;
    }

    fn read_output(&self, ch: usize) -> f64 {
        self.outputs[ch]
    }

    fn read_gpio(&self, ch: usize) -> bool {
        self.gpio[ch]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquisition_returns_full_length_trace() {
        let mut cavity = SyntheticCavity::new(1, [0.3, 1.8]);
        let trace = cavity.acquire().await.unwrap();
        assert_eq!(trace.times_ms.len(), stcl_types::constants::N_SAMPLES);
        assert_eq!(trace.channels[0].len(), stcl_types::constants::N_SAMPLES);
    }

    #[tokio::test]
    async fn missed_trigger_probability_yields_none() {
        let mut cavity = SyntheticCavity::new(2, [0.3, 1.8]);
        cavity.set_trigger_missed_probability(1.0);
        assert!(cavity.acquire().await.is_none());
    }

    #[tokio::test]
    async fn output_shifts_slave_peak_position() {
        let mut cavity = SyntheticCavity::new(3, [0.3, 1.8]);
        cavity.set_slave_base(0, 1.0);
        cavity.set_trigger_missed_probability(0.0);
        let (_, base_ch0) = cavity.acquire_ch(0).await.unwrap();
        cavity.write_output(0, 0.5);
        let (_, shifted_ch0) = cavity.acquire_ch(0).await.unwrap();
        assert_ne!(base_ch0, shifted_ch0);
    }
}
