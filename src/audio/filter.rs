use biquad::{Coefficients, Q_BUTTERWORTH_F32, ToHertz, Type};

use super::config::{EQ_GLIDE_SECONDS, HIGH_CROSSOVER_HZ, LOW_CROSSOVER_HZ, MAX_BUFFER_FRAMES};
use super::errors::FilterError;
use super::types::EqBand;

/// Map a 0-100 percent cut control to linear gain. Monotone with the fixed
/// points 0% -> 0.0, 50% -> 0.5, 100% -> 1.0.
pub fn cut_gain_from_percent(percent: f32) -> f32 {
    (percent / 100.0).clamp(0.0, 1.0)
}

/// How the band-split filters walk a chunk. Both backends produce bit
/// identical output; the block variant runs each one-pole recurrence over the
/// whole chunk before combining, which pipelines far better than the
/// per-frame interleaving of the portable baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterBackend {
    SampleLoop,
    Block,
}

/// Direct-form-1 state for one channel of one filter. Matches the recurrence
/// biquad's `DirectForm1::run` applies, with the state held open so the block
/// backend can stream a whole chunk through it.
#[derive(Debug, Clone, Copy, Default)]
struct Df1State {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Df1State {
    #[inline]
    fn run(&mut self, c: &Coefficients<f32>, input: f32) -> f32 {
        let out = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2
            - c.a1 * self.y1
            - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = out;
        out
    }

    /// Stride-2 block run over one channel of an interleaved chunk.
    fn run_block(&mut self, c: &Coefficients<f32>, input: &[f32], channel: usize, out: &mut [f32]) {
        let frames = input.len() / 2;
        for i in 0..frames {
            out[i] = self.run(c, input[i * 2 + channel]);
        }
    }
}

/// Linear per-frame glide toward a target, used for the band gains.
#[derive(Debug, Clone, Copy)]
struct GlideParam {
    current: f32,
    target: f32,
    step: f32,
}

impl GlideParam {
    fn new(value: f32, step: f32) -> Self {
        Self {
            current: value,
            target: value,
            step,
        }
    }

    #[inline]
    fn advance(&mut self) -> f32 {
        if self.current < self.target {
            self.current = (self.current + self.step).min(self.target);
        } else if self.current > self.target {
            self.current = (self.current - self.step).max(self.target);
        }
        self.current
    }

    fn snap(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }
}

/// Per-deck three-band cut-only EQ.
///
/// The signal is split with one-pole low-passes at the two crossovers:
/// `low = lp200(x)`, `high = x - lp2000(x)`, `mid = lp2000(x) - lp200(x)`.
/// Each band gain is in [0, 1]; unity gains reconstruct the input.
pub struct ThreeBandFilter {
    backend: FilterBackend,
    low_coeffs: Coefficients<f32>,
    high_coeffs: Coefficients<f32>,
    low_state: [Df1State; 2],
    high_state: [Df1State; 2],
    gain_low: GlideParam,
    gain_mid: GlideParam,
    gain_high: GlideParam,
    // Planar scratch for the block backend: lp200 and lp2000 per channel.
    scratch_low: [Vec<f32>; 2],
    scratch_band: [Vec<f32>; 2],
}

impl ThreeBandFilter {
    pub fn new(sample_rate: f32, backend: FilterBackend) -> Result<Self, FilterError> {
        let low_coeffs = Coefficients::<f32>::from_params(
            Type::SinglePoleLowPass,
            sample_rate.hz(),
            LOW_CROSSOVER_HZ.hz(),
            Q_BUTTERWORTH_F32,
        )
        .map_err(|_| FilterError::Coefficients {
            band: "low",
            cutoff_hz: LOW_CROSSOVER_HZ,
        })?;
        let high_coeffs = Coefficients::<f32>::from_params(
            Type::SinglePoleLowPass,
            sample_rate.hz(),
            HIGH_CROSSOVER_HZ.hz(),
            Q_BUTTERWORTH_F32,
        )
        .map_err(|_| FilterError::Coefficients {
            band: "high",
            cutoff_hz: HIGH_CROSSOVER_HZ,
        })?;
        let glide_step = 1.0 / (EQ_GLIDE_SECONDS * sample_rate);
        Ok(Self {
            backend,
            low_coeffs,
            high_coeffs,
            low_state: [Df1State::default(); 2],
            high_state: [Df1State::default(); 2],
            gain_low: GlideParam::new(1.0, glide_step),
            gain_mid: GlideParam::new(1.0, glide_step),
            gain_high: GlideParam::new(1.0, glide_step),
            scratch_low: [
                vec![0.0; MAX_BUFFER_FRAMES],
                vec![0.0; MAX_BUFFER_FRAMES],
            ],
            scratch_band: [
                vec![0.0; MAX_BUFFER_FRAMES],
                vec![0.0; MAX_BUFFER_FRAMES],
            ],
        })
    }

    pub fn backend(&self) -> FilterBackend {
        self.backend
    }

    /// Set the glide target for one band gain, clamped to [0, 1].
    pub fn set_gain(&mut self, band: EqBand, value: f32) {
        let value = value.clamp(0.0, 1.0);
        match band {
            EqBand::Low => self.gain_low.target = value,
            EqBand::Mid => self.gain_mid.target = value,
            EqBand::High => self.gain_high.target = value,
        }
    }

    /// Snap all gains and clear filter state (used on cue/rebind).
    pub fn reset(&mut self) {
        self.low_state = [Df1State::default(); 2];
        self.high_state = [Df1State::default(); 2];
        self.gain_low.snap(self.gain_low.target);
        self.gain_mid.snap(self.gain_mid.target);
        self.gain_high.snap(self.gain_high.target);
    }

    /// Process `frames` interleaved stereo frames in place.
    pub fn process(&mut self, chunk: &mut [f32], frames: usize) {
        debug_assert!(chunk.len() >= frames * 2);
        match self.backend {
            FilterBackend::SampleLoop => self.process_sample_loop(chunk, frames),
            FilterBackend::Block => self.process_block(chunk, frames),
        }
    }

    fn process_sample_loop(&mut self, chunk: &mut [f32], frames: usize) {
        for i in 0..frames {
            let gl = self.gain_low.advance();
            let gm = self.gain_mid.advance();
            let gh = self.gain_high.advance();
            for ch in 0..2 {
                let x = chunk[i * 2 + ch];
                let low = self.low_state[ch].run(&self.low_coeffs, x);
                let band = self.high_state[ch].run(&self.high_coeffs, x);
                let high = x - band;
                let mid = band - low;
                chunk[i * 2 + ch] = gl * low + gm * mid + gh * high;
            }
        }
    }

    fn process_block(&mut self, chunk: &mut [f32], frames: usize) {
        let input = &chunk[..frames * 2];
        for ch in 0..2 {
            self.low_state[ch].run_block(
                &self.low_coeffs,
                input,
                ch,
                &mut self.scratch_low[ch][..frames],
            );
            self.high_state[ch].run_block(
                &self.high_coeffs,
                input,
                ch,
                &mut self.scratch_band[ch][..frames],
            );
        }
        for i in 0..frames {
            let gl = self.gain_low.advance();
            let gm = self.gain_mid.advance();
            let gh = self.gain_high.advance();
            for ch in 0..2 {
                let x = chunk[i * 2 + ch];
                let low = self.scratch_low[ch][i];
                let band = self.scratch_band[ch][i];
                let high = x - band;
                let mid = band - low;
                chunk[i * 2 + ch] = gl * low + gm * mid + gh * high;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic noise without pulling in a rand dependency.
    fn noise(len: usize) -> Vec<f32> {
        let mut state: u32 = 0x1234_5678;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn cut_gain_curve_fixed_points() {
        assert_eq!(cut_gain_from_percent(0.0), 0.0);
        assert_eq!(cut_gain_from_percent(50.0), 0.5);
        assert_eq!(cut_gain_from_percent(100.0), 1.0);
        assert_eq!(cut_gain_from_percent(150.0), 1.0);
        assert_eq!(cut_gain_from_percent(-5.0), 0.0);
    }

    #[test]
    fn cut_gain_curve_is_monotone() {
        let mut prev = -1.0;
        for p in 0..=100 {
            let g = cut_gain_from_percent(p as f32);
            assert!(g >= prev, "curve dipped at {p}%");
            prev = g;
        }
    }

    #[test]
    fn backends_are_equivalent() {
        let mut loop_filter = ThreeBandFilter::new(44100.0, FilterBackend::SampleLoop).unwrap();
        let mut block_filter = ThreeBandFilter::new(44100.0, FilterBackend::Block).unwrap();
        for f in [
            &mut loop_filter as &mut ThreeBandFilter,
            &mut block_filter,
        ] {
            f.set_gain(EqBand::Low, 0.2);
            f.set_gain(EqBand::Mid, 0.9);
            f.set_gain(EqBand::High, 0.5);
        }

        let signal = noise(4096 * 2);
        // Process in uneven chunk sizes so state passthrough is exercised.
        for &(start, frames) in &[(0usize, 480usize), (480, 1024), (1504, 256), (1760, 2336)] {
            let mut a = signal[start * 2..(start + frames) * 2].to_vec();
            let mut b = a.clone();
            loop_filter.process(&mut a, frames);
            block_filter.process(&mut b, frames);
            for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
                assert!(
                    (x - y).abs() <= 1e-6,
                    "backends diverged at sample {i}: {x} vs {y}"
                );
            }
        }
    }

    #[test]
    fn unity_gains_pass_signal_through() {
        let mut filter = ThreeBandFilter::new(44100.0, FilterBackend::SampleLoop).unwrap();
        let signal = noise(1024 * 2);
        let mut processed = signal.clone();
        filter.process(&mut processed, 1024);
        for (i, (x, y)) in signal.iter().zip(processed.iter()).enumerate() {
            assert!(
                (x - y).abs() <= 1e-6,
                "unity filter altered sample {i}: {x} -> {y}"
            );
        }
    }

    #[test]
    fn low_cut_removes_dc() {
        let mut filter = ThreeBandFilter::new(44100.0, FilterBackend::Block).unwrap();
        filter.set_gain(EqBand::Low, 0.0);
        // DC sits entirely in the low band; after the glide and the filter
        // settle, the output should be near zero.
        let mut out = 0.0f32;
        for _ in 0..40 {
            let mut chunk = vec![1.0f32; 1024 * 2];
            filter.process(&mut chunk, 1024);
            out = chunk[1024 * 2 - 2];
        }
        assert!(out.abs() < 1e-3, "DC survived a full low cut: {out}");
    }

    #[test]
    fn gain_glide_reaches_target() {
        let mut filter = ThreeBandFilter::new(44100.0, FilterBackend::SampleLoop).unwrap();
        filter.set_gain(EqBand::Mid, 0.0);
        // 50 ms glide at 44.1 kHz is ~2205 frames; 4096 is comfortably past.
        let mut chunk = vec![0.0f32; 4096 * 2];
        filter.process(&mut chunk, 4096);
        assert_eq!(filter.gain_mid.current, 0.0);
    }
}
