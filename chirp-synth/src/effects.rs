//! Per-instrument effects chain
//!
//! Every instrument's tones sum into a mono scratch buffer; this stage
//! reads that buffer, applies the enabled effects in a fixed order
//! (distortion → bitcrusher → effect-filter → panning delay → chorus →
//! reverb) and adds the stereo result to the global mix. Each instrument
//! owns its delay lines, and an instrument whose tones have stopped
//! flushes those lines before deactivating.

use chirp_song::{
    effect, Instrument, BITCRUSHER_FREQ_RANGE, BITCRUSHER_QUANTIZATION_RANGE, DISTORTION_MAX,
    FILTER_MAX_POINTS, PAN_CENTER, PAN_MAX, REVERB_RANGE,
};

use crate::filter::{control_point_to_coefficients, DynamicBiquad};
use crate::synths::InstrumentWaves;

/// Clip ceiling of the distortion soft-clip curve.
const DISTORTION_BASE_VOLUME: f64 = 0.6;

/// Maximum inter-channel delay the panning stage introduces.
const PAN_DELAY_SECONDS_MAX: f64 = 0.0005;

/// Chorus tap base delays in seconds, three taps per stereo side.
const CHORUS_TAP_DELAYS: [[f64; 3]; 2] =
    [[0.0051, 0.0073, 0.0114], [0.0054, 0.0070, 0.0109]];

/// Chorus tap phase offsets in radians, per side.
const CHORUS_TAP_PHASES: [[f64; 3]; 2] = [[0.0, 2.1, 4.2], [3.2, 5.3, 1.0]];

/// Sinusoidal swing of each chorus tap, in seconds, and its period.
const CHORUS_SWING_SECONDS: f64 = 0.0019;
const CHORUS_PERIOD_SECONDS: f64 = 2.0;

/// Reverb feedback delay network ring size (fixed, not rate-scaled).
pub const REVERB_DELAY_BUFFER_SIZE: usize = 16384;
const REVERB_DELAY_MASK: usize = REVERB_DELAY_BUFFER_SIZE - 1;

/// Prime-ish tap offsets within the reverb ring.
const REVERB_TAP_OFFSETS: [usize; 3] = [3041, 6426, 10907];

/// Per-instrument playback state: tone-independent wave caches, the
/// effects chain's delay lines, and the flush/deactivate lifecycle.
#[derive(Debug, Default)]
pub struct InstrumentState {
    pub waves: InstrumentWaves,

    /// Instrument is producing (or flushing) audio.
    pub active: bool,
    /// No tones remain; delay lines are being drained.
    pub flushing: bool,
    flushed_samples: usize,
    /// Set when the flush completes; the orchestrator clears delay lines
    /// and deactivates at the end of the tick.
    pub deactivate_after_this_tick: bool,

    effect_filters: [DynamicBiquad; FILTER_MAX_POINTS],
    effect_filter_count: usize,

    bitcrush_phase: f64,
    bitcrush_held: f64,

    pan_delay: Vec<f32>,
    pan_index: usize,

    chorus_delay: [Vec<f32>; 2],
    chorus_index: usize,
    chorus_phase: f64,

    reverb_delay: Vec<f32>,
    reverb_index: usize,
    reverb_lowpass: [f64; 4],
}

impl InstrumentState {
    /// Note that tones fed the scratch buffer this run (or did not); this
    /// drives the flush lifecycle.
    pub fn begin_run(&mut self, has_tones: bool) {
        if has_tones {
            self.active = true;
            self.flushing = false;
            self.flushed_samples = 0;
            self.deactivate_after_this_tick = false;
        } else if self.active && !self.flushing {
            self.flushing = true;
            self.flushed_samples = 0;
        }
    }

    /// Combined capacity of the enabled delay lines, in samples; the
    /// flush lasts one full traversal.
    pub fn delay_capacity(&self, instrument: &Instrument, sample_rate: f64) -> usize {
        let mut capacity = 0;
        if instrument.effects & effect::PANNING != 0 {
            capacity += pan_delay_size(sample_rate);
        }
        if instrument.effects & effect::CHORUS != 0 {
            capacity += chorus_delay_size(sample_rate);
        }
        if instrument.effects & effect::REVERB != 0 {
            capacity += REVERB_DELAY_BUFFER_SIZE;
        }
        capacity
    }

    /// Zero every delay line and filter history. Called when the
    /// instrument deactivates and on playback reset.
    pub fn clear_delay_lines(&mut self) {
        self.pan_delay.fill(0.0);
        for line in &mut self.chorus_delay {
            line.fill(0.0);
        }
        self.reverb_delay.fill(0.0);
        self.reverb_lowpass = [0.0; 4];
        self.bitcrush_phase = 0.0;
        self.bitcrush_held = 0.0;
        for filter in &mut self.effect_filters {
            filter.reset_state();
        }
    }

    /// True once every enabled delay buffer holds only zeros.
    pub fn delay_lines_are_silent(&self) -> bool {
        self.pan_delay.iter().all(|&sample| sample == 0.0)
            && self.chorus_delay.iter().all(|line| line.iter().all(|&sample| sample == 0.0))
            && self.reverb_delay.iter().all(|&sample| sample == 0.0)
    }

    /// Clamp denormal or non-finite values in every delay line and filter
    /// history; part of the per-tick sanitization sweep.
    pub fn sanitize(&mut self) {
        for filter in &mut self.effect_filters[..self.effect_filter_count] {
            filter.sanitize();
        }
        for value in &mut self.reverb_lowpass {
            if !value.is_finite() || value.abs() > 100.0 {
                *value = 0.0;
            }
        }
        if !self.bitcrush_held.is_finite() {
            self.bitcrush_held = 0.0;
        }
        for line in [&mut self.pan_delay, &mut self.reverb_delay]
            .into_iter()
            .chain(self.chorus_delay.iter_mut())
        {
            for sample in line.iter_mut() {
                if !sample.is_finite() || sample.abs() > 100.0 {
                    *sample = 0.0;
                } else if sample.abs() < 1e-24 {
                    *sample = 0.0;
                }
            }
        }
    }

    /// Apply the enabled effects to the instrument's mono scratch buffer
    /// and add the stereo result into the global mix.
    pub fn apply_effects(
        &mut self,
        instrument: &Instrument,
        input: &[f32],
        sample_rate: f64,
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        let effects = instrument.effects;
        let input_mult: f64 = if self.flushing { 0.0 } else { 1.0 };

        // Distortion parameters.
        let distortion_slider = instrument.distortion.min(DISTORTION_MAX) as f64
            / DISTORTION_MAX as f64;
        let distortion_shape = (1.0 - 0.95 * distortion_slider).powf(1.5);
        let distortion_drive = 1.0 + 2.0 * distortion_slider;

        // Bitcrusher parameters.
        let crush_setting = instrument.bitcrusher_freq.min(BITCRUSHER_FREQ_RANGE - 1);
        let crush_phase_delta = (2.0f64)
            .powf((crush_setting as f64 - (BITCRUSHER_FREQ_RANGE - 1) as f64) * 0.5);
        let quantization = instrument
            .bitcrusher_quantization
            .min(BITCRUSHER_QUANTIZATION_RANGE - 1);
        let quantization_scale = (1u32 << (BITCRUSHER_QUANTIZATION_RANGE - quantization)) as f64;

        // Effect-filter cascade, loaded statically for this run.
        self.effect_filter_count = 0;
        if effects & effect::FILTER != 0 {
            for (index, point) in instrument.distortion_filter.points.iter().enumerate() {
                let coefficients = control_point_to_coefficients(point, sample_rate, 1.0);
                self.effect_filters[index].load_coefficients_with_gradient(
                    &coefficients,
                    &coefficients,
                    0.0,
                );
            }
            self.effect_filter_count = instrument.distortion_filter.points.len();
        }

        // Panning parameters.
        if effects & effect::PANNING != 0 && self.pan_delay.is_empty() {
            self.pan_delay = vec![0.0; pan_delay_size(sample_rate)];
        }
        let pan = instrument.pan.min(PAN_MAX) as f64 / PAN_MAX as f64;
        let pan_angle = pan * std::f64::consts::FRAC_PI_2;
        let pan_gain_left = pan_angle.cos();
        let pan_gain_right = pan_angle.sin();
        let pan_offset = (pan - 0.5).abs() * 2.0 * PAN_DELAY_SECONDS_MAX * sample_rate;
        // The louder side arrives first; the far ear is delayed.
        let (pan_delay_left, pan_delay_right) = if instrument.pan >= PAN_CENTER {
            (pan_offset as usize, 0)
        } else {
            (0, pan_offset as usize)
        };

        // Chorus parameters.
        if effects & effect::CHORUS != 0 && self.chorus_delay[0].is_empty() {
            let size = chorus_delay_size(sample_rate) / 2;
            self.chorus_delay = [vec![0.0; size], vec![0.0; size]];
        }
        let chorus_phase_delta =
            std::f64::consts::TAU / (CHORUS_PERIOD_SECONDS * sample_rate);

        // Reverb parameters.
        if effects & effect::REVERB != 0 && self.reverb_delay.is_empty() {
            self.reverb_delay = vec![0.0; REVERB_DELAY_BUFFER_SIZE];
        }
        let reverb_norm = instrument.reverb.min(REVERB_RANGE - 1) as f64
            / (REVERB_RANGE - 1) as f64;
        let reverb_mult = 0.72 * reverb_norm.sqrt();
        let reverb_send = 0.5 * reverb_norm;
        let reverb_smoothing = 0.6;

        for index in 0..input.len() {
            let mut sample = input[index] as f64 * input_mult;

            if effects & effect::DISTORTION != 0 {
                let driven = sample * distortion_drive;
                sample = DISTORTION_BASE_VOLUME * driven
                    / ((1.0 - distortion_shape) * driven.abs() + distortion_shape);
            }

            if effects & effect::BITCRUSHER != 0 {
                self.bitcrush_phase += crush_phase_delta;
                if self.bitcrush_phase >= 1.0 {
                    self.bitcrush_phase -= self.bitcrush_phase.floor();
                    self.bitcrush_held =
                        ((sample * quantization_scale).floor() + 0.5) / quantization_scale;
                }
                sample = self.bitcrush_held;
            }

            for filter in &mut self.effect_filters[..self.effect_filter_count] {
                sample = filter.process(sample);
            }

            let (mut left, mut right) = if effects & effect::PANNING != 0 {
                let mask = self.pan_delay.len() - 1;
                self.pan_delay[self.pan_index] = sample as f32;
                let read_left =
                    self.pan_delay[(self.pan_index + self.pan_delay.len() - pan_delay_left) & mask]
                        as f64;
                let read_right = self.pan_delay
                    [(self.pan_index + self.pan_delay.len() - pan_delay_right) & mask]
                    as f64;
                self.pan_index = (self.pan_index + 1) & mask;
                (read_left * pan_gain_left, read_right * pan_gain_right)
            } else {
                (sample, sample)
            };

            if effects & effect::CHORUS != 0 {
                let mask = self.chorus_delay[0].len() - 1;
                self.chorus_delay[0][self.chorus_index] = left as f32;
                self.chorus_delay[1][self.chorus_index] = right as f32;
                let mut wet = [0.0f64; 2];
                for side in 0..2 {
                    let mut taps = [0.0f64; 3];
                    for tap in 0..3 {
                        let swing = (self.chorus_phase + CHORUS_TAP_PHASES[side][tap]).sin()
                            * CHORUS_SWING_SECONDS;
                        let delay_samples =
                            (CHORUS_TAP_DELAYS[side][tap] + swing) * sample_rate;
                        let offset = delay_samples as usize;
                        taps[tap] = self.chorus_delay[side]
                            [(self.chorus_index + self.chorus_delay[side].len() - offset) & mask]
                            as f64;
                    }
                    let dry = if side == 0 { left } else { right };
                    wet[side] = 0.5 * (dry - taps[0] + taps[1] - taps[2]);
                }
                self.chorus_index = (self.chorus_index + 1) & mask;
                self.chorus_phase += chorus_phase_delta;
                left = wet[0];
                right = wet[1];
            }

            if effects & effect::REVERB != 0 {
                let position = self.reverb_index;
                let tap0 = self.reverb_delay[position] as f64
                    + (left + right) * reverb_send;
                let tap1 = self.reverb_delay[(position + REVERB_TAP_OFFSETS[0])
                    & REVERB_DELAY_MASK] as f64;
                let tap2 = self.reverb_delay[(position + REVERB_TAP_OFFSETS[1])
                    & REVERB_DELAY_MASK] as f64;
                let tap3 = self.reverb_delay[(position + REVERB_TAP_OFFSETS[2])
                    & REVERB_DELAY_MASK] as f64;

                // 4x4 Hadamard mix keeps the feedback energy-neutral.
                let mixed = [
                    0.5 * (tap0 + tap1 + tap2 + tap3),
                    0.5 * (tap0 - tap1 + tap2 - tap3),
                    0.5 * (tap0 + tap1 - tap2 - tap3),
                    0.5 * (tap0 - tap1 - tap2 + tap3),
                ];
                for (lowpass, &value) in self.reverb_lowpass.iter_mut().zip(&mixed) {
                    *lowpass += (value - *lowpass) * reverb_smoothing;
                }
                self.reverb_delay[(position + REVERB_TAP_OFFSETS[0]) & REVERB_DELAY_MASK] =
                    (self.reverb_lowpass[0] * reverb_mult) as f32;
                self.reverb_delay[(position + REVERB_TAP_OFFSETS[1]) & REVERB_DELAY_MASK] =
                    (self.reverb_lowpass[1] * reverb_mult) as f32;
                self.reverb_delay[(position + REVERB_TAP_OFFSETS[2]) & REVERB_DELAY_MASK] =
                    (self.reverb_lowpass[2] * reverb_mult) as f32;
                self.reverb_delay[position] = (self.reverb_lowpass[3] * reverb_mult) as f32;
                self.reverb_index = (position + 1) & REVERB_DELAY_MASK;

                left += tap1 + tap3 * 0.5;
                right += tap2 + tap3 * 0.5;
            }

            out_left[index] += left as f32;
            out_right[index] += right as f32;
        }

        if self.flushing {
            self.flushed_samples += input.len();
            if self.flushed_samples >= self.delay_capacity(instrument, sample_rate) {
                self.deactivate_after_this_tick = true;
            }
        }
    }
}

fn pan_delay_size(sample_rate: f64) -> usize {
    ((PAN_DELAY_SECONDS_MAX * sample_rate) as usize + 1).next_power_of_two()
}

fn chorus_delay_size(sample_rate: f64) -> usize {
    // Two per-side lines sized for the deepest tap plus swing.
    let deepest = CHORUS_TAP_DELAYS
        .iter()
        .flatten()
        .fold(0.0f64, |max, &delay| max.max(delay));
    2 * (((deepest + CHORUS_SWING_SECONDS) * sample_rate) as usize + 1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirp_song::InstrumentKind;

    fn stereo_buffers(length: usize) -> (Vec<f32>, Vec<f32>) {
        (vec![0.0; length], vec![0.0; length])
    }

    #[test]
    fn test_no_effects_is_passthrough() {
        let instrument = Instrument::new(InstrumentKind::Chip);
        let mut state = InstrumentState::default();
        state.begin_run(true);
        let input = vec![0.25f32; 64];
        let (mut left, mut right) = stereo_buffers(64);
        state.apply_effects(&instrument, &input, 44100.0, &mut left, &mut right);
        assert_eq!(left, input);
        assert_eq!(right, input);
    }

    #[test]
    fn test_distortion_is_bounded() {
        let mut instrument = Instrument::new(InstrumentKind::Chip);
        instrument.effects = effect::DISTORTION;
        instrument.distortion = DISTORTION_MAX;
        let mut state = InstrumentState::default();
        state.begin_run(true);
        let input: Vec<f32> = (0..256).map(|i| ((i as f32 / 16.0).sin()) * 3.0).collect();
        let (mut left, mut right) = stereo_buffers(256);
        state.apply_effects(&instrument, &input, 44100.0, &mut left, &mut right);
        for &sample in &left {
            assert!(sample.abs() <= DISTORTION_BASE_VOLUME as f32 + 1e-6);
        }
    }

    #[test]
    fn test_hard_pan_silences_one_side() {
        let mut instrument = Instrument::new(InstrumentKind::Chip);
        instrument.effects = effect::PANNING;
        instrument.pan = PAN_MAX; // hard right
        let mut state = InstrumentState::default();
        state.begin_run(true);
        let input = vec![0.5f32; 512];
        let (mut left, mut right) = stereo_buffers(512);
        state.apply_effects(&instrument, &input, 44100.0, &mut left, &mut right);
        let rms = |samples: &[f32]| {
            (samples.iter().map(|&s| s as f64 * s as f64).sum::<f64>() / samples.len() as f64)
                .sqrt()
        };
        assert!(rms(&left) < rms(&right) * 0.01);
    }

    #[test]
    fn test_reverb_produces_a_tail() {
        let mut instrument = Instrument::new(InstrumentKind::Chip);
        instrument.effects = effect::REVERB;
        instrument.reverb = 4;
        let mut state = InstrumentState::default();
        state.begin_run(true);
        // An impulse, then silence.
        let mut input = vec![0.0f32; 8192];
        input[0] = 1.0;
        let (mut left, mut right) = stereo_buffers(8192);
        state.apply_effects(&instrument, &input, 44100.0, &mut left, &mut right);
        let tail_energy: f64 = left[4000..].iter().map(|&s| s.abs() as f64).sum();
        assert!(tail_energy > 0.0, "reverb produced no tail");
    }

    #[test]
    fn test_flush_deactivates_within_capacity() {
        let mut instrument = Instrument::new(InstrumentKind::Chip);
        instrument.effects = effect::REVERB | effect::CHORUS;
        instrument.reverb = 3;
        let mut state = InstrumentState::default();
        state.begin_run(true);
        let input = vec![0.5f32; 1024];
        let (mut left, mut right) = stereo_buffers(1024);
        state.apply_effects(&instrument, &input, 44100.0, &mut left, &mut right);

        let capacity = state.delay_capacity(&instrument, 44100.0);
        state.begin_run(false);
        assert!(state.flushing);
        let silence = vec![0.0f32; 1024];
        let mut runs = 0;
        while !state.deactivate_after_this_tick {
            let (mut flush_left, mut flush_right) = stereo_buffers(1024);
            state.apply_effects(&instrument, &silence, 44100.0, &mut flush_left, &mut flush_right);
            runs += 1;
            assert!(runs <= capacity / 1024 + 2, "flush never completed");
        }
        state.clear_delay_lines();
        assert!(state.delay_lines_are_silent());
    }

    #[test]
    fn test_bitcrusher_quantizes() {
        let mut instrument = Instrument::new(InstrumentKind::Chip);
        instrument.effects = effect::BITCRUSHER;
        instrument.bitcrusher_freq = BITCRUSHER_FREQ_RANGE - 1; // hold every sample
        instrument.bitcrusher_quantization = BITCRUSHER_QUANTIZATION_RANGE - 1;
        let mut state = InstrumentState::default();
        state.begin_run(true);
        let input: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();
        let (mut left, mut right) = stereo_buffers(128);
        state.apply_effects(&instrument, &input, 44100.0, &mut left, &mut right);
        // Heavy quantization leaves only a few distinct levels.
        let mut levels: Vec<i32> = left.iter().map(|&s| (s * 100.0).round() as i32).collect();
        levels.sort_unstable();
        levels.dedup();
        assert!(levels.len() <= 3, "levels: {levels:?}");
    }
}
