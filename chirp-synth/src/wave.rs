//! Wave-table construction and caching
//!
//! Chip waves are integrated so the synth loops can read them as
//! band-limited first differences. Noise tables come from the classic
//! one-bit LFSR recipes (seeded, so runs are reproducible). Spectrum and
//! harmonics instruments build their tables through the inverse FFT.
//!
//! All tables carry one extra wrap sample at the end so interpolating
//! reads never need a second bounds check.

use chirp_song::config;
use chirp_song::{HARMONICS_CONTROL_POINTS, SPECTRUM_CONTROL_POINTS};

use crate::fft::{normalize_peak, synthesize_from_spectrum};
use crate::rng::Lcg;

/// FM sine table length (power of two, indexed with a mask).
pub const SINE_WAVE_LENGTH: usize = 256;
pub const SINE_WAVE_MASK: usize = SINE_WAVE_LENGTH - 1;

/// Noise and spectrum table length.
pub const NOISE_WAVE_LENGTH: usize = 32768;
pub const NOISE_WAVE_MASK: usize = NOISE_WAVE_LENGTH - 1;

/// Harmonics single-cycle table length.
pub const HARMONICS_WAVE_LENGTH: usize = 2048;

/// Guitar pluck excitation wave length.
pub const IMPULSE_WAVE_LENGTH: usize = 256;

/// Spectrum control points are spaced a quarter octave apart, anchored so
/// point 0 sits at bin 4 of the table.
const SPECTRUM_POINTS_PER_OCTAVE: f64 = 4.0;
const SPECTRUM_BASE_BIN: f64 = 4.0;

// =============================================================================
// Basic transforms
// =============================================================================

/// Subtract the mean so a wave carries no DC.
pub fn center_wave(samples: &[f64]) -> Vec<f32> {
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    samples.iter().map(|&sample| (sample - mean) as f32).collect()
}

/// Running sum of a centered wave, with one extra closing sample. Reading
/// first differences of this table at any phase step reproduces the wave
/// with linear-interpolation band-limiting.
pub fn perform_integral(wave: &[f32]) -> Vec<f32> {
    let mut integral = Vec::with_capacity(wave.len() + 1);
    let mut sum = 0.0f64;
    for &sample in wave {
        integral.push(sum as f32);
        sum += sample as f64;
    }
    integral.push(sum as f32);
    integral
}

fn with_wrap_sample(mut wave: Vec<f32>) -> Vec<f32> {
    let first = wave[0];
    wave.push(first);
    wave
}

// =============================================================================
// Wave bank
// =============================================================================

/// Lazily built wave tables owned by one engine instance, so multiple
/// engines can coexist without sharing mutable globals.
#[derive(Debug)]
pub struct WaveBank {
    chip: Vec<Option<Vec<f32>>>,
    noise: Vec<Option<Vec<f32>>>,
    sine: Option<Vec<f32>>,
    impulse: Option<Vec<f32>>,
}

impl WaveBank {
    pub fn new() -> WaveBank {
        WaveBank {
            chip: vec![None; config::CHIP_WAVES.len()],
            noise: vec![None; config::NOISE_WAVES.len()],
            sine: None,
            impulse: None,
        }
    }

    /// The integrated table for a chip wave.
    pub fn chip_wave(&mut self, index: usize) -> &[f32] {
        let index = index.min(config::CHIP_WAVES.len() - 1);
        self.chip[index].get_or_insert_with(|| {
            perform_integral(&center_wave(config::CHIP_WAVES[index].samples))
        })
    }

    /// The raw table for a noise wave.
    pub fn noise_wave(&mut self, index: usize, rng: &mut Lcg) -> &[f32] {
        let index = index.min(config::NOISE_WAVES.len() - 1);
        self.noise[index].get_or_insert_with(|| generate_noise_wave(index, rng))
    }

    /// One cycle of sine with a wrap sample, for the FM operators.
    pub fn sine_wave(&mut self) -> &[f32] {
        self.sine.get_or_insert_with(|| {
            let mut wave: Vec<f32> = (0..SINE_WAVE_LENGTH)
                .map(|i| (std::f64::consts::TAU * i as f64 / SINE_WAVE_LENGTH as f64).sin() as f32)
                .collect();
            let first = wave[0];
            wave.push(first);
            wave
        })
    }

    /// The integrated antialiased impulse used to excite guitar strings.
    pub fn guitar_impulse(&mut self) -> &[f32] {
        self.impulse.get_or_insert_with(build_impulse_wave)
    }
}

// =============================================================================
// Noise recipes
// =============================================================================

fn generate_noise_wave(index: usize, rng: &mut Lcg) -> Vec<f32> {
    let mut wave = vec![0.0f32; NOISE_WAVE_LENGTH];
    match config::NOISE_WAVES[index].name {
        "retro" => lfsr_noise(&mut wave, |buffer| buffer + (1 << 14)),
        "clang" => lfsr_noise(&mut wave, |buffer| buffer + (2 << 14)),
        "buzz" => lfsr_noise(&mut wave, |buffer| buffer + (10 << 2)),
        "white" => {
            for sample in &mut wave {
                *sample = rng.next_signed() as f32;
            }
        }
        _ => {
            // "hollow": lowpassed noise built in the frequency domain.
            let bins = NOISE_WAVE_LENGTH / 2;
            let mut amplitudes = vec![0.0f32; bins];
            let mut phases = vec![0.0f32; bins];
            for bin in 1..bins {
                let rolloff = 1.0 / (1.0 + (bin as f32 / 96.0).powi(2));
                amplitudes[bin] = rolloff;
                phases[bin] = (rng.next_f64() * std::f64::consts::TAU) as f32;
            }
            wave = synthesize_from_spectrum(&amplitudes, &phases, NOISE_WAVE_LENGTH);
            normalize_peak(&mut wave, 1.0);
        }
    }
    with_wrap_sample(wave)
}

/// One-bit linear feedback shift register noise; `advance` mutates the
/// register when the feedback taps fire.
fn lfsr_noise(wave: &mut [f32], advance: impl Fn(u32) -> u32) {
    let mut buffer: u32 = 1;
    for sample in wave.iter_mut() {
        *sample = (buffer & 1) as f32 * 2.0 - 1.0;
        let mut next = buffer >> 1;
        if (buffer + next) & 1 == 1 {
            next = advance(next);
        }
        buffer = next;
    }
}

// =============================================================================
// Spectrum waves
// =============================================================================

/// Build a noise wave from 30 spectrum control points. Bin phases are
/// randomized (from the engine's seedable RNG) so every instrument gets
/// its own grain.
pub fn build_spectrum_wave(spectrum: &[u32; SPECTRUM_CONTROL_POINTS], rng: &mut Lcg) -> Vec<f32> {
    let bins = NOISE_WAVE_LENGTH / 2;
    let mut amplitudes = vec![0.0f32; bins];
    let mut phases = vec![0.0f32; bins];
    for bin in 1..bins {
        let position =
            SPECTRUM_POINTS_PER_OCTAVE * (bin as f64 / SPECTRUM_BASE_BIN).log2();
        let amplitude = spectrum_amplitude_at(spectrum, position);
        if amplitude <= 0.0 {
            continue;
        }
        // A 1/sqrt(f) tilt keeps equal control settings sounding equally
        // loud per octave.
        let tilt = (SPECTRUM_BASE_BIN / bin as f64).sqrt();
        amplitudes[bin] = (amplitude * tilt) as f32;
        phases[bin] = (rng.next_f64() * std::f64::consts::TAU) as f32;
    }
    let mut wave = synthesize_from_spectrum(&amplitudes, &phases, NOISE_WAVE_LENGTH);
    normalize_peak(&mut wave, 1.0);
    with_wrap_sample(wave)
}

/// Interpolated control-point amplitude at a fractional point position.
fn spectrum_amplitude_at(spectrum: &[u32; SPECTRUM_CONTROL_POINTS], position: f64) -> f64 {
    let curve = |value: u32| (value as f64 / chirp_song::SPECTRUM_MAX as f64).powi(3);
    if position < 0.0 {
        // Below the first control point the spectrum fades toward DC.
        return curve(spectrum[0]) * (1.0 + position / SPECTRUM_POINTS_PER_OCTAVE).max(0.0);
    }
    let index = position.floor() as usize;
    if index + 1 >= SPECTRUM_CONTROL_POINTS {
        return if index < SPECTRUM_CONTROL_POINTS {
            curve(spectrum[index])
        } else {
            0.0
        };
    }
    let fraction = position - index as f64;
    curve(spectrum[index]) * (1.0 - fraction) + curve(spectrum[index + 1]) * fraction
}

/// Pick a starting phase at a zero crossing near a random position, so a
/// spectrum or drum tone does not begin with a DC pop.
pub fn random_zero_crossing(wave: &[f32], rng: &mut Lcg) -> f64 {
    let length = wave.len() - 1;
    let start = rng.next_below(length);
    let mut previous = wave[start];
    for offset in 1..length {
        let index = (start + offset) & (length - 1);
        let sample = wave[index];
        if previous <= 0.0 && sample > 0.0 {
            return index as f64;
        }
        previous = sample;
    }
    start as f64
}

// =============================================================================
// Harmonics waves
// =============================================================================

/// Build the integrated single-cycle table for a harmonics instrument.
/// The last control point also seeds a fading tail of higher harmonics.
pub fn build_harmonics_wave(harmonics: &[u32; HARMONICS_CONTROL_POINTS]) -> Vec<f32> {
    let bins = HARMONICS_WAVE_LENGTH / 2;
    let mut amplitudes = vec![0.0f32; bins];
    let phases = vec![-std::f32::consts::FRAC_PI_2; bins];
    let curve = |value: u32| (value as f64 / chirp_song::HARMONICS_MAX as f64).powi(2);
    for (index, &value) in harmonics.iter().enumerate() {
        let harmonic = index + 1;
        let slope = (harmonic as f64).powf(-0.3);
        amplitudes[harmonic] = (curve(value) * slope) as f32;
    }
    // Continue the last control point upward with a steeper rolloff.
    let last_value = curve(harmonics[HARMONICS_CONTROL_POINTS - 1]);
    if last_value > 0.0 {
        for harmonic in HARMONICS_CONTROL_POINTS + 1..bins.min(256) {
            let falloff = (HARMONICS_CONTROL_POINTS as f64 / harmonic as f64).powf(1.5);
            amplitudes[harmonic] =
                (last_value * falloff * (harmonic as f64).powf(-0.3)) as f32;
        }
    }
    let mut wave = synthesize_from_spectrum(&amplitudes, &phases, HARMONICS_WAVE_LENGTH);
    normalize_peak(&mut wave, 1.0);
    perform_integral(&wave)
}

// =============================================================================
// Guitar impulse
// =============================================================================

/// A windowed-sinc impulse, pre-integrated: adding two opposite-signed
/// copies into a delay line injects a band-limited rectangular pulse.
fn build_impulse_wave() -> Vec<f32> {
    let center = IMPULSE_WAVE_LENGTH as f64 / 2.0;
    let cutoff = 0.25; // fraction of Nyquist
    let mut impulse = vec![0.0f32; IMPULSE_WAVE_LENGTH];
    let mut sum = 0.0f64;
    for (index, sample) in impulse.iter_mut().enumerate() {
        let t = index as f64 - center;
        let sinc = if t.abs() < 1e-9 {
            1.0
        } else {
            (std::f64::consts::PI * cutoff * t).sin() / (std::f64::consts::PI * cutoff * t)
        };
        let window = 0.5
            + 0.5 * (std::f64::consts::TAU * index as f64 / (IMPULSE_WAVE_LENGTH - 1) as f64
                - std::f64::consts::PI)
                .cos();
        let value = sinc * window;
        *sample = value as f32;
        sum += value;
    }
    // Normalize to unit area so the integrated step reaches 1.0.
    let scale = (1.0 / sum) as f32;
    for sample in &mut impulse {
        *sample *= scale;
    }
    let mut integral = Vec::with_capacity(IMPULSE_WAVE_LENGTH);
    let mut running = 0.0f64;
    for &sample in &impulse {
        running += sample as f64;
        integral.push(running as f32);
    }
    integral
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_waves_integrate_to_zero() {
        let mut bank = WaveBank::new();
        for index in 0..config::CHIP_WAVES.len() {
            let wave = bank.chip_wave(index);
            assert_eq!(wave.len(), config::CHIP_WAVES[index].samples.len() + 1);
            // A centered wave's integral closes the cycle.
            assert!(
                (wave[wave.len() - 1] - wave[0]).abs() < 1e-4,
                "wave {index} does not close"
            );
        }
    }

    #[test]
    fn test_noise_waves_are_deterministic() {
        let mut bank_a = WaveBank::new();
        let mut bank_b = WaveBank::new();
        let mut rng_a = Lcg::new(99);
        let mut rng_b = Lcg::new(99);
        for index in 0..config::NOISE_WAVES.len() {
            assert_eq!(
                bank_a.noise_wave(index, &mut rng_a),
                bank_b.noise_wave(index, &mut rng_b),
                "noise wave {index} not reproducible"
            );
        }
    }

    #[test]
    fn test_retro_noise_is_binary() {
        let mut bank = WaveBank::new();
        let mut rng = Lcg::new(1);
        let wave = bank.noise_wave(0, &mut rng);
        assert!(wave.iter().all(|&sample| sample == 1.0 || sample == -1.0));
        // Not constant.
        assert!(wave.iter().any(|&sample| sample != wave[0]));
    }

    #[test]
    fn test_spectrum_wave_respects_silence() {
        let mut rng = Lcg::new(5);
        let silent = [0u32; SPECTRUM_CONTROL_POINTS];
        let wave = build_spectrum_wave(&silent, &mut rng);
        assert!(wave.iter().all(|&sample| sample == 0.0));
    }

    #[test]
    fn test_spectrum_wave_has_energy() {
        let mut rng = Lcg::new(5);
        let mut spectrum = [0u32; SPECTRUM_CONTROL_POINTS];
        spectrum[10] = 7;
        let wave = build_spectrum_wave(&spectrum, &mut rng);
        let peak = wave.iter().fold(0.0f32, |max, &sample| max.max(sample.abs()));
        assert!((peak - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_harmonics_fundamental_only_is_sine() {
        let mut harmonics = [0u32; HARMONICS_CONTROL_POINTS];
        harmonics[0] = 7;
        let wave = build_harmonics_wave(&harmonics);
        assert_eq!(wave.len(), HARMONICS_WAVE_LENGTH + 1);
        // First differences of the integral reproduce the sine: zero at
        // the start of the cycle, maximal a quarter cycle in.
        let quarter = HARMONICS_WAVE_LENGTH / 4;
        let difference_at_start = wave[1] - wave[0];
        let difference_at_quarter = wave[quarter + 1] - wave[quarter];
        assert!(difference_at_quarter.abs() > difference_at_start.abs());
    }

    #[test]
    fn test_impulse_integral_reaches_unity() {
        let mut bank = WaveBank::new();
        let impulse = bank.guitar_impulse();
        let last = impulse[impulse.len() - 1];
        assert!((last - 1.0).abs() < 1e-3);
        // Monotone-ish rise through the middle.
        assert!(impulse[IMPULSE_WAVE_LENGTH / 2] > 0.4);
    }

    #[test]
    fn test_zero_crossing_starts_near_sign_change() {
        let mut rng = Lcg::new(7);
        let wave: Vec<f32> = (0..1025)
            .map(|i| (std::f32::consts::TAU * 4.0 * i as f32 / 1024.0).sin())
            .collect();
        for _ in 0..10 {
            let phase = random_zero_crossing(&wave, &mut rng) as usize;
            let before = wave[phase.saturating_sub(1)];
            let after = wave[phase];
            assert!(before <= 0.0 && after >= -1e-3);
        }
    }
}
