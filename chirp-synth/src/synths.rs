//! Per-instrument synthesis loops
//!
//! One inner loop per instrument kind, each summing into the instrument's
//! mono scratch buffer. Tone parameters (phase increments, ramped
//! expression, filter gradients) are precomputed by `compute_tone`; the
//! loops themselves stay free of table lookups beyond the wave reads and
//! of any indirect calls.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chirp_song::config::{ALGORITHMS, FEEDBACKS, NOISE_WAVES, UNISONS};
use chirp_song::{Instrument, InstrumentKind, DRUM_COUNT, PULSE_WIDTH_RANGE};

use crate::filter::{DynamicBiquad, FilterCoefficients};
use crate::rng::Lcg;
use crate::tone::{GuitarString, Tone};
use crate::voice::{frequency_from_pitch, SPECTRUM_BASE_PITCH};
use crate::wave::{
    build_harmonics_wave, build_spectrum_wave, random_zero_crossing, WaveBank,
    NOISE_WAVE_MASK, SINE_WAVE_LENGTH, SINE_WAVE_MASK,
};

/// Relative jitter applied to the guitar pluck's second impulse position.
const GUITAR_PULSE_WIDTH_RANDOMNESS: f64 = 0.08;

// =============================================================================
// Per-instrument wave caches
// =============================================================================

/// Waves built from an instrument's own settings (spectra, harmonics).
/// Rebuilt only when the settings fingerprint changes.
#[derive(Debug, Default)]
pub struct InstrumentWaves {
    pub spectrum: Option<Vec<f32>>,
    pub harmonics: Option<Vec<f32>>,
    pub drums: Vec<Vec<f32>>,
    fingerprint: u64,
}

impl InstrumentWaves {
    /// Ensure the cached waves match the instrument's current settings.
    pub fn prepare(&mut self, instrument: &Instrument, rng: &mut Lcg) {
        let mut hasher = DefaultHasher::new();
        instrument.kind.to_index().hash(&mut hasher);
        match instrument.kind {
            InstrumentKind::Spectrum => instrument.spectrum.hash(&mut hasher),
            InstrumentKind::Harmonics => instrument.harmonics.hash(&mut hasher),
            InstrumentKind::Drumset => instrument.drum_spectra.hash(&mut hasher),
            _ => {}
        }
        let fingerprint = hasher.finish();
        if fingerprint == self.fingerprint {
            return;
        }
        self.fingerprint = fingerprint;
        self.spectrum = None;
        self.harmonics = None;
        self.drums.clear();
        match instrument.kind {
            InstrumentKind::Spectrum => {
                self.spectrum = Some(build_spectrum_wave(&instrument.spectrum, rng));
            }
            InstrumentKind::Harmonics => {
                self.harmonics = Some(build_harmonics_wave(&instrument.harmonics));
            }
            InstrumentKind::Drumset => {
                self.drums = instrument
                    .drum_spectra
                    .iter()
                    .map(|spectrum| build_spectrum_wave(spectrum, rng))
                    .collect();
            }
            _ => {}
        }
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Synthesize one tone's contribution to the instrument's mono buffer.
pub fn synthesize_tone(
    tone: &mut Tone,
    instrument: &Instrument,
    waves: &InstrumentWaves,
    bank: &mut WaveBank,
    rng: &mut Lcg,
    sample_rate: f64,
    buffer: &mut [f32],
) {
    match instrument.kind {
        InstrumentKind::Chip => {
            let wave = bank.chip_wave(instrument.chip_wave);
            integrated_wave_synth(tone, instrument, wave, buffer);
        }
        InstrumentKind::Harmonics => {
            if let Some(wave) = waves.harmonics.as_ref() {
                integrated_wave_synth(tone, instrument, wave, buffer);
            }
        }
        InstrumentKind::Pwm => pulse_width_synth(tone, buffer),
        InstrumentKind::Fm => {
            let sine = bank.sine_wave();
            fm_synth(tone, instrument, sine, buffer);
        }
        InstrumentKind::Noise => {
            let config = &NOISE_WAVES[instrument.noise_wave];
            let natural = frequency_from_pitch(config.base_pitch as f64);
            let smoothing = (tone.phase_deltas[0] * config.pitch_filter_mult).min(1.0);
            let wave = bank.noise_wave(instrument.noise_wave, rng);
            table_noise_synth(tone, wave, sample_rate / natural, smoothing, rng, buffer);
        }
        InstrumentKind::Spectrum => {
            if let Some(wave) = waves.spectrum.as_ref() {
                let natural = frequency_from_pitch(SPECTRUM_BASE_PITCH as f64);
                let advance_per_cycle = sample_rate / natural;
                let smoothing = (tone.phase_deltas[0] * advance_per_cycle).min(1.0);
                table_noise_synth(tone, wave, advance_per_cycle, smoothing, rng, buffer);
            }
        }
        InstrumentKind::Drumset => {
            let drum = (tone.primary_pitch() as usize).min(DRUM_COUNT - 1);
            if let Some(wave) = waves.drums.get(drum) {
                let natural = frequency_from_pitch(SPECTRUM_BASE_PITCH as f64);
                let advance_per_cycle = sample_rate / natural;
                let smoothing = (tone.phase_deltas[0] * advance_per_cycle).min(1.0);
                table_noise_synth(tone, wave, advance_per_cycle, smoothing, rng, buffer);
            }
        }
        InstrumentKind::Guitar => {
            let impulse = bank.guitar_impulse();
            guitar_synth(tone, instrument, impulse, rng, sample_rate, buffer);
        }
    }
    tone.fresh = false;
}

#[inline]
fn apply_filters(filters: &mut [DynamicBiquad], sample: f64) -> f64 {
    let mut sample = sample;
    for filter in filters {
        sample = filter.process(sample);
    }
    sample
}

#[inline]
fn interpolate(wave: &[f32], position: f64) -> f64 {
    let index = position as usize;
    let fraction = position - index as f64;
    wave[index] as f64 * (1.0 - fraction) + wave[index + 1] as f64 * fraction
}

// =============================================================================
// Chip / harmonics
// =============================================================================

/// Two detuned voices reading an integrated wave table; per-sample output
/// is the first difference divided by the phase step, which band-limits
/// the wave for free.
fn integrated_wave_synth(
    tone: &mut Tone,
    instrument: &Instrument,
    wave: &[f32],
    buffer: &mut [f32],
) {
    let length = (wave.len() - 1) as f64;
    let sign = UNISONS[instrument.unison].sign;
    let scale = tone.phase_delta_scales[0];

    let mut phase_delta_a = tone.phase_deltas[0] * length;
    let mut phase_delta_b = tone.phase_deltas[1] * length;
    let mut phase_a = (tone.phases[0].fract()) * length;
    let mut phase_b = (tone.phases[1].fract()) * length;
    let mut expression = tone.expression;
    let expression_delta = tone.expression_delta;

    let mut previous_integral_a = interpolate(wave, phase_a);
    let mut previous_integral_b = interpolate(wave, phase_b);

    let filter_count = tone.filter_count;
    for out in buffer.iter_mut() {
        phase_a += phase_delta_a;
        phase_b += phase_delta_b;
        if phase_a >= length {
            phase_a -= length;
            previous_integral_a -= wave[wave.len() - 1] as f64 - wave[0] as f64;
        }
        if phase_b >= length {
            phase_b -= length;
            previous_integral_b -= wave[wave.len() - 1] as f64 - wave[0] as f64;
        }
        let next_integral_a = interpolate(wave, phase_a);
        let next_integral_b = interpolate(wave, phase_b);
        let sample_a = (next_integral_a - previous_integral_a) / phase_delta_a;
        let sample_b = (next_integral_b - previous_integral_b) / phase_delta_b;
        previous_integral_a = next_integral_a;
        previous_integral_b = next_integral_b;

        let input = sample_a + sample_b * sign;
        let filtered = apply_filters(&mut tone.filters[..filter_count], input);
        *out += (filtered * expression) as f32;
        expression += expression_delta;
        phase_delta_a *= scale;
        phase_delta_b *= scale;
    }

    tone.phases[0] = phase_a / length;
    tone.phases[1] = phase_b / length;
    tone.phase_deltas[0] = phase_delta_a / length;
    tone.phase_deltas[1] = phase_delta_b / length;
}

// =============================================================================
// PWM
// =============================================================================

/// Two-sample polynomial correction at sawtooth discontinuities.
#[inline]
fn poly_blep(phase: f64, step: f64) -> f64 {
    if phase < step {
        let t = phase / step;
        (t + t - t * t - 1.0) * 0.5
    } else if phase > 1.0 - step {
        let t = (phase - 1.0) / step;
        (t * t + t + t + 1.0) * 0.5
    } else {
        0.0
    }
}

/// Difference of two PolyBLEP saws separated by the pulse width.
fn pulse_width_synth(tone: &mut Tone, buffer: &mut [f32]) {
    let scale = tone.phase_delta_scales[0];
    let mut phase_delta = tone.phase_deltas[0];
    let mut phase = tone.phases[0].fract();
    let mut pulse_width = tone.pulse_width;
    let pulse_width_delta = tone.pulse_width_delta;
    let mut expression = tone.expression;
    let expression_delta = tone.expression_delta;

    let filter_count = tone.filter_count;
    for out in buffer.iter_mut() {
        phase += phase_delta;
        phase -= phase.floor();
        let phase_b = (phase + pulse_width).fract();

        let saw_a = 2.0 * phase - 1.0 - 2.0 * poly_blep(phase, phase_delta);
        let saw_b = 2.0 * phase_b - 1.0 - 2.0 * poly_blep(phase_b, phase_delta);
        let input = saw_a - saw_b;

        let filtered = apply_filters(&mut tone.filters[..filter_count], input);
        *out += (filtered * expression) as f32;
        expression += expression_delta;
        pulse_width += pulse_width_delta;
        phase_delta *= scale;
    }

    tone.phases[0] = phase;
    tone.phase_deltas[0] = phase_delta;
}

// =============================================================================
// FM
// =============================================================================

/// Four sine operators wired by the algorithm table; the operator graph is
/// resolved into slices before the loop so the loop body is branch-light.
fn fm_synth(tone: &mut Tone, instrument: &Instrument, sine: &[f32], buffer: &mut [f32]) {
    let algorithm = &ALGORITHMS[instrument.algorithm];
    let feedback = &FEEDBACKS[instrument.feedback_type];
    let carrier_count = algorithm.carrier_count;
    let sine_length = SINE_WAVE_LENGTH as f64;
    let scale = tone.phase_delta_scales[0];

    let mut phases = tone.phases;
    let mut phase_deltas = tone.phase_deltas;
    let mut expressions = tone.operator_expressions;
    let expression_deltas = tone.operator_expression_deltas;
    let mut feedback_mult = tone.feedback_mult;
    let feedback_delta = tone.feedback_delta;
    let mut feedback_outputs = tone.feedback_outputs;
    let mut expression = tone.expression;
    let expression_delta = tone.expression_delta;

    let filter_count = tone.filter_count;
    for out in buffer.iter_mut() {
        let mut outputs = [0.0f64; 4];
        let mut raw_sines = [0.0f64; 4];
        // Modulators occupy the higher operator slots, so a descending
        // pass resolves the graph in one sweep.
        for op in (0..4).rev() {
            let mut index = phases[op].fract() * sine_length;
            for &source in algorithm.modulated_by[op] {
                index += outputs[source - 1];
            }
            for &source in feedback.indices[op] {
                index += feedback_outputs[source - 1] * feedback_mult;
            }
            let index = index.rem_euclid(sine_length);
            let whole = index as usize & SINE_WAVE_MASK;
            let fraction = index - index.floor();
            let sine_value =
                sine[whole] as f64 * (1.0 - fraction) + sine[whole + 1] as f64 * fraction;
            raw_sines[op] = sine_value;
            outputs[op] = sine_value * expressions[op];
            phases[op] += phase_deltas[op];
            phase_deltas[op] *= scale;
            expressions[op] += expression_deltas[op];
        }
        feedback_outputs = raw_sines;
        feedback_mult += feedback_delta;

        let mut carrier_sum = 0.0;
        for &output in outputs.iter().take(carrier_count) {
            carrier_sum += output;
        }
        let filtered = apply_filters(&mut tone.filters[..filter_count], carrier_sum);
        *out += (filtered * expression) as f32;
        expression += expression_delta;
    }

    tone.phases = phases;
    tone.phase_deltas = phase_deltas;
    tone.feedback_outputs = feedback_outputs;
}

// =============================================================================
// Noise / spectrum / drumset
// =============================================================================

/// A long wave table read at a pitch-dependent rate, with a one-pole
/// smoothing step whose cutoff tracks the fundamental.
fn table_noise_synth(
    tone: &mut Tone,
    wave: &[f32],
    advance_per_cycle: f64,
    smoothing: f64,
    rng: &mut Lcg,
    buffer: &mut [f32],
) {
    let length = (wave.len() - 1) as f64;
    if tone.fresh {
        // Start at a zero crossing to avoid an onset pop.
        tone.phases[0] = random_zero_crossing(wave, rng) / length;
        tone.noise_sample = 0.0;
    }
    let scale = tone.phase_delta_scales[0];
    let mut advance = tone.phase_deltas[0] * advance_per_cycle;
    let mut phase = tone.phases[0].fract() * length;
    let mut noise_sample = tone.noise_sample;
    let mut expression = tone.expression;
    let expression_delta = tone.expression_delta;

    let filter_count = tone.filter_count;
    for out in buffer.iter_mut() {
        let raw = wave[phase as usize & NOISE_WAVE_MASK] as f64;
        noise_sample += (raw - noise_sample) * smoothing;
        let filtered = apply_filters(&mut tone.filters[..filter_count], noise_sample);
        *out += (filtered * expression) as f32;
        expression += expression_delta;
        phase += advance;
        if phase >= length {
            phase -= length;
        }
        advance *= scale;
    }

    tone.phases[0] = phase / length;
    tone.phase_deltas[0] = advance / advance_per_cycle;
    tone.noise_sample = noise_sample;
}

// =============================================================================
// Guitar
// =============================================================================

/// Plucked string: a circular delay loop through a fractional-delay
/// all-pass, a dispersion all-pass, and a high-shelf decay filter.
fn guitar_synth(
    tone: &mut Tone,
    instrument: &Instrument,
    impulse: &[f32],
    rng: &mut Lcg,
    sample_rate: f64,
    buffer: &mut [f32],
) {
    let frequency = tone.phase_deltas[0] * sample_rate;
    let period = tone.guitar_delay_length;
    let radians = std::f64::consts::TAU * frequency / sample_rate;

    if tone.guitar.is_none() {
        tone.guitar = Some(Box::default());
    }
    let string = tone.guitar.as_mut().unwrap();

    if string.delay_line.is_empty() {
        // Long enough for the period one octave below the lowest pitch.
        let lowest = frequency_from_pitch(12.0);
        let capacity = ((sample_rate / lowest) as usize + 1).next_power_of_two();
        string.delay_line = vec![0.0; capacity];
    }
    let mask = string.delay_line.len() - 1;

    // Loop filters for this run. The shelf's DC gain is the per-cycle
    // attenuation; its shelf gain darkens the string as it rings.
    let sustain_norm = instrument.sustain as f64 / chirp_song::SUSTAIN_MAX as f64;
    let brightness = 0.35 + 0.6 * sustain_norm;
    let shelf_corner = (radians * 8.0).min(crate::filter::MAX_CORNER_RADIANS);
    let mut shelf = FilterCoefficients::high_shelf_1st_order(shelf_corner, brightness);
    shelf.b0 *= tone.guitar_shelf_gain;
    shelf.b1 *= tone.guitar_shelf_gain;

    let dispersion_corner = (radians * 16.0).min(crate::filter::MAX_CORNER_RADIANS);
    let dispersion = FilterCoefficients::all_pass_1st_order_invert_above(dispersion_corner);

    // Keep the total loop delay equal to the period after accounting for
    // the filters' phase delays at the fundamental.
    let filter_delay = dispersion.phase_delay_at(radians) + shelf.phase_delay_at(radians);
    let total_delay = (period - filter_delay).max(2.0);
    let integer_delay = (total_delay - 0.5).floor().max(1.0);
    let fraction = (total_delay - integer_delay).clamp(0.01, 1.99);
    let fraction_coefficients = FilterCoefficients::all_pass_fractional_delay(fraction);

    let retuned = (string.tuned_pitch - frequency).abs() > frequency * 0.001;
    string
        .shelf_filter
        .load_coefficients_with_gradient(&shelf, &shelf, 0.0);
    string
        .dispersion_filter
        .load_coefficients_with_gradient(&dispersion, &dispersion, 0.0);
    string.fraction_filter.load_coefficients_with_gradient(
        &fraction_coefficients,
        &fraction_coefficients,
        0.0,
    );
    string.delay_length = integer_delay;

    if tone.fresh || retuned {
        pluck(string, impulse, instrument, period, integer_delay as usize, rng, mask);
        string.tuned_pitch = frequency;
        string.fraction_filter.reset_state();
        string.dispersion_filter.reset_state();
        string.shelf_filter.reset_state();
    }

    let delay_int = integer_delay as usize;
    let mut delay_index = string.delay_index;
    let mut expression = tone.expression;
    let expression_delta = tone.expression_delta;

    let filter_count = tone.filter_count;
    for out in buffer.iter_mut() {
        let tap = string.delay_line[(delay_index + string.delay_line.len() - delay_int) & mask]
            as f64;
        let aligned = string.fraction_filter.process(tap);
        let dispersed = string.dispersion_filter.process(aligned);
        let decayed = string.shelf_filter.process(dispersed);
        string.delay_line[delay_index] = decayed as f32;
        delay_index = (delay_index + 1) & mask;

        let filtered = apply_filters(&mut tone.filters[..filter_count], decayed);
        *out += (filtered * expression) as f32;
        expression += expression_delta;
    }
    string.delay_index = delay_index;
}

/// Excite the string: clear two periods of the loop, then inject a
/// band-limited rectangular pulse as two offset integrated impulses. The
/// excitation goes into the span between the read and write heads (folded
/// by the loop length when the period is shorter than the impulse) so the
/// read head consumes it before the write head recycles it.
fn pluck(
    string: &mut GuitarString,
    impulse: &[f32],
    instrument: &Instrument,
    period: f64,
    loop_span: usize,
    rng: &mut Lcg,
    mask: usize,
) {
    let length = string.delay_line.len();
    let clear_span = ((period * 2.0) as usize + impulse.len()).min(length);
    for offset in 1..=clear_span {
        string.delay_line[(string.delay_index + length - offset) & mask] = 0.0;
    }

    let span = loop_span.max(2);
    let base = string.delay_index + length - span;
    let width = instrument.pulse_width as f64 / (PULSE_WIDTH_RANGE as f64 * 2.0);
    let jitter = 1.0 + rng.next_signed() * GUITAR_PULSE_WIDTH_RANDOMNESS * 0.5;
    let offset = ((width * period * jitter) as usize).max(1);
    for (index, &value) in impulse.iter().enumerate() {
        string.delay_line[(base + index % span) & mask] += value;
        string.delay_line[(base + (index + offset) % span) & mask] -= value;
    }
    string.plucked = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirp_song::Song;

    use crate::voice::{compute_tone, RunContext};

    fn run_context(run_length: usize) -> RunContext {
        RunContext {
            sample_rate: 44100.0,
            samples_per_tick: run_length as f64,
            ticks_into_bar: 0,
            tick_sample_countdown: run_length as f64,
            run_length,
            seconds_into_song: 0.0,
        }
    }

    fn simple_tone(pitch: u32) -> Tone {
        let mut tone = Tone::default();
        tone.reset();
        tone.pitches[0] = pitch;
        tone.pitch_count = 1;
        tone.chord_size = 1;
        tone.note = Some(crate::tone::NoteSpan {
            start: 0,
            end: 24,
            pins: vec![
                chirp_song::Pin { time: 0, interval: 0, expression: 3 },
                chirp_song::Pin { time: 24, interval: 0, expression: 3 },
            ],
        });
        tone
    }

    fn render(instrument: &Instrument, samples: usize) -> Vec<f32> {
        let song = Song::new();
        let mut tone = simple_tone(48);
        let mut bank = WaveBank::new();
        let mut rng = Lcg::new(42);
        let mut waves = InstrumentWaves::default();
        waves.prepare(instrument, &mut rng);
        let mut buffer = vec![0.0f32; samples];
        let ctx = run_context(samples);
        compute_tone(&ctx, &song, 0, instrument, &mut tone, false);
        synthesize_tone(
            &mut tone,
            instrument,
            &waves,
            &mut bank,
            &mut rng,
            44100.0,
            &mut buffer,
        );
        buffer
    }

    #[test]
    fn test_every_kind_produces_audio() {
        for kind in [
            InstrumentKind::Chip,
            InstrumentKind::Fm,
            InstrumentKind::Harmonics,
            InstrumentKind::Pwm,
            InstrumentKind::Guitar,
            InstrumentKind::Spectrum,
        ] {
            let instrument = Instrument::new(kind);
            let buffer = render(&instrument, 2048);
            let peak = buffer.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
            assert!(peak > 1e-5, "{:?} was silent", kind);
            assert!(peak < 1.0, "{:?} clipped: {peak}", kind);
            assert!(buffer.iter().all(|s| s.is_finite()), "{:?} emitted NaN", kind);
        }
    }

    #[test]
    fn test_square_wave_alternates() {
        let mut instrument = Instrument::new(InstrumentKind::Chip);
        instrument.chip_wave = chirp_song::config::chip_wave_index_from_name("square");
        let buffer = render(&instrument, 4096);
        let positive = buffer.iter().filter(|&&s| s > 0.0).count();
        let negative = buffer.iter().filter(|&&s| s < 0.0).count();
        // A square spends about half its time on each side.
        let ratio = positive as f64 / (positive + negative) as f64;
        assert!((0.4..0.6).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn test_pwm_duty_follows_width() {
        let mut instrument = Instrument::new(InstrumentKind::Pwm);
        instrument.pulse_width = 2; // 1/8 duty
        instrument.pulse_envelope = chirp_song::config::ENVELOPE_DEFAULT;
        let buffer = render(&instrument, 8192);
        // The pulse's high level sits well above the (negative) low level.
        let high = buffer.iter().filter(|&&s| s > 0.03).count();
        let duty = high as f64 / buffer.len() as f64;
        assert!((duty - 0.125).abs() < 0.05, "duty {duty}");
    }

    #[test]
    fn test_fm_carrier_only_is_periodic() {
        let mut instrument = Instrument::new(InstrumentKind::Fm);
        // Operator 1 alone, steady envelope, algorithm 0: a pure sine.
        instrument.operators[0].envelope = chirp_song::config::ENVELOPE_DEFAULT;
        let buffer = render(&instrument, 4096);
        // A sine has a smooth derivative; successive samples stay close.
        let max_step = buffer
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .fold(0.0f32, f32::max);
        let peak = buffer.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
        assert!(max_step < peak * 0.1, "step {max_step} vs peak {peak}");
    }

    #[test]
    fn test_guitar_decays() {
        let instrument = Instrument::new(InstrumentKind::Guitar);
        let song = Song::new();
        let mut tone = simple_tone(48);
        let mut bank = WaveBank::new();
        let mut rng = Lcg::new(42);
        let waves = InstrumentWaves::default();
        let run = 4410;
        let mut early = vec![0.0f32; run];
        let ctx = run_context(run);
        compute_tone(&ctx, &song, 0, &instrument, &mut tone, false);
        synthesize_tone(&mut tone, &instrument, &waves, &mut bank, &mut rng, 44100.0, &mut early);
        // Skip ahead two seconds of ringing.
        let mut late = vec![0.0f32; run];
        for _ in 0..19 {
            late.fill(0.0);
            tone.ticks_since_note_start += 1;
            compute_tone(&ctx, &song, 0, &instrument, &mut tone, false);
            synthesize_tone(&mut tone, &instrument, &waves, &mut bank, &mut rng, 44100.0, &mut late);
        }
        let rms = |samples: &[f32]| {
            (samples.iter().map(|&s| s as f64 * s as f64).sum::<f64>() / samples.len() as f64)
                .sqrt()
        };
        assert!(rms(&late) < rms(&early) * 0.5, "string did not decay");
    }

    #[test]
    fn test_noise_is_deterministic_per_seed() {
        let instrument = Instrument::new(InstrumentKind::Noise);
        let song = Song::new();
        let render_seeded = |seed: u64| {
            let mut tone = simple_tone(4);
            let mut bank = WaveBank::new();
            let mut rng = Lcg::new(seed);
            let waves = InstrumentWaves::default();
            let mut buffer = vec![0.0f32; 1024];
            let ctx = run_context(1024);
            compute_tone(&ctx, &song, 3, &instrument, &mut tone, false);
            synthesize_tone(
                &mut tone,
                &instrument,
                &waves,
                &mut bank,
                &mut rng,
                44100.0,
                &mut buffer,
            );
            buffer
        };
        assert_eq!(render_seeded(7), render_seeded(7));
    }
}
