//! Per-run tone computation
//!
//! Before an instrument's inner loop runs, every active or released tone
//! is recomputed for the coming run of samples: phase increments, linearly
//! ramped expression, vibrato and slide intervals, envelope values, and
//! the start→end coefficient gradients of the filter cascade. The inner
//! loops then touch nothing but tone fields.

use chirp_song::config::{
    self, ALGORITHMS, CHORDS, ENVELOPES, NOISE_WAVES, OPERATOR_FREQUENCIES, RHYTHMS,
    TRANSITIONS, UNISONS,
};
use chirp_song::{
    Instrument, InstrumentKind, Song, DRUM_COUNT, OPERATOR_COUNT, PARTS_PER_BEAT,
    PULSE_WIDTH_RANGE, SUSTAIN_MAX, TICKS_PER_PART,
};

use crate::envelope::compute_envelope;
use crate::filter::{cascade_volume_compensation, control_point_to_coefficients};
use crate::tone::Tone;
use crate::wave::SINE_WAVE_LENGTH;

/// Semitones between adjacent noise-channel pitches.
pub const DRUM_INTERVAL: u32 = 6;

/// The pitch at which spectrum (and drumset) tables play at their natural
/// rate.
pub const SPECTRUM_BASE_PITCH: u32 = 60;

/// Noise-channel spectrum tones sound from this pitch upward.
pub const SPECTRUM_DRUM_BASE_PITCH: u32 = 24;

/// Reference pitch and slope for pitch-dependent expression damping.
const EXPRESSION_REFERENCE_PITCH: f64 = 32.0;
const PITCH_DAMPING: f64 = 48.0;

/// Per-kind output scale, tuned so a full-expression tone lands well
/// inside the limiter's comfortable range.
fn base_expression(kind: InstrumentKind) -> f64 {
    match kind {
        InstrumentKind::Chip => 0.05,
        InstrumentKind::Fm => 0.06,
        InstrumentKind::Noise => 0.12,
        InstrumentKind::Spectrum => 0.3,
        InstrumentKind::Drumset => 0.35,
        InstrumentKind::Harmonics => 0.035,
        InstrumentKind::Pwm => 0.05,
        InstrumentKind::Guitar => 0.035,
    }
}

/// Frequency of a pitch in Hz (equal temperament, A440).
pub fn frequency_from_pitch(pitch: f64) -> f64 {
    440.0 * (2.0f64).powf((pitch - 69.0) / 12.0)
}

/// Linear gain of an instrument volume setting; the top setting mutes.
pub fn instrument_volume_mult(volume: u32) -> f64 {
    if volume >= chirp_song::VOLUME_RANGE - 1 {
        0.0
    } else {
        (2.0f64).powf(-(volume as f64) / 2.0)
    }
}

/// Pin expression 0..=3 to linear gain.
pub fn note_expression_to_gain(expression: f64) -> f64 {
    (expression.max(0.0) / 3.0).powf(1.5)
}

fn pitch_damping(pitch: f64) -> f64 {
    (2.0f64).powf(-(pitch - EXPRESSION_REFERENCE_PITCH).max(0.0) / PITCH_DAMPING)
}

/// Timing context for one run of samples, owned by the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub sample_rate: f64,
    pub samples_per_tick: f64,
    /// Whole ticks into the current bar.
    pub ticks_into_bar: u32,
    /// Samples remaining in the current tick at the start of the run.
    pub tick_sample_countdown: f64,
    pub run_length: usize,
    /// Seconds since playback started, at the start of the run; drives
    /// the vibrato LFO so it never jumps at bar boundaries.
    pub seconds_into_song: f64,
}

impl RunContext {
    pub fn seconds_per_tick(&self) -> f64 {
        self.samples_per_tick / self.sample_rate
    }

    /// Fractions of the current tick covered at run start and end.
    fn tick_ratios(&self) -> (f64, f64) {
        let start = 1.0 - self.tick_sample_countdown / self.samples_per_tick;
        let end =
            1.0 - (self.tick_sample_countdown - self.run_length as f64) / self.samples_per_tick;
        (start.max(0.0), end.min(1.0))
    }
}

/// The vibrato LFO: a sum of sines over the configured periods.
pub fn vibrato_lfo(vibrato: &config::Vibrato, seconds: f64) -> f64 {
    let mut total = 0.0;
    for &period in vibrato.periods_seconds {
        total += (std::f64::consts::TAU * seconds / period).sin();
    }
    total * vibrato.amplitude
}

/// Recompute a tone's synthesis parameters for the coming run.
pub fn compute_tone(
    ctx: &RunContext,
    song: &Song,
    channel_index: usize,
    instrument: &Instrument,
    tone: &mut Tone,
    released: bool,
) {
    let transition = &TRANSITIONS[instrument.transition];
    let chord = &CHORDS[instrument.chord];
    let noise_channel = song.channel_is_noise(channel_index);
    let run_length = ctx.run_length as f64;
    let seconds_per_tick = ctx.seconds_per_tick();
    let (start_ratio, end_ratio) = ctx.tick_ratios();

    // Note age in fractional ticks at the run boundaries.
    let age_start = tone.ticks_since_note_start as f64 + start_ratio;
    let age_end = tone.ticks_since_note_start as f64 + end_ratio;
    let seconds_start = age_start * seconds_per_tick;
    let seconds_end = age_end * seconds_per_tick;
    let beats_start = age_start / (TICKS_PER_PART * PARTS_PER_BEAT) as f64;
    let beats_end = age_end / (TICKS_PER_PART * PARTS_PER_BEAT) as f64;

    // -------------------------------------------------------------------------
    // Interval and expression from the note's pins
    // -------------------------------------------------------------------------

    let note_length_ticks = tone
        .note
        .as_ref()
        .map(|note| (note.length() * TICKS_PER_PART as u32) as f64)
        .unwrap_or(f64::INFINITY);

    let (mut interval_start, note_expression_start, mut interval_end, note_expression_end) =
        match tone.note.as_ref() {
            Some(note) => {
                let time_start = (age_start / TICKS_PER_PART as f64).min(note.length() as f64);
                let time_end = (age_end / TICKS_PER_PART as f64).min(note.length() as f64);
                let (interval_a, expression_a) = note.parameters_at(time_start);
                let (interval_b, expression_b) = note.parameters_at(time_end);
                (interval_a, expression_a, interval_b, expression_b)
            }
            None => (0.0, 3.0, 0.0, 3.0),
        };

    let mut expression_gain_start = note_expression_to_gain(note_expression_start);
    let mut expression_gain_end = note_expression_to_gain(note_expression_end);

    // -------------------------------------------------------------------------
    // Transition behavior: attack, release, slide
    // -------------------------------------------------------------------------

    let mut transition_expression_start = 1.0f64;
    let mut transition_expression_end = 1.0f64;

    if released {
        let release_ticks = transition.release_ticks.max(1) as f64;
        let released_start = tone.ticks_since_released as f64 + start_ratio;
        let released_end = tone.ticks_since_released as f64 + end_ratio;
        transition_expression_start *=
            (1.0 - (released_start / release_ticks).min(1.0)).powf(1.5);
        transition_expression_end *=
            (1.0 - (released_end / release_ticks).min(1.0)).powf(1.5);
        if tone.fade_out_fast {
            // Over-cap tones finish within this run.
            transition_expression_end = 0.0;
            tone.is_on_last_tick = true;
        }
        if tone.ticks_since_released + 1 >= transition.release_ticks {
            tone.is_on_last_tick = true;
        }
    } else if transition.attack_seconds > 0.0 && !tone.live {
        let attack = transition.attack_seconds;
        transition_expression_start *= (seconds_start / attack).min(1.0);
        transition_expression_end *= (seconds_end / attack).min(1.0);
    }

    if transition.slides && !released && tone.note.is_some() {
        let window = (transition.slide_ticks as f64).min(note_length_ticks / 2.0);
        if window > 0.0 {
            if let Some(previous) = tone.prev_note {
                let weight_start = (1.0 - age_start / window).max(0.0) * 0.5;
                let weight_end = (1.0 - age_end / window).max(0.0) * 0.5;
                interval_start += previous.interval * weight_start;
                interval_end += previous.interval * weight_end;
                let previous_gain = note_expression_to_gain(previous.expression);
                expression_gain_start +=
                    (previous_gain - expression_gain_start) * weight_start;
                expression_gain_end += (previous_gain - expression_gain_end) * weight_end;
            }
            if let Some(next) = tone.next_note {
                let until_end_start = note_length_ticks - age_start;
                let until_end_end = note_length_ticks - age_end;
                let weight_start = (1.0 - until_end_start / window).max(0.0) * 0.5;
                let weight_end = (1.0 - until_end_end / window).max(0.0) * 0.5;
                interval_start += next.interval * weight_start;
                interval_end += next.interval * weight_end;
                let next_gain = note_expression_to_gain(next.expression);
                expression_gain_start += (next_gain - expression_gain_start) * weight_start;
                expression_gain_end += (next_gain - expression_gain_end) * weight_end;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Vibrato
    // -------------------------------------------------------------------------

    let vibrato = &config::VIBRATOS[instrument.vibrato];
    if vibrato.amplitude > 0.0 && !noise_channel {
        // Amplitude ramps in over two ticks once the delay has elapsed.
        let delay = vibrato.delay_ticks as f64;
        let ramp_start = ((age_start - delay) / 2.0).clamp(0.0, 1.0);
        let ramp_end = ((age_end - delay) / 2.0).clamp(0.0, 1.0);
        let run_seconds = run_length / ctx.sample_rate;
        interval_start += vibrato_lfo(vibrato, ctx.seconds_into_song) * ramp_start;
        interval_end += vibrato_lfo(vibrato, ctx.seconds_into_song + run_seconds) * ramp_end;
    }

    // -------------------------------------------------------------------------
    // Pitch selection (arpeggio, chords)
    // -------------------------------------------------------------------------

    let rhythm = &RHYTHMS[song.rhythm];
    let arpeggiates = chord.arpeggiates && tone.pitch_count > 1;
    let selected_pitch = if arpeggiates {
        let pattern = rhythm.arpeggio_patterns[tone.pitch_count.min(4) - 1];
        let step =
            (tone.ticks_since_note_start as usize / rhythm.ticks_per_arpeggio) % pattern.len();
        tone.pitches[pattern[step].min(tone.pitch_count - 1)]
    } else {
        tone.pitches[0]
    };

    let octave_offset = song.channels[channel_index].octave * 12;
    let key_pitch = config::KEYS[song.key].base_pitch;

    // -------------------------------------------------------------------------
    // Expression common to every kind
    // -------------------------------------------------------------------------

    let chord_expression = if chord.harmonizes && tone.chord_size > 1 {
        1.0 / (tone.chord_size as f64).sqrt()
    } else {
        1.0
    };
    let filter_compensation = cascade_volume_compensation(&instrument.filter.points);
    let common = base_expression(instrument.kind)
        * instrument_volume_mult(instrument.volume)
        * chord_expression
        * filter_compensation;

    let interval_scale_start = (2.0f64).powf(interval_start / 12.0);
    let phase_delta_scale = (2.0f64)
        .powf(((interval_end - interval_start) / 12.0) / run_length.max(1.0));
    tone.phase_delta_scales = [phase_delta_scale; OPERATOR_COUNT];

    // -------------------------------------------------------------------------
    // Per-kind parameters
    // -------------------------------------------------------------------------

    match instrument.kind {
        InstrumentKind::Fm => {
            compute_fm(
                instrument,
                tone,
                ctx,
                key_pitch,
                octave_offset,
                selected_pitch,
                interval_scale_start,
                seconds_start,
                seconds_end,
                beats_start,
                beats_end,
                note_expression_to_gain(note_expression_start),
                note_expression_to_gain(note_expression_end),
            );
            // Note expression reaches FM through the operators' `custom`
            // envelopes, not the shared gain.
            let expression_start = common * transition_expression_start;
            let expression_end = common * transition_expression_end;
            tone.expression = expression_start;
            tone.expression_delta = (expression_end - expression_start) / run_length.max(1.0);
        }
        InstrumentKind::Chip | InstrumentKind::Harmonics => {
            let unison = &UNISONS[instrument.unison];
            let pitch = (key_pitch + octave_offset + selected_pitch) as f64;
            let secondary_pitch = if chord.custom_interval && tone.pitch_count > 1 {
                (key_pitch + octave_offset + tone.pitches[1]) as f64
            } else {
                pitch
            };
            let frequency_a = frequency_from_pitch(
                pitch + unison.offset - unison.spread * 0.5,
            ) * interval_scale_start;
            let frequency_b = frequency_from_pitch(
                secondary_pitch + unison.offset + unison.spread * 0.5,
            ) * interval_scale_start;
            tone.phase_deltas[0] = frequency_a / ctx.sample_rate;
            tone.phase_deltas[1] = frequency_b / ctx.sample_rate;
            tone.interval_mult = 1.0;
            tone.interval_expression_mult = unison.volume;

            let wave_volume = if instrument.kind == InstrumentKind::Chip {
                config::CHIP_WAVES[instrument.chip_wave].volume
            } else {
                1.0
            };
            let damping = pitch_damping(pitch);
            let expression_start = common
                * wave_volume
                * unison.volume
                * damping
                * transition_expression_start
                * expression_gain_start;
            let expression_end = common
                * wave_volume
                * unison.volume
                * damping
                * transition_expression_end
                * expression_gain_end;
            tone.expression = expression_start;
            tone.expression_delta = (expression_end - expression_start) / run_length.max(1.0);
        }
        InstrumentKind::Pwm => {
            let pitch = (key_pitch + octave_offset + selected_pitch) as f64;
            let frequency = frequency_from_pitch(pitch) * interval_scale_start;
            tone.phase_deltas[0] = frequency / ctx.sample_rate;

            let envelope = &ENVELOPES[instrument.pulse_envelope];
            let base_width = instrument.pulse_width as f64 / (PULSE_WIDTH_RANGE as f64 * 2.0);
            let width_start = (base_width
                * compute_envelope(envelope, seconds_start, beats_start, expression_gain_start))
            .clamp(0.01, 0.5);
            let width_end = (base_width
                * compute_envelope(envelope, seconds_end, beats_end, expression_gain_end))
            .clamp(0.01, 0.5);
            tone.pulse_width = width_start;
            tone.pulse_width_delta = (width_end - width_start) / run_length.max(1.0);

            let damping = pitch_damping(pitch);
            let expression_start =
                common * damping * transition_expression_start * expression_gain_start;
            let expression_end =
                common * damping * transition_expression_end * expression_gain_end;
            tone.expression = expression_start;
            tone.expression_delta = (expression_end - expression_start) / run_length.max(1.0);
        }
        InstrumentKind::Guitar => {
            let pitch = (key_pitch + octave_offset + selected_pitch) as f64 + interval_start;
            let frequency = frequency_from_pitch(pitch);
            tone.phase_deltas[0] = frequency / ctx.sample_rate;
            tone.guitar_delay_length = ctx.sample_rate / frequency;

            // Sustain sets the per-cycle loop attenuation.
            tone.guitar_shelf_gain =
                1.0 - 0.1 * (2.0f64).powf(-(instrument.sustain as f64) / 2.0);

            let damping = pitch_damping(pitch);
            let expression_start =
                common * damping * transition_expression_start * expression_gain_start;
            let expression_end =
                common * damping * transition_expression_end * expression_gain_end;
            tone.expression = expression_start;
            tone.expression_delta = (expression_end - expression_start) / run_length.max(1.0);
        }
        InstrumentKind::Noise => {
            let wave = &NOISE_WAVES[instrument.noise_wave];
            let pitch = wave.base_pitch + selected_pitch * DRUM_INTERVAL;
            let frequency = frequency_from_pitch(pitch as f64) * interval_scale_start;
            tone.phase_deltas[0] = frequency / ctx.sample_rate;

            let expression_start = common
                * wave.volume
                * transition_expression_start
                * expression_gain_start;
            let expression_end =
                common * wave.volume * transition_expression_end * expression_gain_end;
            tone.expression = expression_start;
            tone.expression_delta = (expression_end - expression_start) / run_length.max(1.0);
        }
        InstrumentKind::Spectrum => {
            let pitch = if noise_channel {
                SPECTRUM_DRUM_BASE_PITCH + selected_pitch * DRUM_INTERVAL
            } else {
                key_pitch + octave_offset + selected_pitch
            };
            let frequency = frequency_from_pitch(pitch as f64) * interval_scale_start;
            tone.phase_deltas[0] = frequency / ctx.sample_rate;

            let expression_start =
                common * transition_expression_start * expression_gain_start;
            let expression_end = common * transition_expression_end * expression_gain_end;
            tone.expression = expression_start;
            tone.expression_delta = (expression_end - expression_start) / run_length.max(1.0);
        }
        InstrumentKind::Drumset => {
            let drum = (selected_pitch as usize).min(DRUM_COUNT - 1);
            let pitch = SPECTRUM_DRUM_BASE_PITCH + drum as u32 * DRUM_INTERVAL;
            let frequency = frequency_from_pitch(pitch as f64);
            tone.phase_deltas[0] = frequency / ctx.sample_rate;

            let envelope = &ENVELOPES[instrument.drum_envelopes[drum]];
            let envelope_start =
                compute_envelope(envelope, seconds_start, beats_start, expression_gain_start);
            let envelope_end =
                compute_envelope(envelope, seconds_end, beats_end, expression_gain_end);
            let expression_start = common
                * envelope_start
                * transition_expression_start
                * expression_gain_start;
            let expression_end =
                common * envelope_end * transition_expression_end * expression_gain_end;
            tone.expression = expression_start;
            tone.expression_delta = (expression_end - expression_start) / run_length.max(1.0);
        }
    }

    // -------------------------------------------------------------------------
    // Filter cascade gradients
    // -------------------------------------------------------------------------

    let filter_envelope = &ENVELOPES[instrument.filter_envelope];
    let envelope_start = compute_envelope(
        filter_envelope,
        seconds_start,
        beats_start,
        note_expression_to_gain(note_expression_start),
    );
    let envelope_end = compute_envelope(
        filter_envelope,
        seconds_end,
        beats_end,
        note_expression_to_gain(note_expression_end),
    );
    let points = &instrument.filter.points;
    for (index, point) in points.iter().enumerate() {
        let start = control_point_to_coefficients(point, ctx.sample_rate, envelope_start);
        let end = control_point_to_coefficients(point, ctx.sample_rate, envelope_end);
        tone.filters[index].load_coefficients_with_gradient(
            &start,
            &end,
            1.0 / run_length.max(1.0),
        );
        if tone.fresh {
            tone.filters[index].reset_state();
        }
    }
    tone.filter_count = points.len();
}

/// FM operator frequencies, expressions and feedback for the run.
#[allow(clippy::too_many_arguments)]
fn compute_fm(
    instrument: &Instrument,
    tone: &mut Tone,
    ctx: &RunContext,
    key_pitch: u32,
    octave_offset: u32,
    selected_pitch: u32,
    interval_scale: f64,
    seconds_start: f64,
    seconds_end: f64,
    beats_start: f64,
    beats_end: f64,
    note_expression_start: f64,
    note_expression_end: f64,
) {
    let algorithm = &ALGORITHMS[instrument.algorithm];
    let chord = &CHORDS[instrument.chord];
    let run_length = ctx.run_length.max(1) as f64;
    let sine_length = SINE_WAVE_LENGTH as f64;

    // Heavily modulated patches lose perceived loudness; boost the quiet
    // ones back up.
    let mut quietness = 1.0f64;
    for operator in instrument.operators.iter().take(algorithm.carrier_count) {
        quietness *= 1.0 - (operator.amplitude as f64 / 15.0).min(1.0);
    }
    let sine_expression_boost = 1.0 + quietness * 3.0;

    for index in 0..OPERATOR_COUNT {
        let operator = &instrument.operators[index];
        let frequency_entry = &OPERATOR_FREQUENCIES[operator.frequency];
        let is_carrier = index < algorithm.carrier_count;

        // Custom-interval chords assign chord pitches to carriers.
        let pitch = if chord.custom_interval && is_carrier && tone.pitch_count > 1 {
            let carrier = algorithm.associated_carrier[index] - 1;
            tone.pitches[carrier.min(tone.pitch_count - 1)]
        } else {
            selected_pitch
        };
        let base = (key_pitch + octave_offset + pitch) as f64;
        let frequency = frequency_from_pitch(base) * interval_scale * frequency_entry.mult
            + frequency_entry.hz_offset;
        tone.phase_deltas[index] = frequency / ctx.sample_rate;

        let amplitude = config::operator_amplitude_curve(operator.amplitude)
            * frequency_entry.amplitude_sign;
        let envelope = &ENVELOPES[operator.envelope];
        let envelope_start =
            compute_envelope(envelope, seconds_start, beats_start, note_expression_start);
        let envelope_end =
            compute_envelope(envelope, seconds_end, beats_end, note_expression_end);

        let (scale_start, scale_end) = if is_carrier {
            let damping = (2.0f64).powf(-(base - 16.0).max(0.0) / PITCH_DAMPING);
            (
                amplitude * damping * sine_expression_boost * envelope_start,
                amplitude * damping * sine_expression_boost * envelope_end,
            )
        } else {
            (
                amplitude * sine_length * 1.5 * envelope_start,
                amplitude * sine_length * 1.5 * envelope_end,
            )
        };
        tone.operator_expressions[index] = scale_start;
        tone.operator_expression_deltas[index] = (scale_end - scale_start) / run_length;
    }

    let feedback_envelope = &ENVELOPES[instrument.feedback_envelope];
    let feedback_start = config::operator_amplitude_curve(instrument.feedback_amplitude)
        * sine_length
        * 0.3
        * compute_envelope(feedback_envelope, seconds_start, beats_start, note_expression_start);
    let feedback_end = config::operator_amplitude_curve(instrument.feedback_amplitude)
        * sine_length
        * 0.3
        * compute_envelope(feedback_envelope, seconds_end, beats_end, note_expression_end);
    tone.feedback_mult = feedback_start;
    tone.feedback_delta = (feedback_end - feedback_start) / run_length;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_from_pitch() {
        assert!((frequency_from_pitch(69.0) - 440.0).abs() < 1e-9);
        assert!((frequency_from_pitch(57.0) - 220.0).abs() < 1e-9);
        // Middle C.
        assert!((frequency_from_pitch(60.0) - 261.6256).abs() < 1e-3);
    }

    #[test]
    fn test_volume_mult() {
        assert_eq!(instrument_volume_mult(0), 1.0);
        assert!((instrument_volume_mult(2) - 0.5).abs() < 1e-12);
        assert_eq!(instrument_volume_mult(5), 0.0);
    }

    #[test]
    fn test_note_expression_curve() {
        assert_eq!(note_expression_to_gain(0.0), 0.0);
        assert_eq!(note_expression_to_gain(3.0), 1.0);
        assert!(note_expression_to_gain(1.5) < 0.5);
    }

    #[test]
    fn test_vibrato_lfo_is_zero_when_disabled() {
        let none = &config::VIBRATOS[0];
        assert_eq!(vibrato_lfo(none, 1.234), 0.0);
    }

    #[test]
    fn test_compute_tone_sets_phase_delta() {
        let song = Song::new();
        let instrument = Instrument::new(InstrumentKind::Chip);
        let mut tone = Tone::default();
        tone.reset();
        tone.pitches[0] = 48;
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
        let ctx = RunContext {
            sample_rate: 44100.0,
            samples_per_tick: 100.0,
            ticks_into_bar: 0,
            tick_sample_countdown: 100.0,
            run_length: 100,
            seconds_into_song: 0.0,
        };
        compute_tone(&ctx, &song, 0, &instrument, &mut tone, false);
        // Key C, octave 0: pitch 48 sounds at MIDI 48.
        let expected = frequency_from_pitch(48.0) / 44100.0;
        assert!((tone.phase_deltas[0] - expected).abs() / expected < 1e-6);
        assert!(tone.expression > 0.0);
        assert_eq!(tone.filter_count, 0);
    }
}
