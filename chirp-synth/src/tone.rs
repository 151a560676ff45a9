//! Tone state and the shared tone pool
//!
//! A [`Tone`] is one sounding voice: a chord (or one pitch of a chord)
//! played by one instrument. Tones are owned by a pool and referenced by
//! index from the per-channel queues, so starting and stopping notes never
//! allocates once the pool has warmed up.

use chirp_song::{Pin, FILTER_MAX_POINTS, MAX_CHORD_SIZE, OPERATOR_COUNT};

use crate::filter::DynamicBiquad;

/// A copy of the note data a tone is playing. Tones outlive the borrow of
/// the song that spawned them (released tones keep sounding into the next
/// pattern), so the relevant fields are copied in rather than referenced.
#[derive(Debug, Clone, Default)]
pub struct NoteSpan {
    /// Start and end in parts relative to the bar the note began in.
    pub start: u32,
    pub end: u32,
    pub pins: Vec<Pin>,
}

impl NoteSpan {
    pub fn length(&self) -> u32 {
        self.end - self.start
    }

    /// Interval and expression at `time` parts into the note, linearly
    /// interpolated between the bracketing pins.
    pub fn parameters_at(&self, time: f64) -> (f64, f64) {
        let time = time.clamp(0.0, self.length() as f64);
        let mut previous = self.pins[0];
        for &pin in &self.pins[1..] {
            if (pin.time as f64) >= time {
                let span = (pin.time - previous.time).max(1) as f64;
                let ratio = (time - previous.time as f64) / span;
                let interval =
                    previous.interval as f64 + (pin.interval - previous.interval) as f64 * ratio;
                let expression = previous.expression as f64
                    + (pin.expression as f64 - previous.expression as f64) * ratio;
                return (interval, expression);
            }
            previous = pin;
        }
        let last = self.pins[self.pins.len() - 1];
        (last.interval as f64, last.expression as f64)
    }
}

/// Summary of the note before or after the current one, for slide
/// transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdjacentNote {
    /// Semitone offset from this note's base pitch at the shared boundary.
    pub interval: f64,
    /// Note expression (0..=3) at the shared boundary.
    pub expression: f64,
    /// Length in parts.
    pub length: u32,
}

/// Guitar plucked-string state: the circular delay line and its three
/// in-loop filters. Boxed inside the tone since only guitar tones carry
/// one.
#[derive(Debug, Clone, Default)]
pub struct GuitarString {
    pub delay_line: Vec<f32>,
    pub delay_index: usize,
    /// Fractional-delay all-pass aligning the loop to the exact period.
    pub fraction_filter: DynamicBiquad,
    /// Dispersion all-pass.
    pub dispersion_filter: DynamicBiquad,
    /// High-shelf decay filter.
    pub shelf_filter: DynamicBiquad,
    pub delay_length: f64,
    /// Pitch the string is currently tuned to; retuning triggers a pluck.
    pub tuned_pitch: f64,
    pub plucked: bool,
}

/// One sounding voice. Most fields are written by `compute_tone` each run
/// and consumed by the instrument synth loops.
#[derive(Debug, Clone, Default)]
pub struct Tone {
    pub instrument_index: usize,
    pub pitches: [u32; MAX_CHORD_SIZE],
    pub pitch_count: usize,
    /// Size of the chord this tone belongs to (for chord expression).
    pub chord_size: usize,

    pub note: Option<NoteSpan>,
    pub prev_note: Option<AdjacentNote>,
    pub next_note: Option<AdjacentNote>,

    /// Whole ticks since the note began (frozen once released).
    pub ticks_since_note_start: u32,
    /// Whole ticks since the tone was released.
    pub ticks_since_released: u32,
    pub is_on_last_tick: bool,
    /// Over-cap released tones fade within their run instead of lingering.
    pub fade_out_fast: bool,
    /// Phases must be reset before the next synth run.
    pub fresh: bool,
    /// Held by live input rather than a pattern note.
    pub live: bool,

    // Written by compute_tone, read by the synth loops.
    pub phases: [f64; OPERATOR_COUNT],
    pub phase_deltas: [f64; OPERATOR_COUNT],
    pub phase_delta_scales: [f64; OPERATOR_COUNT],
    pub expression: f64,
    pub expression_delta: f64,
    pub operator_expressions: [f64; OPERATOR_COUNT],
    pub operator_expression_deltas: [f64; OPERATOR_COUNT],
    pub feedback_mult: f64,
    pub feedback_delta: f64,
    pub feedback_outputs: [f64; OPERATOR_COUNT],
    /// Custom-interval frequency ratio applied to secondary voices.
    pub interval_mult: f64,
    pub interval_expression_mult: f64,
    pub pulse_width: f64,
    pub pulse_width_delta: f64,
    /// One-pole smoothing state for the noise-family instruments.
    pub noise_sample: f64,
    /// Sustain/dispersion inputs for the guitar loop, set per run.
    pub guitar_delay_length: f64,
    pub guitar_shelf_gain: f64,

    pub filters: [DynamicBiquad; FILTER_MAX_POINTS],
    pub filter_count: usize,

    pub guitar: Option<Box<GuitarString>>,
}

impl Tone {
    /// Return the tone to a blank state, keeping heap capacity.
    pub fn reset(&mut self) {
        let mut guitar = self.guitar.take();
        if let Some(string) = guitar.as_mut() {
            string.delay_line.fill(0.0);
            string.delay_index = 0;
            string.fraction_filter = DynamicBiquad::default();
            string.dispersion_filter = DynamicBiquad::default();
            string.shelf_filter = DynamicBiquad::default();
            string.delay_length = 0.0;
            string.tuned_pitch = -1.0;
            string.plucked = false;
        }
        *self = Tone { guitar, fresh: true, interval_mult: 1.0, interval_expression_mult: 1.0, ..Tone::default() };
    }

    /// The pitch a single-pitch synth loop should play, after arpeggio
    /// selection.
    pub fn primary_pitch(&self) -> u32 {
        self.pitches[0]
    }

    /// Clamp non-finite or runaway DSP state; part of the engine's tick
    /// sanitization sweep.
    pub fn sanitize(&mut self) {
        for filter in &mut self.filters[..self.filter_count] {
            filter.sanitize();
        }
        if !self.noise_sample.is_finite() || self.noise_sample.abs() > 100.0 {
            self.noise_sample = 0.0;
        }
        for phase in &mut self.feedback_outputs {
            if !phase.is_finite() || phase.abs() > 100.0 {
                *phase = 0.0;
            }
        }
        if let Some(string) = self.guitar.as_mut() {
            string.fraction_filter.sanitize();
            string.dispersion_filter.sanitize();
            string.shelf_filter.sanitize();
            for sample in &mut string.delay_line {
                if !sample.is_finite() || sample.abs() > 100.0 {
                    *sample = 0.0;
                } else if sample.abs() < 1e-24 {
                    *sample = 0.0;
                }
            }
        }
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Arena of tones with a free list; queues hold indices into it.
#[derive(Debug, Default)]
pub struct TonePool {
    tones: Vec<Tone>,
    free: Vec<usize>,
}

impl TonePool {
    pub fn new() -> TonePool {
        TonePool::default()
    }

    /// Take a reset tone from the pool, growing it if necessary.
    pub fn allocate(&mut self) -> usize {
        match self.free.pop() {
            Some(id) => {
                self.tones[id].reset();
                id
            }
            None => {
                let mut tone = Tone::default();
                tone.reset();
                self.tones.push(tone);
                self.tones.len() - 1
            }
        }
    }

    /// Return a tone to the pool.
    pub fn release(&mut self, id: usize) {
        debug_assert!(!self.free.contains(&id));
        self.free.push(id);
    }

    pub fn get(&self, id: usize) -> &Tone {
        &self.tones[id]
    }

    pub fn get_mut(&mut self, id: usize) -> &mut Tone {
        &mut self.tones[id]
    }

    /// Number of tones ever created (pooled or live).
    pub fn capacity(&self) -> usize {
        self.tones.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_reuses_tones() {
        let mut pool = TonePool::new();
        let first = pool.allocate();
        pool.get_mut(first).pitch_count = 3;
        pool.release(first);
        let second = pool.allocate();
        assert_eq!(first, second);
        assert_eq!(pool.get(second).pitch_count, 0);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_note_span_interpolation() {
        let span = NoteSpan {
            start: 0,
            end: 24,
            pins: vec![
                Pin { time: 0, interval: 0, expression: 3 },
                Pin { time: 12, interval: 4, expression: 1 },
                Pin { time: 24, interval: 4, expression: 1 },
            ],
        };
        let (interval, expression) = span.parameters_at(6.0);
        assert!((interval - 2.0).abs() < 1e-9);
        assert!((expression - 2.0).abs() < 1e-9);
        let (interval, _) = span.parameters_at(18.0);
        assert!((interval - 4.0).abs() < 1e-9);
        let (_, expression) = span.parameters_at(24.0);
        assert!((expression - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_filters_and_keeps_capacity() {
        let mut tone = Tone::default();
        tone.guitar = Some(Box::new(GuitarString {
            delay_line: vec![0.5; 64],
            ..GuitarString::default()
        }));
        tone.reset();
        let string = tone.guitar.as_ref().unwrap();
        assert_eq!(string.delay_line.len(), 64);
        assert!(string.delay_line.iter().all(|&sample| sample == 0.0));
        assert!(tone.fresh);
    }
}
