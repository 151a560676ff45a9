//! Song data model
//!
//! A [`Song`] is a list of pitch channels followed by noise channels, each
//! holding a fixed-size bank of instruments and patterns plus a per-bar
//! pattern sequence. Counts are resizable at any time; resizing preserves
//! existing content and fills new slots with defaults.

use crate::config;
use crate::{
    BAR_COUNT_MAX, BAR_COUNT_MIN, BEATS_PER_BAR_MAX, BEATS_PER_BAR_MIN, DRUM_COUNT,
    EXPRESSION_MAX, FILTER_MAX_POINTS, HARMONICS_CONTROL_POINTS, INSTRUMENTS_PER_CHANNEL_MAX,
    INSTRUMENTS_PER_CHANNEL_MIN, MAX_CHORD_SIZE, MAX_PITCH, NOISE_CHANNEL_COUNT_MAX,
    OPERATOR_COUNT, PARTS_PER_BEAT, PATTERNS_PER_CHANNEL_MAX, PATTERNS_PER_CHANNEL_MIN,
    PITCH_CHANNEL_COUNT_MAX, PITCH_CHANNEL_COUNT_MIN, SPECTRUM_CONTROL_POINTS, TEMPO_MAX,
    TEMPO_MIN,
};

// =============================================================================
// Filters
// =============================================================================

/// The response family of one filter control point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
    Peak,
}

impl FilterType {
    pub fn from_index(index: u32) -> FilterType {
        match index {
            0 => FilterType::LowPass,
            1 => FilterType::HighPass,
            _ => FilterType::Peak,
        }
    }

    pub fn to_index(self) -> u32 {
        match self {
            FilterType::LowPass => 0,
            FilterType::HighPass => 1,
            FilterType::Peak => 2,
        }
    }
}

/// One biquad stage of a filter cascade. `freq` and `gain` are settings,
/// not Hz/linear values; see the conversion helpers in the crate root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterControlPoint {
    pub kind: FilterType,
    pub freq: u32,
    pub gain: u32,
}

/// An ordered list of up to [`FILTER_MAX_POINTS`] control points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSettings {
    pub points: Vec<FilterControlPoint>,
}

impl FilterSettings {
    /// Append a point, silently dropping it when the cascade is full.
    pub fn add_point(&mut self, kind: FilterType, freq: u32, gain: u32) {
        if self.points.len() < FILTER_MAX_POINTS {
            self.points.push(FilterControlPoint { kind, freq, gain });
        }
    }
}

// =============================================================================
// Instruments
// =============================================================================

/// Instrument synthesis model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Chip,
    Fm,
    Noise,
    Spectrum,
    Drumset,
    Harmonics,
    Pwm,
    Guitar,
}

impl InstrumentKind {
    pub fn from_index(index: u32) -> Option<InstrumentKind> {
        match index {
            0 => Some(InstrumentKind::Chip),
            1 => Some(InstrumentKind::Fm),
            2 => Some(InstrumentKind::Noise),
            3 => Some(InstrumentKind::Spectrum),
            4 => Some(InstrumentKind::Drumset),
            5 => Some(InstrumentKind::Harmonics),
            6 => Some(InstrumentKind::Pwm),
            7 => Some(InstrumentKind::Guitar),
            _ => None,
        }
    }

    pub fn to_index(self) -> u32 {
        match self {
            InstrumentKind::Chip => 0,
            InstrumentKind::Fm => 1,
            InstrumentKind::Noise => 2,
            InstrumentKind::Spectrum => 3,
            InstrumentKind::Drumset => 4,
            InstrumentKind::Harmonics => 5,
            InstrumentKind::Pwm => 6,
            InstrumentKind::Guitar => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InstrumentKind::Chip => "chip",
            InstrumentKind::Fm => "FM",
            InstrumentKind::Noise => "noise",
            InstrumentKind::Spectrum => "spectrum",
            InstrumentKind::Drumset => "drumset",
            InstrumentKind::Harmonics => "harmonics",
            InstrumentKind::Pwm => "PWM",
            InstrumentKind::Guitar => "guitar",
        }
    }

    pub fn from_name(name: &str) -> Option<InstrumentKind> {
        (0..8).filter_map(InstrumentKind::from_index).find(|k| k.name() == name)
    }

    /// Kinds selectable in a channel of the given type.
    pub fn allowed_in(self, noise_channel: bool) -> bool {
        if noise_channel {
            matches!(
                self,
                InstrumentKind::Noise | InstrumentKind::Spectrum | InstrumentKind::Drumset
            )
        } else {
            !matches!(self, InstrumentKind::Noise | InstrumentKind::Drumset)
        }
    }
}

/// One FM operator: a frequency-table index, an amplitude setting and an
/// amplitude envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmOperator {
    pub frequency: usize,
    pub amplitude: u32,
    pub envelope: usize,
}

impl Default for FmOperator {
    fn default() -> Self {
        // Custom envelopes make carriers follow the note's expression.
        Self { frequency: 0, amplitude: 0, envelope: config::ENVELOPE_CUSTOM }
    }
}

/// An instrument: the synthesis settings shared by every note a pattern
/// assigns to it. Kind-specific fields are unused (but kept) when the kind
/// changes, matching how the codec mutates instruments tag by tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub kind: InstrumentKind,
    /// Volume setting 0..=5; 5 mutes.
    pub volume: u32,
    /// Preset id carried through the codec (0 = custom).
    pub preset: u32,
    /// The main filter cascade and the envelope applied to its frequencies.
    pub filter: FilterSettings,
    pub filter_envelope: usize,
    /// The post-distortion filter cascade.
    pub distortion_filter: FilterSettings,
    pub transition: usize,
    pub chord: usize,
    pub vibrato: usize,
    pub unison: usize,
    /// Bitmask over [`crate::effect`].
    pub effects: u32,
    pub distortion: u32,
    pub bitcrusher_freq: u32,
    pub bitcrusher_quantization: u32,
    pub pan: u32,
    pub reverb: u32,

    // Chip / harmonics
    pub chip_wave: usize,
    pub harmonics: [u32; HARMONICS_CONTROL_POINTS],

    // Noise
    pub noise_wave: usize,

    // FM
    pub algorithm: usize,
    pub feedback_type: usize,
    pub feedback_amplitude: u32,
    pub feedback_envelope: usize,
    pub operators: [FmOperator; OPERATOR_COUNT],

    // Spectrum
    pub spectrum: [u32; SPECTRUM_CONTROL_POINTS],

    // PWM / guitar
    pub pulse_width: u32,
    pub pulse_envelope: usize,
    pub sustain: u32,

    // Drumset
    pub drum_envelopes: [usize; DRUM_COUNT],
    pub drum_spectra: [[u32; SPECTRUM_CONTROL_POINTS]; DRUM_COUNT],
}

impl Instrument {
    /// A fresh instrument of the given kind with that kind's defaults.
    pub fn new(kind: InstrumentKind) -> Instrument {
        let mut spectrum = [0u32; SPECTRUM_CONTROL_POINTS];
        for (i, value) in spectrum.iter_mut().enumerate() {
            // A gentle high-frequency rolloff so a fresh spectrum is audible.
            *value = if i < 5 { 7 - i as u32 } else { u32::from(i % 2 == 0) * 2 };
        }
        let mut harmonics = [0u32; HARMONICS_CONTROL_POINTS];
        harmonics[0] = 7;
        let mut drum_spectra = [[0u32; SPECTRUM_CONTROL_POINTS]; DRUM_COUNT];
        for (drum, spectrum) in drum_spectra.iter_mut().enumerate() {
            for (i, value) in spectrum.iter_mut().enumerate() {
                // Higher drums emphasize higher partials.
                let center = 2 + drum * 2;
                let distance = (i as i32 - center as i32).unsigned_abs();
                *value = 7u32.saturating_sub(distance / 2).min(7);
            }
        }
        Instrument {
            kind,
            volume: 0,
            preset: 0,
            filter: FilterSettings::default(),
            filter_envelope: config::ENVELOPE_DEFAULT,
            distortion_filter: FilterSettings::default(),
            transition: config::TRANSITION_DEFAULT,
            chord: config::CHORD_DEFAULT,
            vibrato: config::VIBRATO_DEFAULT,
            unison: config::UNISON_DEFAULT,
            effects: 0,
            distortion: 3,
            bitcrusher_freq: 7,
            bitcrusher_quantization: 4,
            pan: crate::PAN_CENTER,
            reverb: 2,
            chip_wave: config::CHIP_WAVE_DEFAULT,
            harmonics,
            noise_wave: config::NOISE_WAVE_DEFAULT,
            algorithm: 0,
            feedback_type: 0,
            feedback_amplitude: 0,
            feedback_envelope: config::ENVELOPE_DEFAULT,
            operators: [
                FmOperator { frequency: 0, amplitude: 14, envelope: config::ENVELOPE_CUSTOM },
                FmOperator::default(),
                FmOperator::default(),
                FmOperator::default(),
            ],
            spectrum,
            pulse_width: crate::PULSE_WIDTH_RANGE,
            pulse_envelope: config::ENVELOPE_DEFAULT,
            sustain: 6,
            drum_envelopes: [config::envelope_index_from_name("twang 2"); DRUM_COUNT],
            drum_spectra,
        }
    }

    /// Replace the synthesis model, keeping volume/pan/effects settings.
    pub fn set_kind(&mut self, kind: InstrumentKind) {
        self.kind = kind;
        self.preset = 0;
    }
}

// =============================================================================
// Notes and patterns
// =============================================================================

/// A control point within a note. `time` is parts since note start,
/// `interval` a semitone bend relative to the note's pitches, `expression`
/// a velocity 0..=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pin {
    pub time: u32,
    pub interval: i32,
    pub expression: u32,
}

/// A note: one or more simultaneous pitches and a bend/expression contour.
///
/// Invariants: `pins` is non-empty, starts at `(0, 0)`, ends at time
/// `end - start`, and is strictly time-increasing; `end > start`;
/// `pitches.len() <= MAX_CHORD_SIZE`.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub start: u32,
    pub end: u32,
    pub pitches: Vec<u32>,
    pub pins: Vec<Pin>,
}

impl Note {
    pub fn new(start: u32, end: u32, pitch: u32, expression: u32) -> Note {
        debug_assert!(end > start);
        Note {
            start,
            end,
            pitches: vec![pitch],
            pins: vec![
                Pin { time: 0, interval: 0, expression },
                Pin { time: end - start, interval: 0, expression },
            ],
        }
    }

    pub fn length(&self) -> u32 {
        self.end - self.start
    }
}

/// A pattern: an instrument choice plus its notes, sorted by start and
/// non-overlapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pattern {
    /// Index into the channel's instrument bank.
    pub instrument: usize,
    pub notes: Vec<Note>,
}

impl Pattern {
    pub fn reset(&mut self) {
        self.instrument = 0;
        self.notes.clear();
    }
}

// =============================================================================
// Channels
// =============================================================================

/// A channel: an octave offset, a bank of instruments and patterns, and a
/// per-bar sequence of 1-based pattern references (0 = silent bar).
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub octave: u32,
    pub muted: bool,
    pub instruments: Vec<Instrument>,
    pub patterns: Vec<Pattern>,
    pub bars: Vec<u32>,
}

impl Channel {
    fn new(noise: bool, instrument_count: usize, pattern_count: usize, bar_count: usize) -> Channel {
        let kind = if noise { InstrumentKind::Noise } else { InstrumentKind::Chip };
        Channel {
            octave: 0,
            muted: false,
            instruments: (0..instrument_count).map(|_| Instrument::new(kind)).collect(),
            patterns: (0..pattern_count).map(|_| Pattern::default()).collect(),
            bars: vec![0; bar_count],
        }
    }
}

// =============================================================================
// Song
// =============================================================================

/// A complete song. Pitch channels come first, then noise channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub scale: usize,
    pub key: usize,
    /// Beats per minute.
    pub tempo: u32,
    pub beats_per_bar: usize,
    pub bar_count: usize,
    pub patterns_per_channel: usize,
    pub instruments_per_channel: usize,
    pub rhythm: usize,
    pub loop_start: usize,
    pub loop_length: usize,
    pub pitch_channel_count: usize,
    pub noise_channel_count: usize,
    pub channels: Vec<Channel>,
}

impl Default for Song {
    fn default() -> Self {
        Self::new()
    }
}

impl Song {
    /// The default three-pitch-channel, one-noise-channel song.
    pub fn new() -> Song {
        let mut song = Song {
            scale: 0,
            key: config::KEY_DEFAULT,
            tempo: 150,
            beats_per_bar: 8,
            bar_count: 16,
            patterns_per_channel: 8,
            instruments_per_channel: 1,
            rhythm: config::RHYTHM_DEFAULT,
            loop_start: 0,
            loop_length: 16,
            pitch_channel_count: 0,
            noise_channel_count: 0,
            channels: Vec::new(),
        };
        song.set_channel_counts(3, 1);
        song
    }

    /// True when the channel at `index` is a noise channel.
    pub fn channel_is_noise(&self, index: usize) -> bool {
        index >= self.pitch_channel_count
    }

    /// Parts in one bar.
    pub fn parts_per_bar(&self) -> u32 {
        (self.beats_per_bar * PARTS_PER_BEAT) as u32
    }

    /// The pattern sounding in `channel` at `bar`, if any.
    pub fn pattern_at_bar(&self, channel: usize, bar: usize) -> Option<&Pattern> {
        let channel = self.channels.get(channel)?;
        let reference = *channel.bars.get(bar)? as usize;
        if reference == 0 {
            return None;
        }
        channel.patterns.get(reference - 1)
    }

    /// Highest pitch valid in the given channel.
    pub fn max_pitch_for_channel(&self, channel: usize) -> u32 {
        if self.channel_is_noise(channel) { DRUM_COUNT as u32 - 1 } else { MAX_PITCH }
    }

    // -------------------------------------------------------------------------
    // Resizing (content-preserving)
    // -------------------------------------------------------------------------

    /// Resize the channel lists. Existing channels keep their content;
    /// new channels get defaults. Pitch channels always precede noise.
    pub fn set_channel_counts(&mut self, pitch: usize, noise: usize) {
        let pitch = pitch.clamp(PITCH_CHANNEL_COUNT_MIN, PITCH_CHANNEL_COUNT_MAX);
        let noise = noise.min(NOISE_CHANNEL_COUNT_MAX);

        let old_noise: Vec<Channel> = self.channels.split_off(self.pitch_channel_count);
        self.channels.truncate(pitch);
        while self.channels.len() < pitch {
            self.channels.push(Channel::new(
                false,
                self.instruments_per_channel,
                self.patterns_per_channel,
                self.bar_count,
            ));
        }
        self.channels.extend(old_noise.into_iter().take(noise));
        while self.channels.len() < pitch + noise {
            self.channels.push(Channel::new(
                true,
                self.instruments_per_channel,
                self.patterns_per_channel,
                self.bar_count,
            ));
        }
        self.pitch_channel_count = pitch;
        self.noise_channel_count = noise;
    }

    pub fn set_bar_count(&mut self, bar_count: usize) {
        self.bar_count = bar_count.clamp(BAR_COUNT_MIN, BAR_COUNT_MAX);
        for channel in &mut self.channels {
            channel.bars.resize(self.bar_count, 0);
        }
        if self.loop_start >= self.bar_count {
            self.loop_start = 0;
        }
        self.loop_length = self.loop_length.min(self.bar_count - self.loop_start).max(1);
    }

    pub fn set_patterns_per_channel(&mut self, count: usize) {
        self.patterns_per_channel =
            count.clamp(PATTERNS_PER_CHANNEL_MIN, PATTERNS_PER_CHANNEL_MAX);
        for channel in &mut self.channels {
            channel.patterns.resize_with(self.patterns_per_channel, Pattern::default);
        }
    }

    pub fn set_instruments_per_channel(&mut self, count: usize) {
        self.instruments_per_channel =
            count.clamp(INSTRUMENTS_PER_CHANNEL_MIN, INSTRUMENTS_PER_CHANNEL_MAX);
        let pitch_count = self.pitch_channel_count;
        for (index, channel) in self.channels.iter_mut().enumerate() {
            let kind =
                if index >= pitch_count { InstrumentKind::Noise } else { InstrumentKind::Chip };
            channel
                .instruments
                .resize_with(self.instruments_per_channel, || Instrument::new(kind));
            for pattern in &mut channel.patterns {
                if pattern.instrument >= self.instruments_per_channel {
                    pattern.instrument = 0;
                }
            }
        }
    }

    pub fn set_tempo(&mut self, tempo: u32) {
        self.tempo = tempo.clamp(TEMPO_MIN, TEMPO_MAX);
    }

    pub fn set_beats_per_bar(&mut self, beats: usize) {
        self.beats_per_bar = beats.clamp(BEATS_PER_BAR_MIN, BEATS_PER_BAR_MAX);
    }

    /// Clamp every field into range and restore note invariants; used after
    /// ingesting loosely-validated input (JSON).
    pub fn validate(&mut self) {
        self.scale = self.scale.min(config::SCALES.len() - 1);
        self.key = self.key.min(config::KEYS.len() - 1);
        self.rhythm = self.rhythm.min(config::RHYTHMS.len() - 1);
        self.set_tempo(self.tempo);
        let parts_per_bar = self.parts_per_bar();
        for index in 0..self.channels.len() {
            let noise = self.channel_is_noise(index);
            let max_pitch = self.max_pitch_for_channel(index);
            let channel = &mut self.channels[index];
            channel.octave = if noise { 0 } else { channel.octave.min(crate::OCTAVE_MAX) };
            for reference in &mut channel.bars {
                if *reference as usize > self.patterns_per_channel {
                    *reference = 0;
                }
            }
            for pattern in &mut channel.patterns {
                pattern.instrument = pattern.instrument.min(self.instruments_per_channel - 1);
                pattern.notes.retain(|note| note.start < parts_per_bar && note.end > note.start);
                for note in &mut pattern.notes {
                    note.end = note.end.min(parts_per_bar);
                    note.pitches.truncate(MAX_CHORD_SIZE);
                    note.pitches.retain(|&pitch| pitch <= max_pitch);
                    if note.pitches.is_empty() {
                        note.pitches.push(0);
                    }
                    sanitize_pins(note);
                }
            }
        }
    }
}

/// Restore the pin invariants of a note: first pin at `(0, 0)`, last pin at
/// the note length, strictly increasing times, expressions in range.
fn sanitize_pins(note: &mut Note) {
    let length = note.length();
    let mut pins: Vec<Pin> = Vec::with_capacity(note.pins.len() + 1);
    for pin in &note.pins {
        let expression = pin.expression.min(EXPRESSION_MAX);
        match pins.last() {
            None => pins.push(Pin { time: 0, interval: 0, expression }),
            Some(last) if pin.time > last.time && pin.time <= length => {
                pins.push(Pin { time: pin.time, interval: pin.interval, expression });
            }
            _ => {}
        }
    }
    if pins.is_empty() {
        pins.push(Pin { time: 0, interval: 0, expression: EXPRESSION_MAX });
    }
    let last = *pins.last().unwrap();
    if last.time != length {
        pins.push(Pin { time: length, interval: last.interval, expression: last.expression });
    }
    note.pins = pins;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_song_shape() {
        let song = Song::new();
        assert_eq!(song.channels.len(), 4);
        assert_eq!(song.pitch_channel_count, 3);
        assert_eq!(song.noise_channel_count, 1);
        assert!(!song.channel_is_noise(2));
        assert!(song.channel_is_noise(3));
        assert_eq!(song.channels[0].instruments[0].kind, InstrumentKind::Chip);
        assert_eq!(song.channels[3].instruments[0].kind, InstrumentKind::Noise);
        assert_eq!(song.channels[0].bars.len(), song.bar_count);
    }

    #[test]
    fn test_resize_preserves_content() {
        let mut song = Song::new();
        song.channels[1].patterns[0].notes.push(Note::new(0, 24, 48, 3));
        song.channels[1].bars[0] = 1;

        song.set_channel_counts(5, 2);
        assert_eq!(song.channels.len(), 7);
        assert_eq!(song.channels[1].patterns[0].notes.len(), 1);

        song.set_channel_counts(2, 1);
        assert_eq!(song.channels.len(), 3);
        assert_eq!(song.channels[1].patterns[0].notes.len(), 1);

        song.set_bar_count(32);
        assert_eq!(song.channels[0].bars.len(), 32);
        assert_eq!(song.channels[1].bars[0], 1);
    }

    #[test]
    fn test_instrument_resize_fixes_pattern_references() {
        let mut song = Song::new();
        song.set_instruments_per_channel(4);
        song.channels[0].patterns[0].instrument = 3;
        song.set_instruments_per_channel(2);
        assert_eq!(song.channels[0].patterns[0].instrument, 0);
    }

    #[test]
    fn test_pattern_at_bar() {
        let mut song = Song::new();
        assert!(song.pattern_at_bar(0, 0).is_none());
        song.channels[0].bars[0] = 2;
        song.channels[0].patterns[1].notes.push(Note::new(0, 12, 60, 3));
        assert_eq!(song.pattern_at_bar(0, 0).unwrap().notes.len(), 1);
    }

    #[test]
    fn test_sanitize_pins_restores_invariants() {
        let mut note = Note::new(0, 24, 60, 3);
        note.pins = vec![
            Pin { time: 0, interval: 5, expression: 9 },
            Pin { time: 30, interval: 2, expression: 1 },
        ];
        sanitize_pins(&mut note);
        assert_eq!(note.pins[0], Pin { time: 0, interval: 0, expression: 3 });
        assert_eq!(note.pins.last().unwrap().time, 24);
        for window in note.pins.windows(2) {
            assert!(window[0].time < window[1].time);
        }
    }
}
