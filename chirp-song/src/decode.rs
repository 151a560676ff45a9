//! Song URL decoder
//!
//! A song URL is one version symbol followed by `(tag, payload)` records.
//! The writer emits tags in a canonical order but the reader accepts any
//! order; each tag's payload shape depends only on the version. Versions
//! 2..=8 are legacy: their differences are captured once in a
//! [`VersionFlags`] set and each tag handler consults only the flags it
//! needs, normalizing everything into the current model.
//!
//! Unknown tags are fatal. Out-of-range values are clamped. Truncated
//! payloads are fatal.

use std::collections::HashMap;

use tracing::debug;

use crate::bits::{char_to_value, BitReader};
use crate::config;
use crate::error::SongError;
use crate::legacy::translate_legacy_filter;
use crate::song::{FilterSettings, FilterType, Instrument, InstrumentKind, Note, Pattern, Pin, Song};
use crate::{
    effect, BITCRUSHER_FREQ_RANGE, BITCRUSHER_QUANTIZATION_RANGE, DISTORTION_MAX,
    EXPRESSION_MAX, FILTER_FREQ_RANGE, FILTER_GAIN_RANGE, HARMONICS_CONTROL_POINTS,
    HARMONICS_MAX, MAX_CHORD_SIZE, OCTAVE_MAX, OPERATOR_AMPLITUDE_MAX, OPERATOR_COUNT, PAN_MAX,
    PULSE_WIDTH_RANGE, REVERB_RANGE, SPECTRUM_CONTROL_POINTS, SPECTRUM_MAX, SUSTAIN_MAX,
    TEMPO_MAX, TEMPO_MIN, VOLUME_RANGE,
};

/// The current URL version.
pub const LATEST_VERSION: u32 = 9;

/// The oldest URL version still readable.
pub const OLDEST_VERSION: u32 = 2;

/// Tempo values for version < 4, indexed by the stored symbol.
const TEMPOS_BEFORE_FOUR: [u32; 4] = [95, 120, 151, 190];

/// Tempo values for versions 4..=6, indexed by the stored symbol.
const TEMPOS_BEFORE_SEVEN: [u32; 15] =
    [88, 95, 103, 111, 120, 130, 140, 151, 163, 176, 190, 206, 222, 240, 259];

/// Seed contents of the recent-pitch list used by the pattern bit stream.
/// Shared with the encoder so round-trips are exact.
pub(crate) const RECENT_PITCH_SEED: [u32; 8] = [12, 19, 24, 31, 36, 7, 0, 3];
pub(crate) const RECENT_PITCH_SEED_NOISE: [u32; 8] = [4, 6, 7, 2, 3, 8, 0, 10];
pub(crate) const INITIAL_LAST_PITCH: u32 = 12;
pub(crate) const INITIAL_LAST_PITCH_NOISE: u32 = 4;

/// Maximum entries in the recent-shape move-to-front list.
pub(crate) const RECENT_SHAPE_LIMIT: usize = 10;

/// Parse a song from its URL form.
///
/// Leading whitespace and a single `#` are ignored; if the first meaningful
/// character is `{` the remainder is parsed as JSON instead.
pub fn from_url(input: &str) -> Result<Song, SongError> {
    let trimmed = input.trim_start();
    let trimmed = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let trimmed = trimmed.trim();
    if trimmed.starts_with('{') {
        return crate::json::from_json(trimmed);
    }
    if trimmed.is_empty() {
        return Err(SongError::UnexpectedEnd { position: 0 });
    }

    let mut symbols = Vec::with_capacity(trimmed.len());
    let mut tags = Vec::with_capacity(trimmed.len());
    for (position, character) in trimmed.chars().enumerate() {
        symbols.push(char_to_value(character, position)?);
        tags.push(character);
    }

    Decoder::new(symbols, tags)?.decode()
}

/// Which legacy forks apply, computed once from the version symbol.
#[derive(Debug, Clone, Copy)]
struct VersionFlags {
    before_three: bool,
    before_four: bool,
    before_five: bool,
    before_six: bool,
    before_seven: bool,
    before_nine: bool,
}

impl VersionFlags {
    fn new(version: u32) -> VersionFlags {
        VersionFlags {
            before_three: version < 3,
            before_four: version < 4,
            before_five: version < 5,
            before_six: version < 6,
            before_seven: version < 7,
            before_nine: version < 9,
        }
    }
}

/// Legacy single-filter settings gathered per instrument while reading a
/// pre-9 URL, translated into control points at the end of the decode.
#[derive(Debug, Clone, Copy, Default)]
struct LegacyFilter {
    cutoff: Option<u32>,
    resonance: Option<u32>,
    envelope: Option<usize>,
}

struct Decoder {
    symbols: Vec<u8>,
    tags: Vec<char>,
    position: usize,
    flags: VersionFlags,
    song: Song,

    /// The (channel, instrument) slot per-instrument tags apply to,
    /// advanced by each `T` tag.
    cursor_channel: usize,
    cursor_instrument: usize,
    cursor_started: bool,

    legacy_filters: HashMap<(usize, usize), LegacyFilter>,
    legacy_reverb_requested: HashMap<(usize, usize), bool>,
    legacy_global_reverb: u32,
}

impl Decoder {
    fn new(symbols: Vec<u8>, tags: Vec<char>) -> Result<Decoder, SongError> {
        let version = symbols[0] as u32;
        if !(OLDEST_VERSION..=LATEST_VERSION).contains(&version) {
            return Err(SongError::UnsupportedVersion(version));
        }
        Ok(Decoder {
            symbols,
            tags,
            position: 1,
            flags: VersionFlags::new(version),
            song: Song::new(),
            cursor_channel: 0,
            cursor_instrument: 0,
            cursor_started: false,
            legacy_filters: HashMap::new(),
            legacy_reverb_requested: HashMap::new(),
            legacy_global_reverb: 0,
        })
    }

    // -------------------------------------------------------------------------
    // Symbol-level reading
    // -------------------------------------------------------------------------

    fn read_value(&mut self) -> Result<u32, SongError> {
        let value = *self
            .symbols
            .get(self.position)
            .ok_or(SongError::UnexpectedEnd { position: self.position })?;
        self.position += 1;
        Ok(value as u32)
    }

    /// Two symbols as a 12-bit big-endian value.
    fn read_value2(&mut self) -> Result<u32, SongError> {
        Ok((self.read_value()? << 6) | self.read_value()?)
    }

    fn read_symbols(&mut self, count: usize) -> Result<&[u8], SongError> {
        if self.position + count > self.symbols.len() {
            return Err(SongError::UnexpectedEnd { position: self.symbols.len() });
        }
        let slice = &self.symbols[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    // -------------------------------------------------------------------------
    // Instrument cursor
    // -------------------------------------------------------------------------

    fn advance_cursor(&mut self) {
        if !self.cursor_started {
            self.cursor_started = true;
            self.cursor_channel = 0;
            self.cursor_instrument = 0;
            return;
        }
        self.cursor_instrument += 1;
        if self.cursor_instrument >= self.song.instruments_per_channel {
            self.cursor_instrument = 0;
            self.cursor_channel += 1;
        }
        if self.cursor_channel >= self.song.channels.len() {
            debug!("instrument cursor ran past the last channel; clamping");
            self.cursor_channel = self.song.channels.len() - 1;
            self.cursor_instrument = self.song.instruments_per_channel - 1;
        }
    }

    fn cursor(&self) -> (usize, usize) {
        (self.cursor_channel, self.cursor_instrument)
    }

    fn instrument_mut(&mut self) -> &mut Instrument {
        let (channel, instrument) = self.cursor();
        &mut self.song.channels[channel].instruments[instrument]
    }

    /// Before version 3, channel-scoped tags carried the channel index in
    /// the payload; the setting applied to the channel's whole bank.
    fn legacy_channel_target(&mut self) -> Result<usize, SongError> {
        let channel = self.read_value()? as usize;
        Ok(channel.min(self.song.channels.len() - 1))
    }

    // -------------------------------------------------------------------------
    // Main loop
    // -------------------------------------------------------------------------

    fn decode(mut self) -> Result<Song, SongError> {
        while self.position < self.symbols.len() {
            let tag_position = self.position;
            let tag = self.tags[tag_position];
            self.position += 1;
            self.read_tag(tag, tag_position)?;
        }
        self.finalize();
        Ok(self.song)
    }

    fn read_tag(&mut self, tag: char, tag_position: usize) -> Result<(), SongError> {
        match tag {
            'n' => {
                let pitch = self.read_value()? as usize;
                let noise = self.read_value()? as usize;
                self.song.set_channel_counts(pitch, noise);
            }
            's' => {
                let value = self.read_value()? as usize;
                self.song.scale = value.min(config::SCALES.len() - 1);
            }
            'k' => {
                let value = self.read_value()? as usize;
                let value = if self.flags.before_seven {
                    // Old URLs counted keys downward from B.
                    11usize.saturating_sub(value)
                } else {
                    value
                };
                self.song.key = value.min(config::KEYS.len() - 1);
            }
            'l' => {
                let value = if self.flags.before_five {
                    self.read_value()?
                } else {
                    self.read_value2()?
                };
                self.song.loop_start = value as usize;
            }
            'e' => {
                let value = if self.flags.before_five {
                    self.read_value()?
                } else {
                    self.read_value2()?
                };
                self.song.loop_length = value as usize + 1;
            }
            't' => {
                let tempo = if self.flags.before_four {
                    TEMPOS_BEFORE_FOUR
                        [(self.read_value()? as usize).min(TEMPOS_BEFORE_FOUR.len() - 1)]
                } else if self.flags.before_seven {
                    TEMPOS_BEFORE_SEVEN
                        [(self.read_value()? as usize).min(TEMPOS_BEFORE_SEVEN.len() - 1)]
                } else {
                    self.read_value2()?
                };
                self.song.set_tempo(tempo.clamp(TEMPO_MIN, TEMPO_MAX));
            }
            'a' => {
                let value = self.read_value()? as usize;
                self.song.set_beats_per_bar(value + 1);
            }
            'g' => {
                let value = if self.flags.before_five {
                    self.read_value()?
                } else {
                    self.read_value2()?
                };
                self.song.set_bar_count(value as usize + 1);
            }
            'j' => {
                let value = self.read_value()? as usize;
                self.song.set_patterns_per_channel(value + 1);
            }
            'i' => {
                let value = self.read_value()? as usize;
                self.song.set_instruments_per_channel(value + 1);
            }
            'r' => {
                let value = self.read_value()? as usize;
                self.song.rhythm = value.min(config::RHYTHMS.len() - 1);
            }
            'o' => {
                if self.flags.before_three {
                    let channel = self.legacy_channel_target()?;
                    let octave = self.read_value()?.min(OCTAVE_MAX);
                    self.song.channels[channel].octave = octave;
                } else {
                    for channel in 0..self.song.channels.len() {
                        let octave = self.read_value()?.min(OCTAVE_MAX);
                        self.song.channels[channel].octave =
                            if self.song.channel_is_noise(channel) { 0 } else { octave };
                    }
                }
            }
            'T' => {
                self.advance_cursor();
                let noise = self.song.channel_is_noise(self.cursor_channel);
                let value = self.read_value()?;
                let kind = InstrumentKind::from_index(value)
                    .filter(|kind| kind.allowed_in(noise))
                    .unwrap_or_else(|| {
                        debug!(value, "instrument kind out of range for channel; using default");
                        if noise { InstrumentKind::Noise } else { InstrumentKind::Chip }
                    });
                let (channel, instrument) = self.cursor();
                self.song.channels[channel].instruments[instrument] = Instrument::new(kind);
            }
            'v' => {
                let value = self.read_value()?.min(VOLUME_RANGE - 1);
                self.instrument_mut().volume = value;
            }
            'u' => {
                let value = self.read_value()?;
                self.instrument_mut().preset = value;
            }
            'q' => {
                let value = self.read_value()?;
                if self.flags.before_six {
                    // Name-indexed effects: none, reverb, chorus, both.
                    let index =
                        (value as usize).min(config::LEGACY_EFFECT_NAMES.len() - 1);
                    let wants_reverb = index == 1 || index == 3;
                    let wants_chorus = index == 2 || index == 3;
                    let instrument = self.instrument_mut();
                    instrument.effects = 0;
                    if wants_chorus {
                        instrument.effects |= effect::CHORUS;
                    }
                    let slot = self.cursor();
                    self.legacy_reverb_requested.insert(slot, wants_reverb);
                } else {
                    self.instrument_mut().effects = value & effect::ALL;
                }
            }
            'D' => {
                let value = self.read_value()?.min(DISTORTION_MAX);
                self.instrument_mut().distortion = value;
            }
            'R' => {
                let freq = self.read_value()?.min(BITCRUSHER_FREQ_RANGE - 1);
                let quantization = self.read_value()?.min(BITCRUSHER_QUANTIZATION_RANGE - 1);
                let instrument = self.instrument_mut();
                instrument.bitcrusher_freq = freq;
                instrument.bitcrusher_quantization = quantization;
            }
            'L' => {
                let value = self.read_value()?.min(PAN_MAX);
                self.instrument_mut().pan = value;
            }
            'm' => {
                if self.flags.before_seven {
                    self.legacy_global_reverb = self.read_value()?.min(4);
                } else {
                    let value = self.read_value()?.min(REVERB_RANGE - 1);
                    self.instrument_mut().reverb = value;
                }
            }
            'f' => {
                if self.flags.before_nine {
                    let value = self.read_value()?;
                    let slot = self.cursor();
                    self.legacy_filters.entry(slot).or_default().cutoff = Some(value);
                } else {
                    let envelope = (self.read_value()? as usize).min(config::ENVELOPES.len() - 1);
                    let points = self.read_filter_points()?;
                    let instrument = self.instrument_mut();
                    instrument.filter_envelope = envelope;
                    instrument.filter = points;
                }
            }
            'y' => {
                // Deprecated at version 9: legacy filter resonance.
                let value = self.read_value()?;
                let slot = self.cursor();
                self.legacy_filters.entry(slot).or_default().resonance = Some(value);
            }
            'z' => {
                // Deprecated at version 9: legacy filter envelope.
                let value = (self.read_value()? as usize).min(config::ENVELOPES.len() - 1);
                let slot = self.cursor();
                self.legacy_filters.entry(slot).or_default().envelope = Some(value);
            }
            'G' => {
                let points = self.read_filter_points()?;
                self.instrument_mut().distortion_filter = points;
            }
            'd' => {
                if self.flags.before_three {
                    let channel = self.legacy_channel_target()?;
                    let value = (self.read_value()? as usize).min(config::TRANSITIONS.len() - 1);
                    for instrument in &mut self.song.channels[channel].instruments {
                        instrument.transition = value;
                    }
                } else {
                    let value = (self.read_value()? as usize).min(config::TRANSITIONS.len() - 1);
                    self.instrument_mut().transition = value;
                }
            }
            'c' => {
                if self.flags.before_three {
                    let channel = self.legacy_channel_target()?;
                    let value = (self.read_value()? as usize).min(config::VIBRATOS.len() - 1);
                    for instrument in &mut self.song.channels[channel].instruments {
                        instrument.vibrato = value;
                    }
                } else {
                    let value = (self.read_value()? as usize).min(config::VIBRATOS.len() - 1);
                    self.instrument_mut().vibrato = value;
                }
            }
            'h' => {
                if self.flags.before_three {
                    let channel = self.legacy_channel_target()?;
                    let value = (self.read_value()? as usize).min(config::UNISONS.len() - 1);
                    for instrument in &mut self.song.channels[channel].instruments {
                        instrument.unison = value;
                    }
                } else {
                    let value = (self.read_value()? as usize).min(config::UNISONS.len() - 1);
                    self.instrument_mut().unison = value;
                }
            }
            'C' => {
                let value = (self.read_value()? as usize).min(config::CHORDS.len() - 1);
                self.instrument_mut().chord = value;
            }
            'w' => {
                if self.flags.before_three {
                    let channel = self.legacy_channel_target()?;
                    let value = self.read_value()? as usize;
                    let noise = self.song.channel_is_noise(channel);
                    for instrument in &mut self.song.channels[channel].instruments {
                        set_wave(instrument, noise, value);
                    }
                } else {
                    let value = self.read_value()? as usize;
                    let noise = self.song.channel_is_noise(self.cursor_channel);
                    set_wave(self.instrument_mut(), noise, value);
                }
            }
            'A' => {
                let value = (self.read_value()? as usize).min(config::ALGORITHMS.len() - 1);
                self.instrument_mut().algorithm = value;
            }
            'F' => {
                let value = (self.read_value()? as usize).min(config::FEEDBACKS.len() - 1);
                self.instrument_mut().feedback_type = value;
            }
            'B' => {
                let amplitude = self.read_value()?.min(OPERATOR_AMPLITUDE_MAX);
                let envelope = if self.flags.before_nine {
                    None
                } else {
                    Some((self.read_value()? as usize).min(config::ENVELOPES.len() - 1))
                };
                let instrument = self.instrument_mut();
                instrument.feedback_amplitude = amplitude;
                if let Some(envelope) = envelope {
                    instrument.feedback_envelope = envelope;
                }
            }
            'V' => {
                // Deprecated at version 9: feedback envelope.
                let value = (self.read_value()? as usize).min(config::ENVELOPES.len() - 1);
                self.instrument_mut().feedback_envelope = value;
            }
            'Q' => {
                for index in 0..OPERATOR_COUNT {
                    let value =
                        (self.read_value()? as usize).min(config::OPERATOR_FREQUENCIES.len() - 1);
                    self.instrument_mut().operators[index].frequency = value;
                }
            }
            'P' => {
                for index in 0..OPERATOR_COUNT {
                    let amplitude = self.read_value()?.min(OPERATOR_AMPLITUDE_MAX);
                    let envelope = if self.flags.before_nine {
                        None
                    } else {
                        Some((self.read_value()? as usize).min(config::ENVELOPES.len() - 1))
                    };
                    let operator = &mut self.instrument_mut().operators[index];
                    operator.amplitude = amplitude;
                    if let Some(envelope) = envelope {
                        operator.envelope = envelope;
                    }
                }
            }
            'E' => {
                // Deprecated at version 9: operator envelopes.
                for index in 0..OPERATOR_COUNT {
                    let value = (self.read_value()? as usize).min(config::ENVELOPES.len() - 1);
                    self.instrument_mut().operators[index].envelope = value;
                }
            }
            'W' => {
                let width = self.read_value()?.clamp(1, PULSE_WIDTH_RANGE);
                if self.instrument_mut().kind == InstrumentKind::Guitar {
                    self.instrument_mut().pulse_width = width;
                } else {
                    let envelope = (self.read_value()? as usize).min(config::ENVELOPES.len() - 1);
                    let instrument = self.instrument_mut();
                    instrument.pulse_width = width;
                    instrument.pulse_envelope = envelope;
                }
            }
            'U' => {
                let value = self.read_value()?.min(SUSTAIN_MAX);
                self.instrument_mut().sustain = value;
            }
            'S' => {
                if self.instrument_mut().kind == InstrumentKind::Drumset {
                    self.read_drumset(tag_position)?;
                } else {
                    let spectrum = self.read_spectrum(tag_position)?;
                    self.instrument_mut().spectrum = spectrum;
                }
            }
            'H' => {
                let symbol_count = (HARMONICS_CONTROL_POINTS * 3).div_ceil(6);
                let base = self.position;
                let symbols = self.read_symbols(symbol_count)?.to_vec();
                let mut bits = BitReader::new(&symbols, base, 'H');
                let mut harmonics = [0u32; HARMONICS_CONTROL_POINTS];
                for value in &mut harmonics {
                    *value = bits.read(3)?.min(HARMONICS_MAX);
                }
                self.instrument_mut().harmonics = harmonics;
            }
            'b' => self.read_bars()?,
            'p' => self.read_patterns(tag_position)?,
            _ => {
                return Err(SongError::UnknownTag { tag, position: tag_position });
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Composite payloads
    // -------------------------------------------------------------------------

    fn read_filter_points(&mut self) -> Result<FilterSettings, SongError> {
        let count = (self.read_value()? as usize).min(crate::FILTER_MAX_POINTS);
        let mut settings = FilterSettings::default();
        for _ in 0..count {
            let kind = FilterType::from_index(self.read_value()?.min(2));
            let freq = self.read_value()?.min(FILTER_FREQ_RANGE - 1);
            let gain = self.read_value()?.min(FILTER_GAIN_RANGE - 1);
            settings.add_point(kind, freq, gain);
        }
        Ok(settings)
    }

    fn read_spectrum(
        &mut self,
        tag_position: usize,
    ) -> Result<[u32; SPECTRUM_CONTROL_POINTS], SongError> {
        let symbol_count = (SPECTRUM_CONTROL_POINTS * 3).div_ceil(6);
        let base = self.position;
        let symbols = self.read_symbols(symbol_count)?.to_vec();
        let mut bits = BitReader::new(&symbols, base, 'S');
        let mut spectrum = [0u32; SPECTRUM_CONTROL_POINTS];
        for value in &mut spectrum {
            *value = bits.read(3).map_err(|_| SongError::MalformedBitStream {
                tag: 'S',
                position: tag_position,
            })?;
            *value = (*value).min(SPECTRUM_MAX);
        }
        Ok(spectrum)
    }

    fn read_drumset(&mut self, tag_position: usize) -> Result<(), SongError> {
        let mut envelopes = [config::ENVELOPE_DEFAULT; crate::DRUM_COUNT];
        for envelope in &mut envelopes {
            *envelope = (self.read_value()? as usize).min(config::ENVELOPES.len() - 1);
        }
        let mut spectra = [[0u32; SPECTRUM_CONTROL_POINTS]; crate::DRUM_COUNT];
        for spectrum in &mut spectra {
            *spectrum = self.read_spectrum(tag_position)?;
        }
        let instrument = self.instrument_mut();
        instrument.drum_envelopes = envelopes;
        instrument.drum_spectra = spectra;
        Ok(())
    }

    fn read_bars(&mut self) -> Result<(), SongError> {
        let mut needed_bits = 0u32;
        while (1usize << needed_bits) < self.song.patterns_per_channel + 1 {
            needed_bits += 1;
        }
        let total_bits = self.song.channels.len() * self.song.bar_count * needed_bits as usize;
        let symbol_count = total_bits.div_ceil(6);
        let base = self.position;
        let symbols = self.read_symbols(symbol_count)?.to_vec();
        let mut bits = BitReader::new(&symbols, base, 'b');
        for channel in 0..self.song.channels.len() {
            for bar in 0..self.song.bar_count {
                let reference = bits.read(needed_bits)?;
                self.song.channels[channel].bars[bar] =
                    if reference as usize > self.song.patterns_per_channel { 0 } else { reference };
            }
        }
        Ok(())
    }

    fn read_patterns(&mut self, tag_position: usize) -> Result<(), SongError> {
        // Length-of-length prefix: one symbol counts the digits, the digits
        // give the bit-stream's symbol count.
        let digit_count = self.read_value()? as usize;
        let mut symbol_count = 0usize;
        for _ in 0..digit_count {
            symbol_count = (symbol_count << 6) | self.read_value()? as usize;
        }
        let base = self.position;
        let symbols = self.read_symbols(symbol_count)?.to_vec();
        let mut bits = BitReader::new(&symbols, base, 'p');

        let mut needed_instrument_bits = 0u32;
        while (1usize << needed_instrument_bits) < self.song.instruments_per_channel {
            needed_instrument_bits += 1;
        }
        let parts_per_bar = self.song.parts_per_bar();

        for channel_index in 0..self.song.channels.len() {
            let noise = self.song.channel_is_noise(channel_index);
            let max_pitch = self.song.max_pitch_for_channel(channel_index);
            let mut last_pitch =
                if noise { INITIAL_LAST_PITCH_NOISE } else { INITIAL_LAST_PITCH };
            let mut recent_pitches: Vec<u32> =
                if noise { RECENT_PITCH_SEED_NOISE.to_vec() } else { RECENT_PITCH_SEED.to_vec() };
            let mut recent_shapes: Vec<NoteShape> = Vec::new();

            for pattern_index in 0..self.song.patterns_per_channel {
                let instrument = bits.read(needed_instrument_bits)? as usize;
                let mut pattern = Pattern {
                    instrument: instrument.min(self.song.instruments_per_channel - 1),
                    notes: Vec::new(),
                };

                if bits.read(1)? == 1 {
                    let mut current_part = 0u32;
                    while current_part < parts_per_bar {
                        let token = bits.read(2)?;
                        match token {
                            0b00 => {
                                let duration = if self.flags.before_three {
                                    bits.read_legacy_part_duration()?
                                } else {
                                    bits.read_part_duration()?
                                };
                                current_part += duration;
                            }
                            0b10 | 0b11 => {
                                let shape = if token == 0b11 {
                                    let index = bits.read_long_tail(0, 0)? as usize;
                                    if index >= recent_shapes.len() {
                                        return Err(SongError::MalformedBitStream {
                                            tag: 'p',
                                            position: tag_position,
                                        });
                                    }
                                    recent_shapes.remove(index)
                                } else {
                                    NoteShape::read(&mut bits, self.flags.before_three)?
                                };
                                recent_shapes.insert(0, shape.clone());
                                recent_shapes.truncate(RECENT_SHAPE_LIMIT);

                                let pitch_total = shape.chord_size + shape.bend_count();
                                let mut pitches = Vec::with_capacity(pitch_total);
                                for index in 0..pitch_total {
                                    let pitch = if bits.read(1)? == 1 {
                                        let recent_index = bits.read(3)? as usize;
                                        let recent_index =
                                            recent_index.min(recent_pitches.len() - 1);
                                        recent_pitches.remove(recent_index)
                                    } else {
                                        let interval = bits.read_pitch_interval()?;
                                        walk_pitch_interval(last_pitch, interval, &recent_pitches)
                                    };
                                    let pitch = pitch.min(max_pitch);
                                    recent_pitches.insert(0, pitch);
                                    recent_pitches.truncate(8);
                                    last_pitch = if index == shape.chord_size - 1 {
                                        pitches.first().copied().unwrap_or(pitch)
                                    } else {
                                        pitch
                                    };
                                    pitches.push(pitch);
                                }

                                let note = shape.to_note(current_part, &pitches);
                                current_part = note.end;
                                if note.start < parts_per_bar {
                                    pattern.notes.push(note);
                                }
                            }
                            _ => {
                                return Err(SongError::MalformedBitStream {
                                    tag: 'p',
                                    position: tag_position,
                                });
                            }
                        }
                    }
                }

                self.song.channels[channel_index].patterns[pattern_index] = pattern;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Legacy finalization
    // -------------------------------------------------------------------------

    fn finalize(&mut self) {
        let bar_count = self.song.bar_count;
        if self.song.loop_start >= bar_count {
            self.song.loop_start = 0;
        }
        self.song.loop_length =
            self.song.loop_length.clamp(1, bar_count - self.song.loop_start);

        if self.flags.before_nine {
            self.translate_legacy_filters();
        }
        if self.flags.before_seven {
            self.transfer_legacy_reverb();
        }
        self.song.validate();
    }

    fn translate_legacy_filters(&mut self) {
        for channel_index in 0..self.song.channels.len() {
            for instrument_index in 0..self.song.instruments_per_channel {
                let slot = (channel_index, instrument_index);
                let legacy = self.legacy_filters.get(&slot).copied().unwrap_or_default();
                let instrument =
                    &mut self.song.channels[channel_index].instruments[instrument_index];
                if instrument.kind == InstrumentKind::Drumset {
                    continue;
                }
                let cutoff = legacy.cutoff.unwrap_or(crate::legacy::LEGACY_CUTOFF_RANGE - 1);
                let resonance = legacy.resonance.unwrap_or(0);
                let envelope = legacy.envelope.unwrap_or(config::ENVELOPE_DEFAULT);
                instrument.filter = FilterSettings::default();
                translate_legacy_filter(&mut instrument.filter, cutoff, resonance, envelope);
                instrument.filter_envelope = envelope;
            }
        }
    }

    fn transfer_legacy_reverb(&mut self) {
        let global = self.legacy_global_reverb;
        for channel_index in 0..self.song.pitch_channel_count {
            for instrument_index in 0..self.song.instruments_per_channel {
                let requested = self
                    .legacy_reverb_requested
                    .get(&(channel_index, instrument_index))
                    .copied()
                    .unwrap_or(false);
                let instrument =
                    &mut self.song.channels[channel_index].instruments[instrument_index];
                if global > 0 {
                    // Song-global reverb becomes per-instrument by identity.
                    instrument.reverb = global;
                    instrument.effects |= effect::REVERB;
                } else if requested {
                    instrument.reverb = config::LEGACY_REVERB_DEFAULT;
                    instrument.effects |= effect::REVERB;
                }
            }
        }
    }
}

fn set_wave(instrument: &mut Instrument, noise: bool, value: usize) {
    if noise {
        instrument.noise_wave = value.min(config::NOISE_WAVES.len() - 1);
    } else {
        instrument.chip_wave = value.min(config::CHIP_WAVES.len() - 1);
    }
}

/// Walk `interval` semitone steps from `from`, counting only pitches absent
/// from the recent-pitch list; mirrors the encoder's interval counting.
fn walk_pitch_interval(from: u32, interval: i32, recent: &[u32]) -> u32 {
    let mut pitch = from as i64;
    let mut remaining = interval.abs();
    let step: i64 = if interval >= 0 { 1 } else { -1 };
    while remaining > 0 {
        pitch += step;
        if pitch < 0 {
            return 0;
        }
        if !recent.contains(&(pitch as u32)) {
            remaining -= 1;
        }
    }
    pitch.max(0) as u32
}

// =============================================================================
// Note shapes
// =============================================================================

/// The pitch-independent part of a note as stored in the pattern bit
/// stream: chord size, pin timing/expression, and which pins bend. Recent
/// shapes are reused through a move-to-front list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NoteShape {
    pub chord_size: usize,
    pub initial_expression: u32,
    /// `(bends, duration, expression)` per pin after the first.
    pub pins: Vec<(bool, u32, u32)>,
}

impl NoteShape {
    fn read(bits: &mut BitReader<'_>, legacy_durations: bool) -> Result<NoteShape, SongError> {
        let mut chord_size = 1usize;
        while chord_size < MAX_CHORD_SIZE && bits.read(1)? == 1 {
            chord_size += 1;
        }
        let pin_count = bits.read_pin_count()? as usize;
        let initial_expression = bits.read(2)?.min(EXPRESSION_MAX);
        let mut pins = Vec::with_capacity(pin_count);
        for _ in 0..pin_count {
            let bends = bits.read(1)? == 1;
            let duration = if legacy_durations {
                bits.read_legacy_part_duration()?
            } else {
                bits.read_part_duration()?
            };
            let expression = bits.read(2)?.min(EXPRESSION_MAX);
            pins.push((bends, duration, expression));
        }
        Ok(NoteShape { chord_size, initial_expression, pins })
    }

    pub fn bend_count(&self) -> usize {
        self.pins.iter().filter(|(bends, _, _)| *bends).count()
    }

    /// Reconstitute a note at `start` from this shape and its decoded
    /// pitches (chord pitches first, then bend targets).
    fn to_note(&self, start: u32, pitches: &[u32]) -> Note {
        let chord: Vec<u32> = pitches[..self.chord_size.min(pitches.len())].to_vec();
        let base_pitch = chord.first().copied().unwrap_or(0) as i32;
        let mut pins =
            vec![Pin { time: 0, interval: 0, expression: self.initial_expression }];
        let mut time = 0u32;
        let mut interval = 0i32;
        let mut bend_index = self.chord_size;
        for &(bends, duration, expression) in &self.pins {
            if bends {
                if let Some(&target) = pitches.get(bend_index) {
                    interval = target as i32 - base_pitch;
                    bend_index += 1;
                }
            }
            time += duration;
            pins.push(Pin { time, interval, expression });
        }
        Note { start, end: start + time, pitches: chord, pins }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_version() {
        assert_eq!(from_url("Z"), Err(SongError::UnsupportedVersion(61)));
    }

    #[test]
    fn test_rejects_unknown_tag() {
        // Version 9, then a tag that has never existed.
        let result = from_url("9!");
        assert_eq!(
            result,
            Err(SongError::InvalidCharacter { character: '!', position: 1 })
        );
        let result = from_url("9x");
        assert_eq!(result, Err(SongError::UnknownTag { tag: 'x', position: 1 }));
    }

    #[test]
    fn test_hash_prefix_and_whitespace_accepted() {
        let plain = crate::encode::to_url(&Song::new());
        let with_prefix = format!("  #{plain}\n");
        assert_eq!(from_url(&plain).unwrap(), from_url(&with_prefix).unwrap());
    }

    #[test]
    fn test_truncated_payload_is_fatal() {
        let url = crate::encode::to_url(&Song::new());
        let truncated = &url[..url.len() - 10];
        assert!(from_url(truncated).is_err());
    }

    #[test]
    fn test_walk_pitch_interval_skips_recent() {
        let recent = vec![13, 14];
        // Two audible steps up from 12, skipping 13 and 14.
        assert_eq!(walk_pitch_interval(12, 2, &recent), 16);
        assert_eq!(walk_pitch_interval(12, -1, &recent), 11);
        assert_eq!(walk_pitch_interval(12, 0, &recent), 12);
    }
}
