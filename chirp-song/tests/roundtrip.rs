//! Codec round-trip properties
//!
//! Songs with randomized (but in-range) settings must survive
//! `decode(encode(song))` exactly, decoding must be idempotent, and legacy
//! URLs must normalize to the same model every time they are read.

use chirp_song::config;
use chirp_song::{
    effect, from_url, to_url, FilterType, Instrument, InstrumentKind, Note, Pin, Song,
};

/// Deterministic generator for reproducible "random" songs.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 32
    }

    fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound.max(1)
    }

    fn chance(&mut self, percent: u64) -> bool {
        self.below(100) < percent
    }
}

fn random_instrument(rng: &mut Lcg, noise: bool) -> Instrument {
    let kinds: &[InstrumentKind] = if noise {
        &[InstrumentKind::Noise, InstrumentKind::Spectrum, InstrumentKind::Drumset]
    } else {
        &[
            InstrumentKind::Chip,
            InstrumentKind::Fm,
            InstrumentKind::Harmonics,
            InstrumentKind::Pwm,
            InstrumentKind::Guitar,
            InstrumentKind::Spectrum,
        ]
    };
    let kind = kinds[rng.below(kinds.len() as u64) as usize];
    let mut instrument = Instrument::new(kind);

    instrument.volume = rng.below(chirp_song::VOLUME_RANGE as u64) as u32;
    instrument.preset = rng.below(64) as u32;
    instrument.transition = rng.below(config::TRANSITIONS.len() as u64) as usize;
    instrument.chord = rng.below(config::CHORDS.len() as u64) as usize;
    instrument.vibrato = rng.below(config::VIBRATOS.len() as u64) as usize;
    instrument.filter_envelope = rng.below(config::ENVELOPES.len() as u64) as usize;

    for _ in 0..rng.below(4) {
        instrument.filter.add_point(
            FilterType::from_index(rng.below(3) as u32),
            rng.below(chirp_song::FILTER_FREQ_RANGE as u64) as u32,
            rng.below(chirp_song::FILTER_GAIN_RANGE as u64) as u32,
        );
    }

    // Effect parameters only travel through the codec when their bit is
    // set, so only randomize the ones that will be written.
    instrument.effects = (rng.next() as u32) & effect::ALL;
    if instrument.effects & effect::DISTORTION != 0 {
        instrument.distortion = rng.below(chirp_song::DISTORTION_MAX as u64 + 1) as u32;
    }
    if instrument.effects & effect::BITCRUSHER != 0 {
        instrument.bitcrusher_freq = rng.below(chirp_song::BITCRUSHER_FREQ_RANGE as u64) as u32;
        instrument.bitcrusher_quantization =
            rng.below(chirp_song::BITCRUSHER_QUANTIZATION_RANGE as u64) as u32;
    }
    if instrument.effects & effect::PANNING != 0 {
        instrument.pan = rng.below(chirp_song::PAN_MAX as u64 + 1) as u32;
    }
    if instrument.effects & effect::REVERB != 0 {
        instrument.reverb = rng.below(chirp_song::REVERB_RANGE as u64) as u32;
    }
    if instrument.effects & effect::FILTER != 0 {
        instrument.distortion_filter.add_point(
            FilterType::LowPass,
            rng.below(chirp_song::FILTER_FREQ_RANGE as u64) as u32,
            rng.below(chirp_song::FILTER_GAIN_RANGE as u64) as u32,
        );
    }

    match kind {
        InstrumentKind::Chip => {
            instrument.chip_wave = rng.below(config::CHIP_WAVES.len() as u64) as usize;
            instrument.unison = rng.below(config::UNISONS.len() as u64) as usize;
        }
        InstrumentKind::Noise => {
            instrument.noise_wave = rng.below(config::NOISE_WAVES.len() as u64) as usize;
        }
        InstrumentKind::Fm => {
            instrument.algorithm = rng.below(config::ALGORITHMS.len() as u64) as usize;
            instrument.feedback_type = rng.below(config::FEEDBACKS.len() as u64) as usize;
            instrument.feedback_amplitude =
                rng.below(chirp_song::OPERATOR_AMPLITUDE_MAX as u64 + 1) as u32;
            instrument.feedback_envelope = rng.below(config::ENVELOPES.len() as u64) as usize;
            for operator in &mut instrument.operators {
                operator.frequency =
                    rng.below(config::OPERATOR_FREQUENCIES.len() as u64) as usize;
                operator.amplitude =
                    rng.below(chirp_song::OPERATOR_AMPLITUDE_MAX as u64 + 1) as u32;
                operator.envelope = rng.below(config::ENVELOPES.len() as u64) as usize;
            }
        }
        InstrumentKind::Harmonics => {
            for value in &mut instrument.harmonics {
                *value = rng.below(chirp_song::HARMONICS_MAX as u64 + 1) as u32;
            }
            instrument.unison = rng.below(config::UNISONS.len() as u64) as usize;
        }
        InstrumentKind::Spectrum => {
            for value in &mut instrument.spectrum {
                *value = rng.below(chirp_song::SPECTRUM_MAX as u64 + 1) as u32;
            }
        }
        InstrumentKind::Drumset => {
            for envelope in &mut instrument.drum_envelopes {
                *envelope = rng.below(config::ENVELOPES.len() as u64) as usize;
            }
            for spectrum in &mut instrument.drum_spectra {
                for value in spectrum.iter_mut() {
                    *value = rng.below(chirp_song::SPECTRUM_MAX as u64 + 1) as u32;
                }
            }
        }
        InstrumentKind::Pwm => {
            instrument.pulse_width = rng.below(chirp_song::PULSE_WIDTH_RANGE as u64) as u32 + 1;
            instrument.pulse_envelope = rng.below(config::ENVELOPES.len() as u64) as usize;
        }
        InstrumentKind::Guitar => {
            instrument.sustain = rng.below(chirp_song::SUSTAIN_MAX as u64 + 1) as u32;
            instrument.pulse_width = rng.below(chirp_song::PULSE_WIDTH_RANGE as u64) as u32 + 1;
        }
    }

    instrument
}

fn random_note(rng: &mut Lcg, start: u32, end: u32, max_pitch: u32) -> Note {
    let base = rng.below(max_pitch as u64 + 1) as u32;
    let mut note = Note::new(start, end, base, rng.below(4) as u32);
    // Sometimes a chord.
    let extra = rng.below(3) as u32;
    for offset in 0..extra {
        let pitch = (base + 3 + offset * 4).min(max_pitch);
        if !note.pitches.contains(&pitch) {
            note.pitches.push(pitch);
        }
    }
    // Sometimes a bend in the middle.
    if rng.chance(40) && end - start >= 4 {
        let mid = start + (end - start) / 2 - start;
        let headroom = (max_pitch - base).min(7) as i64;
        let interval = if headroom > 0 { rng.below(headroom as u64) as i32 + 1 } else { 0 };
        let expression = rng.below(4) as u32;
        note.pins.insert(1, Pin { time: mid, interval, expression });
        note.pins.last_mut().unwrap().interval = interval;
    }
    note
}

fn random_song(seed: u64) -> Song {
    let mut rng = Lcg(seed);
    let mut song = Song::new();
    song.scale = rng.below(config::SCALES.len() as u64) as usize;
    song.key = rng.below(config::KEYS.len() as u64) as usize;
    song.set_tempo(chirp_song::TEMPO_MIN + rng.below(200) as u32);
    song.set_beats_per_bar(3 + rng.below(10) as usize);
    song.rhythm = rng.below(config::RHYTHMS.len() as u64) as usize;
    song.set_channel_counts(1 + rng.below(4) as usize, rng.below(3) as usize);
    song.set_bar_count(2 + rng.below(14) as usize);
    song.set_patterns_per_channel(1 + rng.below(8) as usize);
    song.set_instruments_per_channel(1 + rng.below(3) as usize);
    song.loop_start = rng.below(song.bar_count as u64 / 2 + 1) as usize;
    song.loop_length =
        1 + rng.below((song.bar_count - song.loop_start) as u64) as usize;

    for channel_index in 0..song.channels.len() {
        let noise = song.channel_is_noise(channel_index);
        let max_pitch = song.max_pitch_for_channel(channel_index);
        let parts_per_bar = song.parts_per_bar();
        let channel = &mut song.channels[channel_index];
        channel.octave = if noise { 0 } else { rng.below(5) as u32 };

        for instrument in &mut channel.instruments {
            *instrument = random_instrument(&mut rng, noise);
        }
        let instrument_count = channel.instruments.len();
        for pattern in &mut channel.patterns {
            pattern.instrument = rng.below(instrument_count as u64) as usize;
            let mut position = 0u32;
            while position + 3 < parts_per_bar && rng.chance(70) {
                let gap = if rng.chance(30) { rng.below(12) as u32 } else { 0 };
                let start = position + gap;
                if start + 3 >= parts_per_bar {
                    break;
                }
                let length = 3 + rng.below(21.min((parts_per_bar - start - 3) as u64).max(1)) as u32;
                pattern.notes.push(random_note(&mut rng, start, start + length, max_pitch));
                position = start + length;
            }
        }
        for reference in &mut channel.bars {
            *reference = rng.below(song.patterns_per_channel as u64 + 1) as u32;
        }
    }

    song
}

#[test]
fn test_random_songs_round_trip() {
    for seed in 0..40 {
        let song = random_song(seed);
        let url = to_url(&song);
        let decoded = from_url(&url).unwrap_or_else(|error| {
            panic!("seed {seed}: failed to decode re-encoded song: {error}\n{url}")
        });
        assert_eq!(song, decoded, "seed {seed} did not round trip\n{url}");
    }
}

#[test]
fn test_decode_encode_decode_is_stable() {
    for seed in 0..40 {
        let url = to_url(&random_song(seed));
        let first = from_url(&url).unwrap();
        let second = from_url(&to_url(&first)).unwrap();
        assert_eq!(first, second, "seed {seed}");
    }
}

#[test]
fn test_reencoded_url_is_byte_identical() {
    // The encoder is canonical: once a model has passed through it, the
    // URL is a fixed point.
    for seed in [0u64, 7, 23] {
        let first_url = to_url(&random_song(seed));
        let decoded = from_url(&first_url).unwrap();
        let second_url = to_url(&decoded);
        assert_eq!(first_url, second_url, "seed {seed}");
        assert_eq!(decoded, from_url(&second_url).unwrap(), "seed {seed}");
    }
}

#[test]
fn test_out_of_range_bar_references_clamp_to_silence() {
    let mut song = Song::new();
    song.channels[0].bars[0] = 60;
    let decoded = from_url(&to_url(&song)).unwrap();
    assert_eq!(decoded.channels[0].bars[0], 0);
}

// =============================================================================
// Legacy versions
// =============================================================================

/// Decoding a legacy URL twice must produce identical models, and
/// re-encoding at the latest version must preserve the model.
fn assert_legacy_stable(url: &str) {
    let first = from_url(url).unwrap_or_else(|error| panic!("{url}: {error}"));
    let second = from_url(url).unwrap();
    assert_eq!(first, second, "repeated decode differs for {url}");
    let reencoded = to_url(&first);
    assert!(reencoded.starts_with('9'));
    let third = from_url(&reencoded).unwrap();
    assert_eq!(first, third, "re-encode round trip differs for {url}");
}

#[test]
fn test_legacy_scalar_tags() {
    // Version 2: key indices counted downward, no instrument cursor tags.
    assert_legacy_stable("2s3k2t1r1");
    // Version 5: single-symbol loop and bar counts.
    assert_legacy_stable("5s0k0l0e3g7j3i0t5r2");
    // Version 7: modern tempo, key ordering.
    assert_legacy_stable("7s7k4t2Gr0");
}

#[test]
fn test_legacy_key_is_reversed() {
    let song = from_url("2k2").unwrap();
    assert_eq!(song.key, 9);
    let modern = from_url(&format!("9k{}", '2')).unwrap();
    assert_eq!(modern.key, 2);
}

#[test]
fn test_legacy_filter_translates_to_control_points() {
    // Version 8 instrument with a mid cutoff, no resonance, steady
    // envelope: exactly one low-pass point with a gain cut.
    let song = from_url("8T0v0f5y0z1").unwrap();
    let instrument = &song.channels[0].instruments[0];
    assert_eq!(instrument.filter.points.len(), 1);
    assert_eq!(instrument.filter.points[0].kind, FilterType::LowPass);
    assert!(instrument.filter.points[0].gain < chirp_song::FILTER_GAIN_CENTER);
    assert_legacy_stable("8T0v0f5y0z1");
}

#[test]
fn test_legacy_wide_open_filter_translates_to_nothing() {
    let song = from_url("8T0v0fay0z1").unwrap();
    let instrument = &song.channels[0].instruments[0];
    assert!(instrument.filter.points.is_empty());
}

#[test]
fn test_legacy_global_reverb_transfers_to_instruments() {
    // Version 6: global reverb tag plus bitmask-free chorus enum is gone;
    // reverb lands on every pitched instrument.
    let song = from_url("6m3").unwrap();
    for channel_index in 0..song.pitch_channel_count {
        for instrument in &song.channels[channel_index].instruments {
            assert_eq!(instrument.reverb, 3);
            assert_ne!(instrument.effects & effect::REVERB, 0);
        }
    }
    // Noise channels are untouched.
    let drums = &song.channels[song.pitch_channel_count].instruments[0];
    assert_eq!(drums.effects & effect::REVERB, 0);
    assert_legacy_stable("6m3");
}

#[test]
fn test_legacy_effect_enum_maps_to_bits() {
    // Version 5, enum value 3 = chorus & reverb.
    let song = from_url("5T0q3").unwrap();
    let instrument = &song.channels[0].instruments[0];
    assert_ne!(instrument.effects & effect::CHORUS, 0);
    assert_ne!(instrument.effects & effect::REVERB, 0);
    assert_eq!(instrument.reverb, config::LEGACY_REVERB_DEFAULT);
    assert_legacy_stable("5T0q3");
}

// =============================================================================
// Fixture round trip
// =============================================================================

#[test]
fn test_fixture_song_round_trips_byte_identical() {
    let mut song = Song::new();
    song.set_tempo(120);
    song.channels[0].bars[0] = 1;
    song.channels[0].bars[1] = 1;
    let pattern = &mut song.channels[0].patterns[0];
    pattern.notes.push(Note::new(0, 24, 48, 3));
    pattern.notes.push(Note::new(24, 48, 52, 3));
    pattern.notes.push(Note::new(48, 72, 55, 2));
    let mut chord = Note::new(96, 144, 48, 3);
    chord.pitches = vec![48, 55, 60];
    pattern.notes.push(chord);
    song.channels[1].instruments[0] = Instrument::new(InstrumentKind::Fm);
    song.channels[3].bars[0] = 1;
    song.channels[3].patterns[0].notes.push(Note::new(0, 6, 2, 3));

    let url = to_url(&song);
    let decoded = from_url(&url).unwrap();
    assert_eq!(song, decoded);
    assert_eq!(url, to_url(&decoded));
}
