//! Named configuration tables shared by the codecs and the engine
//!
//! Every selectable musical setting (scale, key, rhythm, transition, chord,
//! vibrato, unison interval, envelope, wave, FM table) is a row in one of
//! these tables. Codec payloads store row indices; the engine reads the row
//! fields. Name lookups are only used by the JSON form and accept historical
//! aliases.

use crate::{DRUM_COUNT, OPERATOR_COUNT, TICKS_PER_PART};

// =============================================================================
// Scales and keys
// =============================================================================

/// A musical scale: which of the 12 semitones above the key are in the scale.
#[derive(Debug, Clone, Copy)]
pub struct Scale {
    pub name: &'static str,
    pub flags: [bool; 12],
}

pub static SCALES: &[Scale] = &[
    Scale { name: "easy :)", flags: [true, false, true, false, true, false, false, true, false, true, false, false] },
    Scale { name: "easy :(", flags: [true, false, false, true, false, true, false, true, false, false, true, false] },
    Scale { name: "island :)", flags: [true, false, false, false, true, true, false, true, false, false, false, true] },
    Scale { name: "island :(", flags: [true, true, false, true, false, false, false, true, true, false, false, false] },
    Scale { name: "blues :)", flags: [true, false, true, true, true, false, false, true, false, true, false, false] },
    Scale { name: "blues :(", flags: [true, false, false, true, false, true, true, true, false, false, true, false] },
    Scale { name: "normal :)", flags: [true, false, true, false, true, true, false, true, false, true, false, true] },
    Scale { name: "normal :(", flags: [true, false, true, true, false, true, false, true, true, false, true, false] },
    Scale { name: "dbl harmonic :)", flags: [true, true, false, false, true, true, false, true, true, false, false, true] },
    Scale { name: "dbl harmonic :(", flags: [true, false, true, true, false, true, true, true, false, false, false, true] },
    Scale { name: "enigma", flags: [true, false, true, false, true, false, true, false, true, false, true, false] },
    Scale { name: "expert", flags: [true; 12] },
];

/// Default scale index ("expert": all semitones allowed).
pub const SCALE_DEFAULT: usize = 11;

/// Historical scale names accepted by the JSON form.
static SCALE_ALIASES: &[(&str, &str)] = &[
    ("romani :)", "dbl harmonic :)"),
    ("romani :(", "dbl harmonic :("),
    ("major", "normal :)"),
    ("minor", "normal :("),
];

/// Look up a scale by name, honoring aliases. Falls back to "expert".
pub fn scale_index_from_name(name: &str) -> usize {
    let name = SCALE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name);
    SCALES
        .iter()
        .position(|s| s.name == name)
        .unwrap_or(SCALE_DEFAULT)
}

/// A key signature. `base_pitch` transposes the whole song; note pitches
/// are MIDI-aligned in the key of C.
#[derive(Debug, Clone, Copy)]
pub struct Key {
    pub name: &'static str,
    pub base_pitch: u32,
}

pub static KEYS: &[Key] = &[
    Key { name: "C", base_pitch: 0 },
    Key { name: "C♯", base_pitch: 1 },
    Key { name: "D", base_pitch: 2 },
    Key { name: "D♯", base_pitch: 3 },
    Key { name: "E", base_pitch: 4 },
    Key { name: "F", base_pitch: 5 },
    Key { name: "F♯", base_pitch: 6 },
    Key { name: "G", base_pitch: 7 },
    Key { name: "G♯", base_pitch: 8 },
    Key { name: "A", base_pitch: 9 },
    Key { name: "A♯", base_pitch: 10 },
    Key { name: "B", base_pitch: 11 },
];

pub const KEY_DEFAULT: usize = 0;

/// Look up a key by name; accepts "#" for "♯" and flat synonyms.
pub fn key_index_from_name(name: &str) -> usize {
    static FLAT_ALIASES: &[(&str, &str)] = &[
        ("D♭", "C♯"), ("Db", "C♯"), ("E♭", "D♯"), ("Eb", "D♯"),
        ("G♭", "F♯"), ("Gb", "F♯"), ("A♭", "G♯"), ("Ab", "G♯"),
        ("B♭", "A♯"), ("Bb", "A♯"),
    ];
    let name = FLAT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(name);
    KEYS.iter()
        .position(|k| k.name == name || k.name.replace('♯', "#") == name)
        .unwrap_or(KEY_DEFAULT)
}

// =============================================================================
// Rhythm
// =============================================================================

/// A rhythm: how many note-entry steps divide a beat, and how arpeggios
/// cycle. `arpeggio_patterns[n-1]` is the pitch-index sequence for an
/// n-pitch chord.
#[derive(Debug, Clone, Copy)]
pub struct Rhythm {
    pub name: &'static str,
    pub steps_per_beat: usize,
    pub ticks_per_arpeggio: usize,
    pub arpeggio_patterns: [&'static [usize]; 4],
}

pub static RHYTHMS: &[Rhythm] = &[
    Rhythm {
        name: "÷3 (triplets)",
        steps_per_beat: 3,
        ticks_per_arpeggio: 4,
        arpeggio_patterns: [&[0], &[0, 0, 1, 1], &[0, 1, 2, 1], &[0, 1, 2, 3]],
    },
    Rhythm {
        name: "÷4 (standard)",
        steps_per_beat: 4,
        ticks_per_arpeggio: 3,
        arpeggio_patterns: [&[0], &[0, 0, 1, 1], &[0, 1, 2, 1], &[0, 1, 2, 3]],
    },
    Rhythm {
        name: "÷6",
        steps_per_beat: 6,
        ticks_per_arpeggio: 4,
        arpeggio_patterns: [&[0], &[0, 1], &[0, 1, 2, 1], &[0, 1, 2, 3]],
    },
    Rhythm {
        name: "÷8",
        steps_per_beat: 8,
        ticks_per_arpeggio: 3,
        arpeggio_patterns: [&[0], &[0, 1], &[0, 1, 2, 1], &[0, 1, 2, 3]],
    },
];

pub const RHYTHM_DEFAULT: usize = 1;

// =============================================================================
// Transitions
// =============================================================================

/// Note-boundary behavior.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub name: &'static str,
    /// Seconds of linear fade-in at note start.
    pub attack_seconds: f64,
    /// Phase is carried over a note boundary instead of reset.
    pub is_seamless: bool,
    /// Pitch/expression blend into adjacent notes over `slide_ticks`.
    pub slides: bool,
    pub slide_ticks: u32,
    /// The tone lingers after note end, fading over `release_ticks`.
    pub releases: bool,
    pub release_ticks: u32,
}

pub static TRANSITIONS: &[Transition] = &[
    Transition { name: "seamless", attack_seconds: 0.0, is_seamless: true, slides: false, slide_ticks: 3, releases: false, release_ticks: 1 },
    Transition { name: "hard", attack_seconds: 0.0, is_seamless: false, slides: false, slide_ticks: 3, releases: false, release_ticks: 3 },
    Transition { name: "soft", attack_seconds: 0.025, is_seamless: false, slides: false, slide_ticks: 3, releases: false, release_ticks: 3 },
    Transition { name: "slide", attack_seconds: 0.025, is_seamless: true, slides: true, slide_ticks: 3, releases: false, release_ticks: 3 },
    Transition { name: "cross fade", attack_seconds: 0.04, is_seamless: false, slides: false, slide_ticks: 3, releases: true, release_ticks: 6 },
    Transition { name: "hard fade", attack_seconds: 0.0, is_seamless: false, slides: false, slide_ticks: 3, releases: true, release_ticks: 48 },
    Transition { name: "medium fade", attack_seconds: 0.0125, is_seamless: false, slides: false, slide_ticks: 3, releases: true, release_ticks: 72 },
    Transition { name: "soft fade", attack_seconds: 0.06, is_seamless: false, slides: false, slide_ticks: 6, releases: true, release_ticks: 96 },
];

/// Fallback when a legacy name is unrecognized.
pub const TRANSITION_DEFAULT: usize = 1;

pub fn transition_index_from_name(name: &str) -> usize {
    TRANSITIONS
        .iter()
        .position(|t| t.name == name)
        .unwrap_or(TRANSITION_DEFAULT)
}

// =============================================================================
// Chords
// =============================================================================

/// How multiple pitches in one note map to tones.
#[derive(Debug, Clone, Copy)]
pub struct Chord {
    pub name: &'static str,
    /// All pitches play through a single tone.
    pub single_tone: bool,
    /// Pitches cycle over time instead of sounding together.
    pub arpeggiates: bool,
    /// Extra pitches modulate the first tone's interval (FM custom interval).
    pub custom_interval: bool,
    /// Parts of delay per successive chord tone.
    pub strum_parts: u32,
    /// Chord expression is reduced as pitches are added.
    pub harmonizes: bool,
}

pub static CHORDS: &[Chord] = &[
    Chord { name: "harmony", single_tone: false, arpeggiates: false, custom_interval: false, strum_parts: 0, harmonizes: true },
    Chord { name: "strum", single_tone: false, arpeggiates: false, custom_interval: false, strum_parts: 1, harmonizes: true },
    Chord { name: "arpeggio", single_tone: true, arpeggiates: true, custom_interval: false, strum_parts: 0, harmonizes: false },
    Chord { name: "custom interval", single_tone: true, arpeggiates: false, custom_interval: true, strum_parts: 0, harmonizes: true },
];

pub const CHORD_DEFAULT: usize = 0;

pub fn chord_index_from_name(name: &str) -> usize {
    // "custom interval" was briefly called "custom harmony".
    let name = if name == "custom harmony" { "custom interval" } else { name };
    CHORDS
        .iter()
        .position(|c| c.name == name)
        .unwrap_or(CHORD_DEFAULT)
}

// =============================================================================
// Vibrato
// =============================================================================

/// A pitch LFO: a sum of sines with the given periods, scaled by amplitude
/// in semitones, delayed by `delay_ticks` after note start.
#[derive(Debug, Clone, Copy)]
pub struct Vibrato {
    pub name: &'static str,
    pub amplitude: f64,
    pub periods_seconds: &'static [f64],
    pub delay_ticks: u32,
}

pub static VIBRATOS: &[Vibrato] = &[
    Vibrato { name: "none", amplitude: 0.0, periods_seconds: &[0.14], delay_ticks: 0 },
    Vibrato { name: "light", amplitude: 0.15, periods_seconds: &[0.14], delay_ticks: 0 },
    Vibrato { name: "delayed", amplitude: 0.3, periods_seconds: &[0.14], delay_ticks: 18 * TICKS_PER_PART as u32 },
    Vibrato { name: "heavy", amplitude: 0.45, periods_seconds: &[0.14], delay_ticks: 0 },
    Vibrato { name: "shaky", amplitude: 0.1, periods_seconds: &[0.11, 0.1782, 0.33], delay_ticks: 0 },
];

pub const VIBRATO_DEFAULT: usize = 0;

pub fn vibrato_index_from_name(name: &str) -> usize {
    VIBRATOS
        .iter()
        .position(|v| v.name == name)
        .unwrap_or(VIBRATO_DEFAULT)
}

// =============================================================================
// Unison intervals
// =============================================================================

/// The detune relationship between the two voices of chip/harmonics
/// instruments. `spread` is the semitone gap, `offset` shifts both voices,
/// `sign` flips the second voice's polarity.
#[derive(Debug, Clone, Copy)]
pub struct Unison {
    pub name: &'static str,
    pub spread: f64,
    pub offset: f64,
    pub volume: f64,
    pub sign: f64,
}

pub static UNISONS: &[Unison] = &[
    Unison { name: "union", spread: 0.0, offset: 0.0, volume: 0.7, sign: 1.0 },
    Unison { name: "shimmer", spread: 0.018, offset: 0.0, volume: 0.8, sign: 1.0 },
    Unison { name: "hum", spread: 0.045, offset: 0.0, volume: 1.0, sign: 1.0 },
    Unison { name: "honky tonk", spread: 0.09, offset: 0.0, volume: 1.0, sign: 1.0 },
    Unison { name: "dissonant", spread: 0.25, offset: 0.0, volume: 0.9, sign: 1.0 },
    Unison { name: "fifth", spread: 7.0, offset: 3.5, volume: 0.9, sign: 1.0 },
    Unison { name: "octave", spread: 12.0, offset: 6.0, volume: 0.8, sign: 1.0 },
    Unison { name: "bowed", spread: 0.02, offset: 0.0, volume: 1.0, sign: -1.0 },
];

pub const UNISON_DEFAULT: usize = 0;

pub fn unison_index_from_name(name: &str) -> usize {
    UNISONS
        .iter()
        .position(|u| u.name == name)
        .unwrap_or(UNISON_DEFAULT)
}

// =============================================================================
// Envelopes
// =============================================================================

/// Envelope curve families. The engine evaluates these; the model only
/// stores indices into [`ENVELOPES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeCurve {
    /// Follows the note's pin expression.
    Custom,
    /// Constant 1.
    Steady,
    /// Brief 2x boost at onset.
    Punch,
    /// Linear attack then hyperbolic decay.
    Flare,
    /// Hyperbolic decay from 1.
    Twang,
    /// Hyperbolic rise to 1.
    Swell,
    /// Full-depth cosine wobble.
    Tremolo,
    /// Half-depth cosine wobble biased high.
    Tremolo2,
    /// Exponential decay.
    Decay,
}

#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    pub name: &'static str,
    pub curve: EnvelopeCurve,
    pub speed: f64,
}

pub static ENVELOPES: &[Envelope] = &[
    Envelope { name: "custom", curve: EnvelopeCurve::Custom, speed: 0.0 },
    Envelope { name: "steady", curve: EnvelopeCurve::Steady, speed: 0.0 },
    Envelope { name: "punch", curve: EnvelopeCurve::Punch, speed: 0.0 },
    Envelope { name: "flare 1", curve: EnvelopeCurve::Flare, speed: 32.0 },
    Envelope { name: "flare 2", curve: EnvelopeCurve::Flare, speed: 8.0 },
    Envelope { name: "flare 3", curve: EnvelopeCurve::Flare, speed: 2.0 },
    Envelope { name: "twang 1", curve: EnvelopeCurve::Twang, speed: 32.0 },
    Envelope { name: "twang 2", curve: EnvelopeCurve::Twang, speed: 8.0 },
    Envelope { name: "twang 3", curve: EnvelopeCurve::Twang, speed: 2.0 },
    Envelope { name: "swell 1", curve: EnvelopeCurve::Swell, speed: 32.0 },
    Envelope { name: "swell 2", curve: EnvelopeCurve::Swell, speed: 8.0 },
    Envelope { name: "swell 3", curve: EnvelopeCurve::Swell, speed: 2.0 },
    Envelope { name: "tremolo1", curve: EnvelopeCurve::Tremolo, speed: 4.0 },
    Envelope { name: "tremolo2", curve: EnvelopeCurve::Tremolo, speed: 2.0 },
    Envelope { name: "tremolo3", curve: EnvelopeCurve::Tremolo, speed: 1.0 },
    Envelope { name: "tremolo4", curve: EnvelopeCurve::Tremolo2, speed: 4.0 },
    Envelope { name: "tremolo5", curve: EnvelopeCurve::Tremolo2, speed: 2.0 },
    Envelope { name: "tremolo6", curve: EnvelopeCurve::Tremolo2, speed: 1.0 },
    Envelope { name: "decay 1", curve: EnvelopeCurve::Decay, speed: 10.0 },
    Envelope { name: "decay 2", curve: EnvelopeCurve::Decay, speed: 7.0 },
    Envelope { name: "decay 3", curve: EnvelopeCurve::Decay, speed: 4.0 },
];

/// "custom": follows the note's pin expression.
pub const ENVELOPE_CUSTOM: usize = 0;

/// "steady": the do-nothing envelope.
pub const ENVELOPE_DEFAULT: usize = 1;

pub fn envelope_index_from_name(name: &str) -> usize {
    ENVELOPES
        .iter()
        .position(|e| e.name == name)
        .unwrap_or(ENVELOPE_DEFAULT)
}

/// True when the curve fades out over time; used by the legacy filter
/// translator to decide how far cutoffs may be remapped.
pub fn envelope_decays(index: usize) -> bool {
    matches!(
        ENVELOPES[index.min(ENVELOPES.len() - 1)].curve,
        EnvelopeCurve::Flare | EnvelopeCurve::Twang | EnvelopeCurve::Decay | EnvelopeCurve::Custom
    )
}

// =============================================================================
// Chip waves
// =============================================================================

/// A chip instrument wave: raw single-cycle samples (centered by the engine
/// before integration) and a loudness-matching volume.
#[derive(Debug, Clone, Copy)]
pub struct ChipWave {
    pub name: &'static str,
    pub volume: f64,
    pub samples: &'static [f64],
}

pub static CHIP_WAVES: &[ChipWave] = &[
    ChipWave {
        name: "rounded",
        volume: 0.94,
        samples: &[
            0.0, 0.2, 0.4, 0.5, 0.6, 0.7, 0.8, 0.85, 0.9, 0.95, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0,
            1.0, 1.0, 0.95, 0.9, 0.85, 0.8, 0.7, 0.6, 0.5, 0.4, 0.2, 0.0, -0.2, -0.4, -0.5,
            -0.6, -0.7, -0.8, -0.85, -0.9, -0.95, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0,
            -1.0, -0.95, -0.9, -0.85, -0.8, -0.7, -0.6, -0.5, -0.4, -0.2,
        ],
    },
    ChipWave {
        name: "triangle",
        volume: 1.0,
        samples: &[
            1.0 / 15.0, 3.0 / 15.0, 5.0 / 15.0, 7.0 / 15.0, 9.0 / 15.0, 11.0 / 15.0,
            13.0 / 15.0, 15.0 / 15.0, 15.0 / 15.0, 13.0 / 15.0, 11.0 / 15.0, 9.0 / 15.0,
            7.0 / 15.0, 5.0 / 15.0, 3.0 / 15.0, 1.0 / 15.0, -1.0 / 15.0, -3.0 / 15.0,
            -5.0 / 15.0, -7.0 / 15.0, -9.0 / 15.0, -11.0 / 15.0, -13.0 / 15.0, -15.0 / 15.0,
            -15.0 / 15.0, -13.0 / 15.0, -11.0 / 15.0, -9.0 / 15.0, -7.0 / 15.0, -5.0 / 15.0,
            -3.0 / 15.0, -1.0 / 15.0,
        ],
    },
    ChipWave { name: "square", volume: 0.5, samples: &[1.0, -1.0] },
    ChipWave { name: "1/4 pulse", volume: 0.5, samples: &[1.0, -1.0, -1.0, -1.0] },
    ChipWave {
        name: "1/8 pulse",
        volume: 0.5,
        samples: &[1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0],
    },
    ChipWave {
        name: "sawtooth",
        volume: 0.65,
        samples: &[
            1.0 / 31.0, 3.0 / 31.0, 5.0 / 31.0, 7.0 / 31.0, 9.0 / 31.0, 11.0 / 31.0,
            13.0 / 31.0, 15.0 / 31.0, 17.0 / 31.0, 19.0 / 31.0, 21.0 / 31.0, 23.0 / 31.0,
            25.0 / 31.0, 27.0 / 31.0, 29.0 / 31.0, 31.0 / 31.0, -31.0 / 31.0, -29.0 / 31.0,
            -27.0 / 31.0, -25.0 / 31.0, -23.0 / 31.0, -21.0 / 31.0, -19.0 / 31.0, -17.0 / 31.0,
            -15.0 / 31.0, -13.0 / 31.0, -11.0 / 31.0, -9.0 / 31.0, -7.0 / 31.0, -5.0 / 31.0,
            -3.0 / 31.0, -1.0 / 31.0,
        ],
    },
    ChipWave {
        name: "double saw",
        volume: 0.5,
        samples: &[
            0.0, -0.2, -0.4, -0.6, -0.8, -1.0, 1.0, -0.8, -0.6, -0.4, -0.2, 1.0, 0.8, 0.6,
            0.4, 0.2,
        ],
    },
    ChipWave {
        name: "double pulse",
        volume: 0.4,
        samples: &[
            1.0, 1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0,
            -1.0, -1.0, -1.0,
        ],
    },
    ChipWave { name: "spiky", volume: 0.4, samples: &[1.0, -1.0, 1.0, -1.0, 1.0, 0.0] },
];

/// "square", historically the first wave new songs used.
pub const CHIP_WAVE_DEFAULT: usize = 2;

pub fn chip_wave_index_from_name(name: &str) -> usize {
    CHIP_WAVES
        .iter()
        .position(|w| w.name == name)
        .unwrap_or(CHIP_WAVE_DEFAULT)
}

// =============================================================================
// Noise waves
// =============================================================================

/// A noise-channel wave. The actual tables are generated by the engine
/// (`chirp-synth::wave`); this row holds the generation recipe parameters.
#[derive(Debug, Clone, Copy)]
pub struct NoiseWave {
    pub name: &'static str,
    pub volume: f64,
    /// Pitch at which the wave plays back at its natural rate.
    pub base_pitch: u32,
    /// Scales the fundamental-tracking one-pole smoothing cutoff.
    pub pitch_filter_mult: f64,
    /// Soft waves skip the retro sample-and-hold character.
    pub is_soft: bool,
}

pub static NOISE_WAVES: &[NoiseWave] = &[
    NoiseWave { name: "retro", volume: 0.25, base_pitch: 69, pitch_filter_mult: 1024.0, is_soft: false },
    NoiseWave { name: "white", volume: 1.0, base_pitch: 69, pitch_filter_mult: 8192.0, is_soft: true },
    NoiseWave { name: "clang", volume: 0.4, base_pitch: 69, pitch_filter_mult: 1024.0, is_soft: false },
    NoiseWave { name: "buzz", volume: 0.3, base_pitch: 69, pitch_filter_mult: 1024.0, is_soft: false },
    NoiseWave { name: "hollow", volume: 1.5, base_pitch: 96, pitch_filter_mult: 1.0, is_soft: true },
];

pub const NOISE_WAVE_DEFAULT: usize = 0;

pub fn noise_wave_index_from_name(name: &str) -> usize {
    NOISE_WAVES
        .iter()
        .position(|w| w.name == name)
        .unwrap_or(NOISE_WAVE_DEFAULT)
}

// =============================================================================
// FM tables
// =============================================================================

/// An FM operator frequency choice: a multiple of the fundamental plus a
/// fixed Hz offset. Negative-signed entries invert the operator's output,
/// which decorrelates otherwise-identical operators.
#[derive(Debug, Clone, Copy)]
pub struct OperatorFrequency {
    pub name: &'static str,
    pub mult: f64,
    pub hz_offset: f64,
    pub amplitude_sign: f64,
}

pub static OPERATOR_FREQUENCIES: &[OperatorFrequency] = &[
    OperatorFrequency { name: "1×", mult: 1.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "~1×", mult: 1.0, hz_offset: 1.5, amplitude_sign: -1.0 },
    OperatorFrequency { name: "2×", mult: 2.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "~2×", mult: 2.0, hz_offset: -1.3, amplitude_sign: -1.0 },
    OperatorFrequency { name: "3×", mult: 3.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "4×", mult: 4.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "5×", mult: 5.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "6×", mult: 6.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "7×", mult: 7.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "8×", mult: 8.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "9×", mult: 9.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "11×", mult: 11.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "13×", mult: 13.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "16×", mult: 16.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "20×", mult: 20.0, hz_offset: 0.0, amplitude_sign: 1.0 },
];

/// An FM algorithm: which operators are carriers, and which operators
/// modulate each operator. Operator numbers in `modulated_by` are 1-based
/// to match the display names; the engine subtracts 1.
#[derive(Debug, Clone, Copy)]
pub struct Algorithm {
    pub name: &'static str,
    pub carrier_count: usize,
    /// Which carrier (1-based) each chord pitch is assigned to.
    pub associated_carrier: [usize; OPERATOR_COUNT],
    pub modulated_by: [&'static [usize]; OPERATOR_COUNT],
}

pub static ALGORITHMS: &[Algorithm] = &[
    Algorithm { name: "1←(2 3 4)", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2, 3, 4], &[], &[], &[]] },
    Algorithm { name: "1←(2 3←4)", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2, 3], &[], &[4], &[]] },
    Algorithm { name: "1←2←(3 4)", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2], &[3, 4], &[], &[]] },
    Algorithm { name: "1←(2 3)←4", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2, 3], &[4], &[4], &[]] },
    Algorithm { name: "1←2←3←4", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2], &[3], &[4], &[]] },
    Algorithm { name: "1←3 2←4", carrier_count: 2, associated_carrier: [1, 2, 1, 2], modulated_by: [&[3], &[4], &[], &[]] },
    Algorithm { name: "1 2←(3 4)", carrier_count: 2, associated_carrier: [1, 2, 2, 2], modulated_by: [&[], &[3, 4], &[], &[]] },
    Algorithm { name: "1 2←3←4", carrier_count: 2, associated_carrier: [1, 2, 2, 2], modulated_by: [&[], &[3], &[4], &[]] },
    Algorithm { name: "(1 2)←3←4", carrier_count: 2, associated_carrier: [1, 2, 2, 2], modulated_by: [&[3], &[3], &[4], &[]] },
    Algorithm { name: "(1 2)←(3 4)", carrier_count: 2, associated_carrier: [1, 2, 2, 2], modulated_by: [&[3, 4], &[3, 4], &[], &[]] },
    Algorithm { name: "1 2 3←4", carrier_count: 3, associated_carrier: [1, 2, 3, 3], modulated_by: [&[], &[], &[4], &[]] },
    Algorithm { name: "(1 2 3)←4", carrier_count: 3, associated_carrier: [1, 2, 3, 3], modulated_by: [&[4], &[4], &[4], &[]] },
    Algorithm { name: "1 2 3 4", carrier_count: 4, associated_carrier: [1, 2, 3, 4], modulated_by: [&[], &[], &[], &[]] },
];

/// An FM feedback topology: for each operator, which operators' previous
/// outputs are added to its phase (1-based).
#[derive(Debug, Clone, Copy)]
pub struct Feedback {
    pub name: &'static str,
    pub indices: [&'static [usize]; OPERATOR_COUNT],
}

pub static FEEDBACKS: &[Feedback] = &[
    Feedback { name: "1⟲", indices: [&[1], &[], &[], &[]] },
    Feedback { name: "2⟲", indices: [&[], &[2], &[], &[]] },
    Feedback { name: "3⟲", indices: [&[], &[], &[3], &[]] },
    Feedback { name: "4⟲", indices: [&[], &[], &[], &[4]] },
    Feedback { name: "1⟲ 2⟲", indices: [&[1], &[2], &[], &[]] },
    Feedback { name: "3⟲ 4⟲", indices: [&[], &[], &[3], &[4]] },
    Feedback { name: "1⟲ 2⟲ 3⟲", indices: [&[1], &[2], &[3], &[]] },
    Feedback { name: "2⟲ 3⟲ 4⟲", indices: [&[], &[2], &[3], &[4]] },
    Feedback { name: "1⟲ 2⟲ 3⟲ 4⟲", indices: [&[1], &[2], &[3], &[4]] },
    Feedback { name: "1→2", indices: [&[], &[1], &[], &[]] },
    Feedback { name: "1→3", indices: [&[], &[], &[1], &[]] },
    Feedback { name: "1→4", indices: [&[], &[], &[], &[1]] },
    Feedback { name: "2→3", indices: [&[], &[], &[2], &[]] },
    Feedback { name: "2→4", indices: [&[], &[], &[], &[2]] },
    Feedback { name: "3→4", indices: [&[], &[], &[], &[3]] },
    Feedback { name: "1→3 2→4", indices: [&[], &[], &[1], &[2]] },
    Feedback { name: "1→4 2→3", indices: [&[], &[], &[2], &[1]] },
    Feedback { name: "1⟲ 2→4", indices: [&[1], &[], &[], &[2]] },
];

/// The linear amplitude for an operator amplitude setting (0..=15).
pub fn operator_amplitude_curve(amplitude: u32) -> f64 {
    ((16.0f64).powf(amplitude as f64 / 15.0) - 1.0) / 15.0
}

// =============================================================================
// Legacy effect names (URL versions < 6)
// =============================================================================

/// Name-indexed effects from before the effects bitmask existed, in their
/// historical order. Index 0 = no effects.
pub static LEGACY_EFFECT_NAMES: &[&str] = &["none", "reverb", "chorus", "chorus & reverb"];

/// Reverb amount assigned when a legacy effect enum enabled reverb but the
/// song carried no global reverb tag.
pub const LEGACY_REVERB_DEFAULT: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_consistent() {
        assert_eq!(SCALES.len(), 12);
        assert_eq!(KEYS.len(), 12);
        for scale in SCALES {
            assert!(scale.flags[0], "scale {} must include the root", scale.name);
        }
        for rhythm in RHYTHMS {
            for pattern in &rhythm.arpeggio_patterns {
                assert!(!pattern.is_empty());
            }
        }
        for algorithm in ALGORITHMS {
            assert!(algorithm.carrier_count >= 1 && algorithm.carrier_count <= OPERATOR_COUNT);
            for sources in &algorithm.modulated_by {
                for &source in *sources {
                    assert!(source >= 1 && source <= OPERATOR_COUNT);
                }
            }
        }
        for feedback in FEEDBACKS {
            for sources in &feedback.indices {
                for &source in *sources {
                    assert!(source >= 1 && source <= OPERATOR_COUNT);
                }
            }
        }
        assert_eq!(DRUM_COUNT, 12);
    }

    #[test]
    fn test_name_lookups_fall_back() {
        assert_eq!(scale_index_from_name("romani :)"), scale_index_from_name("dbl harmonic :)"));
        assert_eq!(scale_index_from_name("no such scale"), SCALE_DEFAULT);
        assert_eq!(transition_index_from_name("no such transition"), TRANSITION_DEFAULT);
        assert_eq!(key_index_from_name("F#"), key_index_from_name("F♯"));
        assert_eq!(key_index_from_name("Bb"), key_index_from_name("A♯"));
    }

    #[test]
    fn test_amplitude_curve_endpoints() {
        assert!(operator_amplitude_curve(0).abs() < 1e-12);
        assert!((operator_amplitude_curve(15) - 1.0).abs() < 1e-12);
    }
}
