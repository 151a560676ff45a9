//! Chirp-Song: song data model and codecs for the chirp chiptune synthesizer
//!
//! This crate owns everything about a song except making sound: the data
//! model (channels, patterns, notes, instruments), the compact base64 URL
//! codec with its multi-version legacy migration, and the JSON alternate
//! form. The synthesis engine lives in `chirp-synth` and consumes the model
//! read-only.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────┐
//! │  URL string      │     │  JSON document   │
//! └────────┬─────────┘     └────────┬─────────┘
//!          │                        │
//!     decode::from_url()       json::from_json()
//!          │                        │
//!          ▼                        ▼
//!     ┌────────────────────────────────────────┐
//!     │              Song (model)              │
//!     │  - channels: Vec<Channel>              │
//!     │  - patterns, notes, pins               │
//!     │  - instruments: Instrument (variants)  │
//!     └────────────────────────────────────────┘
//!                      │
//!          encode::to_url() / json::to_json()
//! ```
//!
//! # URL format
//!
//! A song URL is a base64 symbol stream: one version symbol followed by
//! `(tag, payload)` records. The writer emits tags in a fixed canonical
//! order; the reader accepts any order. Versions 2 through 8 are read-only
//! legacy shapes that are normalized into the current model on decode; see
//! the [`decode`] module for the per-version forks.

mod bits;
mod decode;
mod encode;
mod error;
mod json;
mod legacy;
mod song;

pub mod config;

pub use bits::{BitReader, BitWriter};
pub use decode::from_url;
pub use encode::to_url;
pub use error::SongError;
pub use json::{from_json, to_json};
pub use song::{
    Channel, FilterControlPoint, FilterSettings, FilterType, FmOperator, Instrument,
    InstrumentKind, Note, Pattern, Pin, Song,
};

// =============================================================================
// Time constants
// =============================================================================

/// Ticks per part; a tick is the smallest clock step of the engine.
pub const TICKS_PER_PART: usize = 2;

/// Parts per beat; note start/end times are measured in parts.
pub const PARTS_PER_BEAT: usize = 24;

/// Minimum tempo in beats per minute.
pub const TEMPO_MIN: u32 = 30;

/// Maximum tempo in beats per minute.
pub const TEMPO_MAX: u32 = 300;

/// Beats per bar range.
pub const BEATS_PER_BAR_MIN: usize = 3;
pub const BEATS_PER_BAR_MAX: usize = 16;

/// Bars per song range.
pub const BAR_COUNT_MIN: usize = 1;
pub const BAR_COUNT_MAX: usize = 128;

/// Patterns per channel range.
pub const PATTERNS_PER_CHANNEL_MIN: usize = 1;
pub const PATTERNS_PER_CHANNEL_MAX: usize = 64;

/// Instruments per channel range.
pub const INSTRUMENTS_PER_CHANNEL_MIN: usize = 1;
pub const INSTRUMENTS_PER_CHANNEL_MAX: usize = 10;

// =============================================================================
// Channel constants
// =============================================================================

/// Pitch channel count range.
pub const PITCH_CHANNEL_COUNT_MIN: usize = 1;
pub const PITCH_CHANNEL_COUNT_MAX: usize = 6;

/// Noise channel count range.
pub const NOISE_CHANNEL_COUNT_MIN: usize = 0;
pub const NOISE_CHANNEL_COUNT_MAX: usize = 3;

/// Number of pitches available in a pitch channel (7 octaves inclusive).
pub const MAX_PITCH: u32 = 84;

/// Number of distinct drums in a noise channel / drumset.
pub const DRUM_COUNT: usize = 12;

/// Octave scroll range for pitch channels.
pub const OCTAVE_MAX: u32 = 4;

/// Maximum simultaneous pitches in one note.
pub const MAX_CHORD_SIZE: usize = 4;

// =============================================================================
// Instrument constants
// =============================================================================

/// Instrument volume setting range; the top setting mutes.
pub const VOLUME_RANGE: u32 = 6;

/// Per-pin expression range (0..=3).
pub const EXPRESSION_MAX: u32 = 3;

/// FM operator count.
pub const OPERATOR_COUNT: usize = 4;

/// FM operator/feedback amplitude range (0..=15).
pub const OPERATOR_AMPLITUDE_MAX: u32 = 15;

/// Spectrum instrument control point count and per-point range.
pub const SPECTRUM_CONTROL_POINTS: usize = 30;
pub const SPECTRUM_MAX: u32 = 7;

/// Harmonics instrument control point count and per-point range.
pub const HARMONICS_CONTROL_POINTS: usize = 28;
pub const HARMONICS_MAX: u32 = 7;

/// Pulse width setting range for PWM and guitar (1..=8, duty = w/16).
pub const PULSE_WIDTH_RANGE: u32 = 8;

/// Guitar sustain setting range (0..=10).
pub const SUSTAIN_MAX: u32 = 10;

// =============================================================================
// Filter constants
// =============================================================================

/// Number of filter frequency settings.
pub const FILTER_FREQ_RANGE: u32 = 34;

/// Octaves between adjacent frequency settings.
pub const FILTER_FREQ_STEP: f64 = 0.25;

/// The frequency setting that corresponds to [`FILTER_FREQ_REFERENCE_HZ`].
pub const FILTER_FREQ_REFERENCE_SETTING: u32 = 28;
pub const FILTER_FREQ_REFERENCE_HZ: f64 = 8000.0;

/// Number of filter gain settings and the unity-gain center.
pub const FILTER_GAIN_RANGE: u32 = 15;
pub const FILTER_GAIN_CENTER: u32 = 7;

/// Octaves of linear gain between adjacent gain settings.
pub const FILTER_GAIN_STEP: f64 = 0.5;

/// Maximum control points in one filter.
pub const FILTER_MAX_POINTS: usize = 8;

/// Highest settable filter frequency in Hz.
pub fn filter_freq_max_hz() -> f64 {
    FILTER_FREQ_REFERENCE_HZ
        * (2.0f64).powf(
            FILTER_FREQ_STEP
                * (FILTER_FREQ_RANGE - 1 - FILTER_FREQ_REFERENCE_SETTING) as f64,
        )
}

/// Hz for a filter frequency setting.
pub fn filter_setting_to_hz(setting: u32) -> f64 {
    filter_freq_max_hz()
        * (2.0f64).powf((setting as f64 - (FILTER_FREQ_RANGE - 1) as f64) * FILTER_FREQ_STEP)
}

/// Nearest filter frequency setting for a Hz value.
pub fn filter_hz_to_setting(hz: f64) -> u32 {
    let exact = (FILTER_FREQ_RANGE - 1) as f64
        + (hz / filter_freq_max_hz()).log2() / FILTER_FREQ_STEP;
    (exact.round().max(0.0) as u32).min(FILTER_FREQ_RANGE - 1)
}

/// Linear gain for a filter gain setting.
pub fn filter_setting_to_linear_gain(setting: u32) -> f64 {
    (2.0f64).powf((setting as f64 - FILTER_GAIN_CENTER as f64) * FILTER_GAIN_STEP)
}

/// Nearest filter gain setting for a linear gain value.
pub fn filter_linear_gain_to_setting(gain: f64) -> u32 {
    let exact = FILTER_GAIN_CENTER as f64 + gain.log2() / FILTER_GAIN_STEP;
    (exact.round().max(0.0) as u32).min(FILTER_GAIN_RANGE - 1)
}

// =============================================================================
// Effect constants
// =============================================================================

/// Bits of the per-instrument effects mask, in chain order.
pub mod effect {
    /// Soft-clip waveshaper.
    pub const DISTORTION: u32 = 1 << 0;
    /// Sample-and-hold plus quantization.
    pub const BITCRUSHER: u32 = 1 << 1;
    /// Post-distortion dynamic filter cascade.
    pub const FILTER: u32 = 1 << 2;
    /// Cosine-law stereo panning with a short delay offset.
    pub const PANNING: u32 = 1 << 3;
    /// Six-tap stereo chorus.
    pub const CHORUS: u32 = 1 << 4;
    /// Four-tap feedback delay network reverb.
    pub const REVERB: u32 = 1 << 5;

    /// All bits a version-9 song may set.
    pub const ALL: u32 = DISTORTION | BITCRUSHER | FILTER | PANNING | CHORUS | REVERB;
}

/// Distortion amount range (0..=7).
pub const DISTORTION_MAX: u32 = 7;

/// Bitcrusher frequency setting range (0..=13).
pub const BITCRUSHER_FREQ_RANGE: u32 = 14;

/// Bitcrusher quantization setting range (0..=7).
pub const BITCRUSHER_QUANTIZATION_RANGE: u32 = 8;

/// Pan range: 0 = hard left, PAN_CENTER = center, PAN_MAX = hard right.
pub const PAN_MAX: u32 = 8;
pub const PAN_CENTER: u32 = 4;

/// Reverb amount range (0..=7). Legacy song-global reverb only reached 4.
pub const REVERB_RANGE: u32 = 8;
