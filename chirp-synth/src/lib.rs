//! Chirp-Synth: the synthesis engine for the chirp chiptune synthesizer
//!
//! Takes a [`chirp_song::Song`] and produces a stereo PCM stream in real
//! time. The host owns the audio device and the callback; this crate is
//! driven entirely by [`Synth::synthesize`] filling two `f32` buffers.
//!
//! # Architecture
//!
//! ```text
//!             ┌─────────────────────────────────────────┐
//!             │              Synth (engine)             │
//!             │  clock: tick < part < beat < bar        │
//!             │  tone pool + per-channel queues         │
//!             └──────┬──────────────────────────────────┘
//!                    │ per run (≤ one tick)
//!                    ▼
//!     compute_tone (voice)  →  instrument synth loop (synths)
//!                    │            writes mono scratch
//!                    ▼
//!     effects chain: distortion → bitcrusher → filter →
//!                    panning → chorus → reverb
//!                    │            sums into stereo mix
//!                    ▼
//!             master limiter (limiter)
//! ```
//!
//! # Determinism
//!
//! All randomness (guitar pluck jitter, spectrum start phases, white
//! noise) comes from one seedable LCG owned by the engine; engines built
//! with [`Synth::with_seed`] render bit-identical output for identical
//! inputs.

mod effects;
mod engine;
mod envelope;
mod fft;
mod filter;
mod limiter;
mod rng;
mod synths;
mod tone;
mod voice;
mod wave;

pub use effects::{InstrumentState, REVERB_DELAY_BUFFER_SIZE};
pub use engine::{
    Synth, DEFAULT_SAMPLE_RATE, LIVE_INPUT_TIMEOUT_SECONDS, MAXIMUM_TONES_PER_CHANNEL,
};
pub use envelope::compute_envelope;
pub use filter::{
    cascade_volume_compensation, control_point_to_coefficients, DynamicBiquad,
    FilterCoefficients,
};
pub use limiter::Limiter;
pub use rng::Lcg;
pub use tone::{Tone, TonePool};
pub use voice::{frequency_from_pitch, instrument_volume_mult, note_expression_to_gain};
pub use wave::{
    build_harmonics_wave, build_spectrum_wave, perform_integral, WaveBank,
    HARMONICS_WAVE_LENGTH, NOISE_WAVE_LENGTH, SINE_WAVE_LENGTH,
};
