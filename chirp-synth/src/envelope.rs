//! Envelope curve evaluation
//!
//! Envelopes shape filter cutoffs, FM operator amplitudes, feedback
//! amplitude and pulse width over the life of a note. All curves map
//! `(seconds since note start, beats since note start, note expression)`
//! to a non-negative scalar.

use chirp_song::config::{Envelope, EnvelopeCurve};

/// Evaluate an envelope at the given position within a note.
///
/// `note_expression` is the note's pin expression as a 0..=1 gain and is
/// only consulted by the `custom` curve.
pub fn compute_envelope(
    envelope: &Envelope,
    seconds: f64,
    beats: f64,
    note_expression: f64,
) -> f64 {
    let speed = envelope.speed;
    match envelope.curve {
        EnvelopeCurve::Custom => note_expression,
        EnvelopeCurve::Steady => 1.0,
        EnvelopeCurve::Twang => 1.0 / (1.0 + seconds * speed),
        EnvelopeCurve::Swell => 1.0 - 1.0 / (1.0 + seconds * speed),
        EnvelopeCurve::Tremolo => 0.5 - 0.5 * (beats * std::f64::consts::TAU * speed).cos(),
        EnvelopeCurve::Tremolo2 => 0.75 - 0.25 * (beats * std::f64::consts::TAU * speed).cos(),
        EnvelopeCurve::Punch => (2.0 - seconds * 10.0).max(1.0),
        EnvelopeCurve::Flare => {
            let attack = 0.25 / speed.sqrt();
            if seconds < attack {
                seconds / attack
            } else {
                1.0 / (1.0 + (seconds - attack) * speed)
            }
        }
        EnvelopeCurve::Decay => (2.0f64).powf(-speed * seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirp_song::config::{envelope_index_from_name, ENVELOPES};

    fn at(name: &str, seconds: f64, beats: f64, expression: f64) -> f64 {
        compute_envelope(&ENVELOPES[envelope_index_from_name(name)], seconds, beats, expression)
    }

    #[test]
    fn test_boundary_values() {
        assert_eq!(at("steady", 0.0, 0.0, 0.5), 1.0);
        assert_eq!(at("steady", 123.0, 45.0, 0.5), 1.0);
        assert_eq!(at("twang 1", 0.0, 0.0, 0.5), 1.0);
        assert_eq!(at("decay 1", 0.0, 0.0, 0.5), 1.0);
        assert_eq!(at("punch", 0.0, 0.0, 0.5), 2.0);
        assert_eq!(at("tremolo1", 0.0, 0.0, 0.5), 0.0);
        assert_eq!(at("tremolo4", 0.0, 0.0, 0.5), 0.5);
        assert_eq!(at("custom", 0.0, 0.0, 0.5), 0.5);
        // Swell approaches 1 for large times.
        assert!((at("swell 1", 1e9, 0.0, 0.5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_flare_reaches_one_at_attack() {
        for name in ["flare 1", "flare 2", "flare 3"] {
            let envelope = &ENVELOPES[envelope_index_from_name(name)];
            let attack = 0.25 / envelope.speed.sqrt();
            let value = compute_envelope(envelope, attack, 0.0, 1.0);
            assert!((value - 1.0).abs() < 1e-9, "{name} at attack: {value}");
        }
    }

    #[test]
    fn test_decay_curves_are_monotone() {
        for name in ["twang 2", "decay 2"] {
            let envelope = &ENVELOPES[envelope_index_from_name(name)];
            let mut previous = f64::INFINITY;
            for step in 0..100 {
                let value = compute_envelope(envelope, step as f64 * 0.01, 0.0, 1.0);
                assert!(value <= previous);
                previous = value;
            }
        }
    }

    #[test]
    fn test_punch_fades_to_steady() {
        assert_eq!(at("punch", 0.2, 0.0, 1.0), 1.0);
    }
}
