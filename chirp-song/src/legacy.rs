//! Legacy simplified-filter translation
//!
//! URL versions before 9 stored an instrument filter as a single
//! cutoff/resonance/envelope triple driving a simplified one-pole (or, with
//! resonance, a state-variable two-pole) lowpass. The modern model is a
//! cascade of biquad control points, so old songs are translated on decode:
//! one control point approximating the legacy response at its reference
//! sample rate, with a gain chosen by evaluating the legacy filter's actual
//! magnitude at the relocated cutoff.

use crate::config;
use crate::song::{FilterSettings, FilterType};
use crate::{filter_hz_to_setting, filter_linear_gain_to_setting, filter_setting_to_hz};

/// Legacy cutoff settings 0..=10; 10 was wide open.
pub const LEGACY_CUTOFF_RANGE: u32 = 11;

/// Legacy resonance settings 0..=7; 0 selected the first-order filter.
pub const LEGACY_RESONANCE_RANGE: u32 = 8;

/// Cutoff Hz at the top legacy setting; each setting below is half an
/// octave down.
const LEGACY_CUTOFF_MAX_HZ: f64 = 8000.0;

/// The legacy filters clamped their feedback coefficient here to stay
/// stable near Nyquist.
const LEGACY_FILTER_MAX: f64 = 0.95;

const LEGACY_MAX_RESONANCE: f64 = 0.95;

/// The sample rate the legacy filter response was tuned against.
const STANDARD_SAMPLE_RATE: f64 = 48000.0;

const TAU: f64 = std::f64::consts::TAU;
const PI: f64 = std::f64::consts::PI;

/// Translate a legacy cutoff/resonance/envelope triple into at most one
/// modern control point appended to `filter`.
pub fn translate_legacy_filter(
    filter: &mut FilterSettings,
    cutoff_setting: u32,
    resonance_setting: u32,
    envelope_index: usize,
) {
    let cutoff_setting = cutoff_setting.min(LEGACY_CUTOFF_RANGE - 1);
    let resonance_setting = resonance_setting.min(LEGACY_RESONANCE_RANGE - 1);

    let resonant = resonance_setting > 1;
    let first_order = resonance_setting == 0;
    let cutoff_at_max = cutoff_setting == LEGACY_CUTOFF_RANGE - 1;
    let envelope = &config::ENVELOPES[envelope_index.min(config::ENVELOPES.len() - 1)];
    let envelope_steady = envelope.curve == config::EnvelopeCurve::Steady;
    let envelope_decays = config::envelope_decays(envelope_index);

    if envelope_steady && cutoff_at_max && !resonant {
        // The legacy filter was not doing anything audible.
        return;
    }

    let legacy_hz = LEGACY_CUTOFF_MAX_HZ
        * (2.0f64).powf((cutoff_setting as f64 - (LEGACY_CUTOFF_RANGE - 1) as f64) * 0.5);
    let legacy_radians = (TAU * legacy_hz / STANDARD_SAMPLE_RATE).min(PI);
    let legacy_g = (2.0 * (legacy_radians * 0.5).sin()).min(LEGACY_FILTER_MAX);

    if first_order {
        // The first-order rolloff is so shallow that matching the legacy
        // cutoff directly would sound muffled; relocate the cutoff a few
        // octaves up and compensate with a gain cut instead.
        const EXTRA_OCTAVES: f64 = 3.5;
        let target_radians = legacy_radians * (2.0f64).powf(EXTRA_OCTAVES);
        let curved_radians = target_radians / (1.0 + target_radians / PI);
        let curved_hz = STANDARD_SAMPLE_RATE * curved_radians / TAU;
        let freq_setting = filter_hz_to_setting(curved_hz);
        let final_radians = TAU * filter_setting_to_hz(freq_setting) / STANDARD_SAMPLE_RATE;

        let legacy_gain_at_cutoff = first_order_magnitude(legacy_g, final_radians);
        let mut log_gain = legacy_gain_at_cutoff.log2();
        // Bias toward the ideal -EXTRA_OCTAVES octaves of attenuation.
        log_gain = -EXTRA_OCTAVES + (log_gain + EXTRA_OCTAVES) * 0.82;
        if envelope_decays {
            log_gain = log_gain.min(-2.0);
        }
        let gain_setting = filter_linear_gain_to_setting((2.0f64).powf(log_gain));
        filter.add_point(FilterType::LowPass, freq_setting, gain_setting);
    } else {
        let resonance = LEGACY_MAX_RESONANCE
            * ((resonance_setting.saturating_sub(1)) as f64
                / (LEGACY_RESONANCE_RANGE - 2) as f64)
                .sqrt();
        let intended_gain = 0.5 / (1.0 - resonance);
        let inverted_gain = 0.5 / intended_gain;

        // Curve the cutoff upward in proportion to how close it already is
        // to the top of the legacy range, damped by the resonance peak.
        let max_radians = TAU * LEGACY_CUTOFF_MAX_HZ / STANDARD_SAMPLE_RATE;
        let freq_ratio = legacy_radians / max_radians;
        let target_radians = legacy_radians * (freq_ratio * (2.0f64).powf(0.9) + 1.0);
        let mut curved_radians = legacy_radians + (target_radians - legacy_radians) * inverted_gain;
        if envelope_decays {
            curved_radians = curved_radians.min(legacy_radians * (2.0f64).powf(0.25));
        }
        let curved_hz = STANDARD_SAMPLE_RATE * curved_radians / TAU;
        let freq_setting = filter_hz_to_setting(curved_hz);

        // The modern peak gain reuses the resonance peak the legacy
        // settings intended, clamped to Butterworth when not resonant.
        let mut gain = intended_gain;
        if !resonant {
            gain = gain.min(std::f64::consts::FRAC_1_SQRT_2);
        }
        let gain_setting = filter_linear_gain_to_setting(gain);
        filter.add_point(FilterType::LowPass, freq_setting, gain_setting);
    }
}

/// |H(e^jw)| of the legacy one-pole `y += g·(x − y)`.
fn first_order_magnitude(g: f64, radians: f64) -> f64 {
    let (re, im) = ((1.0 - g) * radians.cos(), -(1.0 - g) * radians.sin());
    // H = g / (1 - (1-g)·z⁻¹)
    let (denominator_re, denominator_im) = (1.0 - re, -im);
    g / (denominator_re * denominator_re + denominator_im * denominator_im).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::envelope_index_from_name;

    #[test]
    fn test_flat_filter_emits_nothing() {
        let mut filter = FilterSettings::default();
        translate_legacy_filter(
            &mut filter,
            LEGACY_CUTOFF_RANGE - 1,
            0,
            envelope_index_from_name("steady"),
        );
        assert!(filter.points.is_empty());
    }

    #[test]
    fn test_first_order_translates_to_one_lowpass() {
        let mut filter = FilterSettings::default();
        translate_legacy_filter(&mut filter, 6, 0, envelope_index_from_name("steady"));
        assert_eq!(filter.points.len(), 1);
        let point = filter.points[0];
        assert_eq!(point.kind, FilterType::LowPass);
        // The relocated cutoff sits well above the legacy cutoff.
        let legacy_hz = LEGACY_CUTOFF_MAX_HZ * (2.0f64).powf((6.0 - 10.0) * 0.5);
        assert!(filter_setting_to_hz(point.freq) > legacy_hz * 4.0);
        // And the gain compensates downward.
        assert!(point.gain < crate::FILTER_GAIN_CENTER);
    }

    #[test]
    fn test_decaying_envelope_caps_first_order_gain() {
        let mut filter = FilterSettings::default();
        translate_legacy_filter(&mut filter, 6, 0, envelope_index_from_name("twang 1"));
        let gain = crate::filter_setting_to_linear_gain(filter.points[0].gain);
        assert!(gain <= 0.25 + 1e-9);
    }

    #[test]
    fn test_resonant_filter_keeps_peak() {
        let mut filter = FilterSettings::default();
        translate_legacy_filter(&mut filter, 7, 6, envelope_index_from_name("steady"));
        assert_eq!(filter.points.len(), 1);
        let gain = crate::filter_setting_to_linear_gain(filter.points[0].gain);
        assert!(gain > 1.0, "resonant legacy settings should keep an over-unity peak");
    }

    #[test]
    fn test_non_resonant_second_order_clamps_gain() {
        let mut filter = FilterSettings::default();
        translate_legacy_filter(&mut filter, 5, 1, envelope_index_from_name("steady"));
        let gain = crate::filter_setting_to_linear_gain(filter.points[0].gain);
        assert!(gain <= std::f64::consts::FRAC_1_SQRT_2 * (2.0f64).powf(0.25) + 1e-9);
    }

    #[test]
    fn test_first_order_magnitude_is_sane() {
        // Unity at DC, falling away above the cutoff.
        assert!((first_order_magnitude(0.5, 1e-9) - 1.0).abs() < 1e-6);
        assert!(first_order_magnitude(0.1, 3.0) < 0.1);
    }
}
