//! Biquad filter kit
//!
//! Static coefficient computation for the filter families the instruments
//! use, plus the dynamic biquad whose coefficients interpolate linearly
//! across a run of samples so per-tick cutoff changes never step audibly.

use chirp_song::{
    filter_setting_to_hz, filter_setting_to_linear_gain, FilterControlPoint, FilterType,
    FILTER_FREQ_RANGE, FILTER_FREQ_STEP,
};

const PI: f64 = std::f64::consts::PI;

/// Highest radians a filter corner may reach; just below Nyquist so the
/// bilinear-transform tangents stay finite.
pub const MAX_CORNER_RADIANS: f64 = PI * 0.9999;

// =============================================================================
// Static coefficients
// =============================================================================

/// One biquad section's coefficients. First-order filters leave the
/// second-order terms at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterCoefficients {
    pub a1: f64,
    pub a2: f64,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
}

impl FilterCoefficients {
    /// First-order Butterworth lowpass.
    pub fn low_pass_1st_order(corner_radians: f64) -> FilterCoefficients {
        let tangent = (corner_radians.min(MAX_CORNER_RADIANS) * 0.5).tan();
        let scale = 1.0 / (1.0 + tangent);
        FilterCoefficients {
            a1: (tangent - 1.0) * scale,
            a2: 0.0,
            b0: tangent * scale,
            b1: tangent * scale,
            b2: 0.0,
        }
    }

    /// Second-order lowpass; `peak_linear_gain` is the response magnitude
    /// at the corner (1.0 ≈ Butterworth, larger values are resonant).
    pub fn low_pass_2nd_order(corner_radians: f64, peak_linear_gain: f64) -> FilterCoefficients {
        let corner = corner_radians.min(MAX_CORNER_RADIANS);
        let alpha = corner.sin() / (2.0 * peak_linear_gain.max(1e-4));
        let cosine = corner.cos();
        let a0 = 1.0 + alpha;
        let b1 = (1.0 - cosine) / a0;
        FilterCoefficients {
            a1: -2.0 * cosine / a0,
            a2: (1.0 - alpha) / a0,
            b0: b1 * 0.5,
            b1,
            b2: b1 * 0.5,
        }
    }

    /// Second-order highpass, mirror of [`Self::low_pass_2nd_order`].
    pub fn high_pass_2nd_order(corner_radians: f64, peak_linear_gain: f64) -> FilterCoefficients {
        let corner = corner_radians.min(MAX_CORNER_RADIANS);
        let alpha = corner.sin() / (2.0 * peak_linear_gain.max(1e-4));
        let cosine = corner.cos();
        let a0 = 1.0 + alpha;
        let b1 = -(1.0 + cosine) / a0;
        FilterCoefficients {
            a1: -2.0 * cosine / a0,
            a2: (1.0 - alpha) / a0,
            b0: -b1 * 0.5,
            b1,
            b2: -b1 * 0.5,
        }
    }

    /// Constant-Q peaking section with the given linear gain at the center.
    pub fn peak_2nd_order(center_radians: f64, linear_gain: f64) -> FilterCoefficients {
        let center = center_radians.min(MAX_CORNER_RADIANS);
        let amplitude = linear_gain.max(1e-4).sqrt();
        let alpha = center.sin() * 0.5;
        let cosine = center.cos();
        let a0 = 1.0 + alpha / amplitude;
        FilterCoefficients {
            a1: -2.0 * cosine / a0,
            a2: (1.0 - alpha / amplitude) / a0,
            b0: (1.0 + alpha * amplitude) / a0,
            b1: -2.0 * cosine / a0,
            b2: (1.0 - alpha * amplitude) / a0,
        }
    }

    /// First-order high shelf with unity gain at DC and `shelf_linear_gain`
    /// at Nyquist, transitioning around `corner_radians`.
    pub fn high_shelf_1st_order(corner_radians: f64, shelf_linear_gain: f64) -> FilterCoefficients {
        let gain = shelf_linear_gain.max(1e-6);
        let tangent = (corner_radians.min(MAX_CORNER_RADIANS) * 0.5).tan();
        let sqrt_gain = gain.sqrt();
        let scale = 1.0 / (1.0 + sqrt_gain * tangent);
        FilterCoefficients {
            a1: (sqrt_gain * tangent - 1.0) * scale,
            a2: 0.0,
            b0: (gain + sqrt_gain * tangent) * scale,
            b1: (sqrt_gain * tangent - gain) * scale,
            b2: 0.0,
        }
    }

    /// First-order all-pass that inverts phase above the corner.
    pub fn all_pass_1st_order_invert_above(corner_radians: f64) -> FilterCoefficients {
        let tangent = (corner_radians.min(MAX_CORNER_RADIANS) * 0.5).tan();
        let g = (1.0 - tangent) / (1.0 + tangent);
        FilterCoefficients { a1: -g, a2: 0.0, b0: -g, b1: 1.0, b2: 0.0 }
    }

    /// First-order all-pass tuned as a fractional delay of `delay` samples
    /// (`0 < delay < 2`): `y = g·x + x₋₁ − g·y₋₁` with
    /// `g = (1 − d) / (1 + d)`.
    pub fn all_pass_fractional_delay(delay: f64) -> FilterCoefficients {
        let g = (1.0 - delay) / (1.0 + delay);
        FilterCoefficients { a1: g, a2: 0.0, b0: g, b1: 1.0, b2: 0.0 }
    }

    /// Response magnitude at the given angular frequency.
    pub fn magnitude_at(&self, radians: f64) -> f64 {
        let (numerator, denominator) = self.response_at(radians);
        (numerator.0 * numerator.0 + numerator.1 * numerator.1).sqrt()
            / (denominator.0 * denominator.0 + denominator.1 * denominator.1).sqrt()
    }

    /// Phase delay in samples at the given angular frequency.
    pub fn phase_delay_at(&self, radians: f64) -> f64 {
        let (numerator, denominator) = self.response_at(radians);
        let phase = numerator.1.atan2(numerator.0) - denominator.1.atan2(denominator.0);
        -phase / radians
    }

    fn response_at(&self, radians: f64) -> ((f64, f64), (f64, f64)) {
        let (cos1, sin1) = (radians.cos(), -radians.sin());
        let (cos2, sin2) = ((2.0 * radians).cos(), -(2.0 * radians).sin());
        let numerator =
            (self.b0 + self.b1 * cos1 + self.b2 * cos2, self.b1 * sin1 + self.b2 * sin2);
        let denominator =
            (1.0 + self.a1 * cos1 + self.a2 * cos2, self.a1 * sin1 + self.a2 * sin2);
        (numerator, denominator)
    }

    /// True when both poles are strictly inside the unit circle.
    pub fn is_stable(&self) -> bool {
        // Jury criterion for 1 + a1·z⁻¹ + a2·z⁻².
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }
}

// =============================================================================
// Dynamic biquad
// =============================================================================

/// A Direct Form I biquad whose five coefficients each advance by a
/// per-sample delta, so a run of N samples sweeps smoothly from one
/// coefficient set to another.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicBiquad {
    pub a1: f64,
    pub a2: f64,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1_delta: f64,
    pub a2_delta: f64,
    pub b0_delta: f64,
    pub b1_delta: f64,
    pub b2_delta: f64,
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
}

impl DynamicBiquad {
    /// Set coefficients to `start` with deltas that reach `end` after
    /// `1.0 / delta_rate` samples.
    pub fn load_coefficients_with_gradient(
        &mut self,
        start: &FilterCoefficients,
        end: &FilterCoefficients,
        delta_rate: f64,
    ) {
        self.a1 = start.a1;
        self.a2 = start.a2;
        self.b0 = start.b0;
        self.b1 = start.b1;
        self.b2 = start.b2;
        self.a1_delta = (end.a1 - start.a1) * delta_rate;
        self.a2_delta = (end.a2 - start.a2) * delta_rate;
        self.b0_delta = (end.b0 - start.b0) * delta_rate;
        self.b1_delta = (end.b1 - start.b1) * delta_rate;
        self.b2_delta = (end.b2 - start.b2) * delta_rate;
    }

    /// Process one sample and advance the coefficient gradient.
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        self.a1 += self.a1_delta;
        self.a2 += self.a2_delta;
        self.b0 += self.b0_delta;
        self.b1 += self.b1_delta;
        self.b2 += self.b2_delta;
        output
    }

    /// Clear the sample history, keeping coefficients.
    pub fn reset_state(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    /// Clamp runaway or denormal history values; called by the engine's
    /// per-tick sanitization sweep.
    pub fn sanitize(&mut self) {
        for value in [&mut self.x1, &mut self.x2, &mut self.y1, &mut self.y2] {
            if !value.is_finite() || value.abs() > 100.0 {
                *value = 0.0;
            } else if value.abs() < 1e-24 {
                *value = 0.0;
            }
        }
    }
}

// =============================================================================
// Control points
// =============================================================================

/// Compute the biquad for a filter control point. `freq_mult` scales the
/// point's cutoff in Hz (the filter envelope's contribution).
pub fn control_point_to_coefficients(
    point: &FilterControlPoint,
    sample_rate: f64,
    freq_mult: f64,
) -> FilterCoefficients {
    let hz = filter_setting_to_hz(point.freq) * freq_mult.max(0.0);
    let radians = (std::f64::consts::TAU * hz / sample_rate).clamp(1e-5, MAX_CORNER_RADIANS);
    let gain = filter_setting_to_linear_gain(point.gain);
    match point.kind {
        FilterType::LowPass => FilterCoefficients::low_pass_2nd_order(radians, gain),
        FilterType::HighPass => FilterCoefficients::high_pass_2nd_order(radians, gain),
        FilterType::Peak => FilterCoefficients::peak_2nd_order(radians, gain),
    }
}

/// A scalar counteracting the perceived loudness change one control point
/// introduces, applied ahead of the filter cascade.
pub fn point_volume_compensation(point: &FilterControlPoint) -> f64 {
    let gain = filter_setting_to_linear_gain(point.gain);
    let octaves_below_top = (FILTER_FREQ_RANGE - 1 - point.freq) as f64 * FILTER_FREQ_STEP;
    match point.kind {
        FilterType::LowPass => {
            // A resonant peak makes the tone louder; a deep cutoff with a
            // gain cut leaves little energy, so lift it back a little.
            let resonance_compensation = gain.max(1.0).powf(-0.6);
            let depth_compensation = gain.min(1.0).powf(-0.3 * (octaves_below_top / 8.0).min(1.0));
            resonance_compensation * depth_compensation
        }
        FilterType::HighPass => gain.max(1.0).powf(-0.6) * gain.min(1.0).powf(-0.2),
        FilterType::Peak => gain.max(1.0).powf(-0.4),
    }
}

/// The aggregate pre-filter multiplier for a cascade, capped at 3.0.
pub fn cascade_volume_compensation(points: &[FilterControlPoint]) -> f64 {
    points
        .iter()
        .map(point_volume_compensation)
        .product::<f64>()
        .min(3.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_points() -> impl Iterator<Item = FilterControlPoint> {
        (0..FILTER_FREQ_RANGE).flat_map(|freq| {
            (0..chirp_song::FILTER_GAIN_RANGE).flat_map(move |gain| {
                [FilterType::LowPass, FilterType::HighPass, FilterType::Peak]
                    .into_iter()
                    .map(move |kind| FilterControlPoint { kind, freq, gain })
            })
        })
    }

    #[test]
    fn test_every_setting_is_stable() {
        for point in all_points() {
            let coefficients = control_point_to_coefficients(&point, 44100.0, 1.0);
            assert!(
                coefficients.is_stable(),
                "unstable filter for {:?} freq {} gain {}",
                point.kind,
                point.freq,
                point.gain
            );
        }
        // Envelope modulation can push the cutoff to extremes.
        for mult in [0.0, 0.01, 0.5, 2.0, 16.0] {
            for point in all_points() {
                let coefficients = control_point_to_coefficients(&point, 44100.0, mult);
                assert!(coefficients.is_stable());
            }
        }
    }

    #[test]
    fn test_lowpass_response_shape() {
        let coefficients = FilterCoefficients::low_pass_2nd_order(0.5, 1.0);
        assert!((coefficients.magnitude_at(1e-4) - 1.0).abs() < 1e-3);
        assert!(coefficients.magnitude_at(3.0) < 0.05);
        // Resonance peaks at the corner.
        let resonant = FilterCoefficients::low_pass_2nd_order(0.5, 4.0);
        assert!((resonant.magnitude_at(0.5) - 4.0).abs() < 0.1);
    }

    #[test]
    fn test_highpass_response_shape() {
        let coefficients = FilterCoefficients::high_pass_2nd_order(0.5, 1.0);
        assert!(coefficients.magnitude_at(1e-3) < 1e-4);
        assert!((coefficients.magnitude_at(3.0) - 1.0).abs() < 0.02);
    }

    #[test]
    fn test_peak_gain_at_center() {
        for gain in [0.25, 1.0, 4.0] {
            let coefficients = FilterCoefficients::peak_2nd_order(1.0, gain);
            assert!((coefficients.magnitude_at(1.0) - gain).abs() / gain < 0.02);
            assert!((coefficients.magnitude_at(1e-4) - 1.0).abs() < 1e-2);
        }
    }

    #[test]
    fn test_high_shelf_endpoints() {
        for gain in [0.25, 0.5, 0.9] {
            let coefficients = FilterCoefficients::high_shelf_1st_order(1.0, gain);
            assert!((coefficients.magnitude_at(1e-5) - 1.0).abs() < 1e-3);
            assert!((coefficients.magnitude_at(PI * 0.999) - gain).abs() < 1e-2);
        }
    }

    #[test]
    fn test_all_pass_is_all_pass() {
        for coefficients in [
            FilterCoefficients::all_pass_1st_order_invert_above(1.0),
            FilterCoefficients::all_pass_fractional_delay(0.3),
        ] {
            for radians in [0.01, 0.5, 1.0, 2.0, 3.0] {
                assert!((coefficients.magnitude_at(radians) - 1.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_fractional_delay_phase() {
        // Near DC the all-pass delays by its nominal fraction.
        for delay in [0.2, 0.5, 0.8] {
            let coefficients = FilterCoefficients::all_pass_fractional_delay(delay);
            assert!((coefficients.phase_delay_at(0.01) - delay).abs() < 0.02);
        }
    }

    #[test]
    fn test_gradient_with_equal_endpoints_matches_static() {
        let coefficients = FilterCoefficients::low_pass_2nd_order(0.8, 2.0);
        let mut dynamic = DynamicBiquad::default();
        dynamic.load_coefficients_with_gradient(&coefficients, &coefficients, 1.0 / 4096.0);
        let mut x1 = 0.0f64;
        let mut x2 = 0.0f64;
        let mut y1 = 0.0f64;
        let mut y2 = 0.0f64;
        let mut phase = 0.1f64;
        for step in 0..4096 {
            phase = (phase * 1.03 + 0.7).fract();
            let input = phase * 2.0 - 1.0;
            let expected = coefficients.b0 * input + coefficients.b1 * x1
                + coefficients.b2 * x2
                - coefficients.a1 * y1
                - coefficients.a2 * y2;
            x2 = x1;
            x1 = input;
            y2 = y1;
            y1 = expected;
            let actual = dynamic.process(input);
            assert!((actual - expected).abs() < 1e-6, "diverged at sample {step}");
        }
    }

    #[test]
    fn test_gradient_reaches_endpoint() {
        let start = FilterCoefficients::low_pass_2nd_order(0.2, 1.0);
        let end = FilterCoefficients::low_pass_2nd_order(1.2, 1.0);
        let mut dynamic = DynamicBiquad::default();
        let samples = 64;
        dynamic.load_coefficients_with_gradient(&start, &end, 1.0 / samples as f64);
        for _ in 0..samples {
            dynamic.process(0.0);
        }
        assert!((dynamic.b0 - end.b0).abs() < 1e-12);
        assert!((dynamic.a1 - end.a1).abs() < 1e-12);
    }

    #[test]
    fn test_sanitize_clears_bad_state() {
        let mut dynamic = DynamicBiquad::default();
        dynamic.y1 = f64::NAN;
        dynamic.x1 = 1e-30;
        dynamic.y2 = 500.0;
        dynamic.sanitize();
        assert_eq!(dynamic.y1, 0.0);
        assert_eq!(dynamic.x1, 0.0);
        assert_eq!(dynamic.y2, 0.0);
    }

    #[test]
    fn test_volume_compensation_is_capped() {
        let points: Vec<FilterControlPoint> = (0..8)
            .map(|_| FilterControlPoint { kind: FilterType::LowPass, freq: 2, gain: 0 })
            .collect();
        assert!(cascade_volume_compensation(&points) <= 3.0);
        assert_eq!(cascade_volume_compensation(&[]), 1.0);
    }
}
