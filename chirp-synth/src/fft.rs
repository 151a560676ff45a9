//! Inverse real FFT for wave-table synthesis
//!
//! The spectrum and harmonics instruments build their single-cycle wave
//! tables from frequency-domain descriptions. This wraps `rustfft` with the
//! hermitian bookkeeping needed to go from a half-spectrum of real signals
//! to a real time-domain table.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Synthesize a real wave of `length` samples (power of two) from the
/// amplitudes and phases of bins `1..amplitudes.len()`.
///
/// Bin 0 (DC) and the Nyquist bin are forced to zero; the upper half of
/// the spectrum is the conjugate mirror so the output is purely real. The
/// result is scaled so that bin amplitudes correspond to sine amplitudes.
pub fn synthesize_from_spectrum(amplitudes: &[f32], phases: &[f32], length: usize) -> Vec<f32> {
    debug_assert!(length.is_power_of_two());
    debug_assert_eq!(amplitudes.len(), phases.len());
    let mut buffer = vec![Complex::new(0.0f32, 0.0f32); length];
    for (bin, (&amplitude, &phase)) in
        amplitudes.iter().zip(phases.iter()).enumerate().skip(1)
    {
        if bin >= length / 2 || amplitude == 0.0 {
            continue;
        }
        // Half the amplitude on each side of the mirror.
        let value = Complex::from_polar(amplitude * 0.5, phase);
        buffer[bin] = value;
        buffer[length - bin] = value.conj();
    }

    // rustfft's inverse is unnormalized, which is exactly right here: the
    // 0.5-per-mirror-bin split makes a bin amplitude of 1.0 come out as a
    // unit-amplitude sinusoid.
    let mut planner = FftPlanner::new();
    planner.plan_fft_inverse(length).process(&mut buffer);
    buffer.into_iter().map(|value| value.re).collect()
}

/// Scale a wave so its peak magnitude is `peak`. A silent wave is left
/// untouched.
pub fn normalize_peak(wave: &mut [f32], peak: f32) {
    let max = wave.iter().fold(0.0f32, |max, &sample| max.max(sample.abs()));
    if max > 0.0 {
        let scale = peak / max;
        for sample in wave {
            *sample *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_bin_is_a_sinusoid() {
        let length = 256;
        let mut amplitudes = vec![0.0f32; 16];
        let mut phases = vec![0.0f32; 16];
        amplitudes[3] = 1.0;
        phases[3] = -std::f32::consts::FRAC_PI_2; // sine phase
        let wave = synthesize_from_spectrum(&amplitudes, &phases, length);
        assert_eq!(wave.len(), length);
        // Three full unit-amplitude cycles across the table.
        for (index, &sample) in wave.iter().enumerate() {
            let expected = (std::f32::consts::TAU * 3.0 * index as f32 / length as f32).sin();
            assert!(
                (sample - expected).abs() < 1e-3,
                "sample {index}: {sample} vs {expected}"
            );
        }
    }

    #[test]
    fn test_output_has_no_dc() {
        let mut amplitudes = vec![0.0f32; 8];
        let phases = vec![0.0f32; 8];
        amplitudes[1] = 1.0;
        amplitudes[2] = 0.5;
        let wave = synthesize_from_spectrum(&amplitudes, &phases, 128);
        let mean: f32 = wave.iter().sum::<f32>() / wave.len() as f32;
        assert!(mean.abs() < 1e-4);
    }

    #[test]
    fn test_normalize_peak() {
        let mut wave = vec![0.25, -0.5, 0.1];
        normalize_peak(&mut wave, 1.0);
        assert!((wave[1] + 1.0).abs() < 1e-6);
    }
}
