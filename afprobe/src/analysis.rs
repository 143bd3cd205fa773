/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Signal analysis behind the probe's views: RMS level, short-time FFT
//! magnitude and real cepstrum.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Analysis window length in samples.
pub const FFT_SIZE: usize = 1024;

/// Spectrum bins produced per refresh (positive frequencies).
pub const SPECTRUM_BINS: usize = FFT_SIZE / 2;

/// Cepstral coefficients produced per refresh.
pub const CEPSTRUM_BINS: usize = FFT_SIZE / 4;

const DB_FLOOR: f32 = -100.0;

/// RMS level of an interleaved block in dBFS.
pub fn rms_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return DB_FLOOR;
    }
    let energy: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / 32768.0;
            x * x
        })
        .sum();
    let rms = (energy / samples.len() as f64).sqrt();
    if rms <= 0.0 {
        DB_FLOOR
    } else {
        (20.0 * rms.log10() as f32).max(DB_FLOOR)
    }
}

/// Reusable FFT state for the spectral views.
pub struct Analyzer {
    fft: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl Analyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = i as f32 / (FFT_SIZE - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * x).cos())
            })
            .collect();
        Self {
            fft: planner.plan_fft_forward(FFT_SIZE),
            inverse: planner.plan_fft_inverse(FFT_SIZE),
            window,
            scratch: vec![Complex::default(); FFT_SIZE],
        }
    }

    /// Windowed FFT magnitude in dBFS over the last [`FFT_SIZE`] samples of
    /// `mono` (zero-padded when shorter).
    pub fn spectrum_db(&mut self, mono: &[i16]) -> Vec<f32> {
        self.load_windowed(mono);
        self.fft.process(&mut self.scratch);
        let norm = 1.0 / (FFT_SIZE as f32 / 2.0);
        self.scratch[..SPECTRUM_BINS]
            .iter()
            .map(|c| {
                let mag = c.norm() * norm / 32768.0;
                if mag <= 0.0 {
                    DB_FLOOR
                } else {
                    (20.0 * mag.log10()).max(DB_FLOOR)
                }
            })
            .collect()
    }

    /// Real cepstrum: inverse FFT of the log magnitude spectrum. The first
    /// coefficient (overall level) is dropped.
    pub fn cepstrum(&mut self, mono: &[i16]) -> Vec<f32> {
        self.load_windowed(mono);
        self.fft.process(&mut self.scratch);
        for c in self.scratch.iter_mut() {
            let mag = c.norm().max(1e-9);
            *c = Complex::new(mag.ln(), 0.0);
        }
        self.inverse.process(&mut self.scratch);
        let norm = 1.0 / FFT_SIZE as f32;
        self.scratch[1..=CEPSTRUM_BINS]
            .iter()
            .map(|c| (c.re * norm).abs())
            .collect()
    }

    fn load_windowed(&mut self, mono: &[i16]) {
        let take = mono.len().min(FFT_SIZE);
        let tail = &mono[mono.len() - take..];
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < take { tail[i] as f32 } else { 0.0 };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq_bin: usize, amp: f32) -> Vec<i16> {
        (0..FFT_SIZE)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * freq_bin as f32 * i as f32
                    / FFT_SIZE as f32;
                (amp * phase.sin()) as i16
            })
            .collect()
    }

    #[test]
    fn rms_of_silence_is_floor() {
        assert_eq!(rms_dbfs(&[0i16; 512]), -100.0);
        assert_eq!(rms_dbfs(&[]), -100.0);
    }

    #[test]
    fn rms_of_full_scale_sine_is_about_minus_three_db() {
        let tone = sine(16, 32_000.0);
        let db = rms_dbfs(&tone);
        assert_relative_eq!(db, -3.2, epsilon = 0.5);
    }

    #[test]
    fn spectrum_peaks_at_the_tone_bin() {
        let mut analyzer = Analyzer::new();
        let tone = sine(50, 16_000.0);
        let spectrum = analyzer.spectrum_db(&tone);
        let peak_bin = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!(
            (peak_bin as i64 - 50).abs() <= 1,
            "peak at bin {peak_bin}, expected 50"
        );
        // Peak well above the noise floor away from the tone.
        assert!(spectrum[peak_bin] - spectrum[200] > 30.0);
    }

    #[test]
    fn cepstrum_is_finite_for_silence_and_tone() {
        let mut analyzer = Analyzer::new();
        for input in [vec![0i16; FFT_SIZE], sine(25, 12_000.0)] {
            let cepstrum = analyzer.cepstrum(&input);
            assert_eq!(cepstrum.len(), CEPSTRUM_BINS);
            assert!(cepstrum.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn short_input_is_zero_padded() {
        let mut analyzer = Analyzer::new();
        let spectrum = analyzer.spectrum_db(&[1000i16; 100]);
        assert_eq!(spectrum.len(), SPECTRUM_BINS);
        assert!(spectrum.iter().all(|v| v.is_finite()));
    }
}
