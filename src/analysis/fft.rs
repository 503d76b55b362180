//! Windowing and an in-place iterative radix-2 FFT
//!
//! Complex data is kept interleaved as `[re0, im0, re1, im1, ...]`.

use std::f64::consts::PI;

/// Smallest power of two that holds `min(len, max_size)` samples.
pub fn fft_size_for(len: usize, max_size: usize) -> usize {
    len.min(max_size).max(1).next_power_of_two()
}

/// Apply `0.54 - 0.46 * cos(2πi / (n - 1))` in place.
pub fn apply_hamming_window(samples: &mut [f64]) {
    let n = samples.len();
    if n < 2 {
        return;
    }
    let denom = (n - 1) as f64;
    for (i, sample) in samples.iter_mut().enumerate() {
        *sample *= 0.54 - 0.46 * (2.0 * PI * i as f64 / denom).cos();
    }
}

/// Forward FFT of a real signal whose length is a power of two.
///
/// Returns interleaved real/imaginary output of the same number of points.
pub fn fft_real(samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    debug_assert!(n.is_power_of_two() || n == 0, "FFT length must be a power of two");

    let mut complex = vec![0.0; n * 2];
    for (i, &sample) in samples.iter().enumerate() {
        complex[i * 2] = sample;
    }
    fft_in_place(&mut complex);
    complex
}

/// In-place forward transform over interleaved complex data.
pub fn fft_in_place(complex: &mut [f64]) {
    let n = complex.len() / 2;
    if n <= 1 {
        return;
    }

    bit_reverse_permute(complex, n);

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f64;
        let (w_step_re, w_step_im) = (angle.cos(), angle.sin());
        let half = len / 2;

        let mut start = 0;
        while start < n {
            let (mut w_re, mut w_im) = (1.0, 0.0);
            for j in 0..half {
                let u = (start + j) * 2;
                let v = (start + j + half) * 2;

                let t_re = complex[v] * w_re - complex[v + 1] * w_im;
                let t_im = complex[v] * w_im + complex[v + 1] * w_re;

                complex[v] = complex[u] - t_re;
                complex[v + 1] = complex[u + 1] - t_im;
                complex[u] += t_re;
                complex[u + 1] += t_im;

                let next_re = w_re * w_step_re - w_im * w_step_im;
                w_im = w_re * w_step_im + w_im * w_step_re;
                w_re = next_re;
            }
            start += len;
        }
        len *= 2;
    }
}

fn bit_reverse_permute(complex: &mut [f64], n: usize) {
    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;

        if i < j {
            complex.swap(i * 2, j * 2);
            complex.swap(i * 2 + 1, j * 2 + 1);
        }
    }
}

/// `sqrt(re² + im²)` for the first half of the spectrum (the rest mirrors
/// it for real input).
pub fn half_spectrum_magnitudes(interleaved: &[f64]) -> Vec<f64> {
    let n = interleaved.len() / 2;
    (0..n / 2)
        .map(|i| {
            let re = interleaved[i * 2];
            let im = interleaved[i * 2 + 1];
            (re * re + im * im).sqrt()
        })
        .collect()
}
