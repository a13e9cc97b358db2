//! Zero-phase FIR application by FFT convolution.
//!
//! Each channel is padded with `N − 1` reflect-limited samples on both sides
//! (odd reflection about the end points, zeros beyond the signal length),
//! convolved with `h` in one FFT of length `≥ len + N − 1`, and shifted left
//! by `(N − 1) / 2` to cancel the linear-phase delay.
use ndarray::{Array2, ArrayView1};
use rustfft::{num_complex::Complex, FftPlanner};

/// Filter every channel of `data` ([C, T]) in place.  `h` must have odd length.
pub fn apply_fir_zero_phase(data: &mut Array2<f64>, h: &[f64]) {
    if h.is_empty() || data.ncols() == 0 {
        return;
    }
    let n_h = h.len();
    let n_ext = data.ncols() + 2 * (n_h - 1);
    let n_fft = (n_ext + n_h - 1).next_power_of_two();

    let mut planner: FftPlanner<f64> = FftPlanner::new();
    let fwd = planner.plan_fft_forward(n_fft);
    let inv = planner.plan_fft_inverse(n_fft);

    let mut h_fft: Vec<Complex<f64>> = h
        .iter()
        .map(|&v| Complex::new(v, 0.0))
        .chain(std::iter::repeat(Complex::default()))
        .take(n_fft)
        .collect();
    fwd.process(&mut h_fft);

    for mut row in data.rows_mut() {
        let filtered = convolve_row(row.view(), &h_fft, n_h, n_fft, fwd.as_ref(), inv.as_ref());
        row.iter_mut().zip(filtered).for_each(|(v, f)| *v = f);
    }
}

/// Filter a single 1-D signal; output has the same length as `x`.
pub fn filter_1d(x: &[f64], h: &[f64]) -> Vec<f64> {
    let mut data = Array2::from_shape_vec((1, x.len()), x.to_vec())
        .unwrap_or_else(|_| Array2::zeros((1, 0)));
    apply_fir_zero_phase(&mut data, h);
    data.into_raw_vec_and_offset().0
}

fn convolve_row(
    x: ArrayView1<'_, f64>,
    h_fft: &[Complex<f64>],
    n_h: usize,
    n_fft: usize,
    fwd: &dyn rustfft::Fft<f64>,
    inv: &dyn rustfft::Fft<f64>,
) -> Vec<f64> {
    let n_x = x.len();
    let n_edge = n_h - 1;
    let padded = reflect_limited_pad(x, n_edge);

    let mut buf: Vec<Complex<f64>> = padded
        .iter()
        .map(|&v| Complex::new(v, 0.0))
        .chain(std::iter::repeat(Complex::default()))
        .take(n_fft)
        .collect();
    fwd.process(&mut buf);
    buf.iter_mut().zip(h_fft).for_each(|(b, &hf)| *b *= hf);
    inv.process(&mut buf);

    // Full convolution index of padded sample i is i + (N−1)/2 after the
    // delay; the original signal starts at padded index n_edge.
    let scale = 1.0 / n_fft as f64;
    let offset = n_edge + (n_h - 1) / 2;
    (0..n_x).map(|t| buf[offset + t].re * scale).collect()
}

/// Odd reflection about each end point, zero-filled beyond the signal.
fn reflect_limited_pad(x: ArrayView1<'_, f64>, n_pad: usize) -> Vec<f64> {
    let n = x.len();
    let reach = n_pad.min(n - 1);
    let mut out = Vec::with_capacity(n + 2 * n_pad);

    out.extend(std::iter::repeat(0.0).take(n_pad - reach));
    out.extend((1..=reach).rev().map(|i| 2.0 * x[0] - x[i]));
    out.extend(x.iter().copied());
    let last = x[n - 1];
    out.extend((1..=reach).map(|i| 2.0 * last - x[n - 1 - i]));
    out.extend(std::iter::repeat(0.0).take(n_pad - reach));
    out
}
