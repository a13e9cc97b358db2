//! FFT resampling to a new sampling rate.
//!
//! Per channel:
//!   1. Extend both ends with reflect-limited samples (`auto_npad`), so the
//!      padded length is a power of two.
//!   2. Forward FFT; keep the half spectrum `0..=len/2`.
//!   3. Fold the Nyquist bin of the shorter spectrum: ×2 when downsampling,
//!      ×½ when upsampling.
//!   4. Truncate or zero-extend the half spectrum to the new padded length,
//!      scale by `new_len / old_len`, rebuild the Hermitian spectrum and
//!      invert.
//!   5. Drop the resampled padding; the output has `round(T · dst / src)`
//!      samples.
use ndarray::Array2;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::error::{FragilityError, Result};

/// Rates closer than this are treated as equal and the data is copied.
const SAME_RATE_TOL: f64 = 1e-9;

/// Left and right padding for a signal of `n` samples.
///
/// ```text
/// min_add = 2 · min(n / 8, 100)
/// total   = 2^ceil(log2(n + min_add)) − n
/// ```
pub fn auto_npad(n: usize) -> (usize, usize) {
    let min_add = (n / 8).min(100) * 2;
    let total = (n + min_add).next_power_of_two() - n;
    (total / 2, total - total / 2)
}

/// Number of output samples for `n_in` samples resampled by `ratio`.
pub fn output_len(n_in: usize, ratio: f64) -> usize {
    (ratio * n_in as f64).round() as usize
}

/// Resample every channel of `data` ([C, T]) from `src_sfreq` to `dst_sfreq`.
pub fn resample(data: &Array2<f64>, src_sfreq: f64, dst_sfreq: f64) -> Result<Array2<f64>> {
    for (name, v) in [("source", src_sfreq), ("target", dst_sfreq)] {
        if !v.is_finite() || v <= 0.0 {
            return Err(FragilityError::invalid(format!(
                "{name} sampling rate must be finite and > 0, got {v}"
            )));
        }
    }
    if (src_sfreq - dst_sfreq).abs() <= SAME_RATE_TOL * src_sfreq {
        return Ok(data.clone());
    }

    let ratio = dst_sfreq / src_sfreq;
    let n_in = data.ncols();
    let n_out = output_len(n_in, ratio);
    if n_out == 0 {
        return Err(FragilityError::invalid(format!(
            "{n_in} samples at {src_sfreq} Hz leave nothing at {dst_sfreq} Hz"
        )));
    }

    let npad = auto_npad(n_in);
    let mut planner = FftPlanner::new();
    let mut out = Array2::zeros((data.nrows(), n_out));
    for (row, mut dst) in data.rows().into_iter().zip(out.rows_mut()) {
        let x: Vec<f64> = row.to_vec();
        let y = resample_row(&mut planner, &x, ratio, npad);
        dst.iter_mut().zip(y).for_each(|(d, v)| *d = v);
    }
    Ok(out)
}

/// Resample one signal by `ratio` with explicit `(left, right)` padding.
pub fn resample_1d(x: &[f64], ratio: f64, npad: (usize, usize)) -> Vec<f64> {
    resample_row(&mut FftPlanner::new(), x, ratio, npad)
}

fn resample_row(
    planner: &mut FftPlanner<f64>,
    x: &[f64],
    ratio: f64,
    (npad_l, npad_r): (usize, usize),
) -> Vec<f64> {
    let n_in = x.len();
    if n_in == 0 {
        return vec![];
    }
    let n_out = output_len(n_in, ratio);

    let pad_l = npad_l.min(n_in - 1);
    let pad_r = npad_r.min(n_in - 1);
    let first = x[0];
    let last = x[n_in - 1];
    let mut buf: Vec<Complex<f64>> = (1..=pad_l)
        .rev()
        .map(|i| 2.0 * first - x[i])
        .chain(x.iter().copied())
        .chain((1..=pad_r).map(|i| 2.0 * last - x[n_in - 1 - i]))
        .map(|v| Complex::new(v, 0.0))
        .collect();
    let old_len = buf.len();
    let new_len = output_len(old_len, ratio).max(1);

    planner.plan_fft_forward(old_len).process(&mut buf);
    let mut half: Vec<Complex<f64>> = buf[..old_len / 2 + 1].to_vec();

    let shorter = new_len < old_len;
    let use_len = if shorter { new_len } else { old_len };
    if use_len % 2 == 0 {
        if let Some(bin) = half.get_mut(use_len / 2) {
            *bin *= if shorter { 2.0 } else { 0.5 };
        }
    }

    let scale = new_len as f64 / old_len as f64;
    let new_half = new_len / 2 + 1;
    let mut spec = vec![Complex::default(); new_len];
    for (s, h) in spec.iter_mut().zip(half.iter().take(new_half)) {
        *s = *h * scale;
    }
    for i in 1..new_half {
        let mirror = new_len - i;
        if mirror >= new_half {
            spec[mirror] = spec[i].conj();
        }
    }
    planner.plan_fft_inverse(new_len).process(&mut spec);

    let inv = 1.0 / new_len as f64;
    let skip = output_len(pad_l, ratio).min(new_len);
    let mut y: Vec<f64> = spec[skip..].iter().take(n_out).map(|c| c.re * inv).collect();
    y.resize(n_out, 0.0);
    y
}
