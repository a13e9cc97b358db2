//! Linear-phase FIR band-pass design (Hamming-windowed sinc).
//!
//! Transition bandwidths and filter length follow MNE's `'auto'` rules:
//!   • lower edge:  min(max(0.25 · l_freq, 2), l_freq)
//!   • upper edge:  min(max(0.25 · h_freq, 2), nyquist − h_freq)
//!   • length N:    ceil(3.3 / min(trans_bw) · sfreq), rounded up to odd
//!
//! Each cutoff sits at the middle of its transition band.  The band-pass is
//! `lowpass(h_cut) − lowpass(l_cut)`; a missing edge degrades to a pure
//! highpass (spectral inversion) or lowpass.
//!
//! The line-noise notch removes every harmonic of the line frequency below
//! Nyquist.  Each stop band is `f/200` wide with 1 Hz transitions:
//!   h = δ − Σ_f [lowpass(f + w/2 + tb/2) − lowpass(f − w/2 − tb/2)]
use std::f64::consts::PI;

use log::{debug, warn};

/// Transition bandwidth of each notch, in Hz.
pub const NOTCH_TRANS_BANDWIDTH: f64 = 1.0;

/// Gap kept between a clamped upper edge and Nyquist, in Hz.
const NYQUIST_MARGIN: f64 = 1.0;

/// Lower-edge transition bandwidth.
pub fn lower_trans_bandwidth(l_freq: f64) -> f64 {
    (0.25 * l_freq).max(2.0).min(l_freq)
}

/// Upper-edge transition bandwidth.
pub fn upper_trans_bandwidth(h_freq: f64, sfreq: f64) -> f64 {
    (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq)
}

/// Number of taps for transition bandwidth `trans_bw`, always odd.
pub fn auto_filter_length(trans_bw: f64, sfreq: f64) -> usize {
    let n = (3.3 / trans_bw * sfreq).ceil() as usize;
    n | 1
}

/// Design a zero-phase band-pass, highpass (`h_freq = None`) or lowpass
/// (`l_freq = None`) FIR filter.  Returns `None` when both edges are absent
/// or dropped.
///
/// An `h_freq` at or above Nyquist is clamped to `nyquist − 1` Hz with a
/// warning.  A non-positive `l_freq`, or an `h_freq` that ends up at or below
/// zero or `l_freq`, is dropped.
pub fn design_bandpass(
    l_freq: Option<f64>,
    h_freq: Option<f64>,
    sfreq: f64,
) -> Option<Vec<f64>> {
    let nyq = sfreq / 2.0;
    let l_freq = l_freq.filter(|&l| {
        let ok = l > 0.0 && l < nyq;
        if !ok {
            warn!("l_freq {l} Hz outside (0, {nyq}) Hz, highpass skipped");
        }
        ok
    });
    let h_freq = h_freq
        .map(|h| {
            if h >= nyq {
                let clamped = nyq - NYQUIST_MARGIN;
                warn!("h_freq {h} Hz at or above Nyquist {nyq} Hz, clamped to {clamped} Hz");
                clamped
            } else {
                h
            }
        })
        .filter(|&h| {
            let ok = h > 0.0 && l_freq.map_or(true, |l| h > l);
            if !ok {
                warn!("h_freq {h} Hz not above l_freq {l_freq:?} Hz, lowpass skipped");
            }
            ok
        });

    let l_tb = l_freq.map(lower_trans_bandwidth);
    let h_tb = h_freq.map(|h| upper_trans_bandwidth(h, sfreq));
    let trans_bw = match (l_tb, h_tb) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return None,
    };
    let n = auto_filter_length(trans_bw, sfreq);

    let mut h = match h_freq.zip(h_tb) {
        Some((h, tb)) => firwin(n, h + tb / 2.0, sfreq),
        None => impulse(n),
    };
    if let Some((l, tb)) = l_freq.zip(l_tb) {
        let lp = firwin(n, l - tb / 2.0, sfreq);
        h.iter_mut().zip(&lp).for_each(|(v, &w)| *v -= w);
    }
    Some(h)
}

/// Design a notch at `line_freq` and each of its harmonics below Nyquist.
///
/// Returns `None` when `line_freq` is not positive or no harmonic fits under
/// Nyquist.
pub fn design_notch(line_freq: f64, sfreq: f64) -> Option<Vec<f64>> {
    let nyq = sfreq / 2.0;
    if !(line_freq > 0.0) {
        warn!("line_freq {line_freq} Hz is not positive, notch skipped");
        return None;
    }
    let tb = NOTCH_TRANS_BANDWIDTH;
    let bands: Vec<(f64, f64)> = (1..)
        .map(|k| k as f64 * line_freq)
        .map(|f| {
            let half = f / 400.0 + tb / 2.0;
            (f - half, f + half)
        })
        .take_while(|&(_, hi)| hi < nyq)
        .collect();
    if bands.is_empty() {
        warn!("line_freq {line_freq} Hz has no harmonic below Nyquist {nyq} Hz, notch skipped");
        return None;
    }

    let n = auto_filter_length(tb, sfreq);
    debug!("notch at {} harmonics of {line_freq} Hz, {n} taps", bands.len());
    let mut h = impulse(n);
    for (lo, hi) in bands {
        let upper = firwin(n, hi, sfreq);
        let lower = firwin(n, lo, sfreq);
        for ((v, &u), &l) in h.iter_mut().zip(&upper).zip(&lower) {
            *v -= u - l;
        }
    }
    Some(h)
}

/// Lowpass FIR of odd length `n`, normalised to unit DC gain.
/// `cutoff_hz` is the −6 dB point.
pub fn firwin(n: usize, cutoff_hz: f64, sfreq: f64) -> Vec<f64> {
    debug_assert!(n % 2 == 1, "linear-phase design needs odd length");
    let alpha = (n - 1) as f64 / 2.0;
    let fc = cutoff_hz / (sfreq / 2.0);
    let win = hamming(n);

    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            sinc * win[i]
        })
        .collect();
    let s: f64 = h.iter().sum();
    h.iter_mut().for_each(|v| *v /= s);
    h
}

/// Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Unit impulse at the centre of an odd-length kernel.
fn impulse(n: usize) -> Vec<f64> {
    let mut h = vec![0.0; n];
    h[n / 2] = 1.0;
    h
}
