//! Overlapping fixed-length windowing.
//!
//! Splits `[0, T)` into windows of `winsize` samples whose starts advance by
//! `stepsize`, dropping any trailing incomplete window:
//!
//! ```text
//! n_windows = floor((T - winsize) / stepsize) + 1
//! ```
use ndarray::{s, ArrayView2};

use crate::error::{FragilityError, Result};

/// One analysis window: samples `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Position in the window sequence.
    pub index: usize,
    /// First sample.
    pub start: usize,
    /// Number of samples.
    pub len: usize,
}

impl Window {
    /// One past the last sample.
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    /// View of this window in `data` ([C, T]).
    pub fn slice<'a>(&self, data: &'a ArrayView2<'_, f64>) -> ArrayView2<'a, f64> {
        data.slice(s![.., self.start..self.end()])
    }

    #[inline]
    pub fn center_sample(&self) -> usize {
        self.start + self.len / 2
    }

    /// Window onset in seconds.
    #[inline]
    pub fn onset_secs(&self, sfreq: f64) -> f64 {
        self.start as f64 / sfreq
    }
}

/// Segment `n_samples` samples into overlapping windows.
///
/// Requires `0 < stepsize <= winsize <= n_samples`.
pub fn segment(n_samples: usize, winsize: usize, stepsize: usize) -> Result<Vec<Window>> {
    if winsize == 0 || stepsize == 0 {
        return Err(FragilityError::invalid("winsize and stepsize must be > 0"));
    }
    if stepsize > winsize {
        return Err(FragilityError::invalid(format!(
            "stepsize {stepsize} exceeds winsize {winsize}"
        )));
    }
    if winsize > n_samples {
        return Err(FragilityError::invalid(format!(
            "winsize {winsize} exceeds signal length {n_samples}"
        )));
    }

    let n_windows = (n_samples - winsize) / stepsize + 1;
    Ok((0..n_windows)
        .map(|index| Window { index, start: index * stepsize, len: winsize })
        .collect())
}
