//! Validated multichannel input signal.
//!
//! `data`: [C, T] in original units.  A [`Signal`] is immutable once built and
//! is shared by reference with every worker of a run.
use std::collections::HashSet;

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{FragilityError, Result};

#[derive(Debug, Clone)]
pub struct Signal {
    data: Array2<f64>,
    sfreq: f64,
    ch_names: Vec<String>,
}

impl Signal {
    /// Build a signal, checking shape, names and finiteness upfront.
    pub fn new(data: Array2<f64>, sfreq: f64, ch_names: Vec<String>) -> Result<Self> {
        let (n_ch, n_t) = data.dim();
        if n_ch == 0 || n_t == 0 {
            return Err(FragilityError::invalid(format!("empty signal of shape [{n_ch}, {n_t}]")));
        }
        if ch_names.len() != n_ch {
            return Err(FragilityError::invalid(format!(
                "channel count mismatch: {} names for {n_ch} rows",
                ch_names.len()
            )));
        }
        let mut seen = HashSet::with_capacity(n_ch);
        for name in &ch_names {
            if !seen.insert(name.as_str()) {
                return Err(FragilityError::invalid(format!("duplicate channel name {name:?}")));
            }
        }
        if !sfreq.is_finite() || sfreq <= 0.0 {
            return Err(FragilityError::invalid(format!("sampling rate must be > 0, got {sfreq}")));
        }
        if let Some(((c, t), v)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(FragilityError::invalid(format!(
                "non-finite sample {v} at channel {} ({c}), sample {t}",
                ch_names[c]
            )));
        }
        Ok(Self { data, sfreq, ch_names })
    }

    /// Build a signal with generated names `ch0, ch1, …`.
    pub fn from_array(data: Array2<f64>, sfreq: f64) -> Result<Self> {
        let names = (0..data.nrows()).map(|i| format!("ch{i}")).collect();
        Self::new(data, sfreq, names)
    }

    #[inline]
    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    #[inline]
    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    #[inline]
    pub fn ch_names(&self) -> &[String] {
        &self.ch_names
    }

    #[inline]
    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Mean of `x²` over all channels and samples.
    pub fn mean_power(&self) -> f64 {
        self.data.iter().map(|&v| v * v).sum::<f64>() / self.data.len() as f64
    }

    /// Position of `name`, matched case-insensitively and ignoring spaces.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        let key = normalize_name(name);
        self.ch_names.iter().position(|n| normalize_name(n) == key)
    }

    /// Return a copy without the listed channels.
    ///
    /// Names not present are skipped.  Dropping every channel is an error.
    pub fn drop_channels(&self, names: &[String]) -> Result<Self> {
        let drop: HashSet<usize> = names.iter().filter_map(|n| self.channel_index(n)).collect();
        if drop.is_empty() {
            return Ok(self.clone());
        }
        let keep: Vec<usize> = (0..self.n_channels()).filter(|i| !drop.contains(i)).collect();
        if keep.is_empty() {
            return Err(FragilityError::invalid("every channel was excluded"));
        }
        let data = self.data.select(Axis(0), &keep);
        let ch_names = keep.iter().map(|&i| self.ch_names[i].clone()).collect();
        Ok(Self { data, sfreq: self.sfreq, ch_names })
    }

    /// Replace the sample matrix, keeping names and rate (used after filtering).
    pub(crate) fn with_data(&self, data: Array2<f64>) -> Result<Self> {
        Self::new(data, self.sfreq, self.ch_names.clone())
    }
}

/// Lowercase and strip spaces.
pub(crate) fn normalize_name(s: &str) -> String {
    s.replace(' ', "").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("A{i}")).collect()
    }

    #[test]
    fn rejects_name_count_mismatch() {
        let data = Array2::zeros((3, 10));
        assert!(Signal::new(data, 100.0, names(2)).is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let data = Array2::zeros((2, 10));
        let err = Signal::new(data, 100.0, vec!["A1".into(), "A1".into()]);
        assert!(matches!(err, Err(FragilityError::InvalidParameter(_))));
    }

    #[test]
    fn rejects_non_finite_samples() {
        let mut data = Array2::zeros((2, 10));
        data[[1, 4]] = f64::NAN;
        assert!(Signal::new(data, 100.0, names(2)).is_err());
    }

    #[test]
    fn drop_channels_matches_loosely() {
        let data = Array2::from_shape_fn((3, 5), |(c, _)| c as f64);
        let names = vec!["LA 1".into(), "LA2".into(), "RB1".into()];
        let sig = Signal::new(data, 100.0, names).unwrap();
        let out = sig.drop_channels(&["la1".into(), "missing".into()]).unwrap();
        assert_eq!(out.ch_names(), &["LA2".to_string(), "RB1".to_string()]);
        assert_eq!(out.data()[[0, 0]], 1.0);
        assert_eq!(out.data()[[1, 0]], 2.0);
    }

    #[test]
    fn drop_all_channels_is_error() {
        let sig = Signal::new(Array2::zeros((1, 5)), 100.0, names(1)).unwrap();
        assert!(sig.drop_channels(&["A0".into()]).is_err());
    }
}
