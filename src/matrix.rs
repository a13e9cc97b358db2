//! Channel × window score matrix with per-cell status.
//!
//! Every score is either a finite non-negative number or exactly
//! [`INVALID_SCORE`]; the latter only ever appears together with
//! [`CellStatus::Failed`].  NaN never leaves this module.
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Score stored in cells that have no value.
pub const INVALID_SCORE: f64 = -1.0;

/// Outcome of one (channel, window) cell.
///
/// When several conditions hold the most fundamental one is reported:
/// `Failed > LowRank > IllConditioned > Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CellStatus {
    Ok = 0,
    /// Value retained, eigen-structure unreliable.
    IllConditioned = 1,
    /// Value retained, window regression was rank deficient.
    LowRank = 2,
    /// No value; score is [`INVALID_SCORE`].
    Failed = 3,
}

impl CellStatus {
    /// Whether the cell takes part in aggregate statistics.
    #[inline]
    pub fn is_usable(self) -> bool {
        self == CellStatus::Ok
    }

    /// Whether the cell carries a score at all.
    #[inline]
    pub fn has_value(self) -> bool {
        self != CellStatus::Failed
    }

    /// The more severe of two statuses.
    #[inline]
    pub fn worst(self, other: CellStatus) -> CellStatus {
        self.max(other)
    }
}

/// `[C, N_windows]` scores plus status flags and axis labels.
#[derive(Debug, Clone, PartialEq)]
pub struct FragilityMatrix {
    scores: Array2<f64>,
    status: Array2<CellStatus>,
    ch_names: Vec<String>,
    window_starts: Vec<usize>,
    winsize: usize,
    sfreq: f64,
}

impl FragilityMatrix {
    /// Assemble a matrix, enforcing the score/status invariant: failed cells
    /// get [`INVALID_SCORE`], and a non-finite or negative score in any other
    /// cell turns it into a failed cell.
    pub(crate) fn new(
        mut scores: Array2<f64>,
        mut status: Array2<CellStatus>,
        ch_names: Vec<String>,
        window_starts: Vec<usize>,
        winsize: usize,
        sfreq: f64,
    ) -> Self {
        debug_assert_eq!(scores.dim(), status.dim());
        debug_assert_eq!(scores.nrows(), ch_names.len());
        debug_assert_eq!(scores.ncols(), window_starts.len());
        ndarray::Zip::from(&mut scores).and(&mut status).for_each(|v, st| {
            if *st == CellStatus::Failed || !v.is_finite() || *v < 0.0 {
                *st = CellStatus::Failed;
                *v = INVALID_SCORE;
            }
        });
        Self { scores, status, ch_names, window_starts, winsize, sfreq }
    }

    /// Same labels and status, new scores (used by the normaliser).
    pub(crate) fn with_scores(&self, scores: Array2<f64>) -> Self {
        Self::new(
            scores,
            self.status.clone(),
            self.ch_names.clone(),
            self.window_starts.clone(),
            self.winsize,
            self.sfreq,
        )
    }

    #[inline]
    pub fn scores(&self) -> &Array2<f64> {
        &self.scores
    }

    #[inline]
    pub fn status(&self) -> &Array2<CellStatus> {
        &self.status
    }

    #[inline]
    pub fn ch_names(&self) -> &[String] {
        &self.ch_names
    }

    /// First sample of each window.
    #[inline]
    pub fn window_starts(&self) -> &[usize] {
        &self.window_starts
    }

    #[inline]
    pub fn winsize(&self) -> usize {
        self.winsize
    }

    #[inline]
    pub fn sfreq(&self) -> f64 {
        self.sfreq
    }

    /// `(n_channels, n_windows)`.
    #[inline]
    pub fn dim(&self) -> (usize, usize) {
        self.scores.dim()
    }

    /// Window onsets in seconds.
    pub fn window_times(&self) -> Vec<f64> {
        self.window_starts.iter().map(|&s| s as f64 / self.sfreq).collect()
    }

    /// Score of one cell, `None` when it has no value.
    pub fn get(&self, channel: usize, window: usize) -> Option<f64> {
        let st = *self.status.get((channel, window))?;
        st.has_value().then(|| self.scores[[channel, window]])
    }

    /// Scores of one channel across windows.
    pub fn channel(&self, channel: usize) -> ArrayView1<'_, f64> {
        self.scores.row(channel)
    }

    /// Scores of one window across channels.
    pub fn window(&self, window: usize) -> ArrayView1<'_, f64> {
        self.scores.column(window)
    }

    /// Number of cells with each status, indexed by `CellStatus as usize`.
    pub fn status_counts(&self) -> [usize; 4] {
        let mut counts = [0usize; 4];
        for &st in &self.status {
            counts[st as usize] += 1;
        }
        counts
    }

    /// Windows in which at least one channel has a value.
    pub fn valid_windows(&self) -> Array1<bool> {
        self.status.map_axis(Axis(0), |col| col.iter().any(|s| s.has_value()))
    }

    /// Per-channel mean over usable cells; `None` for channels without any.
    pub fn channel_means(&self) -> Vec<Option<f64>> {
        self.scores
            .outer_iter()
            .zip(self.status.outer_iter())
            .map(|(row, st)| {
                let (sum, n) = row
                    .iter()
                    .zip(st.iter())
                    .filter(|(_, s)| s.is_usable())
                    .fold((0.0, 0usize), |(acc, n), (v, _)| (acc + v, n + 1));
                (n > 0).then(|| sum / n as f64)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(c: usize) -> Vec<String> {
        (0..c).map(|i| format!("ch{i}")).collect()
    }

    #[test]
    fn non_finite_scores_become_failed_cells() {
        let mut scores = Array2::from_elem((2, 3), 0.5);
        scores[[0, 1]] = f64::NAN;
        scores[[1, 2]] = f64::INFINITY;
        let status = Array2::from_elem((2, 3), CellStatus::Ok);
        let m = FragilityMatrix::new(scores, status, labels(2), vec![0, 10, 20], 10, 100.0);
        assert_eq!(m.status()[[0, 1]], CellStatus::Failed);
        assert_eq!(m.scores()[[0, 1]], INVALID_SCORE);
        assert_eq!(m.get(1, 2), None);
        assert_eq!(m.get(0, 0), Some(0.5));
        assert!(m.scores().iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn status_precedence() {
        assert_eq!(CellStatus::LowRank.worst(CellStatus::IllConditioned), CellStatus::LowRank);
        assert_eq!(CellStatus::Ok.worst(CellStatus::Failed), CellStatus::Failed);
        assert!(!CellStatus::LowRank.is_usable());
        assert!(CellStatus::LowRank.has_value());
    }

    #[test]
    fn channel_means_skip_flagged_cells() {
        let scores = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 100.0, 4.0, 4.0, 4.0]).unwrap();
        let mut status = Array2::from_elem((2, 3), CellStatus::Ok);
        status[[0, 2]] = CellStatus::LowRank;
        let m = FragilityMatrix::new(scores, status, labels(2), vec![0, 5, 10], 10, 10.0);
        assert_eq!(m.channel_means(), vec![Some(1.5), Some(4.0)]);
        assert_eq!(m.status_counts(), [5, 0, 1, 0]);
        assert_eq!(m.window_times(), vec![0.0, 0.5, 1.0]);
    }
}
