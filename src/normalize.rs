//! Rescaling and ranking of fragility matrices.
//!
//! `normalize` — min-max to `[0, 1]` per channel, per window or globally:
//!   y = (x − min) / (max − min),   min/max over usable cells of the group
//!
//! `fragility_heatmap` — per window, the smallest minimum norm is the most
//! fragile channel:
//!   y = (max − x) / max
//!
//! `rank_channels` — channels ordered by mean usable score, highest first.
//! Feed it fragility (the heatmap, or a normalisation of it), not raw
//! minimum norms, so the most fragile channel comes first.
use ndarray::{Array2, ArrayView1, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::matrix::{CellStatus, FragilityMatrix};

/// Grouping used by [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    /// Each channel (row) independently.
    PerChannel,
    /// Each window (column) independently.
    PerWindow,
    /// One min/max over the whole matrix.
    Global,
}

impl std::str::FromStr for NormalizeMode {
    type Err = crate::FragilityError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "channel" | "perchannel" | "per-channel" => Ok(NormalizeMode::PerChannel),
            "window" | "perwindow" | "per-window" => Ok(NormalizeMode::PerWindow),
            "global" | "matrix" => Ok(NormalizeMode::Global),
            other => {
                Err(crate::FragilityError::invalid(format!("unknown normalize mode {other:?}")))
            }
        }
    }
}

/// Min-max rescale to `[0, 1]`.
///
/// Bounds come from usable cells only; flagged cells with a value go through
/// the same map and are clamped; failed cells keep the sentinel.  A group
/// whose usable cells are all equal maps to `0`.  Applying the same mode
/// twice gives the same matrix.
pub fn normalize(m: &FragilityMatrix, mode: NormalizeMode) -> FragilityMatrix {
    let mut out = m.scores().clone();
    match mode {
        NormalizeMode::PerChannel => {
            for (mut row, st) in out.outer_iter_mut().zip(m.status().outer_iter()) {
                let (lo, hi) = usable_bounds(row.view(), st);
                row.mapv_inplace(|v| rescale(v, lo, hi));
            }
        }
        NormalizeMode::PerWindow => {
            for (mut col, st) in out.axis_iter_mut(Axis(1)).zip(m.status().axis_iter(Axis(1))) {
                let (lo, hi) = usable_bounds(col.view(), st);
                col.mapv_inplace(|v| rescale(v, lo, hi));
            }
        }
        NormalizeMode::Global => {
            let (lo, hi) = usable_bounds_2d(m.scores(), m.status());
            out.mapv_inplace(|v| rescale(v, lo, hi));
        }
    }
    restore_failed(&mut out, m.status());
    m.with_scores(out)
}

/// Per-window inversion `(max − x) / max`: 1 marks the most fragile channel.
///
/// `max` is taken over usable cells of the window.  Windows whose maximum is
/// zero map to `0`.
pub fn fragility_heatmap(m: &FragilityMatrix) -> FragilityMatrix {
    let mut out = m.scores().clone();
    for (mut col, st) in out.axis_iter_mut(Axis(1)).zip(m.status().axis_iter(Axis(1))) {
        let (_, hi) = usable_bounds(col.view(), st);
        col.mapv_inplace(|v| match hi {
            Some(hi) if hi > 0.0 => ((hi - v) / hi).clamp(0.0, 1.0),
            _ => 0.0,
        });
    }
    restore_failed(&mut out, m.status());
    m.with_scores(out)
}

/// A channel's aggregate score.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRank {
    pub channel: usize,
    pub name: String,
    /// Mean over usable cells; `None` if the channel has none.
    pub mean: Option<f64>,
    /// Usable cells that went into `mean`.
    pub n_usable: usize,
}

/// Channels sorted by mean usable score, highest first; channels without
/// usable cells come last, in channel order.
///
/// `m` must be oriented so that larger means more fragile, as produced by
/// [`fragility_heatmap`].  On a raw minimum-norm matrix the order is
/// reversed.
pub fn rank_channels(m: &FragilityMatrix) -> Vec<ChannelRank> {
    let means = m.channel_means();
    let mut ranks: Vec<ChannelRank> = means
        .into_iter()
        .enumerate()
        .map(|(channel, mean)| ChannelRank {
            channel,
            name: m.ch_names()[channel].clone(),
            mean,
            n_usable: m.status().row(channel).iter().filter(|s| s.is_usable()).count(),
        })
        .collect();
    ranks.sort_by(|a, b| match (a.mean, b.mean) {
        (Some(x), Some(y)) => y.total_cmp(&x).then(a.channel.cmp(&b.channel)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.channel.cmp(&b.channel),
    });
    ranks
}

type Bounds = (Option<f64>, Option<f64>);

fn usable_bounds(values: ArrayView1<'_, f64>, status: ArrayView1<'_, CellStatus>) -> Bounds {
    values
        .iter()
        .zip(status.iter())
        .filter(|(_, s)| s.is_usable())
        .fold((None, None), |(lo, hi), (&v, _)| (min_opt(lo, v), max_opt(hi, v)))
}

fn usable_bounds_2d(values: &Array2<f64>, status: &Array2<CellStatus>) -> Bounds {
    values
        .iter()
        .zip(status.iter())
        .filter(|(_, s)| s.is_usable())
        .fold((None, None), |(lo, hi), (&v, _)| (min_opt(lo, v), max_opt(hi, v)))
}

fn min_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.min(v)))
}

fn max_opt(acc: Option<f64>, v: f64) -> Option<f64> {
    Some(acc.map_or(v, |a| a.max(v)))
}

fn rescale(v: f64, lo: Option<f64>, hi: Option<f64>) -> f64 {
    match (lo, hi) {
        (Some(lo), Some(hi)) if hi > lo => ((v - lo) / (hi - lo)).clamp(0.0, 1.0),
        // Constant group, or no usable reference at all.
        _ => 0.0,
    }
}

/// Failed cells go back to the sentinel; `FragilityMatrix::new` enforces it
/// again, this keeps the intermediate array honest.
fn restore_failed(out: &mut Array2<f64>, status: &Array2<CellStatus>) {
    Zip::from(out).and(status).for_each(|v, &st| {
        if st == CellStatus::Failed {
            *v = crate::INVALID_SCORE;
        }
    });
}
