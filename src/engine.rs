//! Windowed, parallel fragility estimation.
//!
//! # Algorithm
//! 1. Validate the configuration against the signal, resolve the penalty.
//! 2. Segment `[0, T)` into overlapping windows.
//! 3. For every window, independently and in parallel:
//!    re-reference a copy → fit the LDS → solve the minimum-norm
//!    perturbation of every channel.
//! 4. Collect the window results in start order and assemble the
//!    [`FragilityMatrix`] in a single step.
//!
//! A window whose fit fails is recorded as failed and the run continues; the
//! run itself fails only on invalid input, cancellation, or when no window
//! could be fitted.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use ndarray::{Array2, Array3, ArrayView2};
use rayon::prelude::*;

use crate::config::{FragilityConfig, ReferenceScheme};
use crate::error::{FragilityError, Result};
use crate::lds::{self, TransitionModel};
use crate::matrix::{CellStatus, FragilityMatrix, INVALID_SCORE};
use crate::perturbation::{self, PerturbationResult, SolverParams};
use crate::reference;
use crate::signal::Signal;
use crate::window::{self, Window};

/// Shared cancellation flag.  Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything computed for one window.
#[derive(Debug, Clone)]
pub struct WindowResult {
    pub window: Window,
    /// `None` when the fit failed.
    pub model: Option<TransitionModel>,
    /// One entry per channel; empty when the fit failed.
    pub perturbations: Vec<PerturbationResult>,
    /// Reason the fit failed.
    pub failure: Option<String>,
}

impl WindowResult {
    /// A window whose fit failed with `reason`.
    pub fn failed(window: Window, reason: impl Into<String>) -> Self {
        Self { window, model: None, perturbations: vec![], failure: Some(reason.into()) }
    }

    /// Status of `channel` in this window.
    pub fn cell_status(&self, channel: usize) -> CellStatus {
        let Some(model) = &self.model else {
            return CellStatus::Failed;
        };
        let Some(p) = self.perturbations.get(channel) else {
            return CellStatus::Failed;
        };
        if p.min_norm.is_none() {
            return CellStatus::Failed;
        }
        let mut st = CellStatus::Ok;
        if model.diagnostics.low_rank {
            st = st.worst(CellStatus::LowRank);
        }
        if p.ill_conditioned {
            st = st.worst(CellStatus::IllConditioned);
        }
        st
    }
}

/// Output of one run.
#[derive(Debug, Clone)]
pub struct FragilityRun {
    pub matrix: FragilityMatrix,
    /// One entry per window, in start order.
    pub windows: Vec<WindowResult>,
    /// Penalty applied to every window.
    pub l2penalty: f64,
    pub config: FragilityConfig,
}

impl FragilityRun {
    /// Fitted models by window index (`None` for failed windows).
    pub fn models(&self) -> Vec<Option<&TransitionModel>> {
        self.windows.iter().map(|w| w.model.as_ref()).collect()
    }

    /// Per-channel perturbations of one window.
    pub fn perturbations(&self, window: usize) -> &[PerturbationResult] {
        self.windows.get(window).map_or(&[], |w| w.perturbations.as_slice())
    }

    /// Which windows produced a model.
    pub fn valid_windows(&self) -> Vec<bool> {
        self.windows.iter().map(|w| w.model.is_some()).collect()
    }

    /// `[N_windows, n, n]` transition matrices; failed windows are zero-filled
    /// (see [`valid_windows`](Self::valid_windows)).
    pub fn state_array(&self) -> Array3<f64> {
        let n = self.state_dim();
        let mut out = Array3::zeros((self.windows.len(), n, n));
        for (w, res) in self.windows.iter().enumerate() {
            if let Some(model) = &res.model {
                for ((i, j), v) in out.index_axis_mut(ndarray::Axis(0), w).indexed_iter_mut() {
                    *v = model.a[(i, j)];
                }
            }
        }
        out
    }

    /// `[N_windows, C, n]` minimum-norm perturbation vectors; failed cells are
    /// zero-filled.
    pub fn delta_vectors(&self) -> Array3<f64> {
        let (n_ch, _) = self.matrix.dim();
        let n = self.state_dim();
        let mut out = Array3::zeros((self.windows.len(), n_ch, n));
        for (w, res) in self.windows.iter().enumerate() {
            for p in &res.perturbations {
                for (j, &v) in p.delta.iter().enumerate() {
                    out[[w, p.channel, j]] = v;
                }
            }
        }
        out
    }

    fn state_dim(&self) -> usize {
        self.matrix.dim().0 * self.config.order
    }
}

/// Orchestrates segmentation, fitting and perturbation over a signal.
#[derive(Debug, Clone)]
pub struct FragilityEngine {
    config: FragilityConfig,
}

impl FragilityEngine {
    pub fn new(config: FragilityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FragilityConfig {
        &self.config
    }

    pub fn run(&self, signal: &Signal) -> Result<FragilityRun> {
        self.run_with_cancel(signal, &CancelToken::new())
    }

    /// Run, abandoning all work as soon as `cancel` is set.
    pub fn run_with_cancel(&self, signal: &Signal, cancel: &CancelToken) -> Result<FragilityRun> {
        let cfg = &self.config;
        cfg.validate(signal.n_samples())?;

        let l2penalty = cfg.l2penalty.resolve(signal.mean_power());
        let windows = window::segment(signal.n_samples(), cfg.winsize, cfg.stepsize)?;
        info!(
            "fragility: {} ch × {} samples @ {} Hz, {} windows \
             (winsize={} step={} order={} λ={:e} {} {} {:?})",
            signal.n_channels(),
            signal.n_samples(),
            signal.sfreq(),
            windows.len(),
            cfg.winsize,
            cfg.stepsize,
            cfg.order,
            l2penalty,
            cfg.method,
            cfg.reference,
            cfg.perturbation,
        );

        let data = signal.data();
        let params = SolverParams::from(cfg);
        let job = |w: &Window| process_window(&data, *w, cfg, l2penalty, &params, cancel);

        let results: Result<Vec<WindowResult>> = match cfg.n_jobs {
            Some(1) => windows.iter().map(job).collect(),
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| FragilityError::ThreadPool(e.to_string()))?;
                pool.install(|| windows.par_iter().map(job).collect())
            }
            None => windows.par_iter().map(job).collect(),
        };
        let results = results?;

        let n_failed = count_failures(&results)?;
        if n_failed > 0 {
            warn!("{n_failed}/{} windows failed to fit", results.len());
        }

        let matrix = assemble(signal, &results, cfg.winsize);
        let [ok, ill, low, failed] = matrix.status_counts();
        info!("fragility: cells ok={ok} low_rank={low} ill_conditioned={ill} failed={failed}");

        Ok(FragilityRun { matrix, windows: results, l2penalty, config: cfg.clone() })
    }
}

/// Number of failed windows; an error when none was fitted.
fn count_failures(results: &[WindowResult]) -> Result<usize> {
    let n_failed = results.iter().filter(|r| r.model.is_none()).count();
    if n_failed == results.len() {
        return Err(FragilityError::AllWindowsFailed { n_windows: results.len() });
    }
    Ok(n_failed)
}

/// Fit and solve one window.  Only cancellation is an error here.
fn process_window(
    data: &ArrayView2<'_, f64>,
    w: Window,
    cfg: &FragilityConfig,
    l2penalty: f64,
    params: &SolverParams,
    cancel: &CancelToken,
) -> Result<WindowResult> {
    if cancel.is_cancelled() {
        return Err(FragilityError::Cancelled);
    }

    let referenced;
    let view = match cfg.reference {
        ReferenceScheme::Monopolar => w.slice(data),
        scheme => {
            referenced = reference::rereference(&w.slice(data), scheme);
            referenced.view()
        }
    };

    let model = match lds::fit_referenced(&view, cfg.order, l2penalty, cfg.method, cfg.reference) {
        Ok(model) => model,
        Err(e) => {
            warn!("window {} [{}..{}): fit failed: {e}", w.index, w.start, w.end());
            return Ok(WindowResult::failed(w, e.to_string()));
        }
    };

    if model.diagnostics.low_rank {
        debug!(
            "window {} [{}..{}): low rank ({}/{})",
            w.index,
            w.start,
            w.end(),
            model.diagnostics.rank,
            model.diagnostics.state_dim
        );
    }

    let n_ch = data.nrows();
    let perturbations =
        perturbation::solve_all_while(&model, n_ch, params, || !cancel.is_cancelled())
            .ok_or(FragilityError::Cancelled)?;

    debug!(
        "window {} [{}..{}): spectral radius {:.4}",
        w.index,
        w.start,
        w.end(),
        model.spectral_radius().unwrap_or(f64::NAN)
    );

    Ok(WindowResult { window: w, model: Some(model), perturbations, failure: None })
}

/// Single aggregation step: columns in window order.
fn assemble(signal: &Signal, results: &[WindowResult], winsize: usize) -> FragilityMatrix {
    let n_ch = signal.n_channels();
    let n_w = results.len();
    let mut scores = Array2::from_elem((n_ch, n_w), INVALID_SCORE);
    let mut status = Array2::from_elem((n_ch, n_w), CellStatus::Failed);

    for (col, res) in results.iter().enumerate() {
        for ch in 0..n_ch {
            let st = res.cell_status(ch);
            status[[ch, col]] = st;
            if let Some(v) = res.perturbations.get(ch).and_then(|p| p.min_norm) {
                scores[[ch, col]] = v;
            }
        }
    }

    let starts = results.iter().map(|r| r.window.start).collect();
    let names = signal.ch_names().to_vec();
    FragilityMatrix::new(scores, status, names, starts, winsize, signal.sfreq())
}
