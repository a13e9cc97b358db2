//! Minimum-norm structured perturbation of a transition matrix.
//!
//! For a target eigenvalue `λ* = r·e^{iω}` and `M = A − λ*I`, the matrix
//! determinant lemma gives
//!
//! ```text
//! column k:  det(M + Γ e_kᵀ) = det(M) · (1 + e_kᵀ M⁻¹ Γ)    c = (M⁻¹)ᵀ e_k
//! row k:     det(M + e_k Γᵀ) = det(M) · (1 + Γᵀ M⁻¹ e_k)    c = M⁻¹ e_k
//! ```
//!
//! so `A + Δ` has eigenvalue `λ*` iff `cᵀΓ = −1`.  Splitting into real and
//! imaginary parts, `B = [Re cᵀ; Im cᵀ]`, the real minimum-norm solution is
//!
//! ```text
//! Γ = Bᵀ (B Bᵀ)⁻¹ [−1, 0]ᵀ        (‖Γ‖ = 1/‖c‖ when Im c = 0)
//! ```
//!
//! A channel's fragility is the smallest `‖Γ‖` over `search_num` angles
//! `ω ∈ [0, π]`; conjugate targets give the same norm.  The resolvent
//! `M⁻¹` is computed once per target and shared by all channels.
use std::f64::consts::PI;

use nalgebra::{Complex, DMatrix, DVector};

use crate::config::{FragilityConfig, PerturbationType};
use crate::lds::TransitionModel;

/// `‖Im c‖² <= IMAG_TOL · ‖Re c‖²` is treated as a real resolvent column.
const IMAG_TOL: f64 = 1e-24;

/// `det(BBᵀ) <= COLLINEAR_TOL · ‖Re c‖²‖Im c‖²`: no real solution exists.
const COLLINEAR_TOL: f64 = 1e-12;

/// Search parameters shared by every channel of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverParams {
    pub perturbation: PerturbationType,
    /// Radius of the target circle.
    pub radius: f64,
    /// Number of angles in `[0, π]`.
    pub search_num: usize,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self { perturbation: PerturbationType::Column, radius: 1.0, search_num: 51 }
    }
}

impl From<&FragilityConfig> for SolverParams {
    fn from(cfg: &FragilityConfig) -> Self {
        Self { perturbation: cfg.perturbation, radius: cfg.radius, search_num: cfg.search_num }
    }
}

/// Minimum-norm perturbation for one channel of one window.
#[derive(Debug, Clone)]
pub struct PerturbationResult {
    pub channel: usize,
    /// `‖Γ‖₂`; `None` when no target admitted a finite real solution.
    pub min_norm: Option<f64>,
    /// Perturbation vector `Γ` (length `C·order`); zeros when `min_norm` is `None`.
    pub delta: DVector<f64>,
    /// Target eigenvalue reached by `A + Δ`.
    pub target: Complex<f64>,
    pub perturbation: PerturbationType,
    /// The value is unreliable: repeated eigenvalues, no spectrum, or no
    /// feasible target.  Kept in raw output, excluded from aggregates.
    pub ill_conditioned: bool,
}

impl PerturbationResult {
    /// The full perturbation matrix `Δ` ([n, n]).
    pub fn delta_matrix(&self) -> DMatrix<f64> {
        let n = self.delta.len();
        let mut d = DMatrix::zeros(n, n);
        match self.perturbation {
            PerturbationType::Column => d.set_column(self.channel, &self.delta),
            PerturbationType::Row => d.set_row(self.channel, &self.delta.transpose()),
        }
        d
    }
}

/// The `k`-th of `n` target points on the upper half circle of `radius`.
///
/// The end points are exactly `+radius` and `−radius`.
pub fn target_point(radius: f64, k: usize, n: usize) -> Complex<f64> {
    if k == 0 || n <= 1 {
        return Complex::new(radius, 0.0);
    }
    if k == n - 1 {
        return Complex::new(-radius, 0.0);
    }
    Complex::from_polar(radius, PI * k as f64 / (n - 1) as f64)
}

/// `(A − λI)⁻¹`, or `None` if `λ` is (numerically) an eigenvalue of `A`.
fn resolvent(a: &DMatrix<f64>, target: Complex<f64>) -> Option<DMatrix<Complex<f64>>> {
    let n = a.nrows();
    let m = DMatrix::from_fn(n, n, |i, j| {
        let v = Complex::new(a[(i, j)], 0.0);
        if i == j {
            v - target
        } else {
            v
        }
    });
    let inv = m.lu().try_inverse()?;
    inv.iter().all(|z| z.re.is_finite() && z.im.is_finite()).then_some(inv)
}

/// Real minimum-norm `Γ` with `cᵀΓ = −1`.
fn min_norm_from_resolvent(
    inv: &DMatrix<Complex<f64>>,
    channel: usize,
    perturbation: PerturbationType,
) -> Option<(f64, DVector<f64>)> {
    let c: DVector<Complex<f64>> = match perturbation {
        PerturbationType::Column => inv.row(channel).transpose(),
        PerturbationType::Row => inv.column(channel).into_owned(),
    };
    let re = c.map(|z| z.re);
    let im = c.map(|z| z.im);
    let rr = re.norm_squared();
    let ii = im.norm_squared();
    let ri = re.dot(&im);

    let gamma = if ii <= IMAG_TOL * rr {
        if rr == 0.0 {
            return None;
        }
        -&re / rr
    } else {
        let det = rr * ii - ri * ri;
        if det <= COLLINEAR_TOL * rr * ii {
            return None;
        }
        (&im * ri - &re * ii) / det
    };

    let norm = gamma.norm();
    norm.is_finite().then_some((norm, gamma))
}

/// Minimum-norm perturbation of `channel` that places `target` in the
/// spectrum of `a`.  `None` if no real perturbation of that structure exists.
pub fn min_norm_for_target(
    a: &DMatrix<f64>,
    channel: usize,
    target: Complex<f64>,
    perturbation: PerturbationType,
) -> Option<(f64, DVector<f64>)> {
    match resolvent(a, target) {
        Some(inv) => min_norm_from_resolvent(&inv, channel, perturbation),
        None => Some((0.0, DVector::zeros(a.nrows()))),
    }
}

/// Solve for a single channel.
pub fn solve(model: &TransitionModel, channel: usize, params: &SolverParams) -> PerturbationResult {
    search(model, &[channel], params).pop().unwrap_or_else(|| empty_result(model, channel, params))
}

/// Solve for channels `0..n_channels` (the first block of the state).
pub fn solve_all(
    model: &TransitionModel,
    n_channels: usize,
    params: &SolverParams,
) -> Vec<PerturbationResult> {
    let channels: Vec<usize> = (0..n_channels).collect();
    search(model, &channels, params)
}

/// Like [`solve_all`], checking `keep_going` before every target angle.
/// Returns `None` as soon as it yields `false`.
pub(crate) fn solve_all_while(
    model: &TransitionModel,
    n_channels: usize,
    params: &SolverParams,
    keep_going: impl Fn() -> bool,
) -> Option<Vec<PerturbationResult>> {
    let channels: Vec<usize> = (0..n_channels).collect();
    search_while(model, &channels, params, keep_going)
}

fn search(
    model: &TransitionModel,
    channels: &[usize],
    params: &SolverParams,
) -> Vec<PerturbationResult> {
    search_while(model, channels, params, || true).unwrap_or_default()
}

fn search_while(
    model: &TransitionModel,
    channels: &[usize],
    params: &SolverParams,
    keep_going: impl Fn() -> bool,
) -> Option<Vec<PerturbationResult>> {
    let n = model.state_dim();
    let mut best: Vec<Option<(f64, DVector<f64>, Complex<f64>)>> = vec![None; channels.len()];

    for k in 0..params.search_num {
        if !keep_going() {
            return None;
        }
        let target = target_point(params.radius, k, params.search_num);
        let inv = resolvent(&model.a, target);
        for (slot, &ch) in best.iter_mut().zip(channels) {
            let found = match &inv {
                Some(inv) => min_norm_from_resolvent(inv, ch, params.perturbation),
                None => Some((0.0, DVector::zeros(n))),
            };
            if let Some((norm, delta)) = found {
                if slot.as_ref().map_or(true, |(b, _, _)| norm < *b) {
                    *slot = Some((norm, delta, target));
                }
            }
        }
    }

    let unreliable = model.eigenvalues.is_none() || model.has_repeated_eigenvalue();
    Some(
        best.into_iter()
            .zip(channels)
            .map(|(slot, &channel)| match slot {
                Some((norm, delta, target)) => PerturbationResult {
                    channel,
                    min_norm: Some(norm),
                    delta,
                    target,
                    perturbation: params.perturbation,
                    ill_conditioned: unreliable,
                },
                None => empty_result(model, channel, params),
            })
            .collect(),
    )
}

fn empty_result(
    model: &TransitionModel,
    channel: usize,
    params: &SolverParams,
) -> PerturbationResult {
    PerturbationResult {
        channel,
        min_norm: None,
        delta: DVector::zeros(model.state_dim()),
        target: Complex::new(params.radius, 0.0),
        perturbation: params.perturbation,
        ill_conditioned: true,
    }
}
