//! Linear dynamical system fit for one window.
//!
//! # Model
//! ```text
//! z_t     = [x_t; x_{t-1}; …; x_{t-p+1}]        state, n = C·p
//! x_{t+1} ≈ Bᵀ z_t                              B: [n, C]
//! B       = argmin ‖Y − X·B‖² + λ‖B‖²           X: [m, n], Y: [m, C], m = W − p
//! ```
//! The transition matrix `A` ([n, n]) is the companion form of `Bᵀ`: its first
//! `C` rows are `Bᵀ`, and for `p > 1` identity blocks below the diagonal
//! shift every lag down by one.
//!
//! # Solvers
//! * [`SolveMethod::Pinv`]: `B = pinv([X; √λ·I]) · [Y; 0]`.
//! * [`SolveMethod::Direct`]: `(XᵀX + λI) B = XᵀY` via Cholesky, then LU.
//!   A singular or non-finite solve falls back to the pseudo-inverse and sets
//!   [`FitDiagnostics::solver_fallback`].
use log::warn;
use nalgebra::{Complex, DMatrix};
use ndarray::ArrayView2;

use crate::config::{ReferenceScheme, SolveMethod};
use crate::error::{FragilityError, Result};

/// Lower bound on the Schur iteration budget; scaled up with the state size.
const MIN_SCHUR_ITER: usize = 10_000;

/// Relative distance under which two eigenvalues count as repeated.
pub const REPEATED_EIGENVALUE_TOL: f64 = 1e-8;

/// Numerical facts about one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitDiagnostics {
    /// Numerical rank of the design matrix `X`.
    pub rank: usize,
    /// State dimension `n = C·order`.
    pub state_dim: usize,
    /// Regression samples `m = W − order`.
    pub n_samples: usize,
    /// Rank a full-rank window reaches under the applied reference: `n`, or
    /// `n − order` after a common-average reference.
    pub expected_rank: usize,
    /// `m < n + 1` or `rank < expected_rank`: the solution is carried by the
    /// penalty.
    pub low_rank: bool,
    /// The direct solve failed and the pseudo-inverse was used instead.
    pub solver_fallback: bool,
}

/// Fitted transition model of one window.
#[derive(Debug, Clone)]
pub struct TransitionModel {
    /// Companion transition matrix, [n, n].
    pub a: DMatrix<f64>,
    pub order: usize,
    pub n_channels: usize,
    /// Penalty actually applied.
    pub l2penalty: f64,
    /// Method that produced `a` (after any fallback).
    pub method: SolveMethod,
    pub diagnostics: FitDiagnostics,
    /// Eigenvalues of `a`; `None` if the Schur iteration did not converge.
    pub eigenvalues: Option<Vec<Complex<f64>>>,
    /// Zero eigenvalues forced by the reference. A common-average window loses
    /// one dimension per lag, which puts a Jordan block of size `order` at 0.
    pub structural_zeros: usize,
}

impl TransitionModel {
    #[inline]
    pub fn state_dim(&self) -> usize {
        self.a.nrows()
    }

    /// Largest eigenvalue magnitude.
    pub fn spectral_radius(&self) -> Option<f64> {
        self.eigenvalues
            .as_ref()
            .map(|ev| ev.iter().map(|z| z.norm()).fold(0.0, f64::max))
    }

    /// Eigenvalue of largest magnitude.
    pub fn dominant_eigenvalue(&self) -> Option<Complex<f64>> {
        self.eigenvalues.as_ref()?.iter().copied().max_by(|a, b| a.norm().total_cmp(&b.norm()))
    }

    /// `radius − spectral_radius`: distance of the least stable pole from the
    /// boundary (negative when already outside).
    pub fn stability_margin(&self, radius: f64) -> Option<f64> {
        self.spectral_radius().map(|r| radius - r)
    }

    /// Whether two eigenvalues coincide within [`REPEATED_EIGENVALUE_TOL`].
    ///
    /// The `structural_zeros` smallest eigenvalues are left out: they belong
    /// to the reference, not to the fitted dynamics.
    pub fn has_repeated_eigenvalue(&self) -> bool {
        let Some(ev) = &self.eigenvalues else {
            return false;
        };
        let mut ev = ev.clone();
        ev.sort_by(|a, b| a.norm().total_cmp(&b.norm()));
        let ev = &ev[self.structural_zeros.min(ev.len())..];
        for (i, a) in ev.iter().enumerate() {
            for b in &ev[i + 1..] {
                let scale = a.norm().max(b.norm()).max(1.0);
                if (a - b).norm() <= REPEATED_EIGENVALUE_TOL * scale {
                    return true;
                }
            }
        }
        false
    }

    /// The regression block `Bᵀ` ([C, n]).
    pub fn coefficients(&self) -> DMatrix<f64> {
        self.a.rows(0, self.n_channels).into_owned()
    }
}

/// Fit a transition model to a monopolar `window` ([C, W]).
pub fn fit(
    window: &ArrayView2<'_, f64>,
    order: usize,
    l2penalty: f64,
    method: SolveMethod,
) -> Result<TransitionModel> {
    fit_referenced(window, order, l2penalty, method, ReferenceScheme::Monopolar)
}

/// Fit a transition model to `window` ([C, W]) that was re-referenced with
/// `reference`.
///
/// Common-average data sums to zero across channels, so every lag block of
/// `X` loses one dimension. That deficit is expected: it does not mark the
/// window low rank, and the `order` zero eigenvalues it leaves in `A` are not
/// counted as repeated.
pub fn fit_referenced(
    window: &ArrayView2<'_, f64>,
    order: usize,
    l2penalty: f64,
    method: SolveMethod,
    reference: ReferenceScheme,
) -> Result<TransitionModel> {
    let (n_ch, n_t) = window.dim();
    if order == 0 {
        return Err(FragilityError::invalid("order must be >= 1"));
    }
    if n_ch == 0 || n_t <= order {
        return Err(FragilityError::invalid(format!(
            "window of shape [{n_ch}, {n_t}] has no regression samples at order {order}"
        )));
    }
    if !l2penalty.is_finite() || l2penalty < 0.0 {
        return Err(FragilityError::invalid(format!(
            "l2penalty must be finite and >= 0, got {l2penalty}"
        )));
    }

    let n = n_ch * order;
    let m = n_t - order;
    let structural_zeros = match reference {
        ReferenceScheme::CommonAverage if n_ch > 1 => order,
        _ => 0,
    };
    let expected_rank = n - structural_zeros;

    // Row i holds z_t for t = i + order − 1, target x_{t+1}.
    let x = DMatrix::from_fn(m, n, |i, j| {
        let t = i + order - 1;
        window[[j % n_ch, t - j / n_ch]]
    });
    let y = DMatrix::from_fn(m, n_ch, |i, c| window[[c, i + order]]);

    let rank = numerical_rank(&x);
    let low_rank = m < n + 1 || rank < expected_rank;

    let (b, used, solver_fallback) = match method {
        SolveMethod::Pinv => (solve_pinv(&x, &y, l2penalty)?, SolveMethod::Pinv, false),
        SolveMethod::Direct => match solve_direct(&x, &y, l2penalty) {
            Some(b) => (b, SolveMethod::Direct, false),
            None => {
                warn!(
                    "direct solve singular (rank {rank}/{n}, λ={l2penalty:e}); falling back to pinv"
                );
                (solve_pinv(&x, &y, l2penalty)?, SolveMethod::Pinv, true)
            }
        },
    };

    if b.iter().any(|v| !v.is_finite()) {
        return Err(FragilityError::numerical("non-finite transition coefficients"));
    }

    let mut a = DMatrix::zeros(n, n);
    a.view_mut((0, 0), (n_ch, n)).copy_from(&b.transpose());
    for lag in 1..order {
        for c in 0..n_ch {
            a[(lag * n_ch + c, (lag - 1) * n_ch + c)] = 1.0;
        }
    }

    let eigenvalues = eigenvalues(&a);

    Ok(TransitionModel {
        a,
        order,
        n_channels: n_ch,
        l2penalty,
        method: used,
        diagnostics: FitDiagnostics {
            rank,
            state_dim: n,
            n_samples: m,
            expected_rank,
            low_rank,
            solver_fallback,
        },
        eigenvalues,
        structural_zeros,
    })
}

/// Eigenvalues of a real square matrix via a bounded real Schur iteration.
pub fn eigenvalues(a: &DMatrix<f64>) -> Option<Vec<Complex<f64>>> {
    if a.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let max_iter = MIN_SCHUR_ITER.max(50 * a.nrows());
    let schur = a.clone().try_schur(f64::EPSILON, max_iter)?;
    Some(schur.complex_eigenvalues().iter().copied().collect())
}

/// Count singular values above `max(m, n)·ε·σ_max`.
fn numerical_rank(x: &DMatrix<f64>) -> usize {
    let sv = x.singular_values();
    let s_max = sv.iter().copied().fold(0.0, f64::max);
    if s_max == 0.0 {
        return 0;
    }
    let tol = x.nrows().max(x.ncols()) as f64 * f64::EPSILON * s_max;
    sv.iter().filter(|&&s| s > tol).count()
}

fn solve_pinv(x: &DMatrix<f64>, y: &DMatrix<f64>, l2penalty: f64) -> Result<DMatrix<f64>> {
    let (m, n) = x.shape();
    let (xa, ya) = if l2penalty > 0.0 {
        let mut xa = DMatrix::zeros(m + n, n);
        xa.view_mut((0, 0), (m, n)).copy_from(x);
        let sqrt_l = l2penalty.sqrt();
        for j in 0..n {
            xa[(m + j, j)] = sqrt_l;
        }
        let mut ya = DMatrix::zeros(m + n, y.ncols());
        ya.view_mut((0, 0), (m, y.ncols())).copy_from(y);
        (xa, ya)
    } else {
        (x.clone(), y.clone())
    };

    let svd = xa.svd(true, true);
    let s_max = svd.singular_values.iter().copied().fold(0.0, f64::max);
    let eps = (m + n) as f64 * f64::EPSILON * s_max;
    let pinv = svd.pseudo_inverse(eps).map_err(|e| FragilityError::numerical(e))?;
    Ok(pinv * ya)
}

fn solve_direct(x: &DMatrix<f64>, y: &DMatrix<f64>, l2penalty: f64) -> Option<DMatrix<f64>> {
    let xt = x.transpose();
    let mut gram = &xt * x;
    for j in 0..gram.nrows() {
        gram[(j, j)] += l2penalty;
    }
    let rhs = &xt * y;

    let b = match gram.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => gram.lu().solve(&rhs)?,
    };
    b.iter().all(|v| v.is_finite()).then_some(b)
}
