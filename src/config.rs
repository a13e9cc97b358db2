//! Analysis configuration.
//!
//! [`FragilityConfig`] holds every tunable parameter of the fragility engine;
//! [`PipelineConfig`] wraps it with the optional preprocessing and
//! post-processing steps run by [`analyze`](crate::analyze).  Nothing is read
//! from globals: a config value is threaded explicitly through every entry
//! point.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FragilityError, Result};
use crate::normalize::NormalizeMode;

/// Default ridge penalty for iEEG-scale signals.
pub const DEFAULT_L2PENALTY: f64 = 1e-9;

/// Ridge penalty applied to the least-squares LDS fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L2Penalty {
    /// Scale [`DEFAULT_L2PENALTY`] by the mean signal power of the run.
    Auto,
    /// Use this exact value (must be finite and `>= 0`).
    Fixed(f64),
}

impl L2Penalty {
    /// Resolve to a concrete penalty for a signal with mean power `power`
    /// (`mean(x²)` over all channels and samples).
    pub fn resolve(self, power: f64) -> f64 {
        match self {
            L2Penalty::Fixed(v) => v,
            L2Penalty::Auto if power > 0.0 && power.is_finite() => DEFAULT_L2PENALTY * power,
            L2Penalty::Auto => DEFAULT_L2PENALTY,
        }
    }
}

impl FromStr for L2Penalty {
    type Err = FragilityError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(L2Penalty::Auto);
        }
        s.parse::<f64>()
            .map(L2Penalty::Fixed)
            .map_err(|_| {
                FragilityError::invalid(format!("l2penalty must be a number or 'auto', got {s:?}"))
            })
    }
}

/// How the penalised least-squares problem is solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveMethod {
    /// Pseudo-inverse of the augmented design matrix.  Always defined.
    Pinv,
    /// Cholesky/LU solve of the normal equations.  Falls back to
    /// [`SolveMethod::Pinv`] (flagged) when the system is singular.
    Direct,
}

impl FromStr for SolveMethod {
    type Err = FragilityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pinv" => Ok(SolveMethod::Pinv),
            "direct" | "solve" | "lstsq" => Ok(SolveMethod::Direct),
            other => Err(FragilityError::invalid(format!("unknown solve method {other:?}"))),
        }
    }
}

impl fmt::Display for SolveMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SolveMethod::Pinv => "pinv",
            SolveMethod::Direct => "direct",
        })
    }
}

/// Signal reference applied to each window before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceScheme {
    Monopolar,
    /// Per-timepoint channel mean removed from a copy of the window.
    #[serde(alias = "bipolar", alias = "average")]
    CommonAverage,
}

impl FromStr for ReferenceScheme {
    type Err = FragilityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "monopolar" => Ok(ReferenceScheme::Monopolar),
            "commonaverage" | "common-average" | "average" | "car" | "bipolar" => {
                Ok(ReferenceScheme::CommonAverage)
            }
            other => Err(FragilityError::invalid(format!("unknown reference scheme {other:?}"))),
        }
    }
}

impl fmt::Display for ReferenceScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceScheme::Monopolar => "monopolar",
            ReferenceScheme::CommonAverage => "commonaverage",
        })
    }
}

/// Structure of the rank-one perturbation attributed to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerturbationType {
    /// `Δ = Γ e_kᵀ`: perturb column k (channel k as a source).
    Column,
    /// `Δ = e_k Γᵀ`: perturb row k (channel k as a sink).
    Row,
}

impl FromStr for PerturbationType {
    type Err = FragilityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "c" | "col" | "column" | "source" => Ok(PerturbationType::Column),
            "r" | "row" | "sink" => Ok(PerturbationType::Row),
            other => Err(FragilityError::invalid(format!("unknown perturbation type {other:?}"))),
        }
    }
}

/// Configuration of one fragility run.
///
/// All fields are `pub`; use struct-update syntax to override a few:
///
/// ```
/// use fragility::{FragilityConfig, SolveMethod};
///
/// let cfg = FragilityConfig {
///     winsize: 500,
///     stepsize: 250,
///     method: SolveMethod::Direct,
///     ..FragilityConfig::default()
/// };
/// assert!(cfg.validate(10_000).is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragilityConfig {
    /// Model lag.  The state dimension is `n_channels · order`.
    ///
    /// Default: `1`.
    pub order: usize,

    /// Window length in samples.
    ///
    /// Default: `250`.
    pub winsize: usize,

    /// Offset between consecutive window starts, `0 < stepsize <= winsize`.
    ///
    /// Default: `125` (50 % overlap).
    pub stepsize: usize,

    /// Ridge penalty of the LDS fit.
    ///
    /// Default: `Fixed(1e-9)`.
    pub l2penalty: L2Penalty,

    /// Least-squares solve method.
    ///
    /// Default: [`SolveMethod::Pinv`].
    pub method: SolveMethod,

    /// Default: [`ReferenceScheme::Monopolar`].
    pub reference: ReferenceScheme,

    /// Default: [`PerturbationType::Column`].
    pub perturbation: PerturbationType,

    /// Radius of the circle the target eigenvalue is pushed onto.
    ///
    /// `1.0` is the discrete-time stability boundary.
    ///
    /// Default: `1.0`.
    pub radius: f64,

    /// Number of target angles sampled uniformly in `[0, π]`.
    ///
    /// Default: `51`.
    pub search_num: usize,

    /// Worker threads: `None` uses rayon's global pool, `Some(1)` runs
    /// sequentially.
    ///
    /// Default: `None`.
    pub n_jobs: Option<usize>,
}

impl Default for FragilityConfig {
    fn default() -> Self {
        Self {
            order: 1,
            winsize: 250,
            stepsize: 125,
            l2penalty: L2Penalty::Fixed(DEFAULT_L2PENALTY),
            method: SolveMethod::Pinv,
            reference: ReferenceScheme::Monopolar,
            perturbation: PerturbationType::Column,
            radius: 1.0,
            search_num: 51,
            n_jobs: None,
        }
    }
}

impl FragilityConfig {
    /// Check every parameter against a signal of `n_samples` samples.
    pub fn validate(&self, n_samples: usize) -> Result<()> {
        if self.order == 0 {
            return Err(FragilityError::invalid("order must be >= 1"));
        }
        if self.stepsize == 0 || self.stepsize > self.winsize {
            return Err(FragilityError::invalid(format!(
                "stepsize must satisfy 0 < stepsize <= winsize, got stepsize={} winsize={}",
                self.stepsize, self.winsize
            )));
        }
        if self.winsize > n_samples {
            return Err(FragilityError::invalid(format!(
                "winsize {} exceeds signal length {n_samples}",
                self.winsize
            )));
        }
        if self.winsize <= self.order {
            return Err(FragilityError::invalid(format!(
                "winsize {} leaves no regression samples at order {}",
                self.winsize, self.order
            )));
        }
        if let L2Penalty::Fixed(v) = self.l2penalty {
            if !v.is_finite() || v < 0.0 {
                return Err(FragilityError::invalid(format!(
                    "l2penalty must be finite and >= 0, got {v}"
                )));
            }
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(FragilityError::invalid(format!(
                "radius must be finite and > 0, got {}",
                self.radius
            )));
        }
        if self.search_num == 0 {
            return Err(FragilityError::invalid("search_num must be >= 1"));
        }
        if self.n_jobs == Some(0) {
            return Err(FragilityError::invalid("n_jobs must be >= 1 when given"));
        }
        Ok(())
    }
}

/// Configuration of the full [`analyze`](crate::analyze) pipeline.
///
/// The defaults band-pass iEEG from `0.5` to `200` Hz; on recordings sampled
/// at 400 Hz or less the upper edge is clamped under Nyquist.  Set both
/// edges to `None` to skip filtering.
///
/// ```rust
/// use fragility::PipelineConfig;
///
/// let raw = PipelineConfig { l_freq: None, h_freq: None, ..PipelineConfig::default() };
/// assert_eq!(PipelineConfig::default().l_freq, Some(0.5));
/// assert!(raw.line_freq.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fragility: FragilityConfig,

    /// Resample to this rate before filtering.  `None` keeps the recorded
    /// rate.
    ///
    /// Default: `None`.
    pub resample_sfreq: Option<f64>,

    /// Power-line frequency in Hz (`50` or `60`).  When set, a notch removes
    /// it and every harmonic below Nyquist.
    ///
    /// Default: `None`.
    pub line_freq: Option<f64>,

    /// Lower band-pass edge in Hz.  `None` disables the highpass part.
    ///
    /// Default: `Some(0.5)`.
    pub l_freq: Option<f64>,

    /// Upper band-pass edge in Hz.  `None` disables the lowpass part.  An
    /// edge at or above Nyquist is clamped to `nyquist − 1`.
    ///
    /// Default: `Some(200.0)`.
    pub h_freq: Option<f64>,

    /// Normalisation applied to the fragility heatmap.
    ///
    /// Default: [`NormalizeMode::PerChannel`].
    pub normalize: NormalizeMode,

    /// Channels excluded before any processing.
    ///
    /// Matching is case-insensitive and ignores spaces.
    ///
    /// Default: `[]`.
    pub bad_channels: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fragility: FragilityConfig::default(),
            resample_sfreq: None,
            line_freq: None,
            l_freq: Some(0.5),
            h_freq: Some(200.0),
            normalize: NormalizeMode::PerChannel,
            bad_channels: vec![],
        }
    }
}
