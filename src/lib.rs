//! # fragility — neural fragility of iEEG recordings in pure Rust
//!
//! `fragility` estimates, for every channel of a multichannel intracranial
//! EEG recording and every sliding window, how small a structured
//! perturbation of a fitted linear dynamical system must be to push it onto
//! the edge of instability.  Channels that need only a small perturbation
//! are *fragile*; fragile regions are candidate seizure-onset zones.
//!
//! ## Pipeline overview
//!
//! ```text
//! Signal [C, T] f64
//!   │
//!   ├─ drop bad channels        PipelineConfig::bad_channels / ChannelTable
//!   ├─ resample                 optional, FFT
//!   ├─ filter                   line-noise notch + band-pass, zero-phase FIR
//!   ├─ window::segment          overlapping windows (winsize, stepsize)
//!   │    └─ per window, in parallel (rayon):
//!   │         ├─ reference      optional common-average copy
//!   │         ├─ lds::fit       ridge-regularised VAR(order) → companion A
//!   │         └─ perturbation   min ‖Γ‖ s.t. A + Δ(Γ) has |λ| = r
//!   ├─ FragilityMatrix          [C, N] minimum norms + per-cell status
//!   └─ normalize                heatmap (1 = most fragile), min-max, ranking
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use fragility::{analyze, PipelineConfig, Signal};
//! use ndarray::Array2;
//!
//! // 4 channels, 1000 samples at 500 Hz
//! let data: Array2<f64> = Array2::zeros((4, 1000));
//! let signal = Signal::from_array(data, 500.0).unwrap();
//!
//! let analysis = analyze(&signal, &PipelineConfig::default()).unwrap();
//! println!("fragility matrix: {:?}", analysis.run.matrix.dim());
//! for r in analysis.ranking.iter().take(3) {
//!     println!("{} {:?}", r.name, r.mean);
//! }
//! ```
//!
//! ## Running individual steps
//!
//! ```no_run
//! use fragility::{FragilityConfig, FragilityEngine, SolveMethod, Signal};
//! use fragility::normalize::{normalize, NormalizeMode};
//! use ndarray::Array2;
//!
//! let signal = Signal::from_array(Array2::zeros((8, 5000)), 1000.0).unwrap();
//! let cfg = FragilityConfig {
//!     order: 2,
//!     method: SolveMethod::Direct,
//!     ..FragilityConfig::default()
//! };
//! let run = FragilityEngine::new(cfg).run(&signal).unwrap();
//! let norm = normalize(&run.matrix, NormalizeMode::PerChannel);
//! ```

pub mod annotations;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod io;
pub mod lds;
pub mod matrix;
pub mod normalize;
pub mod perturbation;
pub mod reference;
pub mod resample;
pub mod signal;
pub mod window;

use log::info;

// ── Crate-root re-exports ─────────────────────────────────────────────────

// annotations
pub use annotations::{ChannelAnnotation, ChannelStatus, ChannelTable, SidecarSink};

// config
pub use config::{
    FragilityConfig, L2Penalty, PerturbationType, PipelineConfig, ReferenceScheme, SolveMethod,
    DEFAULT_L2PENALTY,
};

// engine
pub use engine::{CancelToken, FragilityEngine, FragilityRun, WindowResult};

// error
pub use error::{FragilityError, Result};

// filter — design helpers + convolution
pub use filter::{apply_fir_zero_phase, design_bandpass, design_notch};

// lds
pub use lds::{FitDiagnostics, TransitionModel};

// matrix
pub use matrix::{CellStatus, FragilityMatrix, INVALID_SCORE};

// normalize
pub use normalize::{fragility_heatmap, normalize, rank_channels, ChannelRank, NormalizeMode};

// perturbation
pub use perturbation::{PerturbationResult, SolverParams};

// resample
pub use resample::resample;

// signal / window
pub use signal::Signal;
pub use window::{segment, Window};

/// Output of [`analyze`].
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Raw run on the retained channels; scores are minimum norms.
    pub run: FragilityRun,
    /// [`fragility_heatmap`] of `run.matrix`, normalised with
    /// [`PipelineConfig::normalize`].  Higher means more fragile.
    pub normalized: FragilityMatrix,
    /// Channels by mean normalised fragility, most fragile first.
    pub ranking: Vec<ChannelRank>,
}

/// Run the **full fragility pipeline** on one recording.
///
/// # Pipeline steps
///
/// 1. Drop channels listed in [`PipelineConfig::bad_channels`].
/// 2. Resample to [`PipelineConfig::resample_sfreq`] when set.
/// 3. Notch [`PipelineConfig::line_freq`] and its harmonics when set.
/// 4. Band-pass with [`PipelineConfig::l_freq`] / [`PipelineConfig::h_freq`]
///    when either is set.
/// 5. Run the [`FragilityEngine`] with [`PipelineConfig::fragility`].
/// 6. Turn minimum norms into fragility with [`fragility_heatmap`] and
///    normalise with [`PipelineConfig::normalize`].
/// 7. Rank channels on the normalised fragility.
///
/// # Errors
///
/// * [`FragilityError::InvalidParameter`] for an invalid configuration or
///   when every channel is excluded.
/// * [`FragilityError::AllWindowsFailed`] when no window could be fitted.
pub fn analyze(signal: &Signal, cfg: &PipelineConfig) -> Result<Analysis> {
    // 1. Exclude bad channels.
    let mut signal = signal.drop_channels(&cfg.bad_channels)?;

    // 2. Optional resampling.
    if let Some(dst) = cfg.resample_sfreq {
        info!("resample {} → {dst} Hz", signal.sfreq());
        let data = resample(&signal.data().to_owned(), signal.sfreq(), dst)?;
        signal = Signal::new(data, dst, signal.ch_names().to_vec())?;
    }

    // 3–4. Notch, then band-pass.
    let notch = cfg.line_freq.and_then(|f| design_notch(f, signal.sfreq()));
    let bandpass = design_bandpass(cfg.l_freq, cfg.h_freq, signal.sfreq());
    if notch.is_some() || bandpass.is_some() {
        let mut data = signal.data().to_owned();
        if let Some(h) = notch {
            info!("notch {:?} Hz + harmonics, {} taps", cfg.line_freq, h.len());
            apply_fir_zero_phase(&mut data, &h);
        }
        if let Some(h) = bandpass {
            info!("band-pass {:?}–{:?} Hz, {} taps", cfg.l_freq, cfg.h_freq, h.len());
            apply_fir_zero_phase(&mut data, &h);
        }
        signal = signal.with_data(data)?;
    }

    // 5. Fragility.
    let run = FragilityEngine::new(cfg.fragility.clone()).run(&signal)?;

    // 6–7. Heatmap, normalise, rank.
    let normalized = normalize(&fragility_heatmap(&run.matrix), cfg.normalize);
    let ranking = rank_channels(&normalized);

    Ok(Analysis { run, normalized, ranking })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn noise(n_ch: usize, n_t: usize, seed: u64) -> Array2<f64> {
        let mut state = seed;
        Array2::from_shape_fn((n_ch, n_t), |_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
        })
    }

    /// Independent AR(1) channels with per-channel pole `poles[c]`.
    fn ar1_channels(poles: &[f64], n_t: usize, seed: u64) -> Array2<f64> {
        let e = noise(poles.len(), n_t, seed);
        let mut x = Array2::zeros((poles.len(), n_t));
        for t in 1..n_t {
            for (c, &p) in poles.iter().enumerate() {
                x[[c, t]] = p * x[[c, t - 1]] + e[[c, t]];
            }
        }
        x
    }

    fn unfiltered() -> PipelineConfig {
        PipelineConfig { l_freq: None, h_freq: None, ..PipelineConfig::default() }
    }

    #[test]
    fn bad_channels_are_excluded_before_the_run() {
        let names = vec!["A1".to_string(), "A2".to_string(), "B1".to_string()];
        let signal = Signal::new(noise(3, 600, 7), 250.0, names).unwrap();
        let cfg = PipelineConfig { bad_channels: vec!["a 2".into()], ..unfiltered() };
        let a = analyze(&signal, &cfg).unwrap();
        assert_eq!(a.run.matrix.ch_names(), &["A1".to_string(), "B1".to_string()]);
        assert_eq!(a.ranking.len(), 2);
        let in_range = |v: &f64| *v == INVALID_SCORE || (0.0..=1.0).contains(v);
        assert!(a.normalized.scores().iter().all(in_range));
    }

    #[test]
    fn default_band_pass_runs_before_fragility() {
        // 0.5–200 Hz at 500 Hz.
        let signal = Signal::from_array(noise(3, 2000, 11), 500.0).unwrap();
        let a = analyze(&signal, &PipelineConfig::default()).unwrap();
        assert_eq!(a.run.matrix.dim(), (3, 15));
        assert!(a.run.matrix.scores().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn slow_channel_ranks_most_fragile() {
        // Channel 0 sits next to the unit circle: a small column change
        // pushes its pole onto it.
        let data = ar1_channels(&[0.97, 0.2, 0.2, 0.2], 2000, 3);
        let signal = Signal::from_array(data, 250.0).unwrap();
        let cfg = PipelineConfig { normalize: NormalizeMode::Global, ..unfiltered() };
        let a = analyze(&signal, &cfg).unwrap();

        assert_eq!(a.ranking[0].channel, 0);
        let mean = |c: usize| a.ranking.iter().find(|r| r.channel == c).unwrap().mean.unwrap();
        assert!(mean(0) > mean(1) && mean(0) > mean(2) && mean(0) > mean(3));
        // The raw minimum norm of the same channel is the smallest.
        let raw = a.run.matrix.channel_means();
        assert!(raw[0].unwrap() < raw[1].unwrap());
    }

    #[test]
    fn resample_and_notch_run_before_fragility() {
        let signal = Signal::from_array(noise(3, 4000, 5), 1000.0).unwrap();
        let cfg = PipelineConfig {
            resample_sfreq: Some(250.0),
            line_freq: Some(60.0),
            ..PipelineConfig::default()
        };
        let a = analyze(&signal, &cfg).unwrap();
        approx::assert_abs_diff_eq!(a.run.matrix.sfreq(), 250.0);
        // 1000 samples left: windows at 0, 125, …, 750.
        assert_eq!(a.run.matrix.dim(), (3, 7));
    }
}
