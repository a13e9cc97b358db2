//! FIR band-pass design and application.
//!
//! - [`design`]: Hamming-windowed sinc band-pass and line-noise notch design
//!   with MNE's automatic transition bandwidths and filter length.
//! - [`apply`]: Zero-phase FFT convolution with reflect-limited edge padding.

pub mod apply;
pub mod design;

pub use apply::{apply_fir_zero_phase, filter_1d};
pub use design::{
    auto_filter_length, design_bandpass, design_notch, firwin, hamming, lower_trans_bandwidth,
    upper_trans_bandwidth,
};
