//! Error taxonomy for the fragility core.
//!
//! Only structural problems (bad configuration, bad input) and total failure
//! are raised as errors.  Per-window numerical trouble is contained in the
//! window result and surfaced through [`CellStatus`](crate::CellStatus)
//! flags instead.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FragilityError {
    /// Caller error: bad window/step/order sizing, malformed signal, etc.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A linear-algebra step could not produce a finite result even after
    /// falling back to the pseudo-inverse.
    #[error("numerical failure: {0}")]
    NumericalFailure(String),

    /// Every window failed to fit; there is nothing to report.
    #[error("all {n_windows} windows failed to fit")]
    AllWindowsFailed { n_windows: usize },

    /// The run was cancelled through its [`CancelToken`](crate::CancelToken).
    #[error("run cancelled")]
    Cancelled,

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

impl FragilityError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub(crate) fn numerical(msg: impl Into<String>) -> Self {
        Self::NumericalFailure(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FragilityError>;
