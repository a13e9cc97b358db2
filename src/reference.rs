//! Window re-referencing.
//!
//! Common average: subtract the mean across channels at each time point.
//!
//! `data`: [C, T]  →  `data[c, t] -= mean(data[:, t])`
use ndarray::{Array2, ArrayView2, Axis};

use crate::config::ReferenceScheme;

pub fn average_reference_inplace(data: &mut Array2<f64>) {
    let Some(means) = data.mean_axis(Axis(0)) else {
        return;
    };
    for mut row in data.rows_mut() {
        row -= &means;
    }
}

/// Copy `window` ([C, W]) and apply `scheme` to the copy.
pub fn rereference(window: &ArrayView2<'_, f64>, scheme: ReferenceScheme) -> Array2<f64> {
    let mut out = window.to_owned();
    if scheme == ReferenceScheme::CommonAverage {
        average_reference_inplace(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sum_is_zero_after_reference() {
        let mut data = Array2::from_shape_fn((8, 512), |(c, t)| ((c * 7 + t * 3) as f64).sin());
        average_reference_inplace(&mut data);
        for &s in data.sum_axis(Axis(0)).iter() {
            approx::assert_abs_diff_eq!(s, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn monopolar_is_a_plain_copy() {
        let data = Array2::from_shape_fn((3, 16), |(c, t)| (c + t) as f64);
        let out = rereference(&data.view(), ReferenceScheme::Monopolar);
        assert_eq!(out, data);
    }

    #[test]
    fn common_average_preserves_channel_differences() {
        let data = Array2::from_shape_fn((2, 10), |(c, _)| if c == 0 { 2.0 } else { 4.0 });
        let out = rereference(&data.view(), ReferenceScheme::CommonAverage);
        for t in 0..10 {
            approx::assert_abs_diff_eq!(out[[0, t]], -1.0, epsilon = 1e-12);
            approx::assert_abs_diff_eq!(out[[0, t]] - out[[1, t]], -2.0, epsilon = 1e-12);
        }
    }
}
