mod common;
use common::stable_signal;
use fragility::{
    CancelToken, CellStatus, FragilityConfig, FragilityEngine, L2Penalty, PerturbationType,
    ReferenceScheme, Signal,
};

fn base_config() -> FragilityConfig {
    FragilityConfig {
        order: 1,
        winsize: 250,
        stepsize: 125,
        l2penalty: L2Penalty::Fixed(1e-9),
        reference: ReferenceScheme::Monopolar,
        ..FragilityConfig::default()
    }
}

#[test]
fn end_to_end_matrix_shape_and_values() {
    let signal = stable_signal(4, 1000, 500.0, 1);
    let run = FragilityEngine::new(base_config()).run(&signal).unwrap();

    assert_eq!(run.matrix.dim(), (4, 7));
    assert_eq!(run.matrix.window_starts(), &[0, 125, 250, 375, 500, 625, 750]);
    assert!(run.matrix.scores().iter().all(|v| v.is_finite() && *v >= 0.0));
    assert!(run.matrix.status().iter().all(|s| s.has_value()));
    assert_eq!(run.windows.len(), 7);
    assert!(run.models().iter().all(Option::is_some));

    let times = run.matrix.window_times();
    approx::assert_abs_diff_eq!(times[1], 0.25, epsilon = 1e-12);
}

#[test]
fn rank_deficient_window_is_flagged_low_rank() {
    let signal = stable_signal(4, 1000, 500.0, 2);
    let mut data = signal.data().to_owned();
    data.row_mut(0).slice_mut(ndarray::s![250..500]).fill(0.0);
    let signal = Signal::new(data, 500.0, signal.ch_names().to_vec()).unwrap();

    let run = FragilityEngine::new(base_config()).run(&signal).unwrap();
    let status = run.matrix.status();
    for c in 0..4 {
        assert_eq!(status[[c, 2]], CellStatus::LowRank, "channel {c}");
        assert_eq!(status[[c, 1]], CellStatus::Ok);
        assert_eq!(status[[c, 3]], CellStatus::Ok);
    }
    assert!(run.windows[2].model.as_ref().unwrap().diagnostics.low_rank);
    // Flagged cells are left out of channel means.
    let means = run.matrix.channel_means();
    assert!(means.iter().all(Option::is_some));
}

#[test]
fn results_are_identical_across_thread_counts() {
    let signal = stable_signal(5, 1500, 500.0, 3);
    let run_with = |n_jobs| {
        FragilityEngine::new(FragilityConfig { n_jobs, ..base_config() })
            .run(&signal)
            .unwrap()
    };
    let seq = run_with(Some(1));
    for other in [run_with(None), run_with(Some(3))] {
        assert_eq!(seq.matrix.scores(), other.matrix.scores());
        assert_eq!(seq.matrix.status(), other.matrix.status());
        assert_eq!(seq.delta_vectors(), other.delta_vectors());
    }
}

#[test]
fn common_average_and_row_perturbation_run() {
    let signal = stable_signal(4, 1000, 500.0, 4);
    let cfg = FragilityConfig {
        reference: ReferenceScheme::CommonAverage,
        perturbation: PerturbationType::Row,
        order: 2,
        ..base_config()
    };
    let run = FragilityEngine::new(cfg).run(&signal).unwrap();
    assert_eq!(run.matrix.dim(), (4, 7));
    assert_eq!(run.state_array().dim(), (7, 8, 8));
    // The channel sum is zero after the reference; that deficit alone does
    // not make a window low rank.
    for w in &run.windows {
        let d = &w.model.as_ref().unwrap().diagnostics;
        assert_eq!(d.expected_rank, 8 - 2);
        assert!(!d.low_rank, "window {}: rank {}", w.window.index, d.rank);
    }
    let [ok, _, low, _] = run.matrix.status_counts();
    assert_eq!(low, 0);
    assert!(ok > 0);
    assert!(run.matrix.channel_means().iter().all(Option::is_some));
    assert!(run.matrix.scores().iter().all(|v| v.is_finite() && *v >= 0.0));
}

#[test]
fn common_average_window_with_dead_channel_is_still_low_rank() {
    let signal = stable_signal(4, 1000, 500.0, 6);
    let mut data = signal.data().to_owned();
    data.row_mut(1).fill(0.0);
    data.row_mut(2).fill(0.0);
    let signal = Signal::new(data, 500.0, signal.ch_names().to_vec()).unwrap();
    let cfg = FragilityConfig { reference: ReferenceScheme::CommonAverage, ..base_config() };
    let run = FragilityEngine::new(cfg).run(&signal).unwrap();
    assert!(run.windows.iter().all(|w| w.model.as_ref().unwrap().diagnostics.low_rank));
    assert!(run.matrix.status().iter().all(|&s| s == CellStatus::LowRank));
}

#[test]
fn auto_penalty_scales_with_signal_power() {
    let signal = stable_signal(3, 600, 250.0, 5);
    let cfg = FragilityConfig { l2penalty: L2Penalty::Auto, ..base_config() };
    let run = FragilityEngine::new(cfg).run(&signal).unwrap();
    approx::assert_relative_eq!(run.l2penalty, 1e-9 * signal.mean_power(), max_relative = 1e-12);
}

#[test]
fn cancelled_before_start_produces_no_matrix() {
    let token = CancelToken::new();
    let clone = token.clone();
    clone.cancel();
    assert!(token.is_cancelled());
    let signal = stable_signal(2, 500, 250.0, 6);
    let res = FragilityEngine::new(base_config()).run_with_cancel(&signal, &token);
    assert!(matches!(res, Err(fragility::FragilityError::Cancelled)));
}
