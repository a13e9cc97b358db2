use fragility::{segment, FragilityError};

#[test]
fn windows_cover_signal_with_fixed_length_and_step() {
    let cases = [(1000, 250, 125), (1000, 250, 250), (251, 250, 1), (250, 250, 7), (999, 100, 33)];
    for &(n_t, w, s) in &cases {
        let windows = segment(n_t, w, s).unwrap();
        assert_eq!(windows.len(), (n_t - w) / s + 1, "count for T={n_t} w={w} s={s}");
        for (i, win) in windows.iter().enumerate() {
            assert_eq!(win.index, i);
            assert_eq!(win.start, i * s);
            assert_eq!(win.len, w);
            assert!(win.end() <= n_t);
        }
        // The next window would not fit.
        let last = windows.last().unwrap();
        assert!(last.start + s + w > n_t);
    }
}

#[test]
fn thousand_samples_give_seven_windows() {
    let starts: Vec<usize> = segment(1000, 250, 125).unwrap().iter().map(|w| w.start).collect();
    assert_eq!(starts, vec![0, 125, 250, 375, 500, 625, 750]);
}

#[test]
fn invalid_sizes_are_rejected() {
    assert!(matches!(segment(100, 250, 125), Err(FragilityError::InvalidParameter(_))));
    assert!(matches!(segment(1000, 250, 0), Err(FragilityError::InvalidParameter(_))));
    assert!(matches!(segment(1000, 100, 150), Err(FragilityError::InvalidParameter(_))));
    assert!(matches!(segment(1000, 0, 0), Err(FragilityError::InvalidParameter(_))));
}
