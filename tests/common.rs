/// Shared helpers: deterministic pseudo-noise and synthetic AR signals.
use fragility::Signal;
use ndarray::Array2;

/// 64-bit LCG, uniform in [−0.5, 0.5).
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64 - 0.5
    }
}

#[allow(unused)]
/// White noise [C, T].
pub fn noise(n_ch: usize, n_t: usize, seed: u64) -> Array2<f64> {
    let mut rng = Lcg::new(seed);
    Array2::from_shape_fn((n_ch, n_t), |_| rng.next())
}

#[allow(unused)]
/// `x_{t+1} = A x_t + e_t` for a square `A` ([C, C]).
pub fn var1(a: &Array2<f64>, n_t: usize, seed: u64) -> Array2<f64> {
    let n_ch = a.nrows();
    let mut rng = Lcg::new(seed);
    let mut x = Array2::zeros((n_ch, n_t));
    for t in 1..n_t {
        let prev = x.column(t - 1).to_owned();
        let next = a.dot(&prev);
        for c in 0..n_ch {
            x[[c, t]] = next[c] + rng.next();
        }
    }
    x
}

#[allow(unused)]
/// Stable coupled VAR(1): 0.6 self-coupling, 0.2 to the next channel.
pub fn stable_signal(n_ch: usize, n_t: usize, sfreq: f64, seed: u64) -> Signal {
    let a = Array2::from_shape_fn((n_ch, n_ch), |(i, j)| {
        if i == j {
            0.6
        } else if j == (i + 1) % n_ch {
            0.2
        } else {
            0.0
        }
    });
    Signal::from_array(var1(&a, n_t, seed), sfreq).unwrap()
}

#[allow(unused)]
/// Maximum absolute difference between two arrays.
pub fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0_f64, f64::max)
}
