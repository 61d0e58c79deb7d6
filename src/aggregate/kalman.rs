//! Local-level Kalman filter with Rauch–Tung–Striebel smoothing.
//!
//! State model (random walk plus noise):
//!
//! ```text
//! x_t = x_{t-1} + w_t,   w_t ~ N(0, Q)
//! y_t = x_t + v_t,       v_t ~ N(0, R)
//! ```
//!
//! `R` is the sample variance of the observed series and `Q` a fixed fraction of
//! it, so the amount of smoothing does not depend on the volume scale.
//! Non-finite observations are treated as missing (predict only).

use crate::math::variance;

pub fn smooth_local_level(y: &[f64], process_noise_ratio: f64) -> Vec<f64> {
    let n = y.len();
    if n == 0 {
        return Vec::new();
    }
    let observed: Vec<f64> = y.iter().copied().filter(|v| v.is_finite()).collect();
    let r = variance(&observed);
    if !(r.is_finite() && r > 0.0) {
        return y.to_vec();
    }
    let q = (process_noise_ratio * r).max(f64::MIN_POSITIVE);

    let first = observed[0];
    let mut x_f = vec![0.0; n];
    let mut p_f = vec![0.0; n];
    let (mut x_prev, mut p_prev) = (first, r);

    for t in 0..n {
        let (x_pred, p_pred) = if t == 0 { (x_prev, p_prev) } else { (x_prev, p_prev + q) };
        let (x, p) = if y[t].is_finite() {
            let k = p_pred / (p_pred + r);
            (x_pred + k * (y[t] - x_pred), (1.0 - k) * p_pred)
        } else {
            (x_pred, p_pred)
        };
        x_f[t] = x;
        p_f[t] = p;
        x_prev = x;
        p_prev = p;
    }

    let mut x_s = x_f.clone();
    for t in (0..n - 1).rev() {
        let gain = p_f[t] / (p_f[t] + q);
        x_s[t] = x_f[t] + gain * (x_s[t + 1] - x_f[t]);
    }
    x_s
}
