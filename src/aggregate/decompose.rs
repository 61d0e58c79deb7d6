//! Seasonal-trend decomposition by LOESS (STL).
//!
//! This is the classic inner loop of STL (Cleveland et al., 1990) without the
//! robustness iterations:
//!
//! 1. detrend, smooth each cycle-subseries with LOESS (extended one period on
//!    both sides)
//! 2. low-pass filter the extended seasonal (MA(np) → MA(np) → MA(3) → LOESS)
//!    and subtract it
//! 3. LOESS the deseasonalized series to get the trend
//!
//! All LOESS fits are local-linear with tricube weights.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecompositionError {
    #[error("seasonal period must be at least 2, got {0}")]
    InvalidPeriod(usize),
    #[error("series has {n} observations, need at least {needed} for period {period}")]
    SeriesTooShort { n: usize, needed: usize, period: usize },
    #[error("series contains non-finite values")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub trend: Vec<f64>,
    pub seasonal: Vec<f64>,
    pub resid: Vec<f64>,
}

const SEASONAL_SPAN: usize = 7;
const INNER_ITERATIONS: usize = 2;

fn next_odd(x: f64) -> usize {
    let n = x.ceil().max(1.0) as usize;
    if n % 2 == 0 { n + 1 } else { n }
}

/// Decompose `y` into trend + seasonal + residual for seasonal period `period`.
pub fn stl(y: &[f64], period: usize) -> Result<Decomposition, DecompositionError> {
    if period < 2 {
        return Err(DecompositionError::InvalidPeriod(period));
    }
    let n = y.len();
    if n < 2 * period {
        return Err(DecompositionError::SeriesTooShort {
            n,
            needed: 2 * period,
            period,
        });
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(DecompositionError::NonFinite);
    }

    let np = period;
    let ns = SEASONAL_SPAN;
    let nl = next_odd(np as f64);
    let nt = next_odd(1.5 * np as f64 / (1.0 - 1.5 / ns as f64));

    let mut trend = vec![0.0; n];
    let mut seasonal = vec![0.0; n];

    for _ in 0..INNER_ITERATIONS {
        let detrended: Vec<f64> = y.iter().zip(&trend).map(|(a, t)| a - t).collect();
        let cycle = cycle_subseries(&detrended, np, ns);

        let low = moving_average(&moving_average(&moving_average(&cycle, np), np), 3);
        let low = loess_series(&low, nl);

        for i in 0..n {
            seasonal[i] = cycle[np + i] - low[i];
        }

        let deseasonalized: Vec<f64> = y.iter().zip(&seasonal).map(|(a, s)| a - s).collect();
        trend = loess_series(&deseasonalized, nt);
    }

    let resid = (0..n).map(|i| y[i] - trend[i] - seasonal[i]).collect();
    Ok(Decomposition { trend, seasonal, resid })
}

/// Smooth each phase's subseries and extend it by one point on both ends.
///
/// The result has length `n + 2 * np`; index `(k + 1) * np + j` holds phase `j`
/// at subseries position `k` (`k = -1 ..= m_j`).
fn cycle_subseries(x: &[f64], np: usize, span: usize) -> Vec<f64> {
    let n = x.len();
    let mut out = vec![0.0; n + 2 * np];
    for j in 0..np {
        let sub: Vec<f64> = x.iter().skip(j).step_by(np).copied().collect();
        let m = sub.len() as isize;
        for k in -1..=m {
            let idx = ((k + 1) as usize) * np + j;
            if idx < out.len() {
                out[idx] = loess_at(&sub, span, k as f64);
            }
        }
    }
    out
}

fn moving_average(x: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || x.len() < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(x.len() - window + 1);
    let mut sum: f64 = x[..window].iter().sum();
    out.push(sum / window as f64);
    for i in window..x.len() {
        sum += x[i] - x[i - window];
        out.push(sum / window as f64);
    }
    out
}

fn loess_series(y: &[f64], span: usize) -> Vec<f64> {
    (0..y.len()).map(|i| loess_at(y, span, i as f64)).collect()
}

/// Local-linear LOESS estimate at `x0` over the points `(i, y[i])`.
fn loess_at(y: &[f64], span: usize, x0: f64) -> f64 {
    let n = y.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return y[0];
    }

    let q = span.clamp(1, n);
    let centre = x0.round() as isize - (q as isize) / 2;
    let lo = centre.clamp(0, (n - q) as isize) as usize;
    let hi = lo + q - 1;

    let mut h = (x0 - lo as f64).abs().max((hi as f64 - x0).abs());
    if span > n {
        h += ((span - n) / 2) as f64;
    }
    if h <= 0.0 {
        return y[lo];
    }

    let mut sw = 0.0;
    let mut swx = 0.0;
    let mut swy = 0.0;
    let mut weights = Vec::with_capacity(q);
    for i in lo..=hi {
        let r = (i as f64 - x0).abs() / h;
        let w = if r < 1.0 { (1.0 - r * r * r).powi(3) } else { 0.0 };
        weights.push(w);
        sw += w;
        swx += w * i as f64;
        swy += w * y[i];
    }
    if sw <= 0.0 {
        return y[lo..=hi].iter().sum::<f64>() / q as f64;
    }

    let x_bar = swx / sw;
    let y_bar = swy / sw;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (offset, w) in weights.iter().enumerate() {
        let dx = (lo + offset) as f64 - x_bar;
        sxx += w * dx * dx;
        sxy += w * dx * (y[lo + offset] - y_bar);
    }
    let range = (hi - lo) as f64;
    if sxx <= 1e-12 * range.max(1.0).powi(2) {
        return y_bar;
    }
    y_bar + sxy / sxx * (x0 - x_bar)
}
