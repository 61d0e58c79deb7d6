//! One-dimensional K-means.
//!
//! Lloyd iterations from k-means++ seeds, restarted `n_init` times; the run
//! with the lowest inertia wins. Seeding uses a `StdRng` so a given
//! `(data, k, seed)` always yields the same clustering.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    #[error("no observations to cluster")]
    Empty,
    #[error("k must be at least 1")]
    ZeroClusters,
    #[error("k = {k} exceeds the {n} available observations")]
    TooManyClusters { k: usize, n: usize },
}

/// A fitted 1-D clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeans1d {
    pub centroids: Vec<f64>,
    pub labels: Vec<usize>,
    /// Sum of squared distances to the assigned centroid.
    pub inertia: f64,
    pub n_iter: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansOptions {
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            n_init: 10,
            max_iter: 300,
            tol: 1e-10,
        }
    }
}

/// Zero-mean, unit-variance scaling of a single feature.
///
/// A constant feature keeps scale 1 so it maps to all zeros.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaler1d {
    pub mean: f64,
    pub scale: f64,
}

impl Scaler1d {
    pub fn fit(data: &[f64]) -> Self {
        let mean = crate::math::mean(data);
        let std = crate::math::std_dev(data);
        Self {
            mean,
            scale: if std.is_finite() && std > 0.0 { std } else { 1.0 },
        }
    }

    pub fn transform(&self, data: &[f64]) -> Vec<f64> {
        data.iter().map(|x| (x - self.mean) / self.scale).collect()
    }

    pub fn inverse(&self, z: f64) -> f64 {
        z * self.scale + self.mean
    }
}

pub fn fit_kmeans(data: &[f64], k: usize, opts: &KMeansOptions) -> Result<KMeans1d, ClusterError> {
    if data.is_empty() {
        return Err(ClusterError::Empty);
    }
    if k == 0 {
        return Err(ClusterError::ZeroClusters);
    }
    if k > data.len() {
        return Err(ClusterError::TooManyClusters { k, n: data.len() });
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut best: Option<KMeans1d> = None;
    for _ in 0..opts.n_init.max(1) {
        let seeds = kmeans_plusplus(data, k, &mut rng);
        let run = lloyd(data, seeds, opts.max_iter, opts.tol);
        if best.as_ref().is_none_or(|b| run.inertia < b.inertia) {
            best = Some(run);
        }
    }
    best.ok_or(ClusterError::Empty)
}

fn nearest(centroids: &[f64], x: f64) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (j, &c) in centroids.iter().enumerate() {
        let d = (x - c) * (x - c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

/// k-means++: first seed uniform, then proportional to squared distance.
fn kmeans_plusplus(data: &[f64], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..data.len())]);

    while centroids.len() < k {
        let d2: Vec<f64> = data.iter().map(|&x| nearest(&centroids, x).1).collect();
        let total: f64 = d2.iter().sum();
        if total <= 0.0 {
            // Every point already sits on a centroid.
            centroids.push(data[rng.gen_range(0..data.len())]);
            continue;
        }
        let mut target = rng.r#gen::<f64>() * total;
        let mut pick = data.len() - 1;
        for (i, &d) in d2.iter().enumerate() {
            if target < d {
                pick = i;
                break;
            }
            target -= d;
        }
        centroids.push(data[pick]);
    }
    centroids
}

fn lloyd(data: &[f64], mut centroids: Vec<f64>, max_iter: usize, tol: f64) -> KMeans1d {
    let k = centroids.len();
    let mut labels = vec![0usize; data.len()];
    let mut n_iter = 0;

    for iter in 0..max_iter.max(1) {
        n_iter = iter + 1;
        for (label, &x) in labels.iter_mut().zip(data) {
            *label = nearest(&centroids, x).0;
        }

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (&label, &x) in labels.iter().zip(data) {
            sums[label] += x;
            counts[label] += 1;
        }

        let mut shift = 0.0f64;
        for j in 0..k {
            // Empty clusters keep their previous centroid.
            if counts[j] > 0 {
                let updated = sums[j] / counts[j] as f64;
                shift = shift.max((updated - centroids[j]).abs());
                centroids[j] = updated;
            }
        }
        if shift <= tol {
            break;
        }
    }

    for (label, &x) in labels.iter_mut().zip(data) {
        *label = nearest(&centroids, x).0;
    }
    let inertia = data
        .iter()
        .zip(&labels)
        .map(|(&x, &l)| (x - centroids[l]) * (x - centroids[l]))
        .sum();

    KMeans1d {
        centroids,
        labels,
        inertia,
        n_iter,
    }
}
