//! Point-set downsampling for reference samples.
//!
//! Registration cost grows super-linearly with point count, so the
//! reference-accelerated aligner first reduces every sample to a
//! representative subset. Index selection is host-side and runs in parallel
//! across samples; the selected rows are then gathered on the device.

use burn::tensor::backend::Backend;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::sample::Sample;
use crate::tensor::to_host;

/// Strategy used to pick the reference subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplingMethod {
    /// Coverage-oriented farthest-point selection.
    #[default]
    Trn,
    /// Points nearest to k-means centroids.
    KMeans,
    /// Uniform random subset.
    Random,
}

impl FromStr for SamplingMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trn" | "fps" => Ok(Self::Trn),
            "kmeans" => Ok(Self::KMeans),
            "random" => Ok(Self::Random),
            other => Err(CoreError::invalid_argument(format!(
                "unknown sampling method '{}', expected one of trn, kmeans, random",
                other
            ))),
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trn => write!(f, "trn"),
            Self::KMeans => write!(f, "kmeans"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// Reduces each sample of a list to at most `n_sampling` points.
///
/// Implementations must preserve the list length and order.
pub trait Downsampler<B: Backend> {
    /// Downsample every sample using the coordinates under `spatial_key`.
    fn downsample(
        &self,
        samples: &[Sample<B>],
        n_sampling: usize,
        method: SamplingMethod,
        spatial_key: &str,
    ) -> Result<Vec<Sample<B>>>;
}

/// Default downsampler over raw coordinates.
#[derive(Debug, Clone)]
pub struct PointDownsampler {
    /// Seed for [`SamplingMethod::Random`]; sample `i` uses `seed + i`.
    pub seed: u64,
    /// Lloyd iterations for [`SamplingMethod::KMeans`].
    pub kmeans_iterations: usize,
}

impl Default for PointDownsampler {
    fn default() -> Self {
        Self {
            seed: 0,
            kmeans_iterations: 20,
        }
    }
}

impl PointDownsampler {
    /// Create a downsampler with the given random seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Set the number of k-means iterations.
    pub fn with_kmeans_iterations(mut self, iterations: usize) -> Self {
        self.kmeans_iterations = iterations;
        self
    }

    /// Pick at most `k` row indices out of `n` points of dimension `d`.
    ///
    /// Indices come back sorted, so `k >= n` selects the identity set for
    /// every method.
    pub fn select_indices(
        &self,
        coords: &[f64],
        d: usize,
        k: usize,
        method: SamplingMethod,
        stream: u64,
    ) -> Vec<usize> {
        let n = if d == 0 { 0 } else { coords.len() / d };
        if k >= n {
            return (0..n).collect();
        }

        let mut picked = match method {
            SamplingMethod::Trn => farthest_point(coords, d, k),
            SamplingMethod::KMeans => kmeans_medoids(coords, d, k, self.kmeans_iterations),
            SamplingMethod::Random => {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(stream));
                rand::seq::index::sample(&mut rng, n, k).into_vec()
            }
        };
        picked.sort_unstable();
        picked
    }
}

impl<B: Backend> Downsampler<B> for PointDownsampler {
    fn downsample(
        &self,
        samples: &[Sample<B>],
        n_sampling: usize,
        method: SamplingMethod,
        spatial_key: &str,
    ) -> Result<Vec<Sample<B>>> {
        if n_sampling == 0 {
            return Err(CoreError::invalid_argument("n_sampling must be positive"));
        }

        let hosts = samples
            .iter()
            .map(|s| {
                let coords = s.obsm(spatial_key)?;
                let d = coords.dims()[1];
                Ok((to_host(coords.clone()), d))
            })
            .collect::<Result<Vec<_>>>()?;

        let selections: Vec<Vec<usize>> = hosts
            .par_iter()
            .enumerate()
            .map(|(i, (coords, d))| self.select_indices(coords, *d, n_sampling, method, i as u64))
            .collect();

        samples
            .iter()
            .zip(selections)
            .map(|(sample, indices)| {
                tracing::debug!(
                    "Downsampled '{}' from {} to {} points ({})",
                    sample.name(),
                    sample.n_points(),
                    indices.len(),
                    method
                );
                sample.subset(&indices)
            })
            .collect()
    }
}

fn squared_distance(coords: &[f64], d: usize, i: usize, point: &[f64]) -> f64 {
    coords[i * d..(i + 1) * d]
        .iter()
        .zip(point)
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

fn centroid(coords: &[f64], d: usize) -> Vec<f64> {
    let n = coords.len() / d;
    let mut c = vec![0.0; d];
    for row in coords.chunks_exact(d) {
        for (acc, v) in c.iter_mut().zip(row) {
            *acc += v;
        }
    }
    c.iter_mut().for_each(|v| *v /= n as f64);
    c
}

/// Greedy farthest-point selection seeded at the point nearest the centroid.
fn farthest_point(coords: &[f64], d: usize, k: usize) -> Vec<usize> {
    let n = coords.len() / d;
    let center = centroid(coords, d);
    let first = (0..n)
        .min_by(|&a, &b| {
            squared_distance(coords, d, a, &center)
                .total_cmp(&squared_distance(coords, d, b, &center))
        })
        .unwrap_or(0);

    let mut picked = Vec::with_capacity(k);
    let mut taken = vec![false; n];
    let mut min_dist = vec![f64::INFINITY; n];
    let mut current = first;
    for _ in 0..k.min(n) {
        picked.push(current);
        taken[current] = true;
        let anchor = coords[current * d..(current + 1) * d].to_vec();
        // coincident leftovers all sit at zero; the first untaken one wins
        let mut best: Option<(usize, f64)> = None;
        for i in 0..n {
            let dist = squared_distance(coords, d, i, &anchor);
            if dist < min_dist[i] {
                min_dist[i] = dist;
            }
            if !taken[i] && best.map_or(true, |(_, b)| min_dist[i] > b) {
                best = Some((i, min_dist[i]));
            }
        }
        match best {
            Some((i, _)) => current = i,
            None => break,
        }
    }
    picked
}

/// Lloyd's k-means initialised from farthest points; returns the data point
/// nearest to each centroid.
fn kmeans_medoids(coords: &[f64], d: usize, k: usize, iterations: usize) -> Vec<usize> {
    let n = coords.len() / d;
    let mut centers: Vec<Vec<f64>> = farthest_point(coords, d, k)
        .into_iter()
        .map(|i| coords[i * d..(i + 1) * d].to_vec())
        .collect();

    let nearest_center = |i: usize, centers: &[Vec<f64>]| -> usize {
        (0..centers.len())
            .min_by(|&a, &b| {
                squared_distance(coords, d, i, &centers[a])
                    .total_cmp(&squared_distance(coords, d, i, &centers[b]))
            })
            .unwrap_or(0)
    };

    for _ in 0..iterations {
        let mut sums = vec![vec![0.0; d]; k];
        let mut counts = vec![0usize; k];
        for i in 0..n {
            let c = nearest_center(i, &centers);
            counts[c] += 1;
            for (acc, v) in sums[c].iter_mut().zip(&coords[i * d..(i + 1) * d]) {
                *acc += v;
            }
        }
        for (c, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
            if count > 0 {
                centers[c] = sum.into_iter().map(|v| v / count as f64).collect();
            }
        }
    }

    centers
        .iter()
        .map(|center| {
            (0..n)
                .min_by(|&a, &b| {
                    squared_distance(coords, d, a, center)
                        .total_cmp(&squared_distance(coords, d, b, center))
                })
                .unwrap_or(0)
        })
        .collect::<BTreeSet<usize>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::from_rows;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn grid(side: usize) -> Vec<f64> {
        let mut v = Vec::with_capacity(side * side * 2);
        for y in 0..side {
            for x in 0..side {
                v.push(x as f64);
                v.push(y as f64);
            }
        }
        v
    }

    #[test]
    fn test_identity_when_k_exceeds_points() {
        let sampler = PointDownsampler::default();
        let coords = grid(3);
        for method in [SamplingMethod::Trn, SamplingMethod::KMeans, SamplingMethod::Random] {
            assert_eq!(
                sampler.select_indices(&coords, 2, 9, method, 0),
                (0..9).collect::<Vec<_>>()
            );
            assert_eq!(sampler.select_indices(&coords, 2, 50, method, 0).len(), 9);
        }
    }

    #[test]
    fn test_farthest_point_covers_corners() {
        let coords = grid(5);
        let picked =
            PointDownsampler::default().select_indices(&coords, 2, 5, SamplingMethod::Trn, 0);
        assert_eq!(picked.len(), 5);
        // centre first, then the four corners
        for corner in [0, 4, 20, 24] {
            assert!(picked.contains(&corner), "missing corner {corner} in {picked:?}");
        }
    }

    #[test]
    fn test_random_is_seeded() {
        let coords = grid(10);
        let sampler = PointDownsampler::new(7);
        let a = sampler.select_indices(&coords, 2, 10, SamplingMethod::Random, 1);
        let b = sampler.select_indices(&coords, 2, 10, SamplingMethod::Random, 1);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_kmeans_returns_distinct_points() {
        let coords = grid(6);
        let picked =
            PointDownsampler::default().select_indices(&coords, 2, 4, SamplingMethod::KMeans, 0);
        assert!(!picked.is_empty() && picked.len() <= 4);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_farthest_point_skips_coincident_duplicates() {
        // five sites, two points stacked on each
        let mut coords = Vec::new();
        for site in 0..5 {
            for _ in 0..2 {
                coords.extend([site as f64 * 3.0, (site % 2) as f64]);
            }
        }
        let picked =
            PointDownsampler::default().select_indices(&coords, 2, 7, SamplingMethod::Trn, 0);
        assert_eq!(picked.len(), 7);
        assert!(picked.windows(2).all(|w| w[0] < w[1]), "repeated index in {picked:?}");

        // every site is covered before any site is revisited
        let sites: BTreeSet<usize> = picked.iter().map(|i| i / 2).collect();
        assert_eq!(sites.len(), 5);
    }

    #[test]
    fn test_downsample_preserves_list_length() {
        let device = Default::default();
        let samples: Vec<Sample<B>> = (0..3)
            .map(|i| {
                let coords = from_rows::<B>(grid(4), 16, 2, &device);
                let x = from_rows::<B>(vec![1.0; 16], 16, 1, &device);
                Sample::new(format!("s{i}"), "spatial", coords, x, vec!["g".into()]).unwrap()
            })
            .collect();
        let reduced = PointDownsampler::default()
            .downsample(&samples, 6, SamplingMethod::Trn, "spatial")
            .unwrap();
        assert_eq!(reduced.len(), 3);
        assert!(reduced.iter().all(|s| s.n_points() == 6));
        assert_eq!(reduced[2].name(), "s2");
    }

    #[test]
    fn test_zero_sampling_is_rejected() {
        let samples: Vec<Sample<B>> = Vec::new();
        assert!(PointDownsampler::default()
            .downsample(&samples, 0, SamplingMethod::Trn, "spatial")
            .is_err());
    }
}
