// THEORY:
// The `DominantColorEstimator` answers one question about an image: "what color
// does it mostly look like?" It runs k-means over the image's quantized samples and
// reports the centroid of the most populous cluster.
//
// Key architectural principles:
// 1.  **Histogram first**: quantized samples repeat heavily (at most 26^3 distinct
//     values), so the estimator clusters the histogram of distinct colors with each
//     color weighted by its count. Weighted Lloyd iterations over the histogram give
//     exactly the centroids that plain k-means gives over every sample, at a
//     fraction of the cost.
// 2.  **k-means++ seeding**: the first centroid is drawn proportionally to member
//     count, every following one proportionally to `count * D^2`, where `D` is the
//     distance to the nearest centroid chosen so far. The RNG is seeded and the
//     histogram is ordered, so one configuration always produces one answer.
// 3.  **Explicit tie-breaks**: a color equidistant from two centroids joins the
//     lower-indexed one, and when two clusters have the same membership the
//     lower-indexed one is dominant. Nothing depends on incidental collection order.
// 4.  **Degenerate input is not an error here**: zero samples yields zero clusters
//     and no dominant color; the caller decides what that means.

use crate::core_modules::color_sampler::ColorSample;
use crate::core_modules::pixel::pixel::Rgb;
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use std::collections::BTreeMap;

pub const DEFAULT_CLUSTERS: usize = 3;
pub const DEFAULT_MAX_ITERATIONS: usize = 25;
pub const DEFAULT_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_SEED: u64 = 0x5EED_C010;

type Point = [f64; 3];

/// Tunables for the clustering run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansOptions {
    pub clusters: usize,
    pub max_iterations: usize,
    /// Iteration stops once no centroid moves farther than this.
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            clusters: DEFAULT_CLUSTERS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            seed: DEFAULT_SEED,
        }
    }
}

/// One group of similar colors.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorCluster {
    pub centroid: Point,
    pub members: usize,
}

impl ColorCluster {
    /// The centroid rounded to integer channels.
    pub fn color(&self) -> Rgb {
        let channel = |value: f64| value.round().clamp(0.0, 255.0) as u8;
        Rgb::new(channel(self.centroid[0]), channel(self.centroid[1]), channel(self.centroid[2]))
    }
}

struct WeightedColor {
    point: Point,
    count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DominantColorEstimator {
    pub options: KMeansOptions,
}

impl DominantColorEstimator {
    pub fn new(options: KMeansOptions) -> Self {
        Self { options }
    }

    /// The rounded centroid of the most populous cluster, or `None` without samples.
    pub fn dominant(&self, samples: &[ColorSample]) -> Option<Rgb> {
        let clusters = self.cluster(samples);
        let mut best: Option<&ColorCluster> = None;
        for cluster in &clusters {
            // Strictly greater: ties stay with the lower index.
            if best.is_none_or(|current| cluster.members > current.members) {
                best = Some(cluster);
            }
        }
        best.map(ColorCluster::color)
    }

    /// Partitions `samples` into at most `options.clusters` clusters.
    pub fn cluster(&self, samples: &[ColorSample]) -> Vec<ColorCluster> {
        let histogram = histogram(samples);
        if histogram.is_empty() || self.options.clusters == 0 {
            return Vec::new();
        }

        let mut rng = StdRng::seed_from_u64(self.options.seed);
        let mut centroids = seed_centroids(&histogram, self.options.clusters, &mut rng);
        let mut assignments = vec![0usize; histogram.len()];

        for _ in 0..self.options.max_iterations.max(1) {
            assign(&histogram, &centroids, &mut assignments);
            let moved = relocate(&histogram, &assignments, &mut centroids);
            if moved < self.options.tolerance {
                break;
            }
        }
        assign(&histogram, &centroids, &mut assignments);

        let mut members = vec![0usize; centroids.len()];
        for (color, &cluster) in histogram.iter().zip(&assignments) {
            members[cluster] += color.count;
        }

        centroids
            .into_iter()
            .zip(members)
            .map(|(centroid, members)| ColorCluster { centroid, members })
            .collect()
    }
}

fn histogram(samples: &[ColorSample]) -> Vec<WeightedColor> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for sample in samples {
        *counts.entry(sample.to_packed()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(packed, count)| WeightedColor {
            point: Rgb::from_packed(packed).into(),
            count,
        })
        .collect()
}

fn seed_centroids(histogram: &[WeightedColor], clusters: usize, rng: &mut StdRng) -> Vec<Point> {
    let mut centroids: Vec<Point> = Vec::with_capacity(clusters);

    let counts = histogram.iter().map(|color| color.count as f64);
    let first = match WeightedIndex::new(counts) {
        Ok(distribution) => distribution.sample(rng),
        Err(_) => 0,
    };
    centroids.push(histogram[first].point);

    while centroids.len() < clusters {
        let weights: Vec<f64> = histogram
            .iter()
            .map(|color| color.count as f64 * nearest(&color.point, &centroids).1)
            .collect();
        // All weights vanish once every distinct color is already a centroid;
        // the remaining centroids duplicate an existing one and stay empty.
        let next = match WeightedIndex::new(&weights) {
            Ok(distribution) => distribution.sample(rng),
            Err(_) => first,
        };
        centroids.push(histogram[next].point);
    }
    centroids
}

fn assign(histogram: &[WeightedColor], centroids: &[Point], assignments: &mut [usize]) {
    for (color, slot) in histogram.iter().zip(assignments.iter_mut()) {
        *slot = nearest(&color.point, centroids).0;
    }
}

/// Moves every centroid to the weighted mean of its members and returns the
/// largest distance any centroid moved. Empty clusters stay where they are.
fn relocate(histogram: &[WeightedColor], assignments: &[usize], centroids: &mut [Point]) -> f64 {
    let mut sums = vec![[0.0f64; 3]; centroids.len()];
    let mut weights = vec![0.0f64; centroids.len()];
    for (color, &cluster) in histogram.iter().zip(assignments) {
        let weight = color.count as f64;
        for channel in 0..3 {
            sums[cluster][channel] += color.point[channel] * weight;
        }
        weights[cluster] += weight;
    }

    let mut moved: f64 = 0.0;
    for (index, centroid) in centroids.iter_mut().enumerate() {
        if weights[index] == 0.0 {
            continue;
        }
        let next = [
            sums[index][0] / weights[index],
            sums[index][1] / weights[index],
            sums[index][2] / weights[index],
        ];
        moved = moved.max(squared_distance(centroid, &next).sqrt());
        *centroid = next;
    }
    moved
}

/// Index of and squared distance to the closest centroid; ties go to the lowest index.
fn nearest(point: &Point, centroids: &[Point]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (index, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best.1 {
            best = (index, distance);
        }
    }
    best
}

fn squared_distance(a: &Point, b: &Point) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}
