//! Seeded k-means (k-means++ initialization, Lloyd iterations).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Partition `points` into `k` clusters; returns one label per point.
///
/// Deterministic for a given seed and point order. Callers must ensure
/// `1 <= k <= points.len()` and that all points share one dimension.
pub fn kmeans(points: &[Vec<f32>], k: usize, seed: u64, max_iterations: usize) -> Vec<usize> {
    let n = points.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    let k = k.min(n);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centers = init_centers(points, k, &mut rng);
    let mut labels = vec![usize::MAX; n];

    for _ in 0..max_iterations.max(1) {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let nearest = nearest_center(point, &centers).0;
            if labels[i] != nearest {
                labels[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        update_centers(points, &labels, &mut centers);
    }

    labels
}

/// k-means++: each next center is drawn with probability proportional to the
/// squared distance from the closest center already chosen.
fn init_centers(points: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.random_range(0..points.len())].clone());

    while centers.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| f64::from(nearest_center(p, &centers).1))
            .collect();
        let total: f64 = weights.iter().sum();

        let next = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = weights.iter().rposition(|w| *w > 0.0).unwrap_or(0);
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // Every point sits on a center already.
            rng.random_range(0..points.len())
        };
        centers.push(points[next].clone());
    }

    centers
}

fn update_centers(points: &[Vec<f32>], labels: &[usize], centers: &mut [Vec<f32>]) {
    let dim = centers.first().map(Vec::len).unwrap_or(0);
    let mut sums = vec![vec![0.0f64; dim]; centers.len()];
    let mut counts = vec![0usize; centers.len()];

    for (point, &label) in points.iter().zip(labels) {
        counts[label] += 1;
        for (s, x) in sums[label].iter_mut().zip(point) {
            *s += f64::from(*x);
        }
    }

    for (c, center) in centers.iter_mut().enumerate() {
        // Empty clusters keep their previous center.
        if counts[c] == 0 {
            continue;
        }
        for (x, s) in center.iter_mut().zip(&sums[c]) {
            *x = (*s / counts[c] as f64) as f32;
        }
    }
}

/// Index of and squared distance to the closest center.
fn nearest_center(point: &[f32], centers: &[Vec<f32>]) -> (usize, f32) {
    centers
        .iter()
        .map(|c| squared_distance(point, c))
        .enumerate()
        .fold((0, f32::INFINITY), |best, (i, d)| if d < best.1 { (i, d) } else { best })
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
