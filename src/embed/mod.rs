pub mod ollama;

use anyhow::Result;

pub type Embedding = Vec<f32>;

/// Turns an item's descriptive text into a fixed-dimension vector.
///
/// Only called when an item is published or backfilled; recommendation
/// itself never encodes anything.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Embedding>;
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// Cosine similarity of two vectors.
///
/// Returns `None` when either side has zero magnitude or the lengths differ,
/// since the similarity is undefined in both cases. Accumulates in f64 so any
/// finite non-zero f32 vector has a representable squared norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        None
    } else {
        Some((dot / denom) as f32)
    }
}

/// Coordinate-wise mean of a set of equal-length vectors.
/// `None` for an empty input.
pub fn centroid(vectors: &[&[f32]]) -> Option<Embedding> {
    let first = vectors.first()?;
    let mut sum = vec![0.0f64; first.len()];
    for v in vectors {
        debug_assert_eq!(v.len(), sum.len());
        for (acc, &x) in sum.iter_mut().zip(v.iter()) {
            *acc += f64::from(x);
        }
    }
    let n = vectors.len() as f64;
    Some(sum.into_iter().map(|acc| (acc / n) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
    }

    #[test]
    fn cosine_ignores_magnitude() {
        let sim = cosine_similarity(&[1.0, 1.0, 0.0], &[10.0, 10.0, 0.0]).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_undefined_for_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 0.0, 0.0]), None);
    }

    #[test]
    fn cosine_undefined_for_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), None);
    }

    #[test]
    fn centroid_is_coordinate_mean() {
        let a = [1.0, 0.0, 2.0];
        let b = [3.0, 4.0, 0.0];
        let c = centroid(&[&a, &b]).unwrap();
        assert_eq!(c, vec![2.0, 2.0, 1.0]);
    }

    #[test]
    fn cosine_survives_extreme_magnitudes() {
        let tiny = cosine_similarity(&[1e-25, 0.0], &[1e-25, 1e-25]).unwrap();
        let huge = cosine_similarity(&[1e20, 0.0], &[1e20, 1e20]).unwrap();
        assert!((tiny - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((huge - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn centroid_of_near_max_values_does_not_overflow() {
        let a = [f32::MAX, 1.0];
        let b = [f32::MAX, 3.0];
        assert_eq!(centroid(&[&a, &b]).unwrap(), vec![f32::MAX, 2.0]);
    }

    #[test]
    fn centroid_of_nothing() {
        assert!(centroid(&[]).is_none());
    }
}
