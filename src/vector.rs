/// Cosine similarity. HIGHER is ALWAYS closer/better, range [-1, 1].
/// Returns 0.0 when either vector has zero norm.
///
/// Both slices must have the same length; callers validate dimensionality
/// before reaching this point.
///
/// The 8-lane unroll leaves the loop shaped for auto-vectorization (two
/// AVX2 registers of f64).
#[inline(always)]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    // f64 sums: squares of finite f32 values past ~1e19 overflow f32.
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    let chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let remainder_start = a.len() - a.len() % 8;

    for (ac, bc) in chunks.zip(b_chunks) {
        for lane in 0..8 {
            let (x, y) = (ac[lane] as f64, bc[lane] as f64);
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }
    }

    for i in remainder_start..a.len().min(b.len()) {
        let (x, y) = (a[i] as f64, b[i] as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    // Rounding can push parallel vectors a hair past 1.0
    score.clamp(-1.0, 1.0) as f32
}

/// Why a vector was refused before it reached the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorDefect {
    Empty,
    NonFinite { position: usize },
}

impl std::fmt::Display for VectorDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDefect::Empty => write!(f, "vector is empty"),
            VectorDefect::NonFinite { position } => {
                write!(f, "vector holds a non-finite value at position {}", position)
            }
        }
    }
}

pub fn validate(vector: &[f32]) -> Result<(), VectorDefect> {
    if vector.is_empty() {
        return Err(VectorDefect::Empty);
    }
    match vector.iter().position(|v| !v.is_finite()) {
        Some(position) => Err(VectorDefect::NonFinite { position }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identical_vectors_score_one() {
        let a = vec![0.3, -1.2, 4.0, 0.5, 2.2, 7.1, -0.4, 1.0, 3.3, 0.9];
        assert_relative_eq!(cosine_similarity(&a, &a), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let b = vec![-3.0, 0.5, 2.0, 1.0, 0.0, -6.0, 2.5, 1.5, 4.0];
        assert_relative_eq!(
            cosine_similarity(&a, &b),
            cosine_similarity(&b, &a),
            epsilon = 1e-6
        );
    }

    #[test]
    fn orthogonal_and_opposite() {
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0, epsilon = 1e-6);
        assert_relative_eq!(
            cosine_similarity(&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]),
            -1.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn zero_norm_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn large_magnitudes_do_not_overflow() {
        let big = [1e20f32, 0.0, 0.0];
        let score = cosine_similarity(&big, &big);
        assert!(!score.is_nan());
        assert_relative_eq!(score, 1.0, epsilon = 1e-6);

        assert_relative_eq!(cosine_similarity(&[1e20, 0.0], &[1.0, 0.0]), 1.0, epsilon = 1e-6);

        let wide = vec![3e38f32; 17];
        assert_relative_eq!(cosine_similarity(&wide, &wide), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn validate_rejects_empty_and_nan() {
        assert_eq!(validate(&[]), Err(VectorDefect::Empty));
        assert_eq!(
            validate(&[1.0, f32::NAN]),
            Err(VectorDefect::NonFinite { position: 1 })
        );
        assert_eq!(validate(&[1.0, 2.0]), Ok(()));
    }
}
