use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("Vector dimensions must match: {left} != {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("Vectors cannot be empty")]
    Empty,
}

/// Strict cosine similarity between two embedding vectors.
/// Returns value between -1.0 (opposite) and 1.0 (identical)
pub fn try_cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    if a.is_empty() {
        return Err(SimilarityError::Empty);
    }

    // Accumulate in f64, long embeddings lose precision in f32
    let mut dot_product = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    // Avoid division by zero
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot_product / (norm_a.sqrt() * norm_b.sqrt());

    // Clamp to [-1, 1] to handle floating point errors
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}

/// Cosine similarity used for ranking: vectors that cannot be compared score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    try_cosine_similarity(a, b).unwrap_or(0.0)
}
