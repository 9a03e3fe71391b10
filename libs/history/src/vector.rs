//! Embedding vector codec and similarity.
//!
//! Vectors are packed as little-endian `f32`s and base64-encoded so they
//! fit a TEXT column; the reverse on read. Cosine similarity guards
//! zero-magnitude inputs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::HistoryError;

pub fn serialize_embedding(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(bytes)
}

pub fn deserialize_embedding(encoded: &str) -> Result<Vec<f32>, HistoryError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| HistoryError::Vector(format!("not base64: {e}")))?;
    if bytes.len() % 4 != 0 {
        return Err(HistoryError::Vector(format!(
            "length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_every_float() {
        let vectors = [
            vec![0.0f32],
            vec![1.0, -1.0, 0.5, f32::MIN_POSITIVE],
            (0..1536).map(|i| (i as f32) * 0.001 - 0.7).collect::<Vec<_>>(),
            (0..4096).map(|i| (i as f32).sin()).collect::<Vec<_>>(),
        ];
        for vector in vectors {
            let encoded = serialize_embedding(&vector);
            let decoded = deserialize_embedding(&encoded).unwrap();
            assert_eq!(decoded, vector);
        }
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let encoded = serialize_embedding(&[1.0, 2.0]);
        let bytes = BASE64.decode(&encoded).unwrap();
        let truncated = BASE64.encode(&bytes[..5]);
        assert!(deserialize_embedding(&truncated).is_err());
    }

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = [0.3f32, -0.2, 0.9];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6, "got {sim}");
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn zero_magnitude_guard() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn known_similarity_value() {
        // cos(angle) between (1,0) and (0.9, sqrt(1-0.81)) is exactly 0.9.
        let b = [0.9f32, (1.0f32 - 0.81).sqrt()];
        let sim = cosine_similarity(&[1.0, 0.0], &b);
        assert!((sim - 0.9).abs() < 1e-6, "got {sim}");
    }
}
