//! Text-to-vector remote call used to drive the semantic cache match.

pub mod http;
pub mod memory;

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// One attempt, no retry: a failure here degrades the orchestrator to the
/// exact-match-only path rather than blocking the request.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Little-endian `f32` serialization, chosen so stored embeddings round-trip
/// bit-for-bit and compare byte-equal without going through a float parser.
pub fn serialize(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn deserialize(bytes: &[u8]) -> Result<Vec<f32>, EmbeddingError> {
    if bytes.len() % 4 != 0 {
        return Err(EmbeddingError::InvalidResponse(format!(
            "embedding byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
