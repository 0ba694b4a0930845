//! Deterministic fake [`EmbeddingClient`] for tests: maps text to a vector
//! via a caller-supplied function so cosine-similarity behavior is
//! reproducible without a network call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::embedding::EmbeddingClient;
use crate::error::EmbeddingError;

pub struct FixedEmbeddingClient {
    dim: usize,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    fail_on: Mutex<Option<String>>,
}

impl FixedEmbeddingClient {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(None),
        }
    }

    /// Registers the vector to return for an exact `text` match.
    pub fn set(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.vectors.lock().unwrap().insert(text.into(), vector);
    }

    /// Makes the next `embed` call for this text return an error.
    pub fn fail_on(&self, text: impl Into<String>) {
        *self.fail_on.lock().unwrap() = Some(text.into());
    }
}

#[async_trait]
impl EmbeddingClient for FixedEmbeddingClient {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.fail_on.lock().unwrap().as_deref() == Some(text) {
            return Err(EmbeddingError::RequestFailed("forced test failure".to_string()));
        }
        match self.vectors.lock().unwrap().get(text) {
            Some(v) => Ok(v.clone()),
            None => {
                // Deterministic fallback: hash text into a unit-ish vector so
                // unregistered prompts still get a stable, distinct embedding.
                let mut v = vec![0.0_f32; self.dim];
                for (i, byte) in text.bytes().enumerate() {
                    v[i % self.dim] += byte as f32 / 255.0;
                }
                Ok(v)
            }
        }
    }
}
