// src/vector_index.rs
//! Similarity search over knowledge base chunk embeddings.
//!
//! Vectors are addressed by their insertion position, which is also the
//! chunk's position in the knowledge base.

use async_trait::async_trait;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum IndexError {
    #[error("vector dimension mismatch: index has {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("vector index backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    pub distance: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Drops all stored vectors and fixes the dimension for the next `add`.
    async fn reset(&self, dimension: usize) -> Result<(), IndexError>;

    async fn add(&self, vectors: Vec<Vec<f32>>) -> Result<(), IndexError>;

    /// Up to `k` nearest vectors, closest first.
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError>;

    async fn len(&self) -> Result<usize, IndexError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
struct FlatState {
    dimension: usize,
    data: Vec<f32>,
}

/// Exact in-memory search by squared Euclidean distance.
#[derive(Debug, Default)]
pub struct FlatL2Index {
    state: RwLock<FlatState>,
}

impl FlatL2Index {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, FlatState>, IndexError> {
        self.state
            .write()
            .map_err(|_| IndexError::Backend("index lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, FlatState>, IndexError> {
        self.state
            .read()
            .map_err(|_| IndexError::Backend("index lock poisoned".to_string()))
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[async_trait]
impl VectorIndex for FlatL2Index {
    async fn reset(&self, dimension: usize) -> Result<(), IndexError> {
        let mut state = self.write()?;
        state.dimension = dimension;
        state.data.clear();
        Ok(())
    }

    async fn add(&self, vectors: Vec<Vec<f32>>) -> Result<(), IndexError> {
        let mut state = self.write()?;
        if state.dimension == 0 {
            if let Some(first) = vectors.first() {
                state.dimension = first.len();
            }
        }

        let dimension = state.dimension;
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: bad.len(),
            });
        }

        for vector in vectors {
            state.data.extend(vector);
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let state = self.read()?;
        if state.data.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != state.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: state.dimension,
                got: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = state
            .data
            .chunks_exact(state.dimension)
            .enumerate()
            .map(|(position, vector)| SearchHit {
                position,
                distance: squared_l2(vector, query),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn len(&self) -> Result<usize, IndexError> {
        let state = self.read()?;
        if state.dimension == 0 {
            return Ok(0);
        }
        Ok(state.data.len() / state.dimension)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_index_returns_no_hits() {
        let index = FlatL2Index::new();
        assert_eq!(index.search(&[1.0, 2.0], 1).await.unwrap(), vec![]);
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nearest_vector_comes_first() {
        let index = FlatL2Index::new();
        index.reset(2).await.unwrap();
        index
            .add(vec![vec![0.0, 0.0], vec![10.0, 10.0], vec![1.0, 1.0]])
            .await
            .unwrap();

        let hits = index.search(&[0.9, 1.2], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].position, 2);
        assert_eq!(hits[1].position, 0);
        assert!(hits[0].distance < hits[1].distance);
        assert!((hits[0].distance - 0.05).abs() < 1e-5);
    }

    #[tokio::test]
    async fn k_larger_than_index_returns_everything() {
        let index = FlatL2Index::new();
        index.add(vec![vec![1.0], vec![2.0]]).await.unwrap();
        assert_eq!(index.search(&[0.0], 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected() {
        let index = FlatL2Index::new();
        index.reset(3).await.unwrap();

        let err = index.add(vec![vec![1.0, 2.0]]).await.unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 3, got: 2 });

        index.add(vec![vec![1.0, 2.0, 3.0]]).await.unwrap();
        let err = index.search(&[1.0], 1).await.unwrap_err();
        assert_eq!(err, IndexError::DimensionMismatch { expected: 3, got: 1 });
    }

    #[tokio::test]
    async fn reset_clears_previous_vectors() {
        let index = FlatL2Index::new();
        index.add(vec![vec![1.0, 1.0]]).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);

        index.reset(4).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 0);
        index.add(vec![vec![0.0; 4], vec![1.0; 4]]).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 2);
    }
}
