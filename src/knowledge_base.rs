// src/knowledge_base.rs
//! Static knowledge base: a text file split into paragraph chunks whose
//! embeddings live in a vector index. Loaded lazily on first use.

use crate::rag::Embedder;
use crate::vector_index::{IndexError, VectorIndex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Error, Debug)]
pub enum KnowledgeBaseError {
    #[error("Failed to read knowledge base file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to embed knowledge base: {0}")]
    Embedding(String),
    #[error("Expected {expected} chunk embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Splits on blank-line separators, trims each chunk and drops empty ones.
pub fn split_chunks(text: &str) -> Vec<String> {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct KnowledgeBase {
    path: PathBuf,
    index: Arc<dyn VectorIndex>,
    chunks: RwLock<Option<Arc<Vec<String>>>>,
    load_lock: Mutex<()>,
}

impl KnowledgeBase {
    pub fn new(path: impl Into<PathBuf>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            path: path.into(),
            index,
            chunks: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub async fn chunk_count(&self) -> Option<usize> {
        self.chunks.read().await.as_ref().map(|c| c.len())
    }

    /// Returns the loaded chunks, loading them first if needed. `None` means
    /// there is nothing to search: the file is missing or has no chunks.
    /// Such outcomes are not cached, so a later call tries again.
    pub async fn ensure_loaded(
        &self,
        embedder: &dyn Embedder,
    ) -> Result<Option<Arc<Vec<String>>>, KnowledgeBaseError> {
        if let Some(chunks) = self.chunks.read().await.as_ref() {
            return Ok(Some(chunks.clone()));
        }

        let _guard = self.load_lock.lock().await;

        // Another request may have finished loading while we waited
        if let Some(chunks) = self.chunks.read().await.as_ref() {
            return Ok(Some(chunks.clone()));
        }

        self.load(embedder).await
    }

    async fn load(
        &self,
        embedder: &dyn Embedder,
    ) -> Result<Option<Arc<Vec<String>>>, KnowledgeBaseError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!("Knowledge base file not found: {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let chunks = split_chunks(&text);
        if chunks.is_empty() {
            tracing::warn!("Knowledge base file is empty: {}", self.path.display());
            return Ok(None);
        }

        let vectors = embedder
            .embed_documents(&chunks)
            .await
            .map_err(|e| KnowledgeBaseError::Embedding(e.to_string()))?;

        if vectors.len() != chunks.len() {
            return Err(KnowledgeBaseError::CountMismatch {
                expected: chunks.len(),
                got: vectors.len(),
            });
        }

        let dimension = vectors.first().map(|v| v.len()).unwrap_or(0);
        self.index.reset(dimension).await?;
        self.index.add(vectors).await?;

        let chunks = Arc::new(chunks);
        *self.chunks.write().await = Some(chunks.clone());

        tracing::info!(
            "Knowledge base loaded: {} chunks, {} dimensions, {} index",
            chunks.len(),
            dimension,
            self.index.name()
        );
        Ok(Some(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::{testing::KeywordEmbedder, BoxError};
    use crate::vector_index::FlatL2Index;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    fn kb_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, BoxError> {
            Err("quota exceeded".into())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, BoxError> {
            Err("quota exceeded".into())
        }
    }

    #[test]
    fn split_chunks_drops_blank_paragraphs() {
        let text = "  First paragraph.\nstill first.\n\n\n\nSecond.  \n\n   \n\nThird";
        assert_eq!(
            split_chunks(text),
            vec!["First paragraph.\nstill first.", "Second.", "Third"]
        );
    }

    #[test]
    fn split_chunks_handles_windows_line_endings() {
        assert_eq!(split_chunks("one\r\n\r\ntwo\r\n"), vec!["one", "two"]);
    }

    #[test]
    fn split_chunks_of_whitespace_is_empty() {
        assert!(split_chunks(" \n\n \n").is_empty());
    }

    #[tokio::test]
    async fn loads_chunks_into_the_index() {
        let file = kb_file("Shipping takes 3 days.\n\nRefunds within 30 days.\n\nSupport hours 9-5.");
        let index = Arc::new(FlatL2Index::new());
        let kb = KnowledgeBase::new(file.path(), index.clone());
        let embedder = KeywordEmbedder::default();

        let chunks = kb.ensure_loaded(&embedder).await.unwrap().unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1], "Refunds within 30 days.");
        assert_eq!(index.len().await.unwrap(), 3);
        assert_eq!(kb.chunk_count().await, Some(3));
    }

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::new(dir.path().join("absent.txt"), Arc::new(FlatL2Index::new()));

        assert!(kb.ensure_loaded(&KeywordEmbedder::default()).await.unwrap().is_none());
        assert_eq!(kb.chunk_count().await, None);
    }

    #[tokio::test]
    async fn empty_file_loads_nothing_and_is_retried() {
        let file = kb_file("\n\n  \n");
        let kb = KnowledgeBase::new(file.path(), Arc::new(FlatL2Index::new()));
        let embedder = KeywordEmbedder::default();

        assert!(kb.ensure_loaded(&embedder).await.unwrap().is_none());
        assert_eq!(embedder.document_calls(), 0);

        std::fs::write(file.path(), "Now there is content.").unwrap();
        let chunks = kb.ensure_loaded(&embedder).await.unwrap().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Now there is content.");
    }

    #[tokio::test]
    async fn embedding_failure_is_reported() {
        let file = kb_file("Some content.");
        let kb = KnowledgeBase::new(file.path(), Arc::new(FlatL2Index::new()));

        let err = kb.ensure_loaded(&FailingEmbedder).await.unwrap_err();
        assert!(matches!(err, KnowledgeBaseError::Embedding(ref msg) if msg.contains("quota")));
        assert_eq!(kb.chunk_count().await, None);
    }

    #[tokio::test]
    async fn concurrent_first_requests_load_once() {
        struct CountingEmbedder {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Embedder for CountingEmbedder {
            async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BoxError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }

            async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, BoxError> {
                Ok(vec![1.0, 0.0])
            }
        }

        let file = kb_file("a\n\nb");
        let kb = Arc::new(KnowledgeBase::new(file.path(), Arc::new(FlatL2Index::new())));
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });

        let mut handles = Vec::new();
        for _ in 0..5 {
            let kb = kb.clone();
            let embedder = embedder.clone();
            handles.push(tokio::spawn(async move {
                kb.ensure_loaded(embedder.as_ref()).await.unwrap().unwrap().len()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 2);
        }

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }
}
