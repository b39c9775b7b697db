// src/rag.rs
//! Retrieval-augmented answering: embed the question, fetch the closest
//! knowledge base chunk, and ask the generation model with that context.

use crate::gemini_client::{GeminiClient, TaskType};
use crate::knowledge_base::{KnowledgeBase, KnowledgeBaseError};
use crate::vector_index::IndexError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const NO_CONTEXT: &str = "No specific info found.";

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BoxError>;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, BoxError>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, BoxError>;
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BoxError> {
        Ok(self.batch_embed_contents(texts, TaskType::RetrievalDocument).await?)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, BoxError> {
        Ok(self.embed_content(text, TaskType::RetrievalQuery).await?)
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, BoxError> {
        Ok(self.generate_text(prompt).await?)
    }
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error(transparent)]
    KnowledgeBase(#[from] KnowledgeBaseError),
    #[error("Query embedding failed: {0}")]
    Embedding(String),
    #[error("Vector search failed: {0}")]
    Search(#[from] IndexError),
    #[error("Generation failed: {0}")]
    Generation(String),
}

pub fn build_prompt(context: &str, user_query: &str) -> String {
    format!(
        "You are a helpful customer support assistant.\n\
         Use the following Context to answer the User's Question.\n\
         If the answer is not in the Context, say \"I don't have that information.\"\n\
         \n\
         Context: {context}\n\
         \n\
         User's Question: {user_query}\n"
    )
}

#[derive(Clone)]
pub struct RagPipeline {
    knowledge_base: Arc<KnowledgeBase>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
}

impl RagPipeline {
    pub fn new(
        knowledge_base: Arc<KnowledgeBase>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            knowledge_base,
            embedder,
            generator,
        }
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.knowledge_base
    }

    pub async fn load_knowledge_base(&self) -> Result<Option<usize>, RagError> {
        let chunks = self.knowledge_base.ensure_loaded(self.embedder.as_ref()).await?;
        Ok(chunks.map(|c| c.len()))
    }

    /// Text of the chunk closest to the query, or [`NO_CONTEXT`] when there
    /// is nothing to search.
    pub async fn retrieve_context(&self, user_query: &str) -> Result<String, RagError> {
        let chunks = match self.knowledge_base.ensure_loaded(self.embedder.as_ref()).await? {
            Some(chunks) => chunks,
            None => return Ok(NO_CONTEXT.to_string()),
        };

        let query_vector = self
            .embedder
            .embed_query(user_query)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let hits = self.knowledge_base.index().search(&query_vector, 1).await?;
        let context = hits
            .first()
            .and_then(|hit| chunks.get(hit.position))
            .cloned()
            .unwrap_or_else(|| NO_CONTEXT.to_string());

        tracing::debug!(
            "Retrieved context for query (distance {:?})",
            hits.first().map(|h| h.distance)
        );
        Ok(context)
    }

    pub async fn answer(&self, user_query: &str) -> Result<String, RagError> {
        let context = self.retrieve_context(user_query).await?;
        let prompt = build_prompt(&context, user_query);

        self.generator
            .generate(&prompt)
            .await
            .map_err(|e| RagError::Generation(e.to_string()))
    }
}
