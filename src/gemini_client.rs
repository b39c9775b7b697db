use crate::config::GeminiConfig;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// batchEmbedContents accepts at most 100 requests per call
const MAX_BATCH_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum GeminiError {
    #[error("Gemini request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gemini API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Failed to parse Gemini response: {0}")]
    Decode(String),
    #[error("Gemini returned no {0}")]
    Empty(&'static str),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    generation_model: String,
    retry_initial: Duration,
    retry_max_elapsed: Duration,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
            role: role.map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PromptFeedback {
    #[serde(rename = "blockReason")]
    pub block_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmbedContentRequest {
    pub model: String,
    pub content: Content,
    #[serde(rename = "taskType")]
    pub task_type: TaskType,
}

#[derive(Debug, Serialize)]
pub struct BatchEmbedContentsRequest {
    pub requests: Vec<EmbedContentRequest>,
}

#[derive(Debug, Deserialize)]
pub struct EmbedContentResponse {
    pub embedding: Embedding,
}

#[derive(Debug, Deserialize)]
pub struct BatchEmbedContentsResponse {
    #[serde(default)]
    pub embeddings: Vec<Embedding>,
}

#[derive(Debug, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, with all its text parts joined.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            retry_initial: Duration::from_secs(1),
            retry_max_elapsed: Duration::from_secs(60),
        }
    }

    pub fn with_retry_timing(mut self, initial: Duration, max_elapsed: Duration) -> Self {
        self.retry_initial = initial;
        self.retry_max_elapsed = max_elapsed;
        self
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn generation_model(&self) -> &str {
        &self.generation_model
    }

    pub async fn embed_content(&self, text: &str, task_type: TaskType) -> Result<Vec<f32>, GeminiError> {
        let url = format!("{}/models/{}:embedContent", self.base_url, self.embedding_model);
        let request = self.embed_request(text, task_type);

        let response: EmbedContentResponse = self.post_json(&url, &request).await?;
        if response.embedding.values.is_empty() {
            return Err(GeminiError::Empty("embedding"));
        }
        Ok(response.embedding.values)
    }

    /// Embeds many texts, splitting into API-sized batches. The output keeps
    /// the input order.
    pub async fn batch_embed_contents(
        &self,
        texts: &[String],
        task_type: TaskType,
    ) -> Result<Vec<Vec<f32>>, GeminiError> {
        let url = format!("{}/models/{}:batchEmbedContents", self.base_url, self.embedding_model);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH_SIZE) {
            let request = BatchEmbedContentsRequest {
                requests: batch.iter().map(|t| self.embed_request(t, task_type)).collect(),
            };
            let response: BatchEmbedContentsResponse = self.post_json(&url, &request).await?;
            if response.embeddings.len() != batch.len() {
                return Err(GeminiError::Decode(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    response.embeddings.len()
                )));
            }
            vectors.extend(response.embeddings.into_iter().map(|e| e.values));
        }

        tracing::debug!("Embedded {} texts with {}", vectors.len(), self.embedding_model);
        Ok(vectors)
    }

    pub async fn generate_text(&self, prompt: &str) -> Result<String, GeminiError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.generation_model);
        let request = GenerateContentRequest {
            contents: vec![Content::text(Some("user"), prompt)],
        };

        let response: GenerateContentResponse = self.post_json(&url, &request).await?;
        match response.text() {
            Some(text) => Ok(text),
            None => {
                let reason = response
                    .prompt_feedback
                    .and_then(|f| f.block_reason)
                    .or_else(|| response.candidates.first().and_then(|c| c.finish_reason.clone()));
                tracing::warn!("Gemini returned no text (reason: {:?})", reason);
                Err(GeminiError::Empty("text"))
            }
        }
    }

    fn embed_request(&self, text: &str, task_type: TaskType) -> EmbedContentRequest {
        EmbedContentRequest {
            model: format!("models/{}", self.embedding_model),
            content: Content::text(None, text),
            task_type,
        }
    }

    async fn post_json<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp, GeminiError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let backoff_config = ExponentialBackoff {
            initial_interval: self.retry_initial,
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..Default::default()
        };

        // Retry connection errors and 429/5xx; everything else fails fast
        let operation = move || async move {
            let response = self
                .client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .timeout(Duration::from_secs(60))
                .json(body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("Gemini connection error (retrying): {}", e);
                        backoff::Error::transient(GeminiError::Http(e))
                    } else {
                        backoff::Error::permanent(GeminiError::Http(e))
                    }
                })?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| backoff::Error::permanent(GeminiError::Http(e)))?;

            if matches!(status.as_u16(), 429 | 500 | 502 | 503) {
                tracing::warn!("Gemini API returned {} (retrying)", status);
                return Err(backoff::Error::transient(GeminiError::Api {
                    status: status.as_u16(),
                    body: text,
                }));
            }

            if !status.is_success() {
                return Err(backoff::Error::permanent(GeminiError::Api {
                    status: status.as_u16(),
                    body: text,
                }));
            }

            serde_json::from_str(&text)
                .map_err(|e| backoff::Error::permanent(GeminiError::Decode(e.to_string())))
        };

        retry(backoff_config, operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::Server) -> GeminiClient {
        GeminiClient::new(&GeminiConfig {
            api_key: "test-key".to_string(),
            base_url: server.url(),
            embedding_model: "gemini-embedding-001".to_string(),
            generation_model: "gemini-2.5-flash".to_string(),
        })
        .with_retry_timing(Duration::from_millis(5), Duration::from_millis(50))
    }

    #[test]
    fn reports_configured_models() {
        let client = GeminiClient::new(&GeminiConfig {
            api_key: "test-key".to_string(),
            base_url: "http://localhost".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            generation_model: "gemini-2.0-pro".to_string(),
        });
        assert_eq!(client.embedding_model(), "text-embedding-004");
        assert_eq!(client.generation_model(), "gemini-2.0-pro");
    }

    #[tokio::test]
    async fn embed_content_sends_query_task_type() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-embedding-001:embedContent")
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "models/gemini-embedding-001",
                "taskType": "RETRIEVAL_QUERY",
                "content": {"parts": [{"text": "where is my order?"}]}
            })))
            .with_status(200)
            .with_body(r#"{"embedding": {"values": [0.1, 0.2, 0.3]}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let vector = client
            .embed_content("where is my order?", TaskType::RetrievalQuery)
            .await
            .unwrap();

        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn batch_embed_keeps_input_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-embedding-001:batchEmbedContents")
            .match_body(Matcher::PartialJson(json!({
                "requests": [
                    {
                        "model": "models/gemini-embedding-001",
                        "taskType": "RETRIEVAL_DOCUMENT",
                        "content": {"parts": [{"text": "first"}]}
                    },
                    {
                        "model": "models/gemini-embedding-001",
                        "taskType": "RETRIEVAL_DOCUMENT",
                        "content": {"parts": [{"text": "second"}]}
                    }
                ]
            })))
            .with_status(200)
            .with_body(r#"{"embeddings": [{"values": [1.0, 0.0]}, {"values": [0.0, 1.0]}]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let vectors = client
            .batch_embed_contents(&["first".to_string(), "second".to_string()], TaskType::RetrievalDocument)
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn batch_embed_rejects_count_mismatch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/gemini-embedding-001:batchEmbedContents")
            .with_status(200)
            .with_body(r#"{"embeddings": [{"values": [1.0, 0.0]}]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .batch_embed_contents(&["a".to_string(), "b".to_string()], TaskType::RetrievalDocument)
            .await
            .unwrap_err();
        assert!(matches!(err, GeminiError::Decode(_)));
    }

    #[tokio::test]
    async fn generate_text_joins_first_candidate_parts() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_body(Matcher::PartialJson(json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
            })))
            .with_status(200)
            .with_body(
                r#"{"candidates": [
                    {"content": {"role": "model", "parts": [{"text": "Hi "}, {"text": "there"}]}, "finishReason": "STOP"},
                    {"content": {"role": "model", "parts": [{"text": "ignored"}]}}
                ]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        assert_eq!(client.generate_text("hello").await.unwrap(), "Hi there");
    }

    #[tokio::test]
    async fn blocked_prompt_is_an_empty_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .with_status(200)
            .with_body(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.generate_text("something").await.unwrap_err();
        assert!(matches!(err, GeminiError::Empty("text")));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .with_status(400)
            .with_body(r#"{"error": {"message": "bad request"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.generate_text("hello").await.unwrap_err();
        assert!(matches!(err, GeminiError::Api { status: 400, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_the_window_closes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .with_status(503)
            .with_body("overloaded")
            .expect_at_least(2)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.generate_text("hello").await.unwrap_err();
        assert!(matches!(err, GeminiError::Api { status: 503, .. }));
        mock.assert_async().await;
    }
}
