use crate::config::QdrantConfig;
use crate::vector_index::{IndexError, SearchHit, VectorIndex};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;

// Keeps upsert requests well under the gRPC message limit
const UPSERT_BATCH_SIZE: usize = 256;

impl From<QdrantError> for IndexError {
    fn from(e: QdrantError) -> Self {
        IndexError::Backend(e.to_string())
    }
}

/// Knowledge base vectors stored in a Qdrant collection, with chunk
/// positions as numeric point ids.
pub struct QdrantIndex {
    client: Qdrant,
    collection_name: String,
}

impl QdrantIndex {
    pub fn new(config: &QdrantConfig) -> Result<Self, IndexError> {
        let mut client_builder = Qdrant::from_url(&config.url);

        if let Some(key) = &config.api_key {
            client_builder = client_builder.api_key(key.clone());
        }

        let client = client_builder.build()?;

        Ok(Self {
            client,
            collection_name: config.collection.clone(),
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn reset(&self, dimension: usize) -> Result<(), IndexError> {
        if self.client.collection_exists(&self.collection_name).await? {
            tracing::info!("Dropping Qdrant collection: {}", self.collection_name);
            self.client.delete_collection(&self.collection_name).await?;
        }

        tracing::info!(
            "Creating Qdrant collection: {} ({} dimensions)",
            self.collection_name,
            dimension
        );
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Euclid)),
            )
            .await?;
        Ok(())
    }

    async fn add(&self, vectors: Vec<Vec<f32>>) -> Result<(), IndexError> {
        let start = self.len().await?;
        let points: Vec<PointStruct> = vectors
            .into_iter()
            .enumerate()
            .map(|(offset, vector)| {
                let position = (start + offset) as u64;
                let payload: Payload = json!({ "position": position })
                    .try_into()
                    .unwrap_or_else(|_| Payload::new());
                PointStruct::new(position, vector, payload)
            })
            .collect();

        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection_name, batch.to_vec()).wait(true))
                .await?;
        }

        tracing::debug!("Stored {} vectors in Qdrant", points.len());
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 || !self.client.collection_exists(&self.collection_name).await? {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .search_points(SearchPointsBuilder::new(&self.collection_name, query.to_vec(), k as u64))
            .await?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point.id?.point_id_options?;
                match id {
                    PointIdOptions::Num(n) => Some(SearchHit {
                        position: n as usize,
                        distance: point.score,
                    }),
                    PointIdOptions::Uuid(_) => None,
                }
            })
            .collect();

        Ok(hits)
    }

    async fn len(&self) -> Result<usize, IndexError> {
        if !self.client.collection_exists(&self.collection_name).await? {
            return Ok(0);
        }

        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection_name).exact(true))
            .await?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    fn name(&self) -> &'static str {
        "qdrant"
    }
}
