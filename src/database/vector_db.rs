use anyhow::Result;
use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        point_id::PointIdOptions, points_selector::PointsSelectorOneOf, value::Kind,
        vectors_config::Config, with_payload_selector::SelectorOptions, Condition,
        CreateCollection, DeletePoints, Distance, Filter, PointId, PointStruct, PointsSelector,
        SearchPoints, UpsertPoints, Value, VectorParams, VectorsConfig, WithPayloadSelector,
    },
    Qdrant,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::qdrant_config::create_qdrant_client;
use super::{IndexError, VectorIndex, VectorRecord};
use crate::document::{Document, DocumentType};

const TEXT_FIELD: &str = "text";
const SOURCE_FIELD: &str = "source";
const TYPE_FIELD: &str = "type";
const INGESTED_AT_FIELD: &str = "ingested_at";

/// One Qdrant collection used as the document index.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Arc<Qdrant>,
    collection: String,
}

impl QdrantIndex {
    pub async fn connect(url: &str, collection: &str, timeout: Duration) -> Result<Self, IndexError> {
        let client = create_qdrant_client(url, timeout).await?;
        Ok(Self {
            client: Arc::new(client),
            collection: collection.to_string(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Creates the collection with cosine distance unless it already exists.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), IndexError> {
        let vectors_config = VectorsConfig {
            config: Some(Config::Params(VectorParams {
                size: vector_size,
                distance: Distance::Cosine.into(),
                ..Default::default()
            })),
        };

        let create_collection = CreateCollection {
            collection_name: self.collection.clone(),
            vectors_config: Some(vectors_config),
            ..Default::default()
        };

        match self.client.create_collection(create_collection).await {
            Ok(_) => {
                log::info!("Created collection {} ({} dims)", self.collection, vector_size);
                Ok(())
            }
            Err(e) if e.to_string().contains("AlreadyExists") || e.to_string().contains("already exists") => {
                log::info!("Collection {} already exists, skipping creation", self.collection);
                Ok(())
            }
            Err(e) => Err(IndexError::Operation(e.to_string())),
        }
    }
}

fn to_point(record: VectorRecord) -> PointStruct {
    let document = record.document;
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert(TEXT_FIELD.to_string(), Value::from(document.content));
    payload.insert(SOURCE_FIELD.to_string(), Value::from(document.metadata.source));
    payload.insert(
        TYPE_FIELD.to_string(),
        Value::from(document.metadata.doc_type.as_str().to_string()),
    );
    payload.insert(
        INGESTED_AT_FIELD.to_string(),
        Value::from(record.ingested_at.to_rfc3339()),
    );

    PointStruct {
        id: Some(point_id(&record.id)),
        vectors: Some(record.embedding.into()),
        payload,
    }
}

fn point_id(id: &Uuid) -> PointId {
    PointId {
        point_id_options: Some(PointIdOptions::Uuid(id.to_string())),
    }
}

/// Points of `source` that are not in `keep`.
fn stale_filter(source: &str, keep: &[Uuid]) -> Filter {
    let mut filter = Filter::must([Condition::matches(SOURCE_FIELD, source.to_string())]);
    if !keep.is_empty() {
        filter.must_not = vec![Condition::has_id(keep.iter().map(point_id))];
    }
    filter
}

fn payload_str<'a>(payload: &'a HashMap<String, Value>, field: &'static str) -> Option<&'a str> {
    match payload.get(field).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn to_document(payload: &HashMap<String, Value>) -> Result<Document, IndexError> {
    let content = payload_str(payload, TEXT_FIELD).ok_or(IndexError::MissingPayload(TEXT_FIELD))?;
    let source = payload_str(payload, SOURCE_FIELD).unwrap_or_default();
    let doc_type = payload_str(payload, TYPE_FIELD)
        .and_then(|t| t.parse().ok())
        .unwrap_or(DocumentType::Text);
    Ok(Document::new(content, source, doc_type))
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let count = records.len();
        let upsert_points = UpsertPoints {
            collection_name: self.collection.clone(),
            points: records.into_iter().map(to_point).collect(),
            wait: Some(true),
            ..Default::default()
        };

        self.client
            .upsert_points(upsert_points)
            .await
            .map_err(|e| IndexError::Operation(e.to_string()))?;
        log::debug!("Upserted {} points into {}", count, self.collection);
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<Document>> {
        let request = SearchPoints {
            collection_name: self.collection.clone(),
            vector: vector.to_vec(),
            limit: k as u64,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        let results = self
            .client
            .search_points(request)
            .await
            .map_err(|e| IndexError::Operation(e.to_string()))?;

        let mut documents = Vec::with_capacity(results.result.len());
        for point in results.result {
            match to_document(&point.payload) {
                Ok(document) => documents.push(document),
                Err(e) => log::warn!("Skipping search hit with score {}: {}", point.score, e),
            }
        }
        Ok(documents)
    }

    async fn delete_by_source_except(&self, source: &str, keep: &[Uuid]) -> Result<()> {
        let filter = stale_filter(source, keep);
        let delete_points = DeletePoints {
            collection_name: self.collection.clone(),
            points: Some(PointsSelector {
                points_selector_one_of: Some(PointsSelectorOneOf::Filter(filter)),
            }),
            wait: Some(true),
            ..Default::default()
        };

        self.client
            .delete_points(delete_points)
            .await
            .map_err(|e| IndexError::Operation(e.to_string()))?;
        log::info!(
            "Deleted points for source {} other than the {} just written",
            source,
            keep.len()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}
