use qdrant_client::{config::QdrantConfig, Qdrant};
use std::time::Duration;

use super::IndexError;

/// Qdrant is usually advertised by its REST port; the client speaks gRPC.
pub fn grpc_url(url: &str) -> String {
    let without_scheme = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url,
    };
    let host = without_scheme.trim_end_matches('/');

    let host = match host.strip_suffix(":6333") {
        Some(stripped) => format!("{}:6334", stripped),
        None => host.to_string(),
    };
    format!("http://{}", host)
}

pub async fn create_qdrant_client(url: &str, timeout: Duration) -> Result<Qdrant, IndexError> {
    let url = grpc_url(url);
    log::info!("Attempting to connect to Qdrant with URL: {}", url);

    let mut config = QdrantConfig::from_url(&url);
    config.check_compatibility = false;
    config.timeout = timeout;
    config.connect_timeout = Duration::from_secs(10);

    let client = Qdrant::new(config).map_err(|e| IndexError::Connection(e.to_string()))?;

    match client.list_collections().await {
        Ok(_) => {
            log::info!("Successfully connected to Qdrant");
            Ok(client)
        }
        Err(e) => {
            log::error!("Connection test failed: {}", e);
            Err(IndexError::Connection(format!("Failed to connect to Qdrant: {}", e)))
        }
    }
}
