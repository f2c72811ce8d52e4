//! Typesense-compatible HTTP client

use super::wire::{AliasBody, CollectionSummary, DeleteByFilterResponse, ErrorBody};
use crate::{ImportResponse, SearchClient};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use searchkeeper_core::config::ServiceConfig;
use searchkeeper_core::error::{truncate_message, Error, Result};
use searchkeeper_core::{CollectionSchema, ImportAction};
use std::time::Duration;
use tracing::{debug, info};

const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";
const MAX_ERROR_BODY_CHARS: usize = 300;

/// HTTP client for a Typesense-compatible search service
pub struct TypesenseClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl TypesenseClient {
    /// Create a new client from service configuration
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        info!("Initializing search service client");
        info!("  URL: {}", config.url);
        info!("  Timeout: {}s", config.timeout_secs);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    /// Send a request, mapping transport failures onto the error taxonomy
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(format!("{what}: {e}"))
            } else {
                Error::connection(format!("{what}: {e}"))
            }
        })
    }

    /// Convert a non-success response into an error
    async fn ensure_success(response: Response, payload_bytes: usize) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(Error::PayloadTooLarge {
                bytes: payload_bytes,
            });
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.message)
            .unwrap_or(text);
        Err(Error::api(
            status.as_u16(),
            truncate_message(&message, MAX_ERROR_BODY_CHARS),
        ))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let text = response
            .text()
            .await
            .map_err(|e| Error::connection(format!("{what}: failed to read body: {e}")))?;
        serde_json::from_str(&text).map_err(Error::from)
    }
}

#[async_trait]
impl SearchClient for TypesenseClient {
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        debug!(collection = %schema.name, "Creating collection");
        let response = self
            .send(
                self.request(Method::POST, "/collections").json(schema),
                "create collection",
            )
            .await?;
        Self::ensure_success(response, 0).await?;
        Ok(())
    }

    async fn delete_collection(&self, physical: &str) -> Result<()> {
        debug!(collection = %physical, "Deleting collection");
        let response = self
            .send(
                self.request(Method::DELETE, &format!("/collections/{physical}")),
                "delete collection",
            )
            .await?;
        Self::ensure_success(response, 0).await?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let response = self
            .send(self.request(Method::GET, "/collections"), "list collections")
            .await?;
        let response = Self::ensure_success(response, 0).await?;
        let collections: Vec<CollectionSummary> =
            Self::read_json(response, "list collections").await?;
        Ok(collections.into_iter().map(|c| c.name).collect())
    }

    async fn resolve_alias(&self, logical: &str) -> Result<Option<String>> {
        let response = self
            .send(
                self.request(Method::GET, &format!("/aliases/{logical}")),
                "resolve alias",
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::ensure_success(response, 0).await?;
        let alias: AliasBody = Self::read_json(response, "resolve alias").await?;
        Ok(Some(alias.collection_name))
    }

    async fn upsert_alias(&self, logical: &str, physical: &str) -> Result<()> {
        debug!(alias = %logical, collection = %physical, "Upserting alias");
        let body = AliasBody {
            collection_name: physical.to_string(),
        };
        let response = self
            .send(
                self.request(Method::PUT, &format!("/aliases/{logical}"))
                    .json(&body),
                "upsert alias",
            )
            .await?;
        Self::ensure_success(response, 0).await?;
        Ok(())
    }

    async fn retrieve_schema(&self, physical: &str) -> Result<Option<CollectionSchema>> {
        let response = self
            .send(
                self.request(Method::GET, &format!("/collections/{physical}")),
                "retrieve schema",
            )
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::ensure_success(response, 0).await?;
        let schema = Self::read_json(response, "retrieve schema").await?;
        Ok(Some(schema))
    }

    async fn import_documents(
        &self,
        physical: &str,
        payload: &str,
        action: ImportAction,
    ) -> Result<ImportResponse> {
        let response = self
            .send(
                self.request(
                    Method::POST,
                    &format!("/collections/{physical}/documents/import"),
                )
                .query(&[("action", action.as_str())])
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(payload.to_string()),
                "import documents",
            )
            .await?;
        let response = Self::ensure_success(response, payload.len()).await?;
        let http_status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::connection(format!("import documents: failed to read body: {e}")))?;

        Ok(ImportResponse { http_status, body })
    }

    async fn delete_by_filter(&self, physical: &str, filter: &str) -> Result<u64> {
        let response = self
            .send(
                self.request(Method::DELETE, &format!("/collections/{physical}/documents"))
                    .query(&[("filter_by", filter)]),
                "delete by filter",
            )
            .await?;
        let response = Self::ensure_success(response, 0).await?;
        let deleted: DeleteByFilterResponse = Self::read_json(response, "delete by filter").await?;
        Ok(deleted.num_deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_slash() {
        let config = ServiceConfig {
            url: "http://localhost:8108/".to_string(),
            ..ServiceConfig::default()
        };
        let client = TypesenseClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8108");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_connection_error() {
        let config = ServiceConfig {
            url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..ServiceConfig::default()
        };
        let client = TypesenseClient::new(&config).unwrap();

        let err = client.list_collections().await.unwrap_err();
        assert!(err.is_retryable_kind(), "unexpected error: {err}");
    }
}
