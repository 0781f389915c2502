use crate::error::FolioError;
use crate::metrics::SharedMetrics;
use crate::services::catalog::model::{BookDetails, CatalogResponse};
use crate::services::catalog::CatalogClient;
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace};

/// HTTP client for the upstream book catalog.
///
/// One GET per call, no retries: pacing and deduplication are the lookup
/// queue's job, and a failure is reported to every waiter as-is.
#[derive(Clone)]
pub struct CatalogApi {
    client: Client,
    base_url: String,
    api_key: String,
    metrics: Option<SharedMetrics>,
}

impl CatalogApi {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn url_for(&self, isbn: &str) -> String {
        format!("{}{}", self.base_url, urlencoding::encode(isbn))
    }

    fn record(&self, status: &str, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_upstream_request(status, elapsed.as_secs_f64());
        }
    }
}

#[async_trait]
impl CatalogClient for CatalogApi {
    #[instrument(skip(self), fields(query_type = "isbn"))]
    async fn fetch(&self, isbn: &str) -> Result<BookDetails, FolioError> {
        let url = self.url_for(isbn);
        let start = Instant::now();

        debug!(url = %url, "Sending request to catalog API");

        let resp = match self
            .client
            .get(&url)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let elapsed = start.elapsed();
                debug!(
                    error = %e,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request failed"
                );
                self.record("error", elapsed);
                return Err(FolioError::from(e));
            }
        };

        let status = resp.status();
        let elapsed = start.elapsed();

        if !status.is_success() {
            debug!(
                status = %status,
                elapsed_ms = elapsed.as_millis() as u64,
                "Catalog returned non-success status"
            );
            self.record(status.as_str(), elapsed);
            return Err(FolioError::Upstream(format!("HTTP {}", status)));
        }

        debug!(
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request successful"
        );
        self.record("success", elapsed);

        let body = resp.bytes().await.map_err(FolioError::from)?;
        trace!(response_bytes = body.len(), "Response body received");

        let envelope: CatalogResponse = serde_json::from_slice(&body)?;
        envelope
            .data
            .ok_or_else(|| FolioError::Upstream(format!("No book data returned for {}", isbn)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::create_metrics;
    use axum::{
        extract::{Path, Query},
        http::StatusCode,
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::collections::HashMap;

    /// Local catalog stand-in. Requires `apikey=secret`.
    async fn serve_catalog() -> String {
        let router = Router::new().route(
            "/isbn/{isbn}",
            get(
                |Path(isbn): Path<String>, Query(query): Query<HashMap<String, String>>| async move {
                    if query.get("apikey").map(String::as_str) != Some("secret") {
                        return (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "bad key" })));
                    }
                    match isbn.as_str() {
                        "9787111213826" => (
                            StatusCode::OK,
                            Json(json!({ "data": { "name": "Thinking in Java", "doubanScore": "91" } })),
                        ),
                        "0000000000" => (
                            StatusCode::OK,
                            Json(json!({ "success": false, "msg": "not found" })),
                        ),
                        _ => (StatusCode::NOT_FOUND, Json(json!({}))),
                    }
                },
            ),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/isbn/", addr)
    }

    fn upstream_message(err: FolioError) -> String {
        match err {
            FolioError::Upstream(msg) => msg,
            other => panic!("expected an upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_decodes_book_details() {
        let metrics = create_metrics().unwrap();
        let api = CatalogApi::new(&serve_catalog().await, "secret", Duration::from_secs(5))
            .with_metrics(metrics.clone());

        let details = api.fetch("9787111213826").await.unwrap();
        assert_eq!(details.name.as_deref(), Some("Thinking in Java"));
        assert_eq!(details.douban_score, Some(91));
        assert_eq!(
            metrics
                .upstream_requests_total
                .with_label_values(&["success"])
                .get(),
            1.0
        );
    }

    #[tokio::test]
    async fn test_fetch_sends_api_key() {
        let api = CatalogApi::new(&serve_catalog().await, "wrong", Duration::from_secs(5));
        let msg = upstream_message(api.fetch("9787111213826").await.unwrap_err());
        assert!(msg.starts_with("HTTP 401"), "{msg}");
    }

    #[tokio::test]
    async fn test_fetch_maps_non_success_status() {
        let api = CatalogApi::new(&serve_catalog().await, "secret", Duration::from_secs(5));
        let msg = upstream_message(api.fetch("123").await.unwrap_err());
        assert!(msg.starts_with("HTTP 404"), "{msg}");
    }

    #[tokio::test]
    async fn test_fetch_without_data_is_upstream_error() {
        let api = CatalogApi::new(&serve_catalog().await, "secret", Duration::from_secs(5));
        let msg = upstream_message(api.fetch("0000000000").await.unwrap_err());
        assert!(msg.contains("No book data returned for 0000000000"), "{msg}");
    }

    #[test]
    fn test_url_appends_encoded_identifier() {
        let api = CatalogApi::new("https://catalog.test/isbn/", "k", Duration::from_secs(1));
        assert_eq!(
            api.url_for("9787111213826"),
            "https://catalog.test/isbn/9787111213826"
        );
        assert_eq!(api.url_for("a b/c"), "https://catalog.test/isbn/a%20b%2Fc");
    }

    #[test]
    fn test_envelope_without_data_is_detected() {
        let envelope: CatalogResponse =
            serde_json::from_str(r#"{"success": false, "msg": "not found"}"#).unwrap();
        assert!(envelope.data.is_none());

        let envelope: CatalogResponse =
            serde_json::from_str(r#"{"data": {"name": "T"}}"#).unwrap();
        assert_eq!(envelope.data.unwrap().name.as_deref(), Some("T"));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_upstream_error() {
        // Port 9 (discard) on localhost is reliably closed in test environments.
        let api = CatalogApi::new("http://127.0.0.1:9/isbn/", "k", Duration::from_secs(2));
        let err = api.fetch("123").await.unwrap_err();
        assert!(matches!(err, FolioError::Upstream(_)));
    }
}
