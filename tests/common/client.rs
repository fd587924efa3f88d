//! HTTP client for end-to-end tests
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

/// Client appearing to the server as a single caller
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    /// Sent as X-Forwarded-For, so each client has its own rate limit
    pub ip: String,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(base_url: String) -> Self {
        Self::with_ip(base_url, "203.0.113.7")
    }

    pub fn with_ip(base_url: String, ip: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            ip: ip.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ========================================================================
    // Analysis Endpoints
    // ========================================================================

    /// POST /v1/analyze with a free-text query
    pub async fn analyze(&self, query: &str) -> Response {
        self.analyze_json(json!({ "query": query })).await
    }

    /// POST /v1/analyze with explicit fields
    pub async fn analyze_song(&self, artist: &str, title: &str) -> Response {
        self.analyze_json(json!({ "artist": artist, "title": title }))
            .await
    }

    pub async fn analyze_json(&self, body: serde_json::Value) -> Response {
        self.client
            .post(self.url("/v1/analyze"))
            .header("x-forwarded-for", &self.ip)
            .json(&body)
            .send()
            .await
            .expect("Analyze request failed")
    }

    /// POST /v1/analyze with an arbitrary body
    pub async fn analyze_raw(&self, body: &str) -> Response {
        self.client
            .post(self.url("/v1/analyze"))
            .header("x-forwarded-for", &self.ip)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("Analyze request failed")
    }

    /// GET /v1/analyze/status
    pub async fn analyze_status(&self) -> Response {
        self.client
            .get(self.url("/v1/analyze/status"))
            .header("x-forwarded-for", &self.ip)
            .send()
            .await
            .expect("Status request failed")
    }

    // ========================================================================
    // Sharing
    // ========================================================================

    /// GET /v1/share/{share_id}
    pub async fn get_share(&self, share_id: &str) -> Response {
        self.client
            .get(self.url(&format!("/v1/share/{}", share_id)))
            .send()
            .await
            .expect("Share request failed")
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn home(&self) -> Response {
        self.client
            .get(self.url("/"))
            .send()
            .await
            .expect("Home request failed")
    }

    pub async fn cache_stats(&self) -> Response {
        self.client
            .get(self.url("/v1/cache/stats"))
            .send()
            .await
            .expect("Stats request failed")
    }

    pub async fn health(&self) -> Response {
        self.client
            .get(self.url("/v1/health"))
            .send()
            .await
            .expect("Health request failed")
    }
}
