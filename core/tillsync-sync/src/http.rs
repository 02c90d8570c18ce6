//! HTTP sync target.
//!
//! Speaks the JSON contract of [`crate::protocol`] against `{base_url}/sync`.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{FetchQuery, FetchResponse, PushRequest, PushResponse};
use crate::transport::SyncTarget;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// HTTP target configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTargetConfig {
    /// Base URL of the sync service (e.g. `https://sync.example.com`).
    pub base_url: String,
    /// Per-request timeout (ms). Keep it below the drain lease TTL.
    pub timeout_ms: u64,
    /// Bearer token sent with every request, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for HttpTargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            timeout_ms: 10_000,
            auth_token: None,
        }
    }
}

/// Remote target reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSyncTarget {
    config: HttpTargetConfig,
    client: Client,
}

impl HttpSyncTarget {
    pub fn new(config: HttpTargetConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpTargetConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/sync", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl SyncTarget for HttpSyncTarget {
    async fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        debug!(
            "Pushing {} entries for tenant {}",
            request.entries.len(),
            request.tenant_id
        );
        let response = self
            .authorize(self.client.post(self.endpoint()))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("push failed ({status}): {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("failed to parse push response: {e}")))
    }

    async fn fetch(&self, query: FetchQuery) -> SyncResult<FetchResponse> {
        let mut params = vec![
            ("tenantId", query.tenant_id.to_string()),
            ("collection", query.collection.to_string()),
        ];
        if let Some(since) = query.since {
            params.push(("since", since.as_millis().to_string()));
        }

        let response = self
            .authorize(self.client.get(self.endpoint()))
            .query(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!("fetch failed ({status}): {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("failed to parse fetch response: {e}")))
    }
}
