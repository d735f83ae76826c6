//! GCE metadata server client.
//!
//! Used for project/cluster discovery and for ambient default-service-account
//! tokens. The endpoint is overridable so federated deployments and tests can
//! point it elsewhere.

use chrono::{Duration, Utc};
use serde::Deserialize;

use super::Credential;
use crate::errors::{ProviderError, Result};

const FLAVOR_HEADER: &str = "Metadata-Flavor";
const FLAVOR_VALUE: &str = "Google";

#[derive(Clone)]
pub struct MetadataClient {
    base: String,
    http: reqwest::Client,
}

impl MetadataClient {
    pub fn new(base: impl Into<String>, http: reqwest::Client) -> Self {
        Self { base: base.into(), http }
    }

    async fn get(&self, path: &str) -> Result<String> {
        let url = format!("{}/computeMetadata/v1/{}", self.base, path);
        let response = self
            .http
            .get(&url)
            .header(FLAVOR_HEADER, FLAVOR_VALUE)
            .send()
            .await
            .map_err(|e| ProviderError::auth(format!("metadata lookup '{}' failed: {}", path, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::auth(format!("metadata lookup '{}' failed: {}", path, e)))?;
        if !status.is_success() {
            return Err(ProviderError::auth(format!(
                "metadata lookup '{}' returned {}: {}",
                path, status, body
            )));
        }
        Ok(body)
    }

    pub async fn project_id(&self) -> Result<String> {
        self.get("project/project-id").await
    }

    pub async fn instance_attribute(&self, name: &str) -> Result<String> {
        self.get(&format!("instance/attributes/{}", name)).await
    }

    /// Fetch the default service account's access token (ambient auth mode).
    pub async fn default_token(&self) -> Result<Credential> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            expires_in: Option<i64>,
        }

        let body = self.get("instance/service-accounts/default/token").await?;
        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::auth(format!("malformed metadata token response: {}", e)))?;

        let expires_at = token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
        Ok(Credential::new(token.access_token, expires_at))
    }
}
