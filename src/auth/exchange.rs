//! OAuth2 token-exchange and IAM impersonation calls.
//!
//! Two protocol steps live here: trading a kubernetes service-account token
//! for a federated access token at the token-exchange endpoint, and the
//! optional follow-up `generateAccessToken` call impersonating a linked GCP
//! service account (with an ordered delegation chain).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Credential;
use crate::errors::{ProviderError, Result};

const TOKEN_EXCHANGE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";

pub(super) const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Lifetime requested for impersonated access tokens.
const ACCESS_TOKEN_LIFETIME: &str = "3600s";

/// Exchange an audience-scoped service-account token for a federated access
/// token.
pub async fn identity_binding_token(
    http: &reqwest::Client,
    endpoint: &str,
    audience: &str,
    subject_token: &str,
) -> Result<Credential> {
    #[derive(Serialize)]
    struct ExchangeRequest<'a> {
        grant_type: &'a str,
        audience: &'a str,
        scope: &'a str,
        requested_token_type: &'a str,
        subject_token: &'a str,
        subject_token_type: &'a str,
    }

    #[derive(Deserialize)]
    struct ExchangeResponse {
        access_token: String,
        #[serde(default)]
        expires_in: Option<i64>,
    }

    let request = ExchangeRequest {
        grant_type: TOKEN_EXCHANGE_GRANT_TYPE,
        audience,
        scope: CLOUD_PLATFORM_SCOPE,
        requested_token_type: ACCESS_TOKEN_TYPE,
        subject_token,
        subject_token_type: JWT_TOKEN_TYPE,
    };

    let response = http
        .post(endpoint)
        .json(&request)
        .send()
        .await
        .map_err(|e| ProviderError::auth(format!("token exchange request failed: {}", e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::auth(format!("token exchange request failed: {}", e)))?;
    if !status.is_success() {
        return Err(ProviderError::auth(format!(
            "token exchange at '{}' returned {}: {}",
            endpoint, status, body
        )));
    }

    let exchanged: ExchangeResponse = serde_json::from_str(&body)
        .map_err(|e| ProviderError::auth(format!("malformed token exchange response: {}", e)))?;
    let expires_at = exchanged.expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
    Ok(Credential::new(exchanged.access_token, expires_at))
}

/// Generate an access token impersonating `gcp_service_account`, passing
/// through the given delegation chain, authorized by the federated token.
pub async fn generate_access_token(
    http: &reqwest::Client,
    endpoint_base: &str,
    gcp_service_account: &str,
    delegates: &[String],
    federated: &Credential,
) -> Result<Credential> {
    fn no_delegates(delegates: &&[String]) -> bool {
        delegates.is_empty()
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct GenerateRequest<'a> {
        scope: [&'a str; 1],
        #[serde(skip_serializing_if = "no_delegates")]
        delegates: &'a [String],
        lifetime: &'a str,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct GenerateResponse {
        access_token: String,
        #[serde(default)]
        expire_time: Option<DateTime<Utc>>,
    }

    let url = format!(
        "{}/v1/projects/-/serviceAccounts/{}:generateAccessToken",
        endpoint_base, gcp_service_account
    );
    let request = GenerateRequest {
        scope: [CLOUD_PLATFORM_SCOPE],
        delegates,
        lifetime: ACCESS_TOKEN_LIFETIME,
    };

    let response = http
        .post(&url)
        .bearer_auth(&federated.token)
        .json(&request)
        .send()
        .await
        .map_err(|e| {
            ProviderError::auth(format!(
                "generateAccessToken for '{}' failed: {}",
                gcp_service_account, e
            ))
        })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| {
        ProviderError::auth(format!("generateAccessToken for '{}' failed: {}", gcp_service_account, e))
    })?;
    if !status.is_success() {
        return Err(ProviderError::auth(format!(
            "generateAccessToken for '{}' returned {}: {}",
            gcp_service_account, status, body
        )));
    }

    let generated: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
        ProviderError::auth(format!("malformed generateAccessToken response: {}", e))
    })?;
    Ok(Credential::new(generated.access_token, generated.expire_time))
}
