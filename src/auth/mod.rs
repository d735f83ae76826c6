//! # Credential Resolution
//!
//! Produces one short-lived bearer credential per mount event. Three modes:
//!
//! - **Pod workload identity** (default): derive the identity pool/provider
//!   for the cluster, obtain an audience-scoped kubernetes service-account
//!   token for the requesting pod, exchange it for a federated access token,
//!   and optionally impersonate a linked GCP service account.
//! - **Provider ambient credentials**: the metadata server's default
//!   service-account token.
//! - **Node-publish secret**: a service-account key delivered alongside the
//!   mount request, used through a JWT-bearer grant.
//!
//! Resolution is strictly sequential, never retried internally, and every
//! external call is wrapped by the outbound-call metrics recorder.

mod exchange;
mod kube_tokens;
mod metadata;
mod sakey;
mod workload;

pub use kube_tokens::{KubeTokenSource, TokenSource, UnavailableTokenSource};
pub use metadata::MetadataClient;
pub use workload::WorkloadIdentity;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{
    AuthMode, MountConfig, PodInfo, Settings, GCP_SERVICE_ACCOUNT_ANNOTATION,
    GCP_SERVICE_ACCOUNT_DELEGATES_ANNOTATION,
};
use crate::errors::{ProviderError, Result};
use crate::observability::observe_call;

/// A resolved bearer credential, valid for one mount event's backend calls.
#[derive(Clone)]
pub struct Credential {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token: token.into(), expires_at }
    }
}

// Tokens must never end up in logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Resolves credentials for mount events.
pub struct CredentialResolver {
    settings: Arc<Settings>,
    http: reqwest::Client,
    metadata: MetadataClient,
    tokens: Arc<dyn TokenSource>,
}

impl CredentialResolver {
    pub fn new(settings: Arc<Settings>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| ProviderError::transport(format!("failed to build HTTP client: {}", e)))?;
        let metadata = MetadataClient::new(settings.metadata_endpoint.clone(), http.clone());
        Ok(Self { settings, http, metadata, tokens })
    }

    /// Resolve a credential for the given mount configuration.
    pub async fn resolve(&self, config: &MountConfig) -> Result<Credential> {
        match &config.auth_mode {
            AuthMode::NodePublishSecret(key_json) => {
                debug!("resolving credential from nodePublishSecretRef key");
                observe_call("sa_key_token", sakey::token_from_key(&self.http, key_json)).await
            }
            AuthMode::ProviderAdc => {
                debug!("resolving ambient provider credential");
                observe_call("metadata_token", self.metadata.default_token()).await
            }
            AuthMode::PodWorkloadIdentity => self.pod_workload_identity(&config.pod).await,
        }
    }

    async fn pod_workload_identity(&self, pod: &PodInfo) -> Result<Credential> {
        if pod.namespace.is_empty()
            || pod.name.is_empty()
            || pod.uid.is_empty()
            || pod.service_account.is_empty()
        {
            return Err(ProviderError::auth(
                "pod workload identity requires pod namespace, name, uid and serviceAccount \
                 attributes",
            ));
        }

        let identity = workload::derive(&self.settings, &self.metadata).await?;
        debug!(audience = %identity.audience, "derived workload identity");

        let subject_token = match pod.tokens.get(&identity.audience) {
            Some(token) => {
                debug!("using driver-supplied service-account token");
                token.clone()
            }
            None => {
                observe_call("token_request", self.tokens.issue_token(pod, &identity.audience))
                    .await?
            }
        };

        let exchange_endpoint = identity
            .token_endpoint
            .as_deref()
            .unwrap_or(&self.settings.token_exchange_endpoint);
        let federated = observe_call(
            "token_exchange",
            exchange::identity_binding_token(
                &self.http,
                exchange_endpoint,
                &identity.audience,
                &subject_token,
            ),
        )
        .await?;

        let annotations = observe_call(
            "service_account_lookup",
            self.tokens.service_account_annotations(&pod.namespace, &pod.service_account),
        )
        .await?;

        match annotations.get(GCP_SERVICE_ACCOUNT_ANNOTATION) {
            Some(gcp_service_account) => {
                let delegates =
                    parse_delegates(annotations.get(GCP_SERVICE_ACCOUNT_DELEGATES_ANNOTATION))?;
                debug!(
                    gcp_service_account = %gcp_service_account,
                    delegates = delegates.len(),
                    "impersonating linked service account"
                );
                observe_call(
                    "generate_access_token",
                    exchange::generate_access_token(
                        &self.http,
                        &self.settings.iam_credentials_endpoint,
                        gcp_service_account,
                        &delegates,
                        &federated,
                    ),
                )
                .await
            }
            None => Ok(federated),
        }
    }
}

/// Parse the delegation-chain annotation (a JSON list of service-account
/// emails) into the resource names IAM Credentials expects, preserving order.
fn parse_delegates(raw: Option<&String>) -> Result<Vec<String>> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(Vec::new()),
    };
    let emails: Vec<String> = serde_json::from_str(raw).map_err(|e| {
        ProviderError::auth(format!(
            "failed to parse {} annotation: {}",
            GCP_SERVICE_ACCOUNT_DELEGATES_ANNOTATION, e
        ))
    })?;
    Ok(emails
        .into_iter()
        .map(|email| format!("projects/-/serviceAccounts/{}", email))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_redacts_token() {
        let cred = Credential::new("super-secret", None);
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn delegates_annotation_expands_to_resource_names() {
        let raw = r#"["a@p.iam.gserviceaccount.com", "b@p.iam.gserviceaccount.com"]"#.to_string();
        let delegates = parse_delegates(Some(&raw)).unwrap();
        assert_eq!(
            delegates,
            vec![
                "projects/-/serviceAccounts/a@p.iam.gserviceaccount.com",
                "projects/-/serviceAccounts/b@p.iam.gserviceaccount.com",
            ]
        );
    }

    #[test]
    fn missing_delegates_annotation_is_empty_chain() {
        assert!(parse_delegates(None).unwrap().is_empty());
    }

    #[test]
    fn malformed_delegates_annotation_is_an_auth_error() {
        let raw = "not-json".to_string();
        let err = parse_delegates(Some(&raw)).unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }
}
