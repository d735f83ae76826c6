//! Kubernetes token issuance and service-account lookups.
//!
//! The [`TokenSource`] trait is the seam between the credential resolver and
//! the cluster API: the production implementation issues `TokenRequest`s
//! bound to the requesting pod's UID and reads service-account annotations;
//! tests substitute a static implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{BoundObjectReference, TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, PostParams};

use crate::config::PodInfo;
use crate::errors::{ProviderError, Result};

/// TTL for issued service-account tokens. One mount event never needs more.
const TOKEN_TTL_SECONDS: i64 = 900;

/// Cluster-side operations needed for pod workload identity.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Issue an audience-scoped service-account token bound to the pod.
    async fn issue_token(&self, pod: &PodInfo, audience: &str) -> Result<String>;

    /// Read the annotations of a service account.
    async fn service_account_annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>>;
}

/// Production implementation backed by the in-cluster kubernetes API.
pub struct KubeTokenSource {
    client: kube::Client,
}

impl KubeTokenSource {
    pub async fn new() -> Result<Self> {
        let client = kube::Client::try_default().await.map_err(|e| {
            ProviderError::auth(format!("failed to build kubernetes client: {}", e))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenSource for KubeTokenSource {
    async fn issue_token(&self, pod: &PodInfo, audience: &str) -> Result<String> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &pod.namespace);
        let request = TokenRequest {
            spec: TokenRequestSpec {
                audiences: vec![audience.to_string()],
                expiration_seconds: Some(TOKEN_TTL_SECONDS),
                // Binding to the pod UID prevents reuse by a different pod
                // recreated under the same name.
                bound_object_ref: Some(BoundObjectReference {
                    api_version: Some("v1".to_string()),
                    kind: Some("Pod".to_string()),
                    name: Some(pod.name.clone()),
                    uid: Some(pod.uid.clone()),
                }),
            },
            ..TokenRequest::default()
        };

        let issued = api
            .create_token_request(&pod.service_account, &PostParams::default(), &request)
            .await
            .map_err(|e| {
                ProviderError::auth(format!(
                    "TokenRequest for serviceaccount '{}/{}' failed: {}",
                    pod.namespace, pod.service_account, e
                ))
            })?;

        issued
            .status
            .map(|status| status.token)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ProviderError::auth(format!(
                    "TokenRequest for serviceaccount '{}/{}' returned no token",
                    pod.namespace, pod.service_account
                ))
            })
    }

    async fn service_account_annotations(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let account = api.get(name).await.map_err(|e| {
            ProviderError::auth(format!(
                "failed to read serviceaccount '{}/{}': {}",
                namespace, name, e
            ))
        })?;
        Ok(account.metadata.annotations.unwrap_or_default())
    }
}

/// Placeholder used when no cluster API is reachable at startup. Mounts that
/// do not need the cluster (ambient or node-publish auth) still work; pod
/// workload identity fails with the recorded cause.
pub struct UnavailableTokenSource {
    reason: String,
}

impl UnavailableTokenSource {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl TokenSource for UnavailableTokenSource {
    async fn issue_token(&self, _pod: &PodInfo, _audience: &str) -> Result<String> {
        Err(ProviderError::auth(format!("kubernetes API unavailable: {}", self.reason)))
    }

    async fn service_account_annotations(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<BTreeMap<String, String>> {
        Err(ProviderError::auth(format!("kubernetes API unavailable: {}", self.reason)))
    }
}
