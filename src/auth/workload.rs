//! Workload identity derivation.
//!
//! Determines the token-exchange audience for the cluster the provider runs
//! in. GKE-style derivation (project + cluster name/location, from env
//! overrides or the metadata server) is attempted first; when that fails the
//! resolver falls back to an `external_account` credential-configuration file
//! (fleet / federated workload identity), taking the audience and token
//! endpoint directly from its contents.

use serde::Deserialize;
use tracing::debug;

use super::MetadataClient;
use crate::config::Settings;
use crate::errors::{ProviderError, Result};

const CREDENTIALS_FILE_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// A derived workload identity: the STS audience plus an optional
/// endpoint override carried by external_account credential files.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadIdentity {
    pub audience: String,
    pub token_endpoint: Option<String>,
}

/// Derive the workload identity: GKE first, external_account fallback.
pub async fn derive(settings: &Settings, metadata: &MetadataClient) -> Result<WorkloadIdentity> {
    match gke_identity(settings, metadata).await {
        Ok(identity) => Ok(identity),
        Err(gke_err) => {
            debug!(error = %gke_err, "GKE identity derivation failed, trying external_account credentials");
            let path = std::env::var(CREDENTIALS_FILE_ENV).map_err(|_| {
                ProviderError::auth(format!(
                    "workload identity derivation failed: {}; and {} is not set",
                    gke_err, CREDENTIALS_FILE_ENV
                ))
            })?;
            external_account_identity(&path).map_err(|fed_err| {
                ProviderError::auth(format!(
                    "workload identity derivation failed: GKE: {}; external_account: {}",
                    gke_err, fed_err
                ))
            })
        }
    }
}

async fn gke_identity(settings: &Settings, metadata: &MetadataClient) -> Result<WorkloadIdentity> {
    let project = match &settings.project_id {
        Some(project) => project.clone(),
        None => metadata.project_id().await?,
    };
    let cluster_name = match &settings.cluster_name {
        Some(name) => name.clone(),
        None => metadata.instance_attribute("cluster-name").await?,
    };
    let cluster_location = match &settings.cluster_location {
        Some(location) => location.clone(),
        None => metadata.instance_attribute("cluster-location").await?,
    };

    let pool = format!("{}.svc.id.goog", project);
    let provider = format!(
        "https://container.googleapis.com/v1/projects/{}/locations/{}/clusters/{}",
        project, cluster_location, cluster_name
    );
    Ok(WorkloadIdentity {
        audience: format!("identitynamespace:{}:{}", pool, provider),
        token_endpoint: None,
    })
}

/// Read an `external_account` credential-configuration file and take the
/// audience (and token endpoint) from it.
pub fn external_account_identity(path: &str) -> Result<WorkloadIdentity> {
    #[derive(Deserialize)]
    struct ExternalAccount {
        #[serde(rename = "type")]
        credential_type: String,
        audience: String,
        #[serde(default)]
        token_url: Option<String>,
    }

    let contents = std::fs::read_to_string(path).map_err(|e| {
        ProviderError::auth(format!("failed to read credential config '{}': {}", path, e))
    })?;
    let account: ExternalAccount = serde_json::from_str(&contents).map_err(|e| {
        ProviderError::auth(format!("failed to parse credential config '{}': {}", path, e))
    })?;
    if account.credential_type != "external_account" {
        return Err(ProviderError::auth(format!(
            "credential config '{}' has type '{}', expected external_account",
            path, account.credential_type
        )));
    }
    Ok(WorkloadIdentity { audience: account.audience, token_endpoint: account.token_url })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn external_account_file_supplies_audience_and_endpoint() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = serde_json::json!({
            "type": "external_account",
            "audience": "//iam.googleapis.com/projects/1/locations/global/workloadIdentityPools/pool/providers/prov",
            "token_url": "https://sts.googleapis.com/v1/token",
        });
        file.write_all(config.to_string().as_bytes()).unwrap();

        let identity = external_account_identity(file.path().to_str().unwrap()).unwrap();
        assert!(identity.audience.starts_with("//iam.googleapis.com/"));
        assert_eq!(identity.token_endpoint.as_deref(), Some("https://sts.googleapis.com/v1/token"));
    }

    #[test]
    fn non_external_account_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = serde_json::json!({
            "type": "service_account",
            "audience": "whatever",
        });
        file.write_all(config.to_string().as_bytes()).unwrap();

        let err = external_account_identity(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("expected external_account"));
    }

    #[test]
    fn missing_file_is_an_auth_error() {
        let err = external_account_identity("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.code(), tonic::Code::PermissionDenied);
    }
}
