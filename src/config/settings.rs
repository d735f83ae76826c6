//! # Process Settings
//!
//! Environment-variable configuration for the provider process. Every value
//! is optional with a documented default; the override variables exist so the
//! provider can run outside its originating cluster (federated workloads,
//! integration tests against mock endpoints).

use std::env;

/// Default token-exchange endpoint for GKE workload identity.
pub const DEFAULT_TOKEN_EXCHANGE_ENDPOINT: &str =
    "https://securetoken.googleapis.com/v1/identitybindingtoken";

/// Default IAM Credentials endpoint used for impersonation.
pub const DEFAULT_IAM_CREDENTIALS_ENDPOINT: &str = "https://iamcredentials.googleapis.com";

/// Default GCE metadata server endpoint.
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://metadata.google.internal";

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Process-wide provider settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Display name reported by the Version RPC (`PROVIDER_NAME`).
    pub provider_name: String,

    /// User-agent sent on every outbound HTTP call (`PROVIDER_USER_AGENT`).
    pub user_agent: String,

    /// Token-exchange endpoint (`TOKEN_EXCHANGE_ENDPOINT`).
    pub token_exchange_endpoint: String,

    /// IAM Credentials endpoint (`IAM_CREDENTIALS_ENDPOINT`).
    pub iam_credentials_endpoint: String,

    /// Metadata server endpoint (`GKE_WORKLOAD_IDENTITY_ENDPOINT`).
    pub metadata_endpoint: String,

    /// Override for the global Secret Manager endpoint
    /// (`SECRET_MANAGER_ENDPOINT`). Regional endpoints are always derived
    /// from the location.
    pub secret_manager_endpoint: Option<String>,

    /// Override for the global Parameter Manager endpoint
    /// (`PARAMETER_MANAGER_ENDPOINT`).
    pub parameter_manager_endpoint: Option<String>,

    /// Whether nodePublishSecretRef auth is accepted
    /// (`ALLOW_NODE_PUBLISH_SECRET`, default false).
    pub allow_node_publish_secret: bool,

    /// Project override used instead of the metadata lookup (`GCP_PROJECT_ID`).
    pub project_id: Option<String>,

    /// Cluster name override (`GKE_CLUSTER_NAME`).
    pub cluster_name: Option<String>,

    /// Cluster location override (`GKE_CLUSTER_LOCATION`).
    pub cluster_location: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_name: env!("CARGO_PKG_NAME").to_string(),
            user_agent: default_user_agent(),
            token_exchange_endpoint: DEFAULT_TOKEN_EXCHANGE_ENDPOINT.to_string(),
            iam_credentials_endpoint: DEFAULT_IAM_CREDENTIALS_ENDPOINT.to_string(),
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            secret_manager_endpoint: None,
            parameter_manager_endpoint: None,
            allow_node_publish_secret: false,
            project_id: None,
            cluster_name: None,
            cluster_location: None,
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            provider_name: env_or("PROVIDER_NAME", defaults.provider_name),
            user_agent: env_or("PROVIDER_USER_AGENT", defaults.user_agent),
            token_exchange_endpoint: env_or(
                "TOKEN_EXCHANGE_ENDPOINT",
                defaults.token_exchange_endpoint,
            ),
            iam_credentials_endpoint: env_or(
                "IAM_CREDENTIALS_ENDPOINT",
                defaults.iam_credentials_endpoint,
            ),
            metadata_endpoint: env_or(
                "GKE_WORKLOAD_IDENTITY_ENDPOINT",
                defaults.metadata_endpoint,
            ),
            secret_manager_endpoint: env_opt("SECRET_MANAGER_ENDPOINT"),
            parameter_manager_endpoint: env_opt("PARAMETER_MANAGER_ENDPOINT"),
            allow_node_publish_secret: env_bool("ALLOW_NODE_PUBLISH_SECRET"),
            project_id: env_opt("GCP_PROJECT_ID"),
            cluster_name: env_opt("GKE_CLUSTER_NAME"),
            cluster_location: env_opt("GKE_CLUSTER_LOCATION"),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> bool {
    matches!(env::var(key).ok().as_deref(), Some("true") | Some("1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_well_known_endpoints() {
        let settings = Settings::default();
        assert_eq!(
            settings.token_exchange_endpoint,
            "https://securetoken.googleapis.com/v1/identitybindingtoken"
        );
        assert_eq!(settings.metadata_endpoint, "http://metadata.google.internal");
        assert!(!settings.allow_node_publish_secret);
        assert!(settings.secret_manager_endpoint.is_none());
    }

    #[test]
    fn user_agent_includes_version() {
        let settings = Settings::default();
        assert!(settings.user_agent.contains(env!("CARGO_PKG_VERSION")));
    }
}
