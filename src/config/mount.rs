//! # Mount Request Decoding
//!
//! Decodes the driver's raw mount request (attribute JSON, kubernetes secret
//! JSON, target path and permission strings) into a strongly-typed
//! [`MountConfig`]. Pure deserialization and validation; no network calls.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::config::Settings;
use crate::errors::{ProviderError, Result};

// Well-known attribute keys injected by the CSI driver.
const ATTR_POD_NAMESPACE: &str = "csi.storage.k8s.io/pod.namespace";
const ATTR_POD_NAME: &str = "csi.storage.k8s.io/pod.name";
const ATTR_POD_UID: &str = "csi.storage.k8s.io/pod.uid";
const ATTR_SERVICE_ACCOUNT: &str = "csi.storage.k8s.io/serviceAccount.name";
const ATTR_SERVICE_ACCOUNT_TOKENS: &str = "csi.storage.k8s.io/serviceAccount.tokens";

// Provider-specific attribute keys.
const ATTR_AUTH: &str = "auth";
const ATTR_SECRETS: &str = "secrets";
const ATTR_PROJECT_ID: &str = "projectID";
const ATTR_VERSIONS: &str = "versions";
const ATTR_LABELS: &str = "labels";

const AUTH_POD_ADC: &str = "pod-adc";
const AUTH_PROVIDER_ADC: &str = "provider-adc";

/// Key inside the nodePublishSecretRef secret holding the service-account key.
const NODE_PUBLISH_KEY_ENTRY: &str = "key.json";

/// Annotation linking a kubernetes service account to a GCP service account.
pub const GCP_SERVICE_ACCOUNT_ANNOTATION: &str = "iam.gke.io/gcp-service-account";

/// Annotation carrying a JSON list of intermediate identities for delegated
/// impersonation.
pub const GCP_SERVICE_ACCOUNT_DELEGATES_ANNOTATION: &str =
    "iam.gke.io/gcp-service-account-delegates";

/// Identity of the workload the mount is performed for.
#[derive(Debug, Clone, Default)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub service_account: String,
    /// Pre-issued service-account tokens keyed by audience, when the driver
    /// requested them on the provider's behalf.
    pub tokens: HashMap<String, String>,
}

/// How the provider obtains credentials for backend calls.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMode {
    /// Exchange the pod's kubernetes service-account token for a GCP
    /// credential via workload identity. The default.
    PodWorkloadIdentity,
    /// Use the provider process's own ambient credentials.
    ProviderAdc,
    /// Use the service-account key delivered through nodePublishSecretRef.
    NodePublishSecret(String),
}

/// One requested secret or parameter.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SecretRequest {
    /// Backend resource version name (secret or parameter shape).
    #[serde(rename = "resourceName")]
    pub resource_uri: String,

    /// Older spelling of the output path; `path` wins when both are set.
    #[serde(default, rename = "fileName")]
    pub file_name: Option<String>,

    /// Relative path of the materialized file under the target path.
    #[serde(default)]
    pub path: Option<String>,

    /// Per-item file mode override. Quoted leading-zero values ("0600")
    /// parse as octal; bare YAML integers pass through as written.
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode: Option<u32>,

    /// Extract a single top-level string field from a JSON payload.
    #[serde(default, rename = "extractJSONKey")]
    pub extract_json_key: Option<String>,

    /// Extract a single top-level string field from a YAML payload.
    #[serde(default, rename = "extractYAMLKey")]
    pub extract_yaml_key: Option<String>,
}

impl SecretRequest {
    /// The relative output path, with `path` taking precedence over the
    /// legacy `fileName`.
    pub fn output_path(&self) -> &str {
        self.path.as_deref().or(self.file_name.as_deref()).unwrap_or_default()
    }

    /// The effective file mode given the mount-wide default.
    pub fn resolved_mode(&self, default_mode: u32) -> u32 {
        self.mode.unwrap_or(default_mode)
    }

    fn validate(&self) -> Result<()> {
        if self.resource_uri.is_empty() {
            return Err(ProviderError::config("secret entry is missing resourceName"));
        }
        let output = self.output_path();
        if output.is_empty() {
            return Err(ProviderError::config(format!(
                "secret entry for '{}' must set path or fileName",
                self.resource_uri
            )));
        }
        let path = Path::new(output);
        if path.is_absolute()
            || path.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(ProviderError::config(format!(
                "output path '{}' must be relative and must not traverse upward",
                output
            )));
        }
        Ok(())
    }
}

/// The labeled-query variant: fetch every secret in a project matching a
/// label filter, at each of the requested versions.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelQuery {
    pub project: String,
    pub versions: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Immutable per-invocation mount configuration.
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub secrets: Vec<SecretRequest>,
    pub pod: PodInfo,
    pub target_path: PathBuf,
    /// Default file mode for items without an override.
    pub permissions: u32,
    pub auth_mode: AuthMode,
    pub label_query: Option<LabelQuery>,
}

impl MountConfig {
    /// Decode a mount request. `attributes` and `kube_secrets` are the raw
    /// JSON strings from the RPC; `permission` is the decimal-string default
    /// file mode.
    pub fn parse(
        attributes: &str,
        kube_secrets: &str,
        target_path: &str,
        permission: &str,
        settings: &Settings,
    ) -> Result<Self> {
        let attrs: HashMap<String, String> = serde_json::from_str(attributes)
            .map_err(|e| ProviderError::config(format!("failed to parse attributes: {}", e)))?;

        let permissions = permission
            .parse::<u32>()
            .map_err(|e| ProviderError::config(format!("invalid permission '{}': {}", permission, e)))?;
        if permissions > 0o7777 {
            return Err(ProviderError::config(format!(
                "permission {} out of range",
                permissions
            )));
        }

        let pod = parse_pod_info(&attrs)?;
        let auth_mode = parse_auth_mode(&attrs, kube_secrets, settings)?;
        let secrets = parse_secret_list(&attrs)?;
        let label_query = parse_label_query(&attrs)?;

        match (secrets.is_empty(), &label_query) {
            (true, None) => {
                return Err(ProviderError::config(
                    "attributes must carry a 'secrets' list or a projectID/versions/labels query",
                ))
            }
            (false, Some(_)) => {
                return Err(ProviderError::config(
                    "'secrets' and a label query cannot both be set",
                ))
            }
            _ => {}
        }

        Ok(Self {
            secrets,
            pod,
            target_path: PathBuf::from(target_path),
            permissions,
            auth_mode,
            label_query,
        })
    }
}

fn parse_pod_info(attrs: &HashMap<String, String>) -> Result<PodInfo> {
    let tokens = match attrs.get(ATTR_SERVICE_ACCOUNT_TOKENS).filter(|v| !v.is_empty()) {
        Some(raw) => {
            #[derive(Deserialize)]
            struct IssuedToken {
                token: String,
            }
            let issued: HashMap<String, IssuedToken> = serde_json::from_str(raw).map_err(|e| {
                ProviderError::config(format!("failed to parse serviceAccount.tokens: {}", e))
            })?;
            issued.into_iter().map(|(aud, t)| (aud, t.token)).collect()
        }
        None => HashMap::new(),
    };

    let get = |key: &str| attrs.get(key).cloned().unwrap_or_default();
    Ok(PodInfo {
        namespace: get(ATTR_POD_NAMESPACE),
        name: get(ATTR_POD_NAME),
        uid: get(ATTR_POD_UID),
        service_account: get(ATTR_SERVICE_ACCOUNT),
        tokens,
    })
}

fn parse_auth_mode(
    attrs: &HashMap<String, String>,
    kube_secrets: &str,
    settings: &Settings,
) -> Result<AuthMode> {
    let auth_attr = attrs.get(ATTR_AUTH).map(String::as_str).unwrap_or("");

    let node_publish_key = parse_node_publish_key(kube_secrets)?;
    if let Some(key) = node_publish_key {
        // A nodePublishSecretRef and an explicit auth mode are mutually
        // exclusive; refusing the combination beats guessing intent.
        if !auth_attr.is_empty() {
            return Err(ProviderError::config(
                "nodePublishSecretRef and the 'auth' attribute cannot both be set",
            ));
        }
        if !settings.allow_node_publish_secret {
            return Err(ProviderError::config(
                "nodePublishSecretRef auth is not enabled (set ALLOW_NODE_PUBLISH_SECRET=true)",
            ));
        }
        return Ok(AuthMode::NodePublishSecret(key));
    }

    match auth_attr {
        "" | AUTH_POD_ADC => Ok(AuthMode::PodWorkloadIdentity),
        AUTH_PROVIDER_ADC => Ok(AuthMode::ProviderAdc),
        other => {
            Err(ProviderError::config(format!("unknown auth mode '{}'", other)))
        }
    }
}

fn parse_node_publish_key(kube_secrets: &str) -> Result<Option<String>> {
    if kube_secrets.is_empty() || kube_secrets == "{}" {
        return Ok(None);
    }
    let entries: HashMap<String, String> = serde_json::from_str(kube_secrets)
        .map_err(|e| ProviderError::config(format!("failed to parse nodePublishSecretRef data: {}", e)))?;
    if entries.is_empty() {
        return Ok(None);
    }
    match entries.get(NODE_PUBLISH_KEY_ENTRY) {
        Some(key) => Ok(Some(key.clone())),
        None => Err(ProviderError::config(format!(
            "nodePublishSecretRef secret must carry a '{}' entry",
            NODE_PUBLISH_KEY_ENTRY
        ))),
    }
}

fn parse_secret_list(attrs: &HashMap<String, String>) -> Result<Vec<SecretRequest>> {
    let raw = match attrs.get(ATTR_SECRETS).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw,
        None => return Ok(Vec::new()),
    };
    let secrets: Vec<SecretRequest> = serde_yaml::from_str(raw)
        .map_err(|e| ProviderError::config(format!("failed to parse secrets attribute: {}", e)))?;
    for secret in &secrets {
        secret.validate()?;
    }
    Ok(secrets)
}

fn parse_label_query(attrs: &HashMap<String, String>) -> Result<Option<LabelQuery>> {
    let project = match attrs.get(ATTR_PROJECT_ID).filter(|v| !v.is_empty()) {
        Some(p) => p.clone(),
        None => return Ok(None),
    };

    let versions: Vec<String> = match attrs.get(ATTR_VERSIONS).filter(|v| !v.trim().is_empty()) {
        Some(raw) => serde_yaml::from_str(raw)
            .map_err(|e| ProviderError::config(format!("failed to parse versions attribute: {}", e)))?,
        None => vec!["latest".to_string()],
    };
    if versions.is_empty() {
        return Err(ProviderError::config(
            "a projectID query requires at least one version",
        ));
    }

    let labels: BTreeMap<String, String> = match attrs.get(ATTR_LABELS) {
        Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str(raw)
            .map_err(|e| ProviderError::config(format!("failed to parse labels attribute: {}", e)))?,
        _ => BTreeMap::new(),
    };
    if labels.is_empty() {
        return Err(ProviderError::config(
            "a projectID query requires at least one label selector",
        ));
    }

    Ok(Some(LabelQuery { project, versions, labels }))
}

/// File modes arrive either as YAML integers or as strings. A quoted string
/// with a leading zero ("0600") is read as octal, matching what authors mean
/// when they write unix modes; other strings are decimal. Bare integers reach
/// us already resolved by the YAML parser, which reads leading-zero literals
/// (0600) and 0o-prefixed literals as octal.
fn deserialize_mode<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawMode {
        Int(i64),
        Str(String),
    }

    let parsed = match Option::<RawMode>::deserialize(deserializer)? {
        None => None,
        Some(RawMode::Int(n)) => {
            let n = u32::try_from(n).map_err(|_| D::Error::custom("mode must be non-negative"))?;
            Some(n)
        }
        Some(RawMode::Str(s)) => {
            let trimmed = s.trim();
            let value = if trimmed.len() > 1 && trimmed.starts_with('0') {
                u32::from_str_radix(trimmed, 8)
            } else {
                trimmed.parse::<u32>()
            }
            .map_err(|e| D::Error::custom(format!("invalid mode '{}': {}", s, e)))?;
            Some(value)
        }
    };

    if let Some(mode) = parsed {
        if mode > 0o7777 {
            return Err(D::Error::custom(format!("mode {} out of range", mode)));
        }
    }
    Ok(parsed)
}
