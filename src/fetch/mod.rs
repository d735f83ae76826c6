//! # Resource Fetching
//!
//! Concurrent fan-out fetch across Secret Manager and Parameter Manager.
//! Each requested item is classified, routed to the right backend client
//! (global or regional), read under the one pre-resolved credential, and
//! post-processed. Failures are isolated per item: one failing fetch never
//! aborts its siblings.

pub mod extract;
mod labels;
mod registry;

pub use labels::MAX_LISTED_SECRETS;
pub use registry::{ApiClient, ClientRegistry};

use std::sync::Arc;

use base64::Engine;
use serde::Deserialize;
use tonic::Code;
use tracing::debug;

use crate::auth::Credential;
use crate::config::SecretRequest;
use crate::errors::{ProviderError, Result};
use crate::observability::observe_call;
use crate::resource::{classify, ResourceKind};

/// A successfully fetched item: the backend's concrete version name plus the
/// (post-processed) payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedValue {
    pub version_id: String,
    pub payload: Vec<u8>,
}

/// Per-item result. Never partially populated: either a full value or an
/// error.
pub type FetchOutcome = Result<FetchedValue>;

/// Fetches requested resources through a shared client registry.
pub struct Fetcher {
    registry: Arc<ClientRegistry>,
}

impl Fetcher {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Fetch every request concurrently under one credential. The returned
    /// outcomes are in request order regardless of completion order, and the
    /// join is total: all fetches run to completion even when some fail.
    pub async fn fetch_all(
        &self,
        credential: &Credential,
        requests: &[SecretRequest],
    ) -> Vec<FetchOutcome> {
        let fetches = requests.iter().map(|request| self.fetch_one(credential, request));
        futures::future::join_all(fetches).await
    }

    /// Fetch a single request: classify, route, read, post-process.
    pub async fn fetch_one(
        &self,
        credential: &Credential,
        request: &SecretRequest,
    ) -> FetchOutcome {
        // Both extraction modes set is an error no matter what the backend
        // would have returned.
        if request.extract_json_key.is_some() && request.extract_yaml_key.is_some() {
            return Err(extract::both_keys_error(&request.resource_uri));
        }

        let resource = classify(&request.resource_uri)?;
        let client = self.registry.client_for(resource.kind, &resource.location)?;
        debug!(
            resource = %request.resource_uri,
            kind = resource.kind.as_str(),
            location = %resource.location,
            endpoint = %client.base_url,
            "fetching resource"
        );

        let value = match resource.kind {
            ResourceKind::Secret => {
                observe_call(
                    "secret_access",
                    access_secret_version(&client, credential, &request.resource_uri),
                )
                .await?
            }
            ResourceKind::Parameter => {
                observe_call(
                    "parameter_render",
                    render_parameter_version(&client, credential, &request.resource_uri),
                )
                .await?
            }
        };

        let payload = extract::apply(request, value.payload)?;
        Ok(FetchedValue { version_id: value.version_id, payload })
    }

    pub(crate) fn registry(&self) -> &ClientRegistry {
        &self.registry
    }
}

/// `GET <base>/v1/<name>:access`: read one secret version's payload.
async fn access_secret_version(
    client: &ApiClient,
    credential: &Credential,
    name: &str,
) -> Result<FetchedValue> {
    #[derive(Deserialize)]
    struct AccessResponse {
        name: String,
        payload: AccessPayload,
    }
    #[derive(Deserialize)]
    struct AccessPayload {
        #[serde(default)]
        data: String,
    }

    let url = format!("{}/v1/{}:access", client.base_url, name);
    let response = client.http.get(&url).bearer_auth(&credential.token).send().await?;
    let body = read_success_body(response, name).await?;

    let access: AccessResponse = serde_json::from_str(&body).map_err(|e| {
        ProviderError::fetch(Code::Internal, format!("{}: malformed access response: {}", name, e))
    })?;
    let payload = base64::engine::general_purpose::STANDARD
        .decode(access.payload.data.as_bytes())
        .map_err(|e| {
            ProviderError::fetch(
                Code::Internal,
                format!("{}: payload is not valid base64: {}", name, e),
            )
        })?;
    Ok(FetchedValue { version_id: access.name, payload })
}

/// `GET <base>/v1/<name>:render`: server-side render of one parameter
/// version (embedded secret references are substituted by the backend).
async fn render_parameter_version(
    client: &ApiClient,
    credential: &Credential,
    name: &str,
) -> Result<FetchedValue> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RenderResponse {
        parameter_version: String,
        #[serde(default)]
        rendered_payload: String,
    }

    let url = format!("{}/v1/{}:render", client.base_url, name);
    let response = client.http.get(&url).bearer_auth(&credential.token).send().await?;
    let body = read_success_body(response, name).await?;

    let rendered: RenderResponse = serde_json::from_str(&body).map_err(|e| {
        ProviderError::fetch(Code::Internal, format!("{}: malformed render response: {}", name, e))
    })?;
    let payload = base64::engine::general_purpose::STANDARD
        .decode(rendered.rendered_payload.as_bytes())
        .map_err(|e| {
            ProviderError::fetch(
                Code::Internal,
                format!("{}: rendered payload is not valid base64: {}", name, e),
            )
        })?;
    Ok(FetchedValue { version_id: rendered.parameter_version, payload })
}

/// Read the response body, translating non-success statuses into per-item
/// fetch errors carrying the backend's own status code.
pub(crate) async fn read_success_body(
    response: reqwest::Response,
    resource: &str,
) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    Err(backend_error(status, &body, resource))
}

/// Map a Google REST error response to a fetch error. The JSON error body's
/// `status` field is authoritative; the HTTP status is the fallback when the
/// body is unrecognizable.
fn backend_error(status: reqwest::StatusCode, body: &str, resource: &str) -> ProviderError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorStatus,
    }
    #[derive(Deserialize)]
    struct ErrorStatus {
        #[serde(default)]
        status: String,
        #[serde(default)]
        message: String,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        let code = code_from_status_name(&parsed.error.status)
            .unwrap_or_else(|| code_from_http(status));
        return ProviderError::fetch(
            code,
            format!("{}: {}", resource, parsed.error.message),
        );
    }

    ProviderError::fetch(
        code_from_http(status),
        format!("{}: backend returned {}: {}", resource, status, body),
    )
}

fn code_from_status_name(status: &str) -> Option<Code> {
    let code = match status {
        "CANCELLED" => Code::Cancelled,
        "INVALID_ARGUMENT" => Code::InvalidArgument,
        "DEADLINE_EXCEEDED" => Code::DeadlineExceeded,
        "NOT_FOUND" => Code::NotFound,
        "ALREADY_EXISTS" => Code::AlreadyExists,
        "PERMISSION_DENIED" => Code::PermissionDenied,
        "RESOURCE_EXHAUSTED" => Code::ResourceExhausted,
        "FAILED_PRECONDITION" => Code::FailedPrecondition,
        "ABORTED" => Code::Aborted,
        "OUT_OF_RANGE" => Code::OutOfRange,
        "UNIMPLEMENTED" => Code::Unimplemented,
        "INTERNAL" => Code::Internal,
        "UNAVAILABLE" => Code::Unavailable,
        "DATA_LOSS" => Code::DataLoss,
        "UNAUTHENTICATED" => Code::Unauthenticated,
        _ => return None,
    };
    Some(code)
}

fn code_from_http(status: reqwest::StatusCode) -> Code {
    use reqwest::StatusCode;
    match status {
        StatusCode::BAD_REQUEST => Code::InvalidArgument,
        StatusCode::UNAUTHORIZED => Code::Unauthenticated,
        StatusCode::FORBIDDEN => Code::PermissionDenied,
        StatusCode::NOT_FOUND => Code::NotFound,
        StatusCode::CONFLICT => Code::AlreadyExists,
        StatusCode::TOO_MANY_REQUESTS => Code::ResourceExhausted,
        StatusCode::SERVICE_UNAVAILABLE => Code::Unavailable,
        StatusCode::GATEWAY_TIMEOUT => Code::DeadlineExceeded,
        _ => Code::Internal,
    }
}
