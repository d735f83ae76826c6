//! Credential resolution tests against mocked token endpoints.
//!
//! The kubernetes side is substituted through the `TokenSource` seam; every
//! HTTP endpoint (metadata, token exchange, IAM Credentials, OAuth token) is
//! wiremock. Each test pins one leg of the auth state machine.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use gcp_secrets_provider::auth::{CredentialResolver, TokenSource};
use gcp_secrets_provider::config::{
    AuthMode, MountConfig, PodInfo, GCP_SERVICE_ACCOUNT_ANNOTATION,
    GCP_SERVICE_ACCOUNT_DELEGATES_ANNOTATION,
};
use gcp_secrets_provider::errors::{ProviderError, Result};
use gcp_secrets_provider::Settings;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KSA_TOKEN: &str = "kubernetes-sa-token";
const FEDERATED_TOKEN: &str = "federated-access-token";
const IMPERSONATED_TOKEN: &str = "impersonated-access-token";

/// Test double for the cluster API.
struct StaticTokenSource {
    token: Result<String>,
    annotations: BTreeMap<String, String>,
}

impl StaticTokenSource {
    fn issuing(token: &str) -> Self {
        Self { token: Ok(token.to_string()), annotations: BTreeMap::new() }
    }

    fn failing(reason: &str) -> Self {
        Self { token: Err(ProviderError::auth(reason)), annotations: BTreeMap::new() }
    }

    fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn issue_token(&self, _pod: &PodInfo, _audience: &str) -> Result<String> {
        match &self.token {
            Ok(token) => Ok(token.clone()),
            Err(e) => Err(ProviderError::auth(e.to_string())),
        }
    }

    async fn service_account_annotations(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<BTreeMap<String, String>> {
        Ok(self.annotations.clone())
    }
}

fn pod() -> PodInfo {
    PodInfo {
        namespace: "default".to_string(),
        name: "workload-0".to_string(),
        uid: "8b9cf3a1".to_string(),
        service_account: "workload".to_string(),
        tokens: HashMap::new(),
    }
}

fn config(auth_mode: AuthMode, pod: PodInfo) -> MountConfig {
    MountConfig {
        secrets: Vec::new(),
        pod,
        target_path: PathBuf::from("/t"),
        permissions: 420,
        auth_mode,
        label_query: None,
    }
}

fn settings(server: &MockServer) -> Settings {
    Settings {
        metadata_endpoint: server.uri(),
        token_exchange_endpoint: format!("{}/v1/identitybindingtoken", server.uri()),
        iam_credentials_endpoint: server.uri(),
        project_id: Some("my-project".to_string()),
        cluster_name: Some("my-cluster".to_string()),
        cluster_location: Some("us-central1".to_string()),
        ..Settings::default()
    }
}

fn expected_audience() -> String {
    "identitynamespace:my-project.svc.id.goog:https://container.googleapis.com\
     /v1/projects/my-project/locations/us-central1/clusters/my-cluster"
        .to_string()
}

fn resolver(server: &MockServer, tokens: StaticTokenSource) -> CredentialResolver {
    CredentialResolver::new(Arc::new(settings(server)), Arc::new(tokens)).unwrap()
}

async fn mock_exchange(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/identitybindingtoken"))
        .and(body_partial_json(serde_json::json!({
            "grant_type": "urn:ietf:params:oauth:grant-type:token-exchange",
            "audience": expected_audience(),
            "subject_token": KSA_TOKEN,
            "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": FEDERATED_TOKEN,
            "expires_in": 3600,
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn pod_workload_identity_yields_federated_token_without_annotation() {
    let server = MockServer::start().await;
    mock_exchange(&server).await;

    let resolver = resolver(&server, StaticTokenSource::issuing(KSA_TOKEN));
    let credential = resolver
        .resolve(&config(AuthMode::PodWorkloadIdentity, pod()))
        .await
        .unwrap();

    assert_eq!(credential.token, FEDERATED_TOKEN);
    assert!(credential.expires_at.is_some());
}

#[tokio::test]
async fn annotated_service_account_triggers_impersonation() {
    let server = MockServer::start().await;
    mock_exchange(&server).await;
    Mock::given(method("POST"))
        .and(path(
            "/v1/projects/-/serviceAccounts/app@my-project.iam.gserviceaccount.com:generateAccessToken",
        ))
        .and(header("authorization", format!("Bearer {}", FEDERATED_TOKEN)))
        .and(body_partial_json(serde_json::json!({
            "scope": ["https://www.googleapis.com/auth/cloud-platform"],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": IMPERSONATED_TOKEN,
            "expireTime": "2026-08-27T12:00:00Z",
        })))
        .mount(&server)
        .await;

    let tokens = StaticTokenSource::issuing(KSA_TOKEN).with_annotation(
        GCP_SERVICE_ACCOUNT_ANNOTATION,
        "app@my-project.iam.gserviceaccount.com",
    );
    let resolver = resolver(&server, tokens);
    let credential = resolver
        .resolve(&config(AuthMode::PodWorkloadIdentity, pod()))
        .await
        .unwrap();

    assert_eq!(credential.token, IMPERSONATED_TOKEN);
}

#[tokio::test]
async fn delegation_chain_annotation_is_forwarded_in_order() {
    let server = MockServer::start().await;
    mock_exchange(&server).await;
    Mock::given(method("POST"))
        .and(path(
            "/v1/projects/-/serviceAccounts/app@my-project.iam.gserviceaccount.com:generateAccessToken",
        ))
        .and(body_partial_json(serde_json::json!({
            "delegates": [
                "projects/-/serviceAccounts/first@my-project.iam.gserviceaccount.com",
                "projects/-/serviceAccounts/second@my-project.iam.gserviceaccount.com",
            ],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": IMPERSONATED_TOKEN,
        })))
        .mount(&server)
        .await;

    let tokens = StaticTokenSource::issuing(KSA_TOKEN)
        .with_annotation(
            GCP_SERVICE_ACCOUNT_ANNOTATION,
            "app@my-project.iam.gserviceaccount.com",
        )
        .with_annotation(
            GCP_SERVICE_ACCOUNT_DELEGATES_ANNOTATION,
            r#"["first@my-project.iam.gserviceaccount.com", "second@my-project.iam.gserviceaccount.com"]"#,
        );
    let resolver = resolver(&server, tokens);
    let credential = resolver
        .resolve(&config(AuthMode::PodWorkloadIdentity, pod()))
        .await
        .unwrap();

    assert_eq!(credential.token, IMPERSONATED_TOKEN);
}

#[tokio::test]
async fn driver_supplied_token_skips_token_request() {
    let server = MockServer::start().await;
    mock_exchange(&server).await;

    // The token source errors on issue; resolution only succeeds if the
    // driver-supplied token for the derived audience is preferred.
    let mut pod = pod();
    pod.tokens.insert(expected_audience(), KSA_TOKEN.to_string());
    let resolver = resolver(&server, StaticTokenSource::failing("must not be called"));
    let credential = resolver
        .resolve(&config(AuthMode::PodWorkloadIdentity, pod))
        .await
        .unwrap();

    assert_eq!(credential.token, FEDERATED_TOKEN);
}

#[tokio::test]
async fn incomplete_pod_attributes_fail_before_any_call() {
    let server = MockServer::start().await;
    let mut pod = pod();
    pod.uid = String::new();

    let resolver = resolver(&server, StaticTokenSource::issuing(KSA_TOKEN));
    let err = resolver
        .resolve(&config(AuthMode::PodWorkloadIdentity, pod))
        .await
        .unwrap_err();

    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert_eq!(server.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn token_request_failure_surfaces_as_auth_error() {
    let server = MockServer::start().await;
    let resolver = resolver(&server, StaticTokenSource::failing("TokenRequest denied"));
    let err = resolver
        .resolve(&config(AuthMode::PodWorkloadIdentity, pod()))
        .await
        .unwrap_err();

    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert!(err.to_string().contains("TokenRequest denied"));
}

#[tokio::test]
async fn provider_adc_uses_metadata_default_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/instance/service-accounts/default/token"))
        .and(header("Metadata-Flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ambient-token",
            "expires_in": 1800,
        })))
        .mount(&server)
        .await;

    let resolver = resolver(&server, StaticTokenSource::failing("unused"));
    let credential = resolver
        .resolve(&config(AuthMode::ProviderAdc, pod()))
        .await
        .unwrap();

    assert_eq!(credential.token, "ambient-token");
}

#[tokio::test]
async fn node_publish_key_flows_through_jwt_bearer_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
        .and(body_string_contains("assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "sa-key-token",
            "expires_in": 3600,
        })))
        .mount(&server)
        .await;

    let private_key = std::fs::read_to_string(
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sa_key.pem"),
    )
    .unwrap();
    let key_json = serde_json::json!({
        "type": "service_account",
        "client_email": "app@my-project.iam.gserviceaccount.com",
        "private_key": private_key,
        "token_uri": format!("{}/token", server.uri()),
    })
    .to_string();

    let resolver = resolver(&server, StaticTokenSource::failing("unused"));
    let credential = resolver
        .resolve(&config(AuthMode::NodePublishSecret(key_json), pod()))
        .await
        .unwrap();

    assert_eq!(credential.token, "sa-key-token");
}

#[tokio::test]
async fn exchange_rejection_is_an_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/identitybindingtoken"))
        .respond_with(ResponseTemplate::new(403).set_body_string(r#"{"error":"access_denied"}"#))
        .mount(&server)
        .await;

    let resolver = resolver(&server, StaticTokenSource::issuing(KSA_TOKEN));
    let err = resolver
        .resolve(&config(AuthMode::PodWorkloadIdentity, pod()))
        .await
        .unwrap_err();

    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert!(err.to_string().contains("access_denied"));
}
