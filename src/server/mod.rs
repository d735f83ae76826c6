//! # gRPC Façade
//!
//! Adapts the resolution pipeline to the driver-facing `CsiDriverProvider`
//! service. A thin translator: it decodes the request, runs the pipeline, and
//! maps internal error categories to gRPC statuses without further
//! interpretation.

pub mod proto {
    tonic::include_proto!("provider.v1");
}

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{error, info, warn};

use crate::aggregate::aggregate;
use crate::auth::{CredentialResolver, TokenSource};
use crate::config::{MountConfig, Settings};
use crate::errors::Result;
use crate::fetch::{ClientRegistry, Fetcher};
use crate::observability::metrics::record_mount;

use proto::csi_driver_provider_server::{CsiDriverProvider, CsiDriverProviderServer};
use proto::{MountRequest, MountResponse, VersionRequest, VersionResponse};

/// Protocol version spoken with the driver.
const PROTOCOL_VERSION: &str = "v1alpha1";

/// The provider service: one resolver and one client registry shared across
/// all mount events for the life of the process.
pub struct ProviderService {
    settings: Arc<Settings>,
    resolver: CredentialResolver,
    fetcher: Fetcher,
}

impl ProviderService {
    pub fn new(settings: Arc<Settings>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let resolver = CredentialResolver::new(settings.clone(), tokens)?;
        let registry = Arc::new(ClientRegistry::new(&settings));
        Ok(Self { settings, resolver, fetcher: Fetcher::new(registry) })
    }

    pub fn into_server(self) -> CsiDriverProviderServer<Self> {
        CsiDriverProviderServer::new(self)
    }

    async fn handle_mount(&self, request: MountRequest) -> std::result::Result<MountResponse, Status> {
        let config = MountConfig::parse(
            &request.attributes,
            &request.secrets,
            &request.target_path,
            &request.permission,
            &self.settings,
        )?;

        let credential = self.resolver.resolve(&config).await.map_err(|e| {
            warn!(error = %e, "credential resolution failed");
            Status::from(e)
        })?;

        let requests = match &config.label_query {
            Some(query) => self.fetcher.expand_label_query(&credential, query).await?,
            None => config.secrets.clone(),
        };

        let outcomes = self.fetcher.fetch_all(&credential, &requests).await;
        match aggregate(&requests, outcomes, config.permissions) {
            Ok((files, versions)) => {
                info!(
                    target_path = %config.target_path.display(),
                    items = files.len(),
                    "mount resolved"
                );
                Ok(MountResponse {
                    object_version: versions
                        .into_iter()
                        .map(|v| proto::ObjectVersion { id: v.id, version: v.version })
                        .collect(),
                    files: files
                        .into_iter()
                        .map(|f| proto::File {
                            path: f.path,
                            mode: f.mode as i32,
                            contents: f.contents,
                        })
                        .collect(),
                })
            }
            Err(failure) => {
                for item in &failure.per_item {
                    error!(
                        index = item.index,
                        code = ?item.code,
                        message = %item.message,
                        "mount item failed"
                    );
                }
                Err(failure.into())
            }
        }
    }
}

#[tonic::async_trait]
impl CsiDriverProvider for ProviderService {
    async fn version(
        &self,
        _request: Request<VersionRequest>,
    ) -> std::result::Result<Response<VersionResponse>, Status> {
        Ok(Response::new(VersionResponse {
            version: PROTOCOL_VERSION.to_string(),
            runtime_name: self.settings.provider_name.clone(),
            runtime_version: crate::VERSION.to_string(),
        }))
    }

    async fn mount(
        &self,
        request: Request<MountRequest>,
    ) -> std::result::Result<Response<MountResponse>, Status> {
        let result = self.handle_mount(request.into_inner()).await;
        record_mount(result.is_ok());
        result.map(Response::new)
    }
}
