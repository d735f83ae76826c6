//! Backend client registry.
//!
//! One API client per {kind, location}, created lazily the first time a
//! location is seen and cached for the life of the process. Clients carry no
//! credential; the bearer token is attached per call. The registry is an
//! explicit object owned by the server root (never a package-level
//! singleton), so tests get a fresh registry each.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Settings;
use crate::errors::{ProviderError, Result};
use crate::resource::{Location, ResourceKind};

const SECRET_MANAGER_GLOBAL: &str = "https://secretmanager.googleapis.com";
const PARAMETER_MANAGER_GLOBAL: &str = "https://parametermanager.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    kind: ResourceKind,
    location: Location,
}

/// A cached backend client: shared HTTP connection pool plus the endpoint it
/// points at.
pub struct ApiClient {
    pub http: reqwest::Client,
    pub base_url: String,
}

/// Process-wide registry of backend clients, keyed by {kind, location}.
pub struct ClientRegistry {
    clients: DashMap<ClientKey, Arc<ApiClient>>,
    user_agent: String,
    secret_manager_endpoint: Option<String>,
    parameter_manager_endpoint: Option<String>,
}

impl ClientRegistry {
    pub fn new(settings: &Settings) -> Self {
        Self {
            clients: DashMap::new(),
            user_agent: settings.user_agent.clone(),
            secret_manager_endpoint: settings.secret_manager_endpoint.clone(),
            parameter_manager_endpoint: settings.parameter_manager_endpoint.clone(),
        }
    }

    /// The client for a {kind, location} pair, building and caching it on
    /// first use. Construction failure surfaces as a per-item fetch error at
    /// the call site.
    pub fn client_for(&self, kind: ResourceKind, location: &Location) -> Result<Arc<ApiClient>> {
        let key = ClientKey { kind, location: location.clone() };
        if let Some(existing) = self.clients.get(&key) {
            return Ok(existing.clone());
        }

        let built = Arc::new(self.build_client(kind, location)?);
        // entry() is idempotent under concurrent first use: whichever insert
        // wins, every caller gets the same client back.
        Ok(self.clients.entry(key).or_insert(built).clone())
    }

    fn build_client(&self, kind: ResourceKind, location: &Location) -> Result<ApiClient> {
        let http = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| {
                ProviderError::transport(format!(
                    "failed to build {} client for location {}: {}",
                    kind.as_str(),
                    location,
                    e
                ))
            })?;
        Ok(ApiClient { http, base_url: self.base_url(kind, location) })
    }

    fn base_url(&self, kind: ResourceKind, location: &Location) -> String {
        match (kind, location) {
            (ResourceKind::Secret, Location::Global) => self
                .secret_manager_endpoint
                .clone()
                .unwrap_or_else(|| SECRET_MANAGER_GLOBAL.to_string()),
            (ResourceKind::Secret, Location::Regional(loc)) => {
                format!("https://secretmanager.{}.rep.googleapis.com", loc)
            }
            (ResourceKind::Parameter, Location::Global) => self
                .parameter_manager_endpoint
                .clone()
                .unwrap_or_else(|| PARAMETER_MANAGER_GLOBAL.to_string()),
            (ResourceKind::Parameter, Location::Regional(loc)) => {
                format!("https://parametermanager.{}.rep.googleapis.com", loc)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}
