//! # GCP Secrets Provider
//!
//! A node-local Secrets Store CSI provider plugin for Google Secret Manager
//! and Parameter Manager. The CSI driver dials the provider over a unix
//! socket and issues one `Mount` call per volume mount or refresh; the
//! provider resolves a workload-scoped credential, fetches every requested
//! resource concurrently, applies optional per-item extraction, and returns
//! the materialized file contents plus version metadata. The result is
//! atomic: either every requested item succeeds or none are returned.
//!
//! ## Architecture
//!
//! ```text
//! gRPC Façade → Config Parser → Credential Resolver → Resource Fetcher (×N)
//!                                                           ↓
//!                                                    Result Aggregator
//! ```
//!
//! - **Config Parser** ([`config`]): decodes mount attributes into a typed
//!   [`config::MountConfig`].
//! - **Credential Resolver** ([`auth`]): workload-identity token exchange,
//!   ambient credentials, or a node-publish service-account key.
//! - **Resource Fetcher** ([`fetch`]): concurrent fan-out across global and
//!   regional Secret Manager / Parameter Manager endpoints.
//! - **Result Aggregator** ([`aggregate`]): all-or-nothing join with a
//!   structured multi-error.

pub mod aggregate;
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod observability;
pub mod resource;
pub mod server;

pub use config::Settings;
pub use errors::{ProviderError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
