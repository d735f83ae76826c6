//! # Configuration
//!
//! Two layers of configuration:
//! - [`Settings`]: process-wide environment configuration (endpoints,
//!   overrides, provider identity), loaded once at startup.
//! - [`MountConfig`]: per-invocation configuration decoded from the driver's
//!   mount request attributes.

mod mount;
mod settings;

pub use mount::{
    AuthMode, LabelQuery, MountConfig, PodInfo, SecretRequest, GCP_SERVICE_ACCOUNT_ANNOTATION,
    GCP_SERVICE_ACCOUNT_DELEGATES_ANNOTATION,
};
pub use settings::Settings;
