//! # Resource Classification
//!
//! Pure classification of backend resource names. A resource string names
//! either a Secret Manager secret version or a Parameter Manager parameter
//! version, each optionally scoped to a regional endpoint via a
//! `locations/<loc>` segment. Classification decides which backend client a
//! fetch routes to and performs no I/O.

use crate::errors::{ProviderError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tonic::Code;

/// Upper bound on the length of a location segment. Locations are spliced
/// into regional endpoint hostnames, so anything longer than a real GCP
/// region name is rejected before it can reach DNS.
pub const MAX_LOCATION_LENGTH: usize = 30;

static SECRET_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^projects/[^/]+(?:/locations/(?P<location>[^/]+))?/secrets/[^/]+/versions/[^/]+$",
    )
    .expect("secret resource regex")
});

static PARAMETER_VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^projects/[^/]+/locations/(?P<location>[^/]+)/parameters/[^/]+/versions/[^/]+$",
    )
    .expect("parameter resource regex")
});

/// Which backend service a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Secret,
    Parameter,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Secret => "secret",
            Self::Parameter => "parameter",
        }
    }
}

/// Which endpoint shard a resource lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Global,
    Regional(String),
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Regional(loc) => write!(f, "{}", loc),
        }
    }
}

/// Classification result: a closed tag over {secret, parameter} x
/// {global, regional}.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub location: Location,
}

/// Classify a resource string into `{kind, location}`.
///
/// Recognized shapes:
/// - `projects/<p>[/locations/<loc>]/secrets/<name>/versions/<v>`: a secret
///   version; a missing `locations/` segment means the global endpoint.
/// - `projects/<p>/locations/<loc>/parameters/<name>/versions/<v>`: a
///   parameter version; the location segment is mandatory and `global` is an
///   explicit valid value.
///
/// Anything else is an error, as is a location segment longer than
/// [`MAX_LOCATION_LENGTH`].
pub fn classify(resource: &str) -> Result<ResourceRef> {
    if let Some(caps) = SECRET_VERSION_RE.captures(resource) {
        let location = parse_location(caps.name("location").map(|m| m.as_str()), resource)?;
        return Ok(ResourceRef { kind: ResourceKind::Secret, location });
    }

    if let Some(caps) = PARAMETER_VERSION_RE.captures(resource) {
        let location = parse_location(caps.name("location").map(|m| m.as_str()), resource)?;
        return Ok(ResourceRef { kind: ResourceKind::Parameter, location });
    }

    Err(ProviderError::fetch(
        Code::InvalidArgument,
        format!(
            "unrecognized resource name '{}': expected \
             projects/<p>[/locations/<l>]/secrets/<n>/versions/<v> or \
             projects/<p>/locations/<l>/parameters/<n>/versions/<v>",
            resource
        ),
    ))
}

fn parse_location(segment: Option<&str>, resource: &str) -> Result<Location> {
    match segment {
        None | Some("global") => Ok(Location::Global),
        Some(loc) if loc.len() > MAX_LOCATION_LENGTH => Err(ProviderError::fetch(
            Code::InvalidArgument,
            format!(
                "location '{}' in resource '{}' exceeds {} characters",
                loc, resource, MAX_LOCATION_LENGTH
            ),
        )),
        Some(loc) => Ok(Location::Regional(loc.to_string())),
    }
}
