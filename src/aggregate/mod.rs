//! # Result Aggregation
//!
//! Joins per-item fetch outcomes into the all-or-nothing terminal result.
//! Any failing item fails the whole mount: partial results risk inconsistent
//! on-disk state (a username file updated without its paired password file).
//! The consolidated error keeps every individual failure as a typed entry so
//! callers can inspect which of N items failed without parsing message text.

use tonic::Code;

use crate::config::SecretRequest;
use crate::fetch::FetchOutcome;

/// One materialized file for the response body.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSpec {
    pub path: String,
    pub mode: u32,
    pub contents: Vec<u8>,
}

/// Version-tracking metadata: the resource as requested plus the concrete
/// version the backend served.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectVersion {
    pub id: String,
    pub version: String,
}

/// One item's failure within a consolidated mount error.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub index: usize,
    pub code: Code,
    pub message: String,
}

/// Consolidated all-or-nothing failure: a joined summary for logs plus the
/// full per-item list for programmatic inspection.
#[derive(Debug, thiserror::Error)]
#[error("{summary}")]
pub struct MountFailure {
    pub summary: String,
    pub per_item: Vec<ItemFailure>,
}

impl From<MountFailure> for tonic::Status {
    fn from(failure: MountFailure) -> Self {
        tonic::Status::internal(failure.summary)
    }
}

/// Collapse per-item outcomes into the terminal result. Outcomes must be in
/// request order (the fetcher's ordered join guarantees this).
pub fn aggregate(
    requests: &[SecretRequest],
    outcomes: Vec<FetchOutcome>,
    default_mode: u32,
) -> Result<(Vec<FileSpec>, Vec<ObjectVersion>), MountFailure> {
    debug_assert_eq!(requests.len(), outcomes.len());

    let failures: Vec<ItemFailure> = outcomes
        .iter()
        .enumerate()
        .filter_map(|(index, outcome)| {
            outcome.as_ref().err().map(|e| ItemFailure {
                index,
                code: e.code(),
                message: e.to_string(),
            })
        })
        .collect();

    if !failures.is_empty() {
        let summary = failures
            .iter()
            .map(|f| format!("{:?}: {}", f.code, f.message))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(MountFailure { summary, per_item: failures });
    }

    let mut files = Vec::with_capacity(requests.len());
    let mut versions = Vec::with_capacity(requests.len());
    for (request, outcome) in requests.iter().zip(outcomes) {
        let value = outcome.expect("failures were screened above");
        files.push(FileSpec {
            path: request.output_path().to_string(),
            mode: request.resolved_mode(default_mode),
            contents: value.payload,
        });
        versions.push(ObjectVersion {
            id: request.resource_uri.clone(),
            version: value.version_id,
        });
    }
    Ok((files, versions))
}
