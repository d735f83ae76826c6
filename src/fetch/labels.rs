//! Labeled-query resolution: list secrets in a project by label filter, then
//! fetch each match through the regular per-item path. A coarser alternative
//! to naming every resource explicitly. Secrets only; parameters have no
//! labeled equivalent.

use serde::Deserialize;
use tonic::Code;
use tracing::debug;

use super::Fetcher;
use crate::auth::Credential;
use crate::config::{LabelQuery, SecretRequest};
use crate::errors::{ProviderError, Result};
use crate::observability::observe_call;
use crate::resource::{Location, ResourceKind};

/// Hard cap on listed secrets per query.
pub const MAX_LISTED_SECRETS: usize = 1000;

const LIST_PAGE_SIZE: usize = 250;

impl Fetcher {
    /// Expand a label query into concrete per-item requests: one per matched
    /// secret per requested version. Zero matches is an error: an empty
    /// mount is more likely a bad filter than an intended result.
    pub async fn expand_label_query(
        &self,
        credential: &Credential,
        query: &LabelQuery,
    ) -> Result<Vec<SecretRequest>> {
        let names = observe_call("secret_list", self.list_matching_secrets(credential, query))
            .await?;
        if names.is_empty() {
            return Err(ProviderError::fetch(
                Code::NotFound,
                format!(
                    "no secrets in project '{}' matched label filter '{}'",
                    query.project,
                    label_filter(query)
                ),
            ));
        }
        debug!(project = %query.project, matched = names.len(), "label query matched secrets");

        let single_version = query.versions.len() == 1;
        let mut requests = Vec::with_capacity(names.len() * query.versions.len());
        for name in &names {
            let short_name = name.rsplit('/').next().unwrap_or(name);
            for version in &query.versions {
                let output = if single_version {
                    short_name.to_string()
                } else {
                    format!("{}_{}", short_name, version)
                };
                requests.push(SecretRequest {
                    resource_uri: format!("{}/versions/{}", name, version),
                    file_name: None,
                    path: Some(output),
                    mode: None,
                    extract_json_key: None,
                    extract_yaml_key: None,
                });
            }
        }
        Ok(requests)
    }

    async fn list_matching_secrets(
        &self,
        credential: &Credential,
        query: &LabelQuery,
    ) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ListResponse {
            #[serde(default)]
            secrets: Vec<ListedSecret>,
            #[serde(default)]
            next_page_token: String,
        }
        #[derive(Deserialize)]
        struct ListedSecret {
            name: String,
        }

        let client = self.registry().client_for(ResourceKind::Secret, &Location::Global)?;
        let url = format!("{}/v1/projects/{}/secrets", client.base_url, query.project);
        let filter = label_filter(query);

        let mut names = Vec::new();
        let mut page_token = String::new();
        loop {
            let mut request = client
                .http
                .get(&url)
                .bearer_auth(&credential.token)
                .query(&[("filter", filter.as_str())])
                .query(&[("pageSize", LIST_PAGE_SIZE.to_string())]);
            if !page_token.is_empty() {
                request = request.query(&[("pageToken", page_token.as_str())]);
            }

            let response = request.send().await?;
            let body = super::read_success_body(response, &format!("projects/{}/secrets", query.project)).await?;
            let page: ListResponse = serde_json::from_str(&body).map_err(|e| {
                ProviderError::fetch(
                    Code::Internal,
                    format!("projects/{}/secrets: malformed list response: {}", query.project, e),
                )
            })?;

            for secret in page.secrets {
                if names.len() >= MAX_LISTED_SECRETS {
                    return Err(ProviderError::fetch(
                        Code::InvalidArgument,
                        format!(
                            "label filter '{}' matched more than {} secrets; narrow the filter",
                            filter, MAX_LISTED_SECRETS
                        ),
                    ));
                }
                names.push(secret.name);
            }

            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }
        Ok(names)
    }
}

fn label_filter(query: &LabelQuery) -> String {
    query
        .labels
        .iter()
        .map(|(key, value)| format!("labels.{}={}", key, value))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn query(labels: &[(&str, &str)], versions: &[&str]) -> LabelQuery {
        LabelQuery {
            project: "p".to_string(),
            versions: versions.iter().map(|v| v.to_string()).collect(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn filter_joins_labels_in_stable_order() {
        let q = query(&[("team", "infra"), ("env", "prod")], &["latest"]);
        // BTreeMap iteration is key-sorted, so the filter is deterministic.
        assert_eq!(label_filter(&q), "labels.env=prod AND labels.team=infra");
    }

    #[test]
    fn single_label_filter_has_no_conjunction() {
        let q = query(&[("env", "prod")], &["latest"]);
        assert_eq!(label_filter(&q), "labels.env=prod");
    }
}
