//! Payload post-processing: optional extraction of a single top-level field
//! from a JSON or YAML payload. The two directives are mutually exclusive;
//! lookups never traverse into nested structures, and the extracted value
//! must be a string.

use std::collections::BTreeMap;

use tonic::Code;

use crate::config::SecretRequest;
use crate::errors::{ProviderError, Result};

/// Apply the request's extraction directive (if any) to the fetched payload.
pub fn apply(request: &SecretRequest, payload: Vec<u8>) -> Result<Vec<u8>> {
    match (&request.extract_json_key, &request.extract_yaml_key) {
        (Some(_), Some(_)) => Err(both_keys_error(&request.resource_uri)),
        (Some(key), None) => extract_json(key, &payload, &request.resource_uri),
        (None, Some(key)) => extract_yaml(key, &payload, &request.resource_uri),
        (None, None) => Ok(payload),
    }
}

/// Error for a request with both extraction modes set. Raised before any
/// backend call so it applies regardless of the fetch result.
pub fn both_keys_error(resource: &str) -> ProviderError {
    ProviderError::fetch(
        Code::InvalidArgument,
        format!(
            "{}: extractJSONKey and extractYAMLKey cannot be set simultaneously",
            resource
        ),
    )
}

fn extract_json(key: &str, payload: &[u8], resource: &str) -> Result<Vec<u8>> {
    let document: serde_json::Value = serde_json::from_slice(payload).map_err(|e| {
        ProviderError::fetch(
            Code::InvalidArgument,
            format!("{}: payload is not valid JSON: {}", resource, e),
        )
    })?;
    let object = document.as_object().ok_or_else(|| {
        ProviderError::fetch(
            Code::InvalidArgument,
            format!("{}: JSON payload is not an object", resource),
        )
    })?;

    match object.get(key) {
        None => Err(ProviderError::fetch(
            Code::InvalidArgument,
            format!("{}: key '{}' not found in JSON payload", resource, key),
        )),
        Some(serde_json::Value::String(value)) => Ok(value.clone().into_bytes()),
        Some(other) => Err(ProviderError::fetch(
            Code::InvalidArgument,
            format!(
                "{}: key '{}' must be a string, found {}",
                resource,
                key,
                json_type_name(other)
            ),
        )),
    }
}

fn extract_yaml(key: &str, payload: &[u8], resource: &str) -> Result<Vec<u8>> {
    let document: BTreeMap<String, serde_yaml::Value> =
        serde_yaml::from_slice(payload).map_err(|e| {
            ProviderError::fetch(
                Code::InvalidArgument,
                format!("{}: payload is not a YAML mapping: {}", resource, e),
            )
        })?;

    match document.get(key) {
        None => Err(ProviderError::fetch(
            Code::InvalidArgument,
            format!("{}: key '{}' not found in YAML payload", resource, key),
        )),
        Some(serde_yaml::Value::String(value)) => Ok(value.clone().into_bytes()),
        Some(other) => Err(ProviderError::fetch(
            Code::InvalidArgument,
            format!(
                "{}: key '{}' must be a string, found {}",
                resource,
                key,
                yaml_type_name(other)
            ),
        )),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

fn yaml_type_name(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json_key: Option<&str>, yaml_key: Option<&str>) -> SecretRequest {
        SecretRequest {
            resource_uri: "projects/p/secrets/test/versions/latest".to_string(),
            file_name: None,
            path: Some("out".to_string()),
            mode: None,
            extract_json_key: json_key.map(String::from),
            extract_yaml_key: yaml_key.map(String::from),
        }
    }

    #[test]
    fn passthrough_without_extraction() {
        let payload = b"raw bytes \xff\x00".to_vec();
        let result = apply(&request(None, None), payload.clone()).unwrap();
        assert_eq!(result, payload);
    }

    #[test]
    fn extracts_json_string_value() {
        let payload = br#"{"user":"admin","password":"secret"}"#.to_vec();
        let result = apply(&request(Some("user"), None), payload).unwrap();
        assert_eq!(result, b"admin");
    }

    #[test]
    fn missing_json_key_names_the_key() {
        let payload = br#"{"user":"admin"}"#.to_vec();
        let err = apply(&request(Some("password"), None), payload).unwrap_err();
        assert!(err.to_string().contains("key 'password' not found"));
    }

    #[test]
    fn non_string_json_values_are_rejected_with_type_name() {
        let cases = [
            (r#"{"k": 42}"#, "number"),
            (r#"{"k": true}"#, "bool"),
            (r#"{"k": null}"#, "null"),
            (r#"{"k": {"nested": 1}}"#, "object"),
            (r#"{"k": [1,2]}"#, "array"),
        ];
        for (payload, type_name) in cases {
            let err = apply(&request(Some("k"), None), payload.as_bytes().to_vec()).unwrap_err();
            let message = err.to_string();
            assert!(message.contains("'k'"), "{}", message);
            assert!(message.contains(type_name), "{}", message);
        }
    }

    #[test]
    fn json_lookup_is_top_level_only() {
        let payload = br#"{"outer": {"inner": "value"}}"#.to_vec();
        assert!(apply(&request(Some("inner"), None), payload).is_err());
    }

    #[test]
    fn extracts_yaml_string_value() {
        let payload = b"user: admin\npassword: hunter2\n".to_vec();
        let result = apply(&request(None, Some("password")), payload).unwrap();
        assert_eq!(result, b"hunter2");
    }

    #[test]
    fn missing_yaml_key_is_distinct_error() {
        let payload = b"user: admin\n".to_vec();
        let err = apply(&request(None, Some("token")), payload).unwrap_err();
        assert!(err.to_string().contains("key 'token' not found"));
    }

    #[test]
    fn non_string_yaml_values_are_rejected() {
        let payload = b"count: 3\n".to_vec();
        let err = apply(&request(None, Some("count")), payload).unwrap_err();
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn both_keys_always_fail() {
        let payload = br#"{"k":"v"}"#.to_vec();
        let err = apply(&request(Some("k"), Some("k")), payload).unwrap_err();
        assert!(err.to_string().contains("cannot be set simultaneously"));
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn invalid_json_payload_is_rejected() {
        let payload = b"not json".to_vec();
        assert!(apply(&request(Some("k"), None), payload).is_err());
    }
}
