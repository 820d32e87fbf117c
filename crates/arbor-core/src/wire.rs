//! Wire format of the batch endpoint.
//!
//! A batch request is an ordered array of [`BatchEntry`]; the store answers
//! with an array of [`BatchResult`] matched back to requests by `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JobId, Method};

/// One operation inside a batch request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchEntry {
    pub id: JobId,
    pub method: Method,
    /// Absolute path, or a `{N}` / `{N}/<suffix>` placeholder.
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// One entry of a successful batch response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchResult {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Split a `{N}` or `{N}/<suffix>` placeholder into its job and suffix.
///
/// Returns `None` for anything that is not a placeholder.
pub fn parse_placeholder(s: &str) -> Option<(JobId, &str)> {
    let rest = s.strip_prefix('{')?;
    let close = rest.find('}')?;
    let job = rest[..close].parse::<usize>().ok()?;
    let suffix = &rest[close + 1..];
    if !suffix.is_empty() && !suffix.starts_with('/') {
        return None;
    }
    Some((JobId(job), suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_omits_missing_body() {
        let entry = BatchEntry {
            id: JobId(1),
            method: Method::Delete,
            to: "{0}".to_string(),
            body: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, json!({"id": 1, "method": "DELETE", "to": "{0}"}));
    }

    #[test]
    fn result_tolerates_sparse_fields() {
        let result: BatchResult = serde_json::from_value(json!({"id": 4})).unwrap();
        assert_eq!(result.id, JobId(4));
        assert!(result.body.is_none());
        assert!(result.location.is_none());
    }

    #[test]
    fn placeholders() {
        assert_eq!(parse_placeholder("{0}"), Some((JobId(0), "")));
        assert_eq!(
            parse_placeholder("{3}/relationships"),
            Some((JobId(3), "/relationships"))
        );
        assert_eq!(parse_placeholder("/node/3"), None);
        assert_eq!(parse_placeholder("{x}"), None);
        assert_eq!(parse_placeholder("{1}abc"), None);
    }
}
