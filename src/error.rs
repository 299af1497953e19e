//! Typed errors for the two backend clients.
//!
//! The orchestrator reasons about a closed set of error kinds instead of
//! inspecting raw backend bodies. The one place where a backend error body
//! must be sniffed — Qdrant reporting a payload filter over an unindexed
//! field — is isolated in [`classify_search_failure`], so the substring match
//! never leaks past this module.

use thiserror::Error;

/// Failures from the embedding backend.
///
/// `Unreachable` and `Rejected` together form the "backend unavailable"
/// class surfaced to users as a retryable outage; `Malformed` and
/// `DimensionMismatch` are data-integrity errors and fatal for the request.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Transport-level failure: connect error, timeout, DNS.
    #[error("embedding backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with a non-success status.
    #[error("embedding backend returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The response body was not a numeric array.
    #[error("embedding response malformed: {0}")]
    Malformed(String),

    /// The returned vector length does not match the configured
    /// dimensionality. Never coerced by truncation or padding.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl EmbeddingError {
    /// True for outages where a retry later may succeed, as opposed to
    /// data-integrity failures.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Rejected { .. })
    }
}

/// Failures from the vector index backend.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Transport-level failure: connect error, timeout, DNS.
    #[error("vector index unreachable: {0}")]
    Unreachable(String),

    /// Search rejected because the payload filter references a field with
    /// no secondary index yet. Carries the field name so the caller can
    /// create the index and retry.
    #[error("payload index missing for field \"{field}\"")]
    MissingPayloadIndex { field: String },

    #[error("vector search failed: {status} {body}")]
    SearchFailed { status: u16, body: String },

    #[error("point upsert failed: {status} {body}")]
    UpsertFailed { status: u16, body: String },

    #[error("point delete failed: {status} {body}")]
    DeleteFailed { status: u16, body: String },

    #[error("payload index creation failed: {status} {body}")]
    IndexCreateFailed { status: u16, body: String },

    #[error("collection provisioning failed: {status} {body}")]
    CollectionFailed { status: u16, body: String },

    /// The backend answered with a body this client could not decode.
    #[error("vector index response malformed: {0}")]
    Malformed(String),
}

/// Marker Qdrant puts in the error body when a payload filter hits a field
/// without a secondary index.
const MISSING_INDEX_MARKER: &str = "Index required but not found";

/// Translate a failed search response into an [`IndexError`].
///
/// Only an HTTP 400 whose body carries the missing-index marker (naming the
/// field) becomes [`IndexError::MissingPayloadIndex`]; everything else is a
/// plain [`IndexError::SearchFailed`]. This is the single point that knows
/// the backend's error text.
pub fn classify_search_failure(status: u16, body: &str) -> IndexError {
    if status == 400 && body.contains(MISSING_INDEX_MARKER) {
        if let Some(field) = missing_index_field(body) {
            return IndexError::MissingPayloadIndex { field };
        }
    }
    IndexError::SearchFailed {
        status,
        body: body.to_string(),
    }
}

/// Extract the field name quoted after the missing-index marker.
///
/// The body is raw JSON text, so the quotes around the field arrive
/// backslash-escaped; strip the escapes before scanning.
fn missing_index_field(body: &str) -> Option<String> {
    let tail = body.split(MISSING_INDEX_MARKER).nth(1)?;
    let tail = tail.replace('\\', "");
    let start = tail.find('"')? + 1;
    let end = tail[start..].find('"')? + start;
    let field = tail[start..end].trim();
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Body shape as Qdrant actually returns it for an unindexed filter field.
    const MISSING_INDEX_BODY: &str = r#"{"status":{"error":"Bad request: Index required but not found for \"category_id\" of one of the following types: [integer]. Help: Create an index for this key or use a different filter."},"time":0.0}"#;

    #[test]
    fn classifies_missing_index_with_field_name() {
        match classify_search_failure(400, MISSING_INDEX_BODY) {
            IndexError::MissingPayloadIndex { field } => assert_eq!(field, "category_id"),
            other => panic!("expected MissingPayloadIndex, got {other:?}"),
        }
    }

    #[test]
    fn non_400_is_not_missing_index() {
        match classify_search_failure(500, MISSING_INDEX_BODY) {
            IndexError::SearchFailed { status, .. } => assert_eq!(status, 500),
            other => panic!("expected SearchFailed, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_400_is_search_failure() {
        let body = r#"{"status":{"error":"Wrong input: vector dimension mismatch"}}"#;
        assert!(matches!(
            classify_search_failure(400, body),
            IndexError::SearchFailed { .. }
        ));
    }

    #[test]
    fn marker_without_field_name_is_search_failure() {
        let body = "Index required but not found";
        assert!(matches!(
            classify_search_failure(400, body),
            IndexError::SearchFailed { .. }
        ));
    }

    #[test]
    fn unavailable_classes() {
        assert!(EmbeddingError::Unreachable("x".into()).is_unavailable());
        assert!(EmbeddingError::Rejected {
            status: 500,
            body: String::new()
        }
        .is_unavailable());
        assert!(!EmbeddingError::DimensionMismatch {
            expected: 768,
            got: 512
        }
        .is_unavailable());
    }
}
