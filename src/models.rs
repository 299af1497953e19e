//! Core data types for capstone records, categories, and similarity results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync state of a capstone's vector-index point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Pending,
    Synced,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Unknown values read back from storage collapse to `Pending` so the
    /// record stays eligible for backfill.
    pub fn parse(s: &str) -> Self {
        match s {
            "synced" => Self::Synced,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

/// A capstone record as stored in the relational store.
///
/// The row id doubles as the vector-index point id — that 1:1 mapping is an
/// invariant of the schema, not an incidental coupling.
#[derive(Debug, Clone, Serialize)]
pub struct Capstone {
    pub id: i64,
    pub title: String,
    pub category_id: i64,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub academic_year: Option<String>,
    pub authors: Option<String>,
    pub adviser: Option<String>,
    pub statement_of_the_problem: Option<String>,
    pub objectives: Option<String>,
    pub embedding_status: EmbeddingStatus,
    pub embedding_error: Option<String>,
    pub embedded_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub archived_at: Option<i64>,
}

impl Capstone {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// Fields accepted when creating a capstone record.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCapstone {
    pub title: String,
    pub category_id: i64,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub academic_year: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
    #[serde(default)]
    pub adviser: Option<String>,
    #[serde(default)]
    pub statement_of_the_problem: Option<String>,
    #[serde(default)]
    pub objectives: Option<String>,
}

/// Denormalized document fields stored alongside the vector.
///
/// A display/filter cache, eventually consistent with the relational store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub capstone_id: i64,
    pub title: String,
    pub category_id: i64,
    pub category: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub updated_at: Option<String>,
}

/// One ranked hit from a similarity search. Ephemeral, produced per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub id: i64,
    pub score: f32,
    pub payload: Option<PointPayload>,
}

/// Readiness snapshot of the embedding backend, shaped for the UI.
#[derive(Debug, Clone, Serialize)]
pub struct AiStatus {
    pub ollama_reachable: bool,
    pub model_available: bool,
    pub model: String,
    pub warmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warmed_until: Option<DateTime<Utc>>,
}

impl AiStatus {
    /// The all-false snapshot used whenever the probe fails.
    pub fn unreachable(model: &str) -> Self {
        Self {
            ollama_reachable: false,
            model_available: false,
            model: model.to_string(),
            warmed: false,
            warmed_until: None,
        }
    }
}

/// Outcome of a warm-up attempt. A concurrent collision is a defined
/// success-shaped outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum WarmupOutcome {
    /// This call performed the warm-up.
    Warmed { until: DateTime<Utc> },
    /// The cached warm window is still valid; no backend call made.
    AlreadyWarmed { until: DateTime<Utc> },
    /// Another caller holds the warm-up lease; no backend call made.
    AlreadyWarming,
    /// The backend answered but the warm-up embedding failed.
    EmbedFailed,
    /// The backend was unreachable or timed out.
    Unreachable,
}

impl WarmupOutcome {
    pub fn warmed(&self) -> bool {
        matches!(self, Self::Warmed { .. } | Self::AlreadyWarmed { .. })
    }

    /// Wire-format reason string, absent for a fresh successful warm-up.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Warmed { .. } => None,
            Self::AlreadyWarmed { .. } => Some("already_warmed"),
            Self::AlreadyWarming => Some("already_warming"),
            Self::EmbedFailed => Some("embed_failed"),
            Self::Unreachable => Some("timeout_or_unreachable"),
        }
    }

    pub fn warmed_until(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Warmed { until } | Self::AlreadyWarmed { until } => Some(*until),
            _ => None,
        }
    }
}
