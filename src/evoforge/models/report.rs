//! Report entity: a generated document attached to a round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The four documents the reporter can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    RoundSummary,
    CampaignProgress,
    LineageAnalysis,
    FinalReport,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::RoundSummary => "round_summary",
            ReportType::CampaignProgress => "campaign_progress",
            ReportType::LineageAnalysis => "lineage_analysis",
            ReportType::FinalReport => "final_report",
        }
    }
}

/// Serialization format of the report content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
}

/// A persisted report. Small payloads live inline in `content`; payloads
/// over the reporter's configured threshold spill to `storage_path` and keep
/// a stub inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub round_id: Uuid,
    pub report_type: ReportType,
    pub format: ReportFormat,
    /// JSON-serialized document text.
    pub content: String,
    /// Set when the payload spilled to external storage.
    pub storage_path: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn new(
        round_id: Uuid,
        report_type: ReportType,
        content: String,
        metadata: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            round_id,
            report_type,
            format: ReportFormat::Json,
            content,
            storage_path: None,
            metadata,
            created_at: Utc::now(),
        }
    }
}
