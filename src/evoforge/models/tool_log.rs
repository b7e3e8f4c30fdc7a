//! Tool access log row: one per tool invocation, success or failure.
//!
//! Written by the [`ToolRegistry`](crate::registry::ToolRegistry) on every
//! call; the write is part of the call's single exit path, so a tool
//! invocation without a log row cannot happen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Outcome of the logged invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Success,
    Error,
}

/// Append-only record of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAccessLog {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub server_name: String,
    /// The resolved semver, even when the caller asked for "latest".
    pub server_version: String,
    pub tool_name: String,
    pub input_params: Value,
    /// Present only on success.
    pub output_data: Option<Value>,
    pub status: ToolCallStatus,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ToolAccessLog {
    pub fn success(
        trace_id: Uuid,
        server_name: impl Into<String>,
        server_version: impl Into<String>,
        tool_name: impl Into<String>,
        input_params: Value,
        output_data: Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trace_id,
            server_name: server_name.into(),
            server_version: server_version.into(),
            tool_name: tool_name.into(),
            input_params,
            output_data: Some(output_data),
            status: ToolCallStatus::Success,
            error_message: None,
            duration_ms,
            created_at: Utc::now(),
        }
    }

    pub fn failure(
        trace_id: Uuid,
        server_name: impl Into<String>,
        server_version: impl Into<String>,
        tool_name: impl Into<String>,
        input_params: Value,
        error_message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trace_id,
            server_name: server_name.into(),
            server_version: server_version.into(),
            tool_name: tool_name.into(),
            input_params,
            output_data: None,
            status: ToolCallStatus::Error,
            error_message: Some(error_message.into()),
            duration_ms,
            created_at: Utc::now(),
        }
    }
}
