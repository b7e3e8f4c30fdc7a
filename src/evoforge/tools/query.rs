//! Read-only store query tool server.
//!
//! Gives agents read access to the blackboard without handing them the
//! store: only read-shaped operations over a table whitelist are accepted,
//! and anything write-shaped is refused by name before dispatch.
//!
//! Tools: `query` (filtered row listing), `table_info` (schema summary).

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::registry::{ToolMetadata, ToolServer, ToolServerMetadata};
use crate::store::Store;

/// Tables the server will answer for.
const KNOWN_TABLES: [&str; 5] = ["campaigns", "rounds", "variants", "evaluations", "policies"];

/// Operation names refused outright.
const WRITE_SHAPED: [&str; 7] = [
    "insert", "update", "delete", "drop", "alter", "create", "truncate",
];

#[derive(Debug, Clone)]
pub enum QueryToolError {
    TableNotAllowed { table: String, allowed: Vec<String> },
    WriteRefused(String),
    MissingParam(String),
    BadFilter(String),
}

impl fmt::Display for QueryToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryToolError::TableNotAllowed { table, allowed } => {
                write!(f, "table '{}' not in allowed tables: {:?}", table, allowed)
            }
            QueryToolError::WriteRefused(op) => {
                write!(f, "write-shaped operation refused: {}", op)
            }
            QueryToolError::MissingParam(p) => write!(f, "missing required parameter: {}", p),
            QueryToolError::BadFilter(msg) => write!(f, "bad filter: {}", msg),
        }
    }
}

impl Error for QueryToolError {}

/// Read-only, table-whitelisted queries over the store.
pub struct StoreQueryToolServer {
    store: Arc<Store>,
    allowed_tables: Vec<String>,
}

impl StoreQueryToolServer {
    /// `allowed_tables` is the whitelist; entries outside the known table
    /// set are kept but can never match.
    pub fn new(store: Arc<Store>, allowed_tables: Vec<String>) -> Self {
        Self {
            store,
            allowed_tables,
        }
    }

    fn check_table(&self, table: &str) -> Result<(), QueryToolError> {
        let lowered = table.to_lowercase();
        if WRITE_SHAPED.iter().any(|op| lowered.contains(op)) {
            return Err(QueryToolError::WriteRefused(table.to_string()));
        }
        if !self.allowed_tables.iter().any(|t| t == &lowered)
            || !KNOWN_TABLES.contains(&lowered.as_str())
        {
            return Err(QueryToolError::TableNotAllowed {
                table: table.to_string(),
                allowed: self.allowed_tables.clone(),
            });
        }
        Ok(())
    }

    fn parse_uuid(filters: &Value, key: &str) -> Result<Option<Uuid>, QueryToolError> {
        match filters.get(key).and_then(Value::as_str) {
            None => Ok(None),
            Some(raw) => Uuid::parse_str(raw)
                .map(Some)
                .map_err(|_| QueryToolError::BadFilter(format!("{} is not a uuid", key))),
        }
    }

    async fn query(&self, params: &Value) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let table = params
            .get("table")
            .and_then(Value::as_str)
            .ok_or_else(|| QueryToolError::MissingParam("table".into()))?;
        self.check_table(table)?;

        let filters = params.get("filters").cloned().unwrap_or_else(|| json!({}));
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(100)
            .min(1000) as usize;

        let rows: Vec<Value> = match table.to_lowercase().as_str() {
            "campaigns" => self
                .store
                .list_campaigns(None)
                .await
                .into_iter()
                .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
                .collect(),
            "rounds" => {
                let campaign_id = Self::parse_uuid(&filters, "campaign_id")?
                    .ok_or_else(|| QueryToolError::MissingParam("filters.campaign_id".into()))?;
                self.store
                    .rounds_by_campaign(campaign_id)
                    .await
                    .into_iter()
                    .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
                    .collect()
            }
            "variants" => {
                let round_id = Self::parse_uuid(&filters, "round_id")?
                    .ok_or_else(|| QueryToolError::MissingParam("filters.round_id".into()))?;
                self.store
                    .variants_by_round(round_id)
                    .await
                    .into_iter()
                    .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                    .collect()
            }
            "evaluations" => {
                let round_id = Self::parse_uuid(&filters, "round_id")?
                    .ok_or_else(|| QueryToolError::MissingParam("filters.round_id".into()))?;
                self.store
                    .evaluations_by_round(round_id)
                    .await
                    .into_iter()
                    .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
                    .collect()
            }
            "policies" => {
                let campaign_id = Self::parse_uuid(&filters, "campaign_id")?
                    .ok_or_else(|| QueryToolError::MissingParam("filters.campaign_id".into()))?;
                self.store
                    .policies_by_campaign(campaign_id, false)
                    .await
                    .into_iter()
                    .map(|p| serde_json::to_value(p).unwrap_or(Value::Null))
                    .collect()
            }
            _ => Vec::new(),
        };

        let truncated: Vec<Value> = rows.into_iter().take(limit).collect();
        Ok(json!({
            "table": table,
            "rows": truncated,
            "row_count": truncated.len(),
            "limit": limit,
        }))
    }

    fn table_info(&self, params: &Value) -> Result<Value, QueryToolError> {
        let table = params
            .get("table")
            .and_then(Value::as_str)
            .ok_or_else(|| QueryToolError::MissingParam("table".into()))?;
        self.check_table(table)?;

        let columns: Vec<&str> = match table.to_lowercase().as_str() {
            "campaigns" => vec![
                "id", "name", "description", "status", "config", "metadata", "created_at",
                "updated_at", "deleted_at",
            ],
            "rounds" => vec![
                "id", "campaign_id", "round_number", "status", "plan", "metrics", "started_at",
                "completed_at",
            ],
            "variants" => vec![
                "id", "round_id", "parent_id", "generation", "content", "content_hash",
                "mutation_type", "mutation_metadata", "is_selected",
            ],
            "evaluations" => vec![
                "id", "variant_id", "round_id", "evaluator_type", "status", "score",
                "result_data", "evaluation_config", "created_at", "completed_at",
            ],
            "policies" => vec![
                "id", "campaign_id", "name", "policy_type", "version", "config", "is_active",
            ],
            _ => vec![],
        };
        Ok(json!({
            "table": table,
            "columns": columns,
            "column_count": columns.len(),
            "read_only": true,
        }))
    }
}

#[async_trait]
impl ToolServer for StoreQueryToolServer {
    fn metadata(&self) -> ToolServerMetadata {
        ToolServerMetadata {
            name: "store-query".into(),
            version: "1.0.0".into(),
            description: "Read-only queries against whitelisted store tables".into(),
            tools: vec![
                ToolMetadata::new("query", "List rows of a whitelisted table with filters")
                    .idempotent(),
                ToolMetadata::new("table_info", "Column summary of a whitelisted table")
                    .idempotent(),
            ],
        }
    }

    async fn call(
        &self,
        tool: &str,
        params: Value,
    ) -> Result<Value, Box<dyn Error + Send + Sync>> {
        match tool {
            "query" => self.query(&params).await,
            "table_info" => self
                .table_info(&params)
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>),
            other => Err(Box::new(QueryToolError::MissingParam(format!(
                "unknown tool: {}",
                other
            )))),
        }
    }
}
