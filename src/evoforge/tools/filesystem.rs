//! Sandboxed read-only filesystem tool server.
//!
//! All operations are confined to a whitelisted root directory. Paths are
//! normalized before use: absolute paths are rejected outright, `..`
//! components cannot climb above the root, and symlinked escapes are caught
//! by canonicalizing against the canonical root.
//!
//! Tools: `read_file`, `list_directory`, `file_info`, `search_files`.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::registry::{ToolMetadata, ToolServer, ToolServerMetadata};

/// Errors from the filesystem sandbox.
#[derive(Debug, Clone)]
pub enum FilesystemToolError {
    /// Path escapes the whitelisted root.
    PathNotAllowed(String),
    NotFound(String),
    NotAFile(String),
    NotADirectory(String),
    MissingParam(String),
    Io(String),
}

impl fmt::Display for FilesystemToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilesystemToolError::PathNotAllowed(p) => {
                write!(f, "path not within allowed root: {}", p)
            }
            FilesystemToolError::NotFound(p) => write!(f, "path not found: {}", p),
            FilesystemToolError::NotAFile(p) => write!(f, "not a file: {}", p),
            FilesystemToolError::NotADirectory(p) => write!(f, "not a directory: {}", p),
            FilesystemToolError::MissingParam(p) => write!(f, "missing required parameter: {}", p),
            FilesystemToolError::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl Error for FilesystemToolError {}

/// Read-only file access beneath one whitelisted root.
pub struct FilesystemToolServer {
    root: PathBuf,
}

impl FilesystemToolServer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Normalize a relative path and confine it to the root.
    ///
    /// `..` components pop within the normalized path (never above the
    /// root), absolute paths are refused, and the existing portion of the
    /// result is canonicalized so a symlink inside the sandbox cannot point
    /// outside it.
    fn resolve(&self, raw: &str) -> Result<PathBuf, FilesystemToolError> {
        let path = Path::new(raw);
        if path.is_absolute() {
            return Err(FilesystemToolError::PathNotAllowed(raw.to_string()));
        }

        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::Normal(c) => normalized.push(c),
                Component::CurDir => {}
                _ => {}
            }
        }

        let effective = self.root.join(&normalized);
        let root_canonical = self
            .root
            .canonicalize()
            .map_err(|e| FilesystemToolError::Io(format!("cannot canonicalize root: {}", e)))?;

        if effective.exists() {
            let canonical = effective
                .canonicalize()
                .map_err(|e| FilesystemToolError::Io(e.to_string()))?;
            if !canonical.starts_with(&root_canonical) {
                return Err(FilesystemToolError::PathNotAllowed(raw.to_string()));
            }
            Ok(canonical)
        } else {
            Err(FilesystemToolError::NotFound(raw.to_string()))
        }
    }

    fn require_str<'a>(
        params: &'a Value,
        key: &str,
    ) -> Result<&'a str, FilesystemToolError> {
        params
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| FilesystemToolError::MissingParam(key.to_string()))
    }

    fn read_file(&self, params: &Value) -> Result<Value, FilesystemToolError> {
        let raw = Self::require_str(params, "path")?;
        let path = self.resolve(raw)?;
        if !path.is_file() {
            return Err(FilesystemToolError::NotAFile(raw.to_string()));
        }
        let content = fs::read_to_string(&path).map_err(|e| FilesystemToolError::Io(e.to_string()))?;
        Ok(json!({
            "path": raw,
            "content": content,
            "size": content.len(),
        }))
    }

    fn list_directory(&self, params: &Value) -> Result<Value, FilesystemToolError> {
        let raw = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = self.resolve(raw)?;
        if !path.is_dir() {
            return Err(FilesystemToolError::NotADirectory(raw.to_string()));
        }
        let mut entries = Vec::new();
        let read = fs::read_dir(&path).map_err(|e| FilesystemToolError::Io(e.to_string()))?;
        for entry in read {
            let entry = entry.map_err(|e| FilesystemToolError::Io(e.to_string()))?;
            let meta = entry
                .metadata()
                .map_err(|e| FilesystemToolError::Io(e.to_string()))?;
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_directory": meta.is_dir(),
                "size": if meta.is_dir() { 0 } else { meta.len() },
            }));
        }
        entries.sort_by(|a, b| {
            a["name"]
                .as_str()
                .unwrap_or("")
                .cmp(b["name"].as_str().unwrap_or(""))
        });
        Ok(json!({ "path": raw, "entries": entries, "count": entries.len() }))
    }

    fn file_info(&self, params: &Value) -> Result<Value, FilesystemToolError> {
        let raw = Self::require_str(params, "path")?;
        let path = self.resolve(raw)?;
        let meta = fs::metadata(&path).map_err(|e| FilesystemToolError::Io(e.to_string()))?;
        Ok(json!({
            "path": raw,
            "is_directory": meta.is_dir(),
            "size": meta.len(),
            "readonly": meta.permissions().readonly(),
        }))
    }

    /// Substring search over file names below a directory, depth-first.
    fn search_files(&self, params: &Value) -> Result<Value, FilesystemToolError> {
        let pattern = Self::require_str(params, "pattern")?;
        let raw = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let root = self.resolve(raw)?;
        if !root.is_dir() {
            return Err(FilesystemToolError::NotADirectory(raw.to_string()));
        }

        let mut matches = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let read = fs::read_dir(&dir).map_err(|e| FilesystemToolError::Io(e.to_string()))?;
            for entry in read {
                let entry = entry.map_err(|e| FilesystemToolError::Io(e.to_string()))?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if entry.file_name().to_string_lossy().contains(pattern) {
                    if let Ok(relative) = path.strip_prefix(&root) {
                        matches.push(json!(relative.to_string_lossy()));
                    }
                }
            }
        }
        Ok(json!({ "pattern": pattern, "matches": matches, "count": matches.len() }))
    }
}

#[async_trait]
impl ToolServer for FilesystemToolServer {
    fn metadata(&self) -> ToolServerMetadata {
        ToolServerMetadata {
            name: "filesystem".into(),
            version: "1.0.0".into(),
            description: "Read-only file access beneath a whitelisted root".into(),
            tools: vec![
                ToolMetadata::new("read_file", "Read a file's text content").idempotent(),
                ToolMetadata::new("list_directory", "List a directory's entries").idempotent(),
                ToolMetadata::new("file_info", "Size and type of a path").idempotent(),
                ToolMetadata::new("search_files", "Find files whose name contains a pattern")
                    .idempotent(),
            ],
        }
    }

    async fn call(
        &self,
        tool: &str,
        params: Value,
    ) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let result = match tool {
            "read_file" => self.read_file(&params),
            "list_directory" => self.list_directory(&params),
            "file_info" => self.file_info(&params),
            "search_files" => self.search_files(&params),
            other => Err(FilesystemToolError::MissingParam(format!(
                "unknown tool: {}",
                other
            ))),
        };
        result.map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
    }
}
