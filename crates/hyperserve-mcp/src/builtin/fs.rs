//! Sandboxed filesystem tools.
//!
//! Both tools resolve paths inside a configured root. Resolution is
//! two-stage: a lexical pass rejects `..` escapes and absolute paths,
//! then canonicalization rejects symlinks pointing outside the root.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{McpError, McpResult, ToolFailure};
use crate::tool::{Tool, ToolCtx};

/// Resolve `requested` inside `root`, refusing lexical and symlink escapes.
async fn resolve_sandboxed(root: &Path, requested: &str) -> McpResult<PathBuf> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(McpError::tool(
            ToolFailure::Denied,
            "absolute paths are not allowed",
        ));
    }

    let mut clean = PathBuf::new();
    for component in requested_path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(McpError::tool(
                        ToolFailure::Denied,
                        "path escapes the sandbox root",
                    ));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(McpError::tool(ToolFailure::Denied, "invalid path"));
            }
        }
    }

    let canonical_root = tokio::fs::canonicalize(root).await.map_err(|err| {
        McpError::Internal(format!("file tool root unavailable: {err}"))
    })?;
    let candidate = canonical_root.join(&clean);

    // Canonicalize to chase symlinks; the final target must stay inside.
    let canonical = tokio::fs::canonicalize(&candidate)
        .await
        .map_err(|_| McpError::tool(ToolFailure::Failed, format!("no such path: {requested}")))?;
    if !canonical.starts_with(&canonical_root) {
        return Err(McpError::tool(
            ToolFailure::Denied,
            "symlink escapes the sandbox root",
        ));
    }
    Ok(canonical)
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

/// `read_file` - read a UTF-8 file inside the configured root.
#[derive(Debug)]
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    /// Create the tool rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the sandboxed file root"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Path relative to the file root"}
            },
            "required": ["path"]
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolCtx) -> McpResult<Value> {
        let args: PathArgs = serde_json::from_value(args)
            .map_err(|err| McpError::InvalidParams(format!("read_file: {err}")))?;
        let path = resolve_sandboxed(&self.root, &args.path).await?;
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| McpError::tool(ToolFailure::Failed, err.to_string()))?;
        Ok(Value::String(contents))
    }
}

/// `list_directory` - list entries under a sandboxed path.
#[derive(Debug)]
pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    /// Create the tool rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default)]
    path: String,
}

#[async_trait::async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List directory entries under the sandboxed file root"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory relative to the file root"}
            }
        })
    }

    async fn call(&self, args: Value, _ctx: &ToolCtx) -> McpResult<Value> {
        let args: ListArgs = serde_json::from_value(args)
            .map_err(|err| McpError::InvalidParams(format!("list_directory: {err}")))?;
        let path = resolve_sandboxed(&self.root, &args.path).await?;

        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|err| McpError::tool(ToolFailure::Failed, err.to_string()))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|err| McpError::tool(ToolFailure::Failed, err.to_string()))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "isDir": is_dir,
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(Value::Array(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sandbox() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("hello.txt"), "hi there")
            .await
            .unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("sub/inner.txt"), "inner")
            .await
            .unwrap();
        dir
    }

    #[tokio::test]
    async fn reads_file_inside_root() {
        let dir = sandbox().await;
        let tool = ReadFileTool::new(dir.path());
        let out = tool
            .call(json!({"path": "hello.txt"}), &ToolCtx::default())
            .await
            .unwrap();
        assert_eq!(out, json!("hi there"));
    }

    #[tokio::test]
    async fn rejects_dotdot_escape() {
        let dir = sandbox().await;
        let tool = ReadFileTool::new(dir.path());
        let err = tool
            .call(json!({"path": "../outside.txt"}), &ToolCtx::default())
            .await
            .unwrap_err();
        match err {
            McpError::Tool { kind, .. } => assert_eq!(kind, ToolFailure::Denied),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_absolute_path() {
        let dir = sandbox().await;
        let tool = ReadFileTool::new(dir.path());
        assert!(tool
            .call(json!({"path": "/etc/passwd"}), &ToolCtx::default())
            .await
            .is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejects_symlink_escape() {
        let dir = sandbox().await;
        let outside = tempfile::tempdir().unwrap();
        tokio::fs::write(outside.path().join("secret.txt"), "secret")
            .await
            .unwrap();
        tokio::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("link.txt"),
        )
        .await
        .unwrap();

        let tool = ReadFileTool::new(dir.path());
        let err = tool
            .call(json!({"path": "link.txt"}), &ToolCtx::default())
            .await
            .unwrap_err();
        match err {
            McpError::Tool { kind, .. } => assert_eq!(kind, ToolFailure::Denied),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lists_entries_with_kind() {
        let dir = sandbox().await;
        let tool = ListDirectoryTool::new(dir.path());
        let out = tool.call(json!({}), &ToolCtx::default()).await.unwrap();
        let entries = out.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["name"], "hello.txt");
        assert_eq!(entries[0]["isDir"], false);
        assert_eq!(entries[1]["name"], "sub");
        assert_eq!(entries[1]["isDir"], true);
    }

    #[tokio::test]
    async fn dot_components_are_cleaned() {
        let dir = sandbox().await;
        let tool = ReadFileTool::new(dir.path());
        let out = tool
            .call(json!({"path": "sub/./../hello.txt"}), &ToolCtx::default())
            .await
            .unwrap();
        assert_eq!(out, json!("hi there"));
    }
}
