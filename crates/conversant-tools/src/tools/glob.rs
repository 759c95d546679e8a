//! Glob tool: fast file pattern matching inside the workspace.

use crate::paths::resolve_inside;
use crate::registry::{Tool, ToolAnnotations, ToolOutput};
use globset::GlobBuilder;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const MAX_MATCHES: usize = 1000;

pub struct GlobTool {
    workspace_root: PathBuf,
}

impl GlobTool {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern. Supports ** for recursive \
         matching. Returns paths sorted by modification time, newest first."
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations::read_only()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern (e.g. '**/*.rs', 'src/**/*.ts')"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in (default: workspace root)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn call(&self, args: Value) -> ToolOutput {
        let pattern = args["pattern"].as_str().unwrap_or_default();

        let search_root = match args["path"].as_str() {
            Some(p) => match resolve_inside(&self.workspace_root, Path::new(p)) {
                Ok(resolved) => resolved,
                Err(e) => return ToolOutput::error(e),
            },
            None => self.workspace_root.clone(),
        };

        let matcher = match GlobBuilder::new(pattern).literal_separator(false).build() {
            Ok(g) => g.compile_matcher(),
            Err(e) => return ToolOutput::error(format!("Invalid glob pattern: {e}")),
        };

        let mut matches: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        for entry in WalkDir::new(&search_root)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.') && name != "node_modules" && name != "target"
            })
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&search_root).unwrap_or(entry.path());
            if matcher.is_match(rel) {
                let mtime = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                matches.push((entry.path().to_path_buf(), mtime));
            }
        }

        matches.sort_by(|a, b| b.1.cmp(&a.1));
        debug!(pattern, count = matches.len(), "glob");

        if matches.is_empty() {
            ToolOutput::text("No files found")
        } else {
            let listing: Vec<String> = matches
                .iter()
                .take(MAX_MATCHES)
                .map(|(p, _)| p.to_string_lossy().to_string())
                .collect();
            ToolOutput::text(listing.join("\n"))
        }
    }
}
