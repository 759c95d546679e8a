//! Grep tool: regex content search inside the workspace.

use crate::paths::resolve_inside;
use crate::registry::{Tool, ToolAnnotations, ToolOutput};
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const MAX_RESULTS: usize = 5000;

pub struct GrepTool {
    workspace_root: PathBuf,
}

impl GrepTool {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regex. Returns matching file paths by \
         default; content mode shows matching lines with line numbers."
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
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: workspace root)"
                },
                "glob": {
                    "type": "string",
                    "description": "Glob filter on file names (e.g. '*.rs')"
                },
                "output_mode": {
                    "type": "string",
                    "enum": ["files_with_matches", "content", "count"],
                    "description": "Output mode (default: files_with_matches)"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case insensitive search (default: false)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn call(&self, args: Value) -> ToolOutput {
        let pattern = args["pattern"].as_str().unwrap_or_default();
        let case_insensitive = args["case_insensitive"].as_bool().unwrap_or(false);
        let regex_pattern = if case_insensitive {
            format!("(?i){pattern}")
        } else {
            pattern.to_string()
        };
        let regex = match Regex::new(&regex_pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::error(format!("Invalid regex: {e}")),
        };

        let search_root = match args["path"].as_str() {
            Some(p) => match resolve_inside(&self.workspace_root, Path::new(p)) {
                Ok(resolved) => resolved,
                Err(e) => return ToolOutput::error(e),
            },
            None => self.workspace_root.clone(),
        };
        let output_mode = args["output_mode"].as_str().unwrap_or("files_with_matches");

        let name_filter = args["glob"].as_str().and_then(|g| {
            globset::GlobBuilder::new(g)
                .literal_separator(false)
                .build()
                .ok()
                .map(|g| g.compile_matcher())
        });

        let mut results = Vec::new();
        let files: Vec<PathBuf> = if search_root.is_file() {
            vec![search_root.clone()]
        } else {
            WalkDir::new(&search_root)
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    !name.starts_with('.') && name != "node_modules" && name != "target"
                })
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.path().to_path_buf())
                .collect()
        };

        for path in files {
            if let Some(filter) = &name_filter {
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                if !name.map(|n| filter.is_match(&n)).unwrap_or(false) {
                    continue;
                }
            }
            let Ok(bytes) = std::fs::read(&path) else { continue };
            if bytes[..bytes.len().min(512)].contains(&0) {
                continue;
            }
            let content = String::from_utf8_lossy(&bytes);
            if !regex.is_match(&content) {
                continue;
            }
            match output_mode {
                "count" => {
                    results.push(format!("{}:{}", path.display(), regex.find_iter(&content).count()));
                }
                "content" => {
                    for (i, line) in content.lines().enumerate() {
                        if regex.is_match(line) {
                            results.push(format!("{}:{}:{}", path.display(), i + 1, line));
                        }
                    }
                }
                _ => results.push(path.display().to_string()),
            }
            if results.len() > MAX_RESULTS {
                break;
            }
        }

        debug!(pattern, count = results.len(), "grep");
        if results.is_empty() {
            ToolOutput::text("No matches found")
        } else {
            ToolOutput::text(results.join("\n"))
        }
    }
}
