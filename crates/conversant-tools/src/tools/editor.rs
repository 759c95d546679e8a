//! File editor: view, create, replace, insert, and undo over the workspace.

use crate::paths::resolve_inside;
use crate::registry::{Tool, ToolAnnotations, ToolOutput};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use walkdir::WalkDir;

const BINARY_SNIFF_BYTES: usize = 8192;
const DIRECTORY_DEPTH: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    #[error("{0}")]
    InvalidPath(String),

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("binary file, refusing to edit: {0}")]
    Binary(PathBuf),

    #[error("old_string not found in {0}")]
    OldStringMissing(PathBuf),

    #[error("old_string occurs {count} times in {path}; it must be unique")]
    OldStringNotUnique { path: PathBuf, count: usize },

    #[error("insert_line {line} is out of range for a file with {lines} lines")]
    InsertOutOfRange { line: usize, lines: usize },

    #[error("invalid view range: {0}")]
    BadRange(String),

    #[error("no edit history for {0}")]
    NothingToUndo(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Previous state of a path; `None` means the file did not exist.
type UndoFrame = Option<String>;

/// Content-addressed read/write/patch over the workspace. Undo history is
/// in-memory, per path, for the life of the executor.
pub struct FileEditor {
    root: PathBuf,
    history: Mutex<HashMap<PathBuf, Vec<UndoFrame>>>,
}

impl FileEditor {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            history: Mutex::new(HashMap::new()),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, EditorError> {
        resolve_inside(&self.root, Path::new(path)).map_err(EditorError::InvalidPath)
    }

    async fn read_text(&self, path: &PathBuf) -> Result<String, EditorError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|_| EditorError::NotFound(path.clone()))?;
        if is_binary(&bytes) {
            return Err(EditorError::Binary(path.clone()));
        }
        String::from_utf8(bytes).map_err(|_| EditorError::Binary(path.clone()))
    }

    fn push_history(&self, path: &PathBuf, frame: UndoFrame) {
        self.history
            .lock()
            .expect("editor history poisoned")
            .entry(path.clone())
            .or_default()
            .push(frame);
    }

    /// File contents with numbered lines (optionally a 1-indexed inclusive
    /// range), or a directory listing two levels deep.
    pub async fn view(&self, path: &str, range: Option<(usize, usize)>) -> Result<String, EditorError> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Ok(self.list_directory(&resolved));
        }
        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|_| EditorError::NotFound(resolved.clone()))?;
        if is_binary(&bytes) {
            return Ok(format!("(binary file, {} bytes)", bytes.len()));
        }
        let content = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = content.lines().collect();

        let (start, end) = match range {
            Some((start, end)) => {
                if start == 0 || start > end {
                    return Err(EditorError::BadRange(format!("[{start}, {end}]")));
                }
                (start - 1, end.min(lines.len()))
            }
            None => (0, lines.len()),
        };

        Ok(lines[start.min(lines.len())..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>6}\t{}", start + i + 1, line))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn list_directory(&self, dir: &Path) -> String {
        let mut entries = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(DIRECTORY_DEPTH)
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .filter_map(|e| e.ok())
        {
            let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            let suffix = if entry.file_type().is_dir() { "/" } else { "" };
            entries.push(format!("{}{}", rel.display(), suffix));
        }
        entries.sort();
        if entries.is_empty() {
            "(empty directory)".to_string()
        } else {
            entries.join("\n")
        }
    }

    /// Create a new file. Fails if the target exists.
    pub async fn create(&self, path: &str, content: &str) -> Result<String, EditorError> {
        let resolved = self.resolve(path)?;
        if resolved.exists() {
            return Err(EditorError::AlreadyExists(resolved));
        }
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, content).await?;
        self.push_history(&resolved, None);
        debug!(path = %resolved.display(), bytes = content.len(), "created file");
        Ok(format!("Created {path} ({} bytes)", content.len()))
    }

    /// Replace the unique occurrence of `old` with `new`.
    pub async fn str_replace(&self, path: &str, old: &str, new: &str) -> Result<String, EditorError> {
        let resolved = self.resolve(path)?;
        let content = self.read_text(&resolved).await?;

        let count = content.matches(old).count();
        if count == 0 {
            return Err(EditorError::OldStringMissing(resolved));
        }
        if count > 1 {
            return Err(EditorError::OldStringNotUnique {
                path: resolved,
                count,
            });
        }

        let updated = content.replacen(old, new, 1);
        tokio::fs::write(&resolved, &updated).await?;
        self.push_history(&resolved, Some(content));
        debug!(path = %resolved.display(), "str_replace");
        Ok(format!("Edited {path}"))
    }

    /// Insert `content` before 1-indexed `line`; `line == len + 1` appends.
    pub async fn insert(&self, path: &str, line: usize, content: &str) -> Result<String, EditorError> {
        let resolved = self.resolve(path)?;
        let existing = self.read_text(&resolved).await?;

        let mut lines: Vec<&str> = existing.lines().collect();
        if line == 0 || line > lines.len() + 1 {
            return Err(EditorError::InsertOutOfRange {
                line,
                lines: lines.len(),
            });
        }
        let at = line - 1;
        let inserted: Vec<&str> = content.lines().collect();
        lines.splice(at..at, inserted);
        let mut updated = lines.join("\n");
        if existing.ends_with('\n') {
            updated.push('\n');
        }

        tokio::fs::write(&resolved, &updated).await?;
        self.push_history(&resolved, Some(existing));
        debug!(path = %resolved.display(), line, "insert");
        Ok(format!("Inserted at line {line} in {path}"))
    }

    /// Pop the most recent edit for the path, restoring the prior content
    /// (or deleting the file when the edit was a create).
    pub async fn undo_edit(&self, path: &str) -> Result<String, EditorError> {
        let resolved = self.resolve(path)?;
        let frame = self
            .history
            .lock()
            .expect("editor history poisoned")
            .get_mut(&resolved)
            .and_then(Vec::pop)
            .ok_or_else(|| EditorError::NothingToUndo(resolved.clone()))?;

        match frame {
            Some(previous) => {
                tokio::fs::write(&resolved, previous).await?;
                Ok(format!("Reverted last edit to {path}"))
            }
            None => {
                tokio::fs::remove_file(&resolved).await?;
                Ok(format!("Removed {path} (undid create)"))
            }
        }
    }
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_SNIFF_BYTES)].contains(&0)
}

/// The LLM-facing tool: a `command` field selects the editor operation.
pub struct EditorTool {
    editor: FileEditor,
}

impl EditorTool {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            editor: FileEditor::new(workspace_root),
        }
    }
}

#[async_trait::async_trait]
impl Tool for EditorTool {
    fn name(&self) -> &str {
        "editor"
    }

    fn description(&self) -> &str {
        "View, create, and edit files in the workspace. Commands: view shows \
         a file with line numbers or lists a directory; create writes a new \
         file; str_replace replaces a unique exact string; insert adds text \
         after a line; undo_edit reverts the last change to a file."
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations::default()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["view", "create", "str_replace", "insert", "undo_edit"],
                    "description": "Editor operation"
                },
                "path": {
                    "type": "string",
                    "description": "Workspace-relative or absolute path inside the workspace"
                },
                "view_range": {
                    "type": "array",
                    "description": "Optional [start, end] line range for view (1-indexed, inclusive)"
                },
                "file_text": {
                    "type": "string",
                    "description": "Content for create"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace (must occur exactly once)"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "insert_line": {
                    "type": "integer",
                    "description": "1-indexed line to insert before"
                }
            },
            "required": ["command", "path"]
        })
    }

    async fn call(&self, args: Value) -> ToolOutput {
        let command = args["command"].as_str().unwrap_or_default();
        let path = args["path"].as_str().unwrap_or_default();

        let result = match command {
            "view" => {
                let range = args["view_range"].as_array().and_then(|r| {
                    let start = r.first()?.as_u64()? as usize;
                    let end = r.get(1)?.as_u64()? as usize;
                    Some((start, end))
                });
                self.editor.view(path, range).await
            }
            "create" => {
                let Some(content) = args["file_text"].as_str() else {
                    return ToolOutput::error("'file_text' is required for create");
                };
                self.editor.create(path, content).await
            }
            "str_replace" => {
                let Some(old) = args["old_str"].as_str() else {
                    return ToolOutput::error("'old_str' is required for str_replace");
                };
                let new = args["new_str"].as_str().unwrap_or_default();
                self.editor.str_replace(path, old, new).await
            }
            "insert" => {
                let Some(line) = args["insert_line"].as_u64() else {
                    return ToolOutput::error("'insert_line' is required for insert");
                };
                let Some(content) = args["new_str"].as_str() else {
                    return ToolOutput::error("'new_str' is required for insert");
                };
                self.editor.insert(path, line as usize, content).await
            }
            "undo_edit" => self.editor.undo_edit(path).await,
            other => return ToolOutput::error(format!("unknown editor command: {other}")),
        };

        match result {
            Ok(text) => ToolOutput::text(text),
            Err(e) => ToolOutput::error(e.to_string()),
        }
    }
}
