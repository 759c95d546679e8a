//! Local workspace: commands run on this machine, file transfer is a copy.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::{CommandOutcome, Workspace, WorkspaceError, WorkspaceResult};

pub struct LocalWorkspace {
    working_dir: PathBuf,
}

impl LocalWorkspace {
    /// Create the workspace rooted at `working_dir`, creating it if missing.
    pub fn new(working_dir: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let working_dir = working_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&working_dir)?;
        Ok(Self { working_dir })
    }

    /// Resolve a workspace path, refusing escapes above the root.
    fn resolve(&self, path: &Path) -> WorkspaceResult<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        };
        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                std::path::Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(WorkspaceError::PathOutsideWorkspace(
                            path.display().to_string(),
                        ));
                    }
                }
                std::path::Component::CurDir => {}
                other => normalized.push(other),
            }
        }
        if !normalized.starts_with(&self.working_dir) {
            return Err(WorkspaceError::PathOutsideWorkspace(
                path.display().to_string(),
            ));
        }
        Ok(normalized)
    }
}

#[async_trait::async_trait]
impl Workspace for LocalWorkspace {
    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn execute_command(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> WorkspaceResult<CommandOutcome> {
        let dir = cwd.unwrap_or(&self.working_dir);
        let shown: String = command.chars().take(80).collect();
        debug!(command = %shown, "local exec");

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                let stdout = read_pipe(child.stdout.take()).await;
                let stderr = read_pipe(child.stderr.take()).await;
                Ok(CommandOutcome {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                    timed_out: false,
                })
            }
            Err(_) => {
                let _ = child.kill().await;
                Ok(CommandOutcome {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                })
            }
        }
    }

    async fn upload(&self, src: &Path, dst: &Path) -> WorkspaceResult<()> {
        let dst = self.resolve(dst)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(src, &dst).await?;
        Ok(())
    }

    async fn download(&self, src: &Path, dst: &Path) -> WorkspaceResult<()> {
        let src = self.resolve(src)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, dst).await?;
        Ok(())
    }
}

async fn read_pipe(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    use tokio::io::AsyncReadExt;
    match pipe {
        Some(mut p) => {
            let mut buf = Vec::new();
            let _ = p.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_captures_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path()).unwrap();
        let outcome = ws
            .execute_command("echo out; echo err >&2; exit 3", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn timeout_is_an_outcome_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path()).unwrap();
        let outcome = ws
            .execute_command("sleep 30", None, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, -1);
    }

    #[tokio::test]
    async fn upload_download_round_trip() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path()).unwrap();

        let src = outside.path().join("in.txt");
        std::fs::write(&src, "payload").unwrap();
        ws.upload(&src, Path::new("sub/in.txt")).await.unwrap();

        let back = outside.path().join("out.txt");
        ws.download(Path::new("sub/in.txt"), &back).await.unwrap();
        assert_eq!(std::fs::read_to_string(&back).unwrap(), "payload");
    }

    #[tokio::test]
    async fn escape_above_root_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(dir.path()).unwrap();
        let src = dir.path().join("x.txt");
        std::fs::write(&src, "x").unwrap();
        let err = ws
            .upload(&src, Path::new("../../etc/passwd"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::PathOutsideWorkspace(_)));
    }
}
