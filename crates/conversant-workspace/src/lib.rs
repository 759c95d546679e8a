//! Workspace abstraction: the file-system and command-execution environment
//! a conversation operates against.
//!
//! The engine only uses four capabilities: run a command, upload a file,
//! download a file, and ask for the working directory. `LocalWorkspace` backs
//! them with the local machine; `RemoteWorkspace` with an agent server
//! wrapping a sandbox.

pub mod local;
pub mod remote;

pub use local::LocalWorkspace;
pub use remote::RemoteWorkspace;

use std::path::Path;
use std::time::Duration;

/// Result of one command execution.
#[derive(Clone, Debug)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace unavailable: {0}")]
    Unavailable(String),

    #[error("path outside workspace: {0}")]
    PathOutsideWorkspace(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote protocol error: {0}")]
    Protocol(String),
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Command execution and file transfer against some environment. Both
/// implementations are synchronous from the engine's point of view; the
/// remote one streams and polls internally.
#[async_trait::async_trait]
pub trait Workspace: Send + Sync {
    /// The directory commands run in and relative paths resolve against.
    fn working_dir(&self) -> &Path;

    /// Run a command to completion or timeout. A timeout is reported in the
    /// outcome (`exit_code = -1`, `timed_out = true`), not as an error.
    async fn execute_command(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> WorkspaceResult<CommandOutcome>;

    /// Copy a local file into the workspace.
    async fn upload(&self, src: &Path, dst: &Path) -> WorkspaceResult<()>;

    /// Copy a workspace file out to a local path.
    async fn download(&self, src: &Path, dst: &Path) -> WorkspaceResult<()>;
}
