//! Remote workspace: a client for the agent server wrapping a sandboxed
//! environment. Commands are started, then the server's event stream is
//! polled until an exit code shows up or the deadline passes.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::{CommandOutcome, Workspace, WorkspaceError, WorkspaceResult};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct RemoteWorkspace {
    host: String,
    api_key: Option<String>,
    working_dir: PathBuf,
    client: reqwest::Client,
    poll_interval: Duration,
}

#[derive(Deserialize)]
struct StartCommandResponse {
    id: String,
}

/// One entry of the server's bash event stream.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteBashEvent {
    pub kind: String,
    #[allow(dead_code)]
    pub command_id: String,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub order: u64,
}

#[derive(Deserialize)]
struct BashEventPage {
    items: Vec<RemoteBashEvent>,
}

/// Accumulates polled events into an outcome.
#[derive(Default)]
struct CommandAccumulator {
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    next_order: u64,
}

impl CommandAccumulator {
    /// Fold a page of events. Events below `next_order` were already seen.
    fn apply(&mut self, events: &[RemoteBashEvent]) {
        let mut sorted: Vec<&RemoteBashEvent> = events
            .iter()
            .filter(|e| e.order >= self.next_order)
            .collect();
        sorted.sort_by_key(|e| e.order);
        for event in sorted {
            if let Some(out) = &event.stdout {
                self.stdout.push_str(out);
            }
            if let Some(err) = &event.stderr {
                self.stderr.push_str(err);
            }
            if let Some(code) = event.exit_code {
                self.exit_code = Some(code);
            }
            self.next_order = event.order + 1;
        }
    }
}

impl RemoteWorkspace {
    pub fn new(host: impl Into<String>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            api_key: None,
            working_dir: working_dir.as_ref().to_path_buf(),
            client: reqwest::Client::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Probe `/health` until the server answers or `timeout` elapses.
    pub async fn wait_until_ready(&self, timeout: Duration) -> WorkspaceResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let probe = self
                .authorize(self.client.get(self.url("/health")))
                .send()
                .await;
            match probe {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    debug!(status = %response.status(), "health probe not ready");
                }
                Err(e) => debug!(error = %e, "health probe failed"),
            }
            if Instant::now() >= deadline {
                return Err(WorkspaceError::Unavailable(format!(
                    "agent server at {} did not become healthy within {timeout:?}",
                    self.host
                )));
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn poll_events(
        &self,
        command_id: &str,
        next_order: u64,
    ) -> WorkspaceResult<Vec<RemoteBashEvent>> {
        let url = self.url("/api/bash/bash_events/search");
        let page: BashEventPage = self
            .authorize(self.client.get(&url))
            .query(&[("command_id", command_id), ("offset", &next_order.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(page.items)
    }
}

#[async_trait::async_trait]
impl Workspace for RemoteWorkspace {
    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    async fn execute_command(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> WorkspaceResult<CommandOutcome> {
        let cwd = cwd.unwrap_or(&self.working_dir);
        let start: StartCommandResponse = self
            .authorize(self.client.post(self.url("/api/bash/execute_bash_command")))
            .json(&serde_json::json!({
                "command": command,
                "cwd": cwd.display().to_string(),
                "timeout": timeout.as_secs(),
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(command_id = %start.id, "remote command started");
        let deadline = Instant::now() + timeout;
        let mut acc = CommandAccumulator::default();

        loop {
            let events = self.poll_events(&start.id, acc.next_order).await?;
            acc.apply(&events);

            if let Some(exit_code) = acc.exit_code {
                return Ok(CommandOutcome {
                    exit_code,
                    stdout: acc.stdout,
                    stderr: acc.stderr,
                    timed_out: false,
                });
            }
            if Instant::now() >= deadline {
                // The remote server owns the process; report the timeout and
                // leave the command running.
                warn!(command_id = %start.id, "remote command deadline passed");
                return Ok(CommandOutcome {
                    exit_code: -1,
                    stdout: acc.stdout,
                    stderr: acc.stderr,
                    timed_out: true,
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn upload(&self, src: &Path, dst: &Path) -> WorkspaceResult<()> {
        let bytes = tokio::fs::read(src).await?;
        let file_name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = self.url(&format!("/api/file/upload/{}", dst.display()));
        self.authorize(self.client.post(&url))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn download(&self, src: &Path, dst: &Path) -> WorkspaceResult<()> {
        let url = self.url(&format!("/api/file/download/{}", src.display()));
        let bytes = self
            .authorize(self.client.get(&url))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dst, &bytes).await?;
        Ok(())
    }
}
