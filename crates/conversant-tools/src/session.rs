//! Persistent interactive bash session.
//!
//! One shell process stays alive across commands so environment, working
//! directory, and exported variables persist. The shell's stdin carries only
//! control lines: each command is wrapped in a brace group whose stdin is
//! redirected from a session FIFO, followed by an echoed boundary sentinel
//! carrying `$?` and `$PWD`. `send_input` writes into the FIFO, so user input
//! reaches the running command without disturbing the command framing.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::truncate::truncate_head_tail;

const SENTINEL_PREFIX: &str = "__CONVERSANT_EXIT_";
const RESYNC_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct BashSessionConfig {
    pub working_dir: PathBuf,
    /// Wall-clock budget per command.
    pub default_timeout: Duration,
    /// Stuck window: no output progress for this long returns a timeout.
    pub no_change_timeout: Duration,
    /// Byte budget for a command's merged output; head and tail are kept.
    pub max_output_bytes: usize,
}

impl BashSessionConfig {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            default_timeout: Duration::from_secs(30),
            no_change_timeout: Duration::from_secs(30),
            max_output_bytes: 30_000,
        }
    }
}

/// Per-command terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Completed,
    TimedOut,
    Interrupted,
}

/// Result of one session operation.
#[derive(Clone, Debug)]
pub struct BashExecution {
    pub output: String,
    pub exit_code: Option<i32>,
    pub status: CommandStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("previous command is still running; use send_input or interrupt")]
    Busy,

    #[error("no command is currently running")]
    NotRunning,

    #[error("shell desynchronized and was recycled")]
    Recycled,

    #[error("stdin forwarding is not supported on this platform")]
    InputNotSupported,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct Shell {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
}

impl Shell {
    fn spawn(cwd: &Path) -> Result<Self, SessionError> {
        let mut command = Command::new("bash");
        command
            .current_dir(cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout")).lines();
        let stderr = BufReader::new(child.stderr.take().expect("piped stderr")).lines();
        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
        })
    }
}

/// The FIFO commands read their stdin from. The session holds a read-write
/// handle so opening never blocks and writes buffer until a command reads.
#[cfg(unix)]
struct InputChannel {
    path: PathBuf,
    handle: std::fs::File,
}

#[cfg(unix)]
impl InputChannel {
    fn create() -> Result<Self, SessionError> {
        use nix::sys::stat::Mode;

        let path = std::env::temp_dir().join(format!(
            "conversant-stdin-{}.fifo",
            Uuid::new_v4().simple()
        ));
        nix::unistd::mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)
            .map_err(|e| SessionError::Io(std::io::Error::other(e)))?;
        let handle = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(Self { path, handle })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        use std::io::Write;
        self.handle.write_all(bytes)?;
        self.handle.flush()?;
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for InputChannel {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Parsed sentinel line: text preceding the marker, exit code, and cwd.
fn split_sentinel<'a>(line: &'a str, nonce: &str) -> Option<(&'a str, i32, PathBuf)> {
    let marker = format!("{SENTINEL_PREFIX}{nonce}__ ");
    let at = line.find(&marker)?;
    let rest = &line[at + marker.len()..];
    let (code, cwd) = rest.split_once(' ')?;
    Some((&line[..at], code.parse().ok()?, PathBuf::from(cwd)))
}

pub struct BashSession {
    config: BashSessionConfig,
    shell: Option<Shell>,
    #[cfg(unix)]
    input: Option<InputChannel>,
    /// Sentinel nonce of the command in flight, if any.
    pending: Option<String>,
    cwd: PathBuf,
}

impl BashSession {
    pub fn new(config: BashSessionConfig) -> Self {
        let cwd = config.working_dir.clone();
        Self {
            config,
            shell: None,
            #[cfg(unix)]
            input: None,
            pending: None,
            cwd,
        }
    }

    /// Current working directory as of the last completed command.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn is_running(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the underlying shell process is alive.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.shell {
            Some(shell) => matches!(shell.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn ensure_shell(&mut self) -> Result<(), SessionError> {
        if self.shell.is_none() {
            debug!(cwd = %self.cwd.display(), "spawning bash session");
            self.shell = Some(Shell::spawn(&self.cwd)?);
        }
        #[cfg(unix)]
        if self.input.is_none() {
            self.input = Some(InputChannel::create()?);
        }
        Ok(())
    }

    /// Wrap a command so its stdin comes from the session FIFO, then frame it
    /// with the boundary sentinel.
    fn frame(&self, command: &str, nonce: &str) -> String {
        #[cfg(unix)]
        if let Some(input) = &self.input {
            return format!(
                "{{\n{command}\n}} < '{}'\necho \"{SENTINEL_PREFIX}{nonce}__ $? $PWD\"\n",
                input.path.display()
            );
        }
        format!("{command}\necho \"{SENTINEL_PREFIX}{nonce}__ $? $PWD\"\n")
    }

    /// Execute a command and wait for its sentinel, a timeout, or stalled
    /// output. A timeout leaves the command running so the caller can feed
    /// it input or interrupt it.
    pub async fn run(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<BashExecution, SessionError> {
        if self.pending.is_some() {
            // The previous command may have finished since we last looked.
            if !self.try_reap_pending().await? {
                return Err(SessionError::Busy);
            }
        }
        self.ensure_shell()?;

        let nonce = Uuid::new_v4().simple().to_string();
        let framed = self.frame(command, &nonce);
        let shell = self.shell.as_mut().expect("shell just ensured");
        shell.stdin.write_all(framed.as_bytes()).await?;
        shell.stdin.flush().await?;
        self.pending = Some(nonce);

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        self.drain(timeout).await
    }

    /// Write to the running command's stdin, then keep draining.
    pub async fn send_input(
        &mut self,
        input: &str,
        timeout: Option<Duration>,
    ) -> Result<BashExecution, SessionError> {
        if self.pending.is_none() {
            return Err(SessionError::NotRunning);
        }
        #[cfg(unix)]
        {
            let channel = self.input.as_mut().ok_or(SessionError::NotRunning)?;
            if input.ends_with('\n') {
                channel.write(input.as_bytes())?;
            } else {
                channel.write(format!("{input}\n").as_bytes())?;
            }
        }
        #[cfg(not(unix))]
        {
            let _ = input;
            return Err(SessionError::InputNotSupported);
        }

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        self.drain(timeout).await
    }

    /// Signal the foreground command, then re-synchronize the shell.
    pub async fn interrupt(&mut self) -> Result<BashExecution, SessionError> {
        if self.pending.is_none() {
            return Err(SessionError::NotRunning);
        }
        #[cfg(unix)]
        if let Some(shell) = &self.shell {
            if let Some(pid) = shell.child.id() {
                let pgid = nix::unistd::Pid::from_raw(pid as i32);
                if let Err(e) = nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGINT) {
                    warn!(error = %e, "failed to signal shell process group");
                }
            }
        }

        let mut execution = self.resync().await?;
        execution.status = CommandStatus::Interrupted;
        Ok(execution)
    }

    /// Terminate the shell process, if any. The next command starts a fresh
    /// one in the last known working directory.
    pub async fn shutdown(&mut self) {
        if let Some(mut shell) = self.shell.take() {
            let _ = shell.child.kill().await;
        }
        #[cfg(unix)]
        {
            self.input = None;
        }
        self.pending = None;
    }

    /// Quick check whether the in-flight command completed while we were not
    /// looking; reaps its sentinel if so.
    async fn try_reap_pending(&mut self) -> Result<bool, SessionError> {
        match self.drain(Duration::from_millis(100)).await {
            Ok(execution) => Ok(execution.status == CommandStatus::Completed),
            Err(_) => Ok(false),
        }
    }

    /// Drain until a fresh sentinel arrives; recycle the shell when two
    /// attempts fail.
    async fn resync(&mut self) -> Result<BashExecution, SessionError> {
        for attempt in 0..2 {
            let nonce = Uuid::new_v4().simple().to_string();
            let probe = format!("echo \"{SENTINEL_PREFIX}{nonce}__ $? $PWD\"\n");
            let write_ok = match self.shell.as_mut() {
                Some(shell) => {
                    shell.stdin.write_all(probe.as_bytes()).await.is_ok()
                        && shell.stdin.flush().await.is_ok()
                }
                None => false,
            };
            if write_ok {
                self.pending = Some(nonce);
                if let Ok(execution) = self.drain(RESYNC_TIMEOUT).await {
                    if execution.status == CommandStatus::Completed {
                        return Ok(execution);
                    }
                }
            }
            debug!(attempt, "resynchronization attempt failed");
        }
        self.recycle().await?;
        Err(SessionError::Recycled)
    }

    /// Kill the shell and start a new one in the same working directory.
    async fn recycle(&mut self) -> Result<(), SessionError> {
        warn!(cwd = %self.cwd.display(), "recycling bash session");
        self.shutdown().await;
        self.shell = Some(Shell::spawn(&self.cwd)?);
        Ok(())
    }

    async fn drain(&mut self, timeout: Duration) -> Result<BashExecution, SessionError> {
        let nonce = self.pending.clone().ok_or(SessionError::NotRunning)?;
        let shell = self.shell.as_mut().ok_or(SessionError::NotRunning)?;

        let started = Instant::now();
        let hard_deadline = started + timeout;
        let mut last_progress = started;
        let mut output = String::new();

        loop {
            let stall_deadline = last_progress + self.config.no_change_timeout;
            let wake_at = hard_deadline.min(stall_deadline);

            tokio::select! {
                line = shell.stdout.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some((before, code, cwd)) = split_sentinel(&line, &nonce) {
                            if !before.is_empty() {
                                output.push_str(before);
                                output.push('\n');
                            }
                            self.pending = None;
                            self.cwd = cwd;
                            return Ok(BashExecution {
                                output: truncate_head_tail(&output, self.config.max_output_bytes),
                                exit_code: Some(code),
                                status: CommandStatus::Completed,
                            });
                        }
                        if line.contains(SENTINEL_PREFIX) {
                            // Stale sentinel from an interrupted command.
                            continue;
                        }
                        output.push_str(&line);
                        output.push('\n');
                        last_progress = Instant::now();
                    }
                    Ok(None) => {
                        // Shell exited underneath us (e.g. the command was
                        // `exit`). Reap it; the next run respawns.
                        let status = shell.child.wait().await?;
                        self.shell = None;
                        self.pending = None;
                        return Ok(BashExecution {
                            output: truncate_head_tail(&output, self.config.max_output_bytes),
                            exit_code: status.code(),
                            status: CommandStatus::Completed,
                        });
                    }
                    Err(e) => return Err(SessionError::Io(e)),
                },
                line = shell.stderr.next_line() => match line {
                    Ok(Some(line)) => {
                        output.push_str("[stderr] ");
                        output.push_str(&line);
                        output.push('\n');
                        last_progress = Instant::now();
                    }
                    Ok(None) => {
                        // stderr closed; keep draining stdout until the
                        // sentinel arrives or the shell exits.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                    Err(e) => return Err(SessionError::Io(e)),
                },
                _ = tokio::time::sleep_until(wake_at) => {
                    let stalled = Instant::now() >= stall_deadline
                        && Instant::now() < hard_deadline;
                    debug!(stalled, "command did not finish within budget");
                    return Ok(BashExecution {
                        output: truncate_head_tail(&output, self.config.max_output_bytes),
                        exit_code: None,
                        status: CommandStatus::TimedOut,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_splits_inline_output() {
        let line = format!("partial{SENTINEL_PREFIX}abc__ 0 /tmp");
        let (before, code, cwd) = split_sentinel(&line, "abc").unwrap();
        assert_eq!(before, "partial");
        assert_eq!(code, 0);
        assert_eq!(cwd, PathBuf::from("/tmp"));
    }

    #[test]
    fn sentinel_preserves_spaces_in_cwd() {
        let line = format!("{SENTINEL_PREFIX}abc__ 7 /tmp/has space");
        let (_, code, cwd) = split_sentinel(&line, "abc").unwrap();
        assert_eq!(code, 7);
        assert_eq!(cwd, PathBuf::from("/tmp/has space"));
    }

    #[test]
    fn wrong_nonce_does_not_match() {
        let line = format!("{SENTINEL_PREFIX}abc__ 0 /tmp");
        assert!(split_sentinel(&line, "xyz").is_none());
    }

    #[tokio::test]
    async fn run_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = BashSession::new(BashSessionConfig::new(dir.path()));
        let execution = session.run("echo hi", None).await.unwrap();
        assert_eq!(execution.status, CommandStatus::Completed);
        assert_eq!(execution.exit_code, Some(0));
        assert_eq!(execution.output.trim(), "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = BashSession::new(BashSessionConfig::new(dir.path()));
        let execution = session.run("false", None).await.unwrap();
        assert_eq!(execution.exit_code, Some(1));
    }

    #[tokio::test]
    async fn environment_persists_across_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = BashSession::new(BashSessionConfig::new(dir.path()));
        session.run("export MARKER=propagated", None).await.unwrap();
        let execution = session.run("echo $MARKER", None).await.unwrap();
        assert_eq!(execution.output.trim(), "propagated");
    }

    #[tokio::test]
    async fn cwd_follows_cd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let mut session = BashSession::new(BashSessionConfig::new(dir.path()));
        session.run("cd nested", None).await.unwrap();
        let execution = session.run("pwd", None).await.unwrap();
        assert!(execution.output.trim().ends_with("nested"));
        assert!(session.cwd().ends_with("nested"));
    }

    #[tokio::test]
    async fn stderr_is_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = BashSession::new(BashSessionConfig::new(dir.path()));
        let execution = session.run("echo oops >&2", None).await.unwrap();
        assert!(execution.output.contains("[stderr] oops"));
    }

    #[tokio::test]
    async fn timeout_leaves_command_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = BashSession::new(BashSessionConfig::new(dir.path()));
        let execution = session
            .run("sleep 30", Some(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(execution.status, CommandStatus::TimedOut);
        assert!(execution.exit_code.is_none());
        assert!(session.is_running());

        let err = session.run("echo nope", None).await.unwrap_err();
        assert!(matches!(err, SessionError::Busy));
    }

    #[tokio::test]
    async fn interrupt_recovers_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = BashSession::new(BashSessionConfig::new(dir.path()));
        session
            .run("sleep 30", Some(Duration::from_millis(100)))
            .await
            .unwrap();
        match session.interrupt().await {
            Ok(execution) => assert_eq!(execution.status, CommandStatus::Interrupted),
            // The shell itself may die to the signal; a recycle is the
            // documented recovery path.
            Err(SessionError::Recycled) => {}
            Err(other) => panic!("unexpected interrupt failure: {other}"),
        }

        let after = session.run("echo recovered", None).await.unwrap();
        assert_eq!(after.output.trim(), "recovered");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn send_input_feeds_a_waiting_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = BashSession::new(BashSessionConfig::new(dir.path()));
        session
            .run(
                "read REPLY && echo \"got:$REPLY\"",
                Some(Duration::from_millis(300)),
            )
            .await
            .unwrap();
        let execution = session.send_input("hello", None).await.unwrap();
        assert_eq!(execution.status, CommandStatus::Completed);
        assert!(execution.output.contains("got:hello"));
    }

    #[tokio::test]
    async fn shutdown_kills_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = BashSession::new(BashSessionConfig::new(dir.path()));
        session.run("true", None).await.unwrap();
        assert!(session.is_alive());
        session.shutdown().await;
        assert!(!session.is_alive());
    }

    #[tokio::test]
    async fn long_output_is_truncated_head_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BashSessionConfig::new(dir.path());
        config.max_output_bytes = 500;
        let mut session = BashSession::new(config);
        let execution = session.run("seq 1 5000", None).await.unwrap();
        assert!(execution.output.contains("output truncated"));
        assert!(execution.output.starts_with("1\n"));
        assert!(execution.output.trim_end().ends_with("5000"));
    }
}
