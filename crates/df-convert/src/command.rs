//! Builder for executing external tool commands under supervision.
//!
//! [`ToolCommand::run`] spawns the program as the leader of a fresh process
//! group, captures stdout/stderr up to a byte cap, and waits for exit or the
//! timeout. On timeout the whole group is killed with `SIGKILL`, so helper
//! processes the engine forked do not outlive the attempt.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Default command timeout: 60 seconds.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) use df_core::config::DEFAULT_MAX_OUTPUT_BYTES;

/// How long to wait for output pipes to close after the process is gone.
const READ_GRACE: Duration = Duration::from_secs(2);

/// Output captured from a process that exited on its own.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8, capped).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8, capped).
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or `None` if the process was terminated by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Best diagnostic text available: stderr, else stdout, trimmed and
    /// truncated to `limit` bytes on a character boundary.
    pub fn diagnostics(&self, limit: usize) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        truncate(text, limit)
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone)]
pub enum ToolRun {
    /// The process exited (successfully or not) before the timeout.
    Exited(ToolOutput),
    /// The timeout elapsed first; the process group was killed.
    TimedOut {
        /// The timeout that elapsed.
        after: Duration,
        /// Whatever stderr was captured before the kill.
        stderr: String,
    },
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use df_convert::{ToolCommand, ToolRun};
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// # async fn example() -> df_core::Result<()> {
/// let run = ToolCommand::new(PathBuf::from("soffice"))
///     .arg("--headless")
///     .arg("--convert-to").arg("docx")
///     .arg("input.doc")
///     .current_dir("/tmp/docforge/job")
///     .timeout(Duration::from_secs(60))
///     .run()
///     .await?;
/// if let ToolRun::Exited(out) = run {
///     println!("exit: {:?}", out.exit_code());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run the child inside `dir`.
    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Cap on captured bytes per output stream.
    pub fn max_output_bytes(&mut self, n: usize) -> &mut Self {
        self.max_output_bytes = n;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Spawn the process and supervise it until exit or timeout.
    ///
    /// A non-zero exit is *not* an error here; callers classify
    /// [`ToolRun::Exited`] themselves.
    ///
    /// # Errors
    ///
    /// Returns [`df_core::Error::Tool`] if the process cannot be spawned or
    /// waiting on it fails.
    pub async fn run(&self) -> df_core::Result<ToolRun> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        // New process group so a timeout can take down the whole tree.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            df_core::Error::tool(program_name.clone(), format!("failed to spawn: {e}"))
        })?;
        let pid = child.id();

        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), self.max_output_bytes));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), self.max_output_bytes));

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, child.wait()).await;

        match result {
            Ok(Ok(status)) => {
                // Helpers the leader forked must not outlive it.
                kill_process_group(pid);
                let stdout = collect(stdout_task).await;
                let stderr = collect(stderr_task).await;
                tracing::debug!(
                    tool = %program_name,
                    status = %status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Process exited"
                );
                Ok(ToolRun::Exited(ToolOutput {
                    status,
                    stdout,
                    stderr,
                }))
            }
            Ok(Err(e)) => {
                kill_process_group(pid);
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                Err(df_core::Error::tool(
                    program_name,
                    format!("I/O error waiting for process: {e}"),
                ))
            }
            Err(_elapsed) => {
                tracing::warn!(
                    tool = %program_name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Process timed out; killing process group"
                );
                kill_process_group(pid);
                // Kills the leader if it is still around and reaps it.
                let _ = child.kill().await;
                stdout_task.abort();
                let stderr = collect(stderr_task).await;
                Ok(ToolRun::TimedOut {
                    after: self.timeout,
                    stderr,
                })
            }
        }
    }
}

/// Send `SIGKILL` to the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only delivers a signal. The group was created for this
    // child via `process_group(0)`, so its id equals the child's pid.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        tracing::trace!(
            pgid,
            error = %std::io::Error::last_os_error(),
            "killpg failed (group already gone?)"
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Read a stream to EOF, keeping at most `cap` bytes. The remainder is
/// drained and discarded so a chatty child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>, cap: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let Some(mut reader) = handle else {
        return kept;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    kept
}

/// Await a reader task for a bounded time, falling back to nothing.
async fn collect(mut task: JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(READ_GRACE, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

/// Truncate `text` to at most `limit` bytes without splitting a character.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &text[..end])
}
