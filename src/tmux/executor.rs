//! Secure async command executor
//!
//! Every external call made by the bridge goes through [`CommandExecutor`]:
//! - Allow-listed binaries only
//! - Argument vectors, never a shell string
//! - Semaphore to limit concurrent commands (default: 16)
//! - Hard timeout with kill on expiry
//! - Bounded stdout/stderr capture

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{ExecutionError, Result, ValidationError};
use crate::paths::{self, PathResolver};

/// Default maximum concurrent commands
pub const DEFAULT_MAX_CONCURRENT: usize = 16;

/// Default command timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on captured bytes per stream
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Binaries the executor accepts out of the box
pub const DEFAULT_ALLOWED_BINARIES: &[&str] = &["tmux", "git", "crontab"];

/// How a process run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Exited,
    SpawnFailed,
    TimedOut(Duration),
}

/// Result of one executor call. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Process exited with status 0
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Exit code of the process, `-1` if it never ran or was killed by a signal
    pub exit_code: i32,
    /// Output exceeded the byte cap and was cut
    pub truncated: bool,
    /// Display-only rendering of the command line
    pub command: String,
    stdout_utf8: bool,
    outcome: Outcome,
}

impl ExecutionResult {
    /// Result of a process that ran to completion
    pub fn completed(
        command: impl Into<String>,
        exit_code: i32,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        truncated: bool,
    ) -> Self {
        let (stdout, stdout_utf8) = match String::from_utf8(stdout) {
            Ok(text) => (text, true),
            Err(e) => (String::from_utf8_lossy(e.as_bytes()).into_owned(), false),
        };
        Self {
            success: exit_code == 0,
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            truncated,
            command: command.into(),
            stdout_utf8,
            outcome: Outcome::Exited,
        }
    }

    /// Result of a process killed after exceeding its time bound
    pub fn timed_out(command: impl Into<String>, limit: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: format!("timed out after {}ms", limit.as_millis()),
            exit_code: -1,
            truncated: false,
            command: command.into(),
            stdout_utf8: true,
            outcome: Outcome::TimedOut(limit),
        }
    }

    /// Result of a process that could not be started
    pub fn spawn_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: reason.into(),
            exit_code: -1,
            truncated: false,
            command: command.into(),
            stdout_utf8: true,
            outcome: Outcome::SpawnFailed,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.outcome, Outcome::TimedOut(_))
    }

    pub fn is_spawn_failure(&self) -> bool {
        self.outcome == Outcome::SpawnFailed
    }

    /// Classify stdout as text or as a malformed payload
    pub fn output(&self) -> CommandOutput {
        match self.outcome {
            Outcome::TimedOut(limit) => {
                return CommandOutput::Malformed(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                ));
            }
            Outcome::SpawnFailed => {
                return CommandOutput::Malformed(format!("spawn failed: {}", self.stderr.trim()));
            }
            Outcome::Exited => {}
        }

        if !self.success {
            CommandOutput::Malformed(format!(
                "exit code {}: {}",
                self.exit_code,
                self.stderr.trim()
            ))
        } else if self.truncated {
            CommandOutput::Malformed(format!(
                "output exceeded {} bytes and was truncated",
                self.stdout.len()
            ))
        } else if !self.stdout_utf8 {
            CommandOutput::Malformed("output is not valid UTF-8".to_string())
        } else if self.stdout.contains('\0') {
            CommandOutput::Malformed("output contains NUL bytes".to_string())
        } else {
            CommandOutput::Text(self.stdout.clone())
        }
    }

    /// Turn a failed result into a typed error for `?` propagation
    pub fn into_checked(self) -> std::result::Result<Self, ExecutionError> {
        match self.outcome {
            _ if self.success => Ok(self),
            Outcome::TimedOut(limit) => Err(ExecutionError::Timeout {
                command: self.command,
                timeout: limit,
            }),
            Outcome::SpawnFailed => Err(ExecutionError::SpawnFailed {
                command: self.command,
                reason: self.stderr,
            }),
            Outcome::Exited => Err(ExecutionError::CommandFailed {
                command: self.command,
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            }),
        }
    }
}

/// Tagged view of command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Text(String),
    Malformed(String),
}

impl CommandOutput {
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

/// A fully validated process invocation handed to a [`ProcessRunner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub binary: String,
    pub argv: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl ProcessRequest {
    pub fn display(&self) -> String {
        render_command(&self.binary, &self.argv)
    }
}

/// Runs already-validated processes
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion (or timeout) and collect output
    async fn run(&self, request: ProcessRequest) -> ExecutionResult;

    /// Start a process that outlives the caller; returns its pid
    async fn spawn_detached(&self, binary: &str, argv: &[String]) -> std::io::Result<u32>;
}

/// Runner backed by real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

async fn read_bounded<R>(reader: Option<R>, limit: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok((Vec::new(), false));
    };

    let mut buf = Vec::new();
    let mut limited = reader.take(limit as u64);
    limited.read_to_end(&mut buf).await?;

    // Keep draining so the child never blocks on a full pipe
    let mut rest = limited.into_inner();
    let dropped = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await?;

    Ok((buf, dropped > 0))
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, request: ProcessRequest) -> ExecutionResult {
        let command = request.display();

        let mut cmd = Command::new(&request.binary);
        cmd.args(&request.argv)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExecutionResult::spawn_failed(command, e.to_string()),
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let payload = request.stdin;
        let limit = request.max_output_bytes;

        let work = async {
            let write_stdin = async move {
                if let (Some(mut pipe), Some(data)) = (stdin, payload) {
                    pipe.write_all(data.as_bytes()).await?;
                    pipe.shutdown().await?;
                }
                Ok::<(), std::io::Error>(())
            };

            let (written, out, err, status) = tokio::join!(
                write_stdin,
                read_bounded(stdout, limit),
                read_bounded(stderr, limit),
                child.wait()
            );

            if let Err(e) = written {
                debug!("Failed to write stdin: {}", e);
            }
            let (stdout, out_cut) = out?;
            let (stderr, err_cut) = err?;
            let status = status?;
            Ok::<_, std::io::Error>((status.code().unwrap_or(-1), stdout, stderr, out_cut || err_cut))
        };

        let outcome = timeout(request.timeout, work).await;
        match outcome {
            Ok(Ok((code, stdout, stderr, truncated))) => {
                ExecutionResult::completed(command, code, stdout, stderr, truncated)
            }
            Ok(Err(e)) => {
                warn!("Command I/O failed: {}", e);
                ExecutionResult::spawn_failed(command, e.to_string())
            }
            Err(_) => {
                warn!("Command timed out after {:?}: {}", request.timeout, command);
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill timed out process: {}", e);
                }
                ExecutionResult::timed_out(command, request.timeout)
            }
        }
    }

    async fn spawn_detached(&self, binary: &str, argv: &[String]) -> std::io::Result<u32> {
        let mut child = Command::new(binary)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group: unaffected by the caller's terminal signals
            .process_group(0)
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("detached process exited before reporting a pid"))?;

        // Reap it if it finishes while we are still alive
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(pid)
    }
}

/// Render a command line for logs and error messages. Never executed.
pub fn render_command<S: AsRef<str>>(binary: &str, argv: &[S]) -> String {
    std::iter::once(binary)
        .chain(argv.iter().map(AsRef::as_ref))
        .map(|part| match shlex::try_quote(part) {
            Ok(quoted) => quoted.into_owned(),
            Err(_) => format!("{part:?}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check a single argument for bytes that must never reach a process
pub fn validate_argument(index: usize, arg: &str) -> std::result::Result<(), ValidationError> {
    let unsafe_arg = |reason: String| ValidationError::UnsafeArgument { index, reason };

    if arg.is_empty() {
        return Err(unsafe_arg("empty argument".to_string()));
    }
    if arg.contains('\0') {
        return Err(unsafe_arg("contains NUL byte".to_string()));
    }
    // Newline and tab are allowed so multi-line messages survive
    if let Some(c) = arg
        .chars()
        .find(|c| c.is_control() && *c != '\n' && *c != '\t')
    {
        return Err(unsafe_arg(format!(
            "contains control character U+{:04X}",
            c as u32
        )));
    }
    Ok(())
}

/// Binaries and script directories the executor may run
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    binaries: HashSet<String>,
    script_dirs: Vec<PathBuf>,
}

impl AllowList {
    pub fn new<I, S>(binaries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            binaries: binaries.into_iter().map(Into::into).collect(),
            script_dirs: Vec::new(),
        }
    }

    pub fn allow(&mut self, binary: impl Into<String>) {
        self.binaries.insert(binary.into());
    }

    /// Allow any absolute path inside `dir`
    pub fn allow_dir(&mut self, dir: impl Into<PathBuf>) {
        self.script_dirs.push(dir.into());
    }

    pub fn is_allowed(&self, binary: &str) -> bool {
        if self.binaries.contains(binary) {
            return true;
        }
        let path = Path::new(binary);
        path.is_absolute()
            && self
                .script_dirs
                .iter()
                .any(|dir| paths::is_path_safe(path, dir) && paths::normalize(path) != *dir)
    }
}

/// Secure command executor
///
/// Cheap to clone; all clones share the semaphore and runner.
#[derive(Clone)]
pub struct CommandExecutor {
    runner: Arc<dyn ProcessRunner>,
    semaphore: Arc<Semaphore>,
    allow_list: Arc<AllowList>,
    timeout: Duration,
    max_output_bytes: usize,
    tmux_binary: String,
    tmux_socket: Option<String>,
}

impl CommandExecutor {
    /// Create a new executor with default settings
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemRunner))
    }

    /// Create an executor that delegates process work to `runner`
    pub fn with_runner(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            allow_list: Arc::new(AllowList::new(DEFAULT_ALLOWED_BINARIES.iter().copied())),
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            tmux_binary: "tmux".to_string(),
            tmux_socket: None,
        }
    }

    /// Build from configuration, allowing the active scripts directory
    pub fn from_config(config: &Config, resolver: &PathResolver) -> Self {
        let mut executor = Self::new()
            .with_max_concurrent(config.max_concurrent)
            .with_timeout(config.command_timeout())
            .with_max_output_bytes(config.max_output_bytes)
            .with_tmux_binary(config.tmux_binary.clone())
            .with_tmux_socket(config.tmux_socket.clone())
            .allow_script_dir(resolver.scripts_base().to_path_buf());
        for binary in &config.extra_allowed_binaries {
            executor = executor.allow_binary(binary.clone());
        }
        executor
    }

    /// Set the concurrency limit
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    /// Set the default command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes.max(1);
        self
    }

    /// Use a different tmux binary (added to the allow-list)
    pub fn with_tmux_binary(mut self, binary: impl Into<String>) -> Self {
        self.tmux_binary = binary.into();
        Arc::make_mut(&mut self.allow_list).allow(self.tmux_binary.clone());
        self
    }

    /// Talk to a named tmux server socket (`tmux -L <name>`)
    pub fn with_tmux_socket(mut self, socket: Option<String>) -> Self {
        self.tmux_socket = socket;
        self
    }

    pub fn allow_binary(mut self, binary: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.allow_list).allow(binary);
        self
    }

    pub fn allow_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        Arc::make_mut(&mut self.allow_list).allow_dir(dir);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tmux_binary(&self) -> &str {
        &self.tmux_binary
    }

    /// Reject disallowed binaries and unsafe arguments
    pub fn validate<S: AsRef<str>>(
        &self,
        binary: &str,
        argv: &[S],
    ) -> std::result::Result<(), ValidationError> {
        if binary.is_empty() || binary.chars().any(char::is_control) {
            return Err(ValidationError::BinaryNotAllowed(binary.escape_debug().to_string()));
        }
        if !self.allow_list.is_allowed(binary) {
            return Err(ValidationError::BinaryNotAllowed(binary.to_string()));
        }
        argv.iter()
            .enumerate()
            .try_for_each(|(index, arg)| validate_argument(index, arg.as_ref()))
    }

    /// Run `binary` with `argv` under `timeout`
    ///
    /// Returns `Err` only for validation failures; anything that happens after
    /// validation is reported through the [`ExecutionResult`].
    #[instrument(skip_all, fields(binary = %binary))]
    pub async fn execute_secure<S: AsRef<str>>(
        &self,
        binary: &str,
        argv: &[S],
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        self.run(binary, argv, None, timeout).await
    }

    /// Run with the executor's default timeout
    pub async fn execute<S: AsRef<str>>(&self, binary: &str, argv: &[S]) -> Result<ExecutionResult> {
        self.run(binary, argv, None, self.timeout).await
    }

    /// Run and feed `input` to the process's stdin
    #[instrument(skip_all, fields(binary = %binary))]
    pub async fn execute_with_input<S: AsRef<str>>(
        &self,
        binary: &str,
        argv: &[S],
        input: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        self.run(binary, argv, Some(input.to_string()), timeout).await
    }

    async fn run<S: AsRef<str>>(
        &self,
        binary: &str,
        argv: &[S],
        stdin: Option<String>,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        self.validate(binary, argv)?;

        let request = ProcessRequest {
            binary: binary.to_string(),
            argv: argv.iter().map(|a| a.as_ref().to_string()).collect(),
            stdin,
            timeout,
            max_output_bytes: self.max_output_bytes,
        };

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ExecutionError::SemaphoreClosed)?;

        debug!("Executing: {}", request.display());
        let result = self.runner.run(request).await;

        if result.truncated {
            warn!("Output of `{}` truncated at {} bytes", result.command, self.max_output_bytes);
        }
        if !result.success {
            debug!(
                "Command `{}` failed (exit {}): {}",
                result.command,
                result.exit_code,
                result.stderr.trim()
            );
        }
        Ok(result)
    }

    /// Argument vector for a tmux subcommand, including the socket selector
    pub fn tmux_argv<S: AsRef<str>>(&self, subcommand: &str, args: &[S]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 3);
        if let Some(socket) = &self.tmux_socket {
            argv.push("-L".to_string());
            argv.push(socket.clone());
        }
        argv.push(subcommand.to_string());
        argv.extend(args.iter().map(|a| a.as_ref().to_string()));
        argv
    }

    /// Run a tmux subcommand
    pub async fn secure_tmux<S: AsRef<str>>(
        &self,
        subcommand: &str,
        args: &[S],
    ) -> Result<ExecutionResult> {
        let argv = self.tmux_argv(subcommand, args);
        self.execute(&self.tmux_binary, argv.as_slice()).await
    }

    /// Spawn a process that keeps running after this one exits
    #[instrument(skip_all, fields(binary = %binary))]
    pub async fn spawn_detached<S: AsRef<str>>(&self, binary: &str, argv: &[S]) -> Result<u32> {
        self.validate(binary, argv)?;
        let argv: Vec<String> = argv.iter().map(|a| a.as_ref().to_string()).collect();
        let command = render_command(binary, &argv);

        let pid = self
            .runner
            .spawn_detached(binary, &argv)
            .await
            .map_err(|e| ExecutionError::SpawnFailed {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        debug!("Spawned detached pid {}: {}", pid, command);
        Ok(pid)
    }

    /// Check if tmux is installed and accessible
    pub async fn check_installed(&self) -> Result<String> {
        let result = self.execute(&self.tmux_binary, &["-V"]).await?;
        if result.success {
            let version = result.stdout.trim().to_string();
            debug!("tmux version: {}", version);
            Ok(version)
        } else {
            Err(ExecutionError::NotInstalled {
                binary: self.tmux_binary.clone(),
            }
            .into())
        }
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}
