//! Deadline-bounded execution of the external archive tool.
//!
//! Every invocation runs with a cleared environment plus a fixed locale so the
//! tool's messages are never localized. Standard output is either captured in
//! memory (member listings) or streamed into a caller supplied sink (member
//! extraction). The child is killed when the deadline passes or when the
//! future driving it is dropped.

use crate::error::ProcessError;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::debug;

/// Locale variable set on every invocation.
pub const LOCALE_VAR: &str = "LANG";

/// Locale value that keeps tool output stable and non-localized.
pub const LOCALE_VALUE: &str = "C";

/// Output of a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Captured standard output; empty when a sink was supplied
    pub stdout: Vec<u8>,

    /// Captured standard error
    pub stderr: String,
}

impl ProcessOutput {
    /// Non-blank lines of standard output, in order.
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.stdout)
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Spawns commands with a fixed environment and working directory.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    env: Vec<(OsString, OsString)>,
    cwd: PathBuf,
}

impl ProcessRunner {
    /// Create a runner working in `cwd` with only the locale variable set.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            env: vec![(LOCALE_VAR.into(), LOCALE_VALUE.into())],
            cwd: cwd.into(),
        }
    }

    /// Add or replace an environment variable.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        let key = key.as_ref().to_os_string();
        self.env.retain(|(k, _)| *k != key);
        self.env.push((key, value.as_ref().to_os_string()));
        self
    }

    /// Working directory every command starts in.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Run `program` with `args` and wait for it, at most `deadline`.
    ///
    /// # Arguments
    ///
    /// * `program` - Absolute path of the executable
    /// * `args` - Argument vector
    /// * `deadline` - Longest the command may run before it is killed
    /// * `sink` - When present, standard output is streamed into it instead of
    ///   being buffered
    ///
    /// # Errors
    ///
    /// Returns `CommandError` on a nonzero exit, `SignalTerminated` when the
    /// child died from a signal and `TimedOut` when the deadline expired.
    pub async fn run<S: AsRef<OsStr>>(
        &self,
        program: &Path,
        args: &[S],
        deadline: Duration,
        sink: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
    ) -> Result<ProcessOutput, ProcessError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "running command: {} {}",
            program.display(),
            args.iter()
                .map(|a| a.as_ref().to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            command: program.display().to_string(),
            source,
        })?;

        let collected = match tokio::time::timeout(deadline, collect(&mut child, sink)).await {
            Ok(collected) => collected?,
            Err(_) => {
                // Reap the child so it does not linger as a zombie
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ProcessError::TimedOut { after: deadline });
            }
        };

        let (status, stdout, stderr) = collected;
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if status.success() {
            return Ok(ProcessOutput { stdout, stderr });
        }

        match status.code() {
            Some(code) => Err(ProcessError::CommandError {
                code,
                stderr: fold_lines(&stderr),
            }),
            None => Err(ProcessError::SignalTerminated {
                signal: signal_of(&status),
                stderr: fold_lines(&stderr),
            }),
        }
    }
}

/// Drain both output streams concurrently, then wait for exit.
///
/// When the sink rejects a write the child is killed at once, so neither
/// stream is left waiting on a full pipe.
async fn collect(
    child: &mut Child,
    sink: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), ProcessError> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

    let mut captured = Vec::new();
    let mut err_buf = Vec::new();

    let out_fut = async {
        let piped = match sink {
            Some(writer) => pipe_into(&mut stdout, writer).await,
            None => stdout
                .read_to_end(&mut captured)
                .await
                .map(|_| ())
                .map_err(ProcessError::Io),
        };
        if piped.is_err() {
            drop(stdout);
            let _ = child.start_kill();
        }
        piped
    };
    let err_fut = stderr.read_to_end(&mut err_buf);

    let (out_res, err_res) = tokio::join!(out_fut, err_fut);
    if let Err(e) = out_res {
        let _ = child.wait().await;
        return Err(e);
    }
    err_res?;

    let status = child.wait().await?;
    Ok((status, captured, err_buf))
}

/// Copy `stdout` into `writer`, keeping read and write failures apart.
async fn pipe_into<R>(
    stdout: &mut R,
    writer: &mut (dyn AsyncWrite + Unpin + Send),
) -> Result<(), ProcessError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(ProcessError::Sink)?;
    }
    writer.flush().await.map_err(ProcessError::Sink)
}

fn fold_lines(s: &str) -> String {
    s.lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().unwrap_or(-1)
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> i32 {
    -1
}
