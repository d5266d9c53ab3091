//! Spawns and drives the `cdb.exe` child process: stdio redirection, an
//! ordered stdout+stderr line stream, and graceful-then-forced shutdown.
//! Grounded on `csa_process`'s `spawn_tool_with_pre_exec` /
//! `kill_child_process_group`.

use std::path::PathBuf;
use std::time::Duration;

use cdbg_config::ProcessConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::warn;

use crate::locate::{self, NotFound};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("failed to spawn debugger process: {0}")]
    SpawnFailed(String),

    #[error("debugger process is not running")]
    NotRunning,

    #[error("io error writing to debugger stdin: {0}")]
    Io(String),
}

/// Arguments for starting a debugger session against a dump file, per the
/// `start(dump_path, symbol_path?, extra_args)` contract.
#[derive(Debug, Clone)]
pub struct SpawnArgs {
    pub dump_path: PathBuf,
    pub symbol_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl SpawnArgs {
    pub fn new(dump_path: impl Into<PathBuf>) -> Self {
        Self {
            dump_path: dump_path.into(),
            symbol_path: None,
            extra_args: Vec::new(),
        }
    }

    fn into_command_args(self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(symbol_path) = self.symbol_path {
            args.push("-y".to_string());
            args.push(symbol_path.display().to_string());
        }
        args.extend(self.extra_args);
        args.push("-z".to_string());
        args.push(self.dump_path.display().to_string());
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct Line {
    pub text: String,
    pub source: LineSource,
}

/// A running `cdb.exe` child process with stdin write access and a merged
/// stdout+stderr line stream, delivered in arrival order.
pub struct DebuggerAdapter {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: mpsc::Receiver<Line>,
}

impl DebuggerAdapter {
    /// Locate the debugger executable and spawn it against a dump file.
    pub async fn start(config: &ProcessConfig, args: SpawnArgs) -> Result<Self, ProcessError> {
        let executable = locate::locate_debugger(config)?;

        let mut cmd = Command::new(executable);
        cmd.args(args.into_command_args());
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        // SAFETY: setsid() is async-signal-safe and only runs between fork and exec.
        #[cfg(unix)]
        unsafe {
            use std::os::unix::process::CommandExt;
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(e.to_string()))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::channel(256);
        spawn_line_reader(stdout, LineSource::Stdout, tx.clone());
        spawn_line_reader(stderr, LineSource::Stderr, tx);

        Ok(Self {
            child,
            stdin,
            lines: rx,
        })
    }

    /// Write a single line to the child's stdin, appending the newline.
    pub async fn write_line(&mut self, line: &str) -> Result<(), ProcessError> {
        let stdin = self.stdin.as_mut().ok_or(ProcessError::NotRunning)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProcessError::Io(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ProcessError::Io(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| ProcessError::Io(e.to_string()))
    }

    /// Await the next line of merged stdout+stderr output. Returns `None`
    /// once both streams have reached EOF.
    pub async fn next_line(&mut self) -> Option<Line> {
        self.lines.recv().await
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking liveness check: `true` unless the child has already
    /// exited and been reaped.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the debugger to quit cleanly (`q`), waiting up to `grace` before
    /// force-killing the whole process group.
    pub async fn quit_then_kill(&mut self, grace: Duration) {
        let _ = self.write_line("q").await;
        self.stdin = None;

        if tokio::time::timeout(grace, self.child.wait()).await.is_ok() {
            return;
        }

        warn!(pid = ?self.pid(), "debugger did not quit within grace period, killing");
        kill_process_group(&mut self.child);
    }
}

impl Drop for DebuggerAdapter {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            warn!(pid = ?self.child.id(), "dropping debugger adapter with process still running");
        }
    }
}

fn spawn_line_reader<R>(reader: R, source: LineSource, tx: mpsc::Sender<Line>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(text)) => {
                    if tx.send(Line { text, source }).await.is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    });
}

fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: kill() is async-signal-safe; negative pid targets the group.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
            return;
        }
    }
    let _ = child.start_kill();
}
