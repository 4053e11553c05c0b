use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Buffered lines per process before the reader task backpressures.
const LINE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Empty command line")]
    EmptyCommand,

    /// Binary missing, not executable, or otherwise unstartable.
    #[error("Failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Child process has no stdout pipe")]
    MissingStdout,
}

/// How a spawned process ended. Delivered exactly once per process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited on its own; `None` means killed by a signal.
    Natural(Option<i32>),
    /// The caller requested a stop before natural exit.
    Stopped,
}

/// A successfully spawned external process.
///
/// Lines arrive complete; a final unterminated line is flushed when the child's
/// stdout closes. Cancelling the token kills the child and resolves the exit
/// signal with [`ProcessExit::Stopped`]; cancelling twice or after exit is a
/// no-op.
#[derive(Debug)]
pub struct RunningProcess {
    pub pid: u32,
    pub lines: mpsc::Receiver<String>,
    pub exit: oneshot::Receiver<ProcessExit>,
    cancel: CancellationToken,
}

impl RunningProcess {
    /// Token that stops this process when cancelled. Safe to cancel repeatedly.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawns `argv` with piped stdout and starts the line pump task.
    ///
    /// Fails immediately with [`ProcessError::Spawn`] when the binary cannot be
    /// started; no stream or child is left behind in that case.
    pub fn start(argv: &[String]) -> Result<RunningProcess, ProcessError> {
        let (binary, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;

        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                binary: binary.clone(),
                source: e,
            })?;

        let pid = child.id().unwrap_or_default();
        let stdout = child.stdout.take().ok_or(ProcessError::MissingStdout)?;
        info!("Spawned '{}' (pid {})", binary, pid);

        let cancel = CancellationToken::new();
        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(pump_process(child, stdout, cancel.clone(), line_tx, exit_tx));

        Ok(RunningProcess {
            pid,
            lines: line_rx,
            exit: exit_rx,
            cancel,
        })
    }
}

/// Reads stdout line by line until EOF or cancellation, then reaps the child
/// and reports how it ended.
async fn pump_process(
    mut child: Child,
    stdout: ChildStdout,
    cancel: CancellationToken,
    line_tx: mpsc::Sender<String>,
    exit_tx: oneshot::Sender<ProcessExit>,
) {
    let pid = child.id().unwrap_or_default();
    let mut reader = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Stop requested for pid {}, killing child", pid);
                if let Err(e) = child.start_kill() {
                    debug!("Kill for pid {} failed (already gone?): {}", pid, e);
                }
                let _ = child.wait().await;
                let _ = exit_tx.send(ProcessExit::Stopped);
                return;
            }
            next = reader.next_line() => {
                match next {
                    Ok(Some(line)) => {
                        if line_tx.send(line).await.is_err() {
                            // Receiver gone; nobody is listening anymore.
                            debug!("Line receiver for pid {} dropped", pid);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Error reading stdout of pid {}: {}", pid, e);
                        break;
                    }
                }
            }
        }
    }

    // Stdout closed; reap the child. A stop racing in here still counts as a
    // natural exit since the process already finished its output.
    let exit = match child.wait().await {
        Ok(status) => {
            debug!("Process {} exited with {:?}", pid, status.code());
            ProcessExit::Natural(status.code())
        }
        Err(e) => {
            warn!("Failed to wait on pid {}: {}", pid, e);
            ProcessExit::Natural(None)
        }
    };
    let _ = exit_tx.send(exit);
}
