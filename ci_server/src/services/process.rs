//! Subprocess execution: run a command in a directory, capture combined
//! output, get the exit status.
//!
//! A step is finished when its own process exits, not when its pipes close.
//!
//! The executor only talks to [`ProcessRunner`], so tests can swap in
//! scripted processes (see [`crate::fakes::ScriptedRunner`]).

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::models::build::BuildStep;

/// One subprocess invocation.
#[derive(Debug, Clone)]
pub struct StepCommand {
    pub step: BuildStep,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl StepCommand {
    /// Command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What a finished (or killed) subprocess left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    /// stdout and stderr interleaved in arrival order.
    pub output: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `cmd` to completion or until its timeout.
    ///
    /// Errors only when the process could not be started or waited on; a
    /// non-zero exit is a normal [`CommandOutput`].
    async fn run(&self, cmd: &StepCommand) -> io::Result<CommandOutput>;
}

/// How long to keep reading output after the step's own process has exited.
/// Anything it left running in the background is killed afterwards.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Runs real processes with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

enum ExitReason {
    Completed(ExitStatus),
    TimedOut,
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, cmd: &StepCommand) -> io::Result<CommandOutput> {
        let mut std_command = std::process::Command::new(&cmd.program);
        std_command
            .args(&cmd.args)
            .current_dir(&cmd.cwd)
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so a timeout takes down everything the step spawned.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut std_command, 0);

        let mut command = Command::from(std_command);
        command.kill_on_drop(true);

        let mut child = command.spawn()?;
        let pid = child.id();

        // One reader per stream; chunks are merged in arrival order.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone()));
        }
        drop(tx);

        let mut output = Vec::new();
        let deadline = Instant::now() + cmd.timeout;

        let exit = loop {
            tokio::select! {
                status = child.wait() => break ExitReason::Completed(status?),
                Some(chunk) = rx.recv() => output.extend_from_slice(&chunk),
                _ = tokio::time::sleep_until(deadline) => break ExitReason::TimedOut,
            }
        };

        if let ExitReason::TimedOut = exit {
            tracing::warn!(
                step = %cmd.step,
                command = %cmd.display(),
                timeout_secs = cmd.timeout.as_secs(),
                "Step timed out, killing process group"
            );
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            let _ = child.kill().await;
        }

        // Pick up what is still buffered in the pipes.
        let drain_until = Instant::now() + DRAIN_GRACE;
        let mut drained = false;
        loop {
            match tokio::time::timeout_at(drain_until, rx.recv()).await {
                Ok(Some(chunk)) => output.extend_from_slice(&chunk),
                Ok(None) => {
                    drained = true;
                    break;
                }
                Err(_) => break,
            }
        }
        if !drained {
            // Background processes still hold the pipes.
            tracing::debug!(step = %cmd.step, "Killing processes left behind by step");
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            for reader in &readers {
                reader.abort();
            }
        }

        let output = String::from_utf8_lossy(&output).into_owned();
        Ok(match exit {
            ExitReason::Completed(status) => CommandOutput {
                exit_code: status.code(),
                output,
                timed_out: false,
            },
            ExitReason::TimedOut => CommandOutput {
                exit_code: None,
                output,
                timed_out: true,
            },
        })
    }
}

fn spawn_reader<R>(stream: R, tx: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        loop {
            let mut chunk = Vec::new();
            match reader.read_until(b'\n', &mut chunk).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("error reading step output: {e}");
                    break;
                }
            }
        }
    })
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // SAFETY: killpg only sends a signal; the group was created for this child.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(pid, "killpg failed: {}", io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
