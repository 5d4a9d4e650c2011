//! Running terraform against a checked-out tree.
//!
//! Every invocation names its working directory explicitly on the child
//! process. The tellus process never changes its own current directory, so
//! runs for different repositories can proceed concurrently without seeing
//! each other's trees.
//!
//! A nonzero exit is not an error here: it is a normal outcome that gets
//! reported back to GitHub with terraform's own output. The only things that
//! turn into "could not initialize terraform" are a missing directory, a
//! missing binary, and a failed `terraform init`.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::types::CommandKind;

/// Output reported when terraform could not be started or initialised.
pub const INIT_FAILURE: &str = "could not initialize terraform";

/// Default upper bound on one run (init plus plan/apply).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How long terraform gets to stop after an interrupt before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(20);

const INIT_ARGS: &[&str] = &["init", "-input=false", "-no-color"];

/// The outcome of a terraform run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// stdout and stderr, interleaved in the order lines arrived.
    pub output: String,
    /// True iff the command exited with status 0.
    pub success: bool,
}

impl ExecutionResult {
    fn failed(output: impl Into<String>) -> Self {
        ExecutionResult {
            output: output.into(),
            success: false,
        }
    }

    fn init_failed(detail: &str) -> Self {
        if detail.is_empty() {
            Self::failed(INIT_FAILURE)
        } else {
            Self::failed(format!("{INIT_FAILURE}\n\n{detail}"))
        }
    }
}

/// Runs a terraform command in a directory.
///
/// The pipeline is generic over this trait so it can be exercised without a
/// terraform binary.
pub trait Executor {
    /// Runs `kind` in `workdir`. Never fails; problems are reported in the
    /// result.
    fn run(
        &self,
        kind: CommandKind,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> impl Future<Output = ExecutionResult> + Send;
}

/// How a single child process ended.
enum Finished {
    Exited { status: ExitStatus, output: String },
    TimedOut { output: String },
    Cancelled { output: String },
}

enum Stop {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Executes the terraform CLI as a subprocess.
#[derive(Debug, Clone)]
pub struct TerraformRunner {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
    grace_period: Duration,
}

impl Default for TerraformRunner {
    fn default() -> Self {
        TerraformRunner {
            program: PathBuf::from("terraform"),
            leading_args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl TerraformRunner {
    /// Creates a runner that invokes `program`, found on `PATH` if relative.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        TerraformRunner {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Sets arguments passed before terraform's own, for wrappers such as
    /// `aws-vault exec prod -- terraform`.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    /// Sets the upper bound on one run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how long an interrupted run may take to stop before it is killed.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Returns the configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `terraform init` followed by `kind` in `workdir`.
    #[instrument(skip_all, fields(command = %kind, dir = %workdir.display()))]
    pub async fn execute(
        &self,
        kind: CommandKind,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        if !workdir.is_dir() {
            warn!("Terraform directory does not exist");
            return ExecutionResult::failed(INIT_FAILURE);
        }

        let deadline = Instant::now() + self.timeout;

        match self.run_step(INIT_ARGS, workdir, deadline, cancel).await {
            Ok(Finished::Exited { status, .. }) if status.success() => {
                debug!("terraform init succeeded");
            }
            Ok(Finished::Exited { status, output }) => {
                warn!(status = %status, "terraform init failed");
                return ExecutionResult::init_failed(&output);
            }
            Ok(Finished::TimedOut { output }) => {
                warn!("terraform init timed out");
                return ExecutionResult::init_failed(&self.timed_out_message("init", output));
            }
            Ok(Finished::Cancelled { output }) => {
                return ExecutionResult::init_failed(&cancelled_message("init", output));
            }
            Err(e) => {
                warn!(error = %e, program = %self.program.display(), "Could not start terraform");
                return ExecutionResult::failed(INIT_FAILURE);
            }
        }

        let result = match self.run_step(kind.args(), workdir, deadline, cancel).await {
            Ok(Finished::Exited { status, output }) => ExecutionResult {
                output,
                success: status.success(),
            },
            Ok(Finished::TimedOut { output }) => {
                ExecutionResult::failed(self.timed_out_message(kind.as_str(), output))
            }
            Ok(Finished::Cancelled { output }) => {
                ExecutionResult::failed(cancelled_message(kind.as_str(), output))
            }
            // init just ran with the same program, so this is rare.
            Err(e) => ExecutionResult::failed(format!("could not run terraform {kind}: {e}")),
        };

        info!(success = result.success, "terraform {} finished", kind);
        result
    }

    /// Spawns one terraform subcommand and collects its output until it
    /// exits, the deadline passes, or `cancel` fires.
    async fn run_step(
        &self,
        args: &[&str],
        workdir: &Path,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> io::Result<Finished> {
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .current_dir(workdir)
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut streams = OutputStreams::take(&mut child);
        let mut output = String::new();

        let stop = {
            let work = async {
                streams.collect(&mut output).await;
                child.wait().await
            };

            tokio::select! {
                waited = tokio::time::timeout_at(deadline, work) => match waited {
                    Ok(status) => Stop::Exited(status),
                    Err(_) => Stop::TimedOut,
                },
                _ = cancel.cancelled() => Stop::Cancelled,
            }
        };

        match stop {
            Stop::Exited(status) => Ok(Finished::Exited {
                status: status?,
                output,
            }),
            Stop::TimedOut => {
                self.stop(&mut child, &mut streams, &mut output).await;
                Ok(Finished::TimedOut { output })
            }
            Stop::Cancelled => {
                self.stop(&mut child, &mut streams, &mut output).await;
                Ok(Finished::Cancelled { output })
            }
        }
    }

    /// Interrupts the child so terraform can release its state lock, keeps
    /// collecting its output for the grace period, then kills it.
    async fn stop(&self, child: &mut Child, streams: &mut OutputStreams, output: &mut String) {
        if interrupt(child) {
            let drained = async {
                streams.collect(output).await;
                child.wait().await
            };
            if tokio::time::timeout(self.grace_period, drained).await.is_ok() {
                return;
            }
            warn!(
                grace_secs = self.grace_period.as_secs(),
                "terraform did not stop after interrupt, killing"
            );
        }

        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Child already exited");
        }
        // Reap so the process does not linger as a zombie.
        let _ = child.wait().await;
    }

    fn timed_out_message(&self, step: &str, mut output: String) -> String {
        push_line(
            &mut output,
            &format!(
                "terraform {step} timed out after {}s",
                self.timeout.as_secs()
            ),
        );
        output
    }
}

impl Executor for TerraformRunner {
    async fn run(
        &self,
        kind: CommandKind,
        workdir: &Path,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        self.execute(kind, workdir, cancel).await
    }
}

fn cancelled_message(step: &str, mut output: String) -> String {
    push_line(&mut output, &format!("terraform {step} was cancelled"));
    output
}

fn push_line(output: &mut String, line: &str) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(line);
}

/// Sends SIGINT, terraform's graceful stop. Returns false if nothing was sent.
#[cfg(unix)]
fn interrupt(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: `pid` is our own unreaped child, so it cannot have been reused.
    let sent = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) } == 0;
    if !sent {
        debug!(pid, error = %io::Error::last_os_error(), "Could not interrupt terraform");
    }
    sent
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) -> bool {
    false
}

/// The child's output pipes with any partially read lines.
///
/// Kept outside the collecting future so reading can resume while an
/// interrupted child shuts down. A closed pipe would kill it with SIGPIPE.
struct OutputStreams {
    out: Option<BufReader<ChildStdout>>,
    err: Option<BufReader<ChildStderr>>,
    out_line: Vec<u8>,
    err_line: Vec<u8>,
}

impl OutputStreams {
    fn take(child: &mut Child) -> Self {
        OutputStreams {
            out: child.stdout.take().map(BufReader::new),
            err: child.stderr.take().map(BufReader::new),
            out_line: Vec::new(),
            err_line: Vec::new(),
        }
    }

    /// Reads stdout and stderr concurrently, appending whole lines to
    /// `output` in the order they arrive. Safe to cancel and call again.
    async fn collect(&mut self, output: &mut String) {
        loop {
            tokio::select! {
                done = read_line(self.out.as_mut(), &mut self.out_line), if self.out.is_some() => {
                    if done {
                        self.out = None;
                    }
                    flush_line(&mut self.out_line, output);
                }
                done = read_line(self.err.as_mut(), &mut self.err_line), if self.err.is_some() => {
                    if done {
                        self.err = None;
                    }
                    flush_line(&mut self.err_line, output);
                }
                else => break,
            }
        }
    }
}

/// Reads one line into `buf`. Returns true at end of stream or on a read error.
async fn read_line<R>(reader: Option<&mut BufReader<R>>, buf: &mut Vec<u8>) -> bool
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => !matches!(reader.read_until(b'\n', buf).await, Ok(n) if n > 0),
        None => true,
    }
}

fn flush_line(buf: &mut Vec<u8>, output: &mut String) {
    if buf.is_empty() {
        return;
    }
    output.push_str(&String::from_utf8_lossy(buf));
    if !output.ends_with('\n') {
        output.push('\n');
    }
    buf.clear();
}
