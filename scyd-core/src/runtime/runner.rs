//! Runs one external command with both output streams captured line by line.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::runtime::types::{OutputStream, RunOutcome};

/// How long to wait for the output readers after the process has exited.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const ERROR_MARKERS: [&str; 3] = ["error", "failed", "cannot"];

/// Receives every captured output line, tagged with its stream.
///
/// Called from the reader tasks, so implementations must not block.
pub trait LineSink: Send + Sync + 'static {
    fn line(&self, stream: OutputStream, line: String);
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("empty argument vector")]
    EmptyCommand,

    #[error("{program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} of child process was not captured")]
    MissingPipe(OutputStream),
}

/// `true` if a stderr line looks like a failure diagnostic.
pub fn is_error_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    drain_timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_TIMEOUT)
    }
}

impl ProcessRunner {
    pub fn new(drain_timeout: Duration) -> Self {
        Self { drain_timeout }
    }

    /// Start `argv[0]` with the remaining words as arguments.
    ///
    /// No reader is started here; a spawn failure therefore never produces
    /// any output.
    pub fn spawn(&self, argv: &[String]) -> Result<RunningProcess, SpawnError> {
        let (program, args) = argv.split_first().ok_or(SpawnError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpawnError::Io { program: program.clone(), source })?;

        let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe(OutputStream::Stdout))?;
        let stderr = child.stderr.take().ok_or(SpawnError::MissingPipe(OutputStream::Stderr))?;
        debug!(program = %program, pid = ?child.id(), "process spawned");

        Ok(RunningProcess {
            child,
            stdout,
            stderr,
            drain_timeout: self.drain_timeout,
        })
    }
}

/// A spawned child whose output has not been consumed yet.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    drain_timeout: Duration,
}

enum Exit {
    Cancelled,
    Exited(ExitStatus),
    WaitFailed(io::Error),
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Stream both outputs into `sink` until the process ends or `cancel`
    /// fires, then report how it ended.
    ///
    /// Cancellation wins over any exit status observed afterwards. The outcome
    /// is only returned once both readers have drained (or the drain timeout
    /// has passed).
    pub async fn wait(mut self, cancel: &CancellationToken, sink: Arc<dyn LineSink>) -> RunOutcome {
        let captured: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let readers = [
            tokio::spawn(read_lines(self.stdout, OutputStream::Stdout, Arc::clone(&sink), None)),
            tokio::spawn(read_lines(
                self.stderr,
                OutputStream::Stderr,
                sink,
                Some(Arc::clone(&captured)),
            )),
        ];

        let exit = tokio::select! {
            biased;
            _ = cancel.cancelled() => Exit::Cancelled,
            status = self.child.wait() => match status {
                Ok(status) => Exit::Exited(status),
                Err(e) => Exit::WaitFailed(e),
            },
        };

        if matches!(exit, Exit::Cancelled | Exit::WaitFailed(_)) {
            if let Err(e) = self.child.kill().await {
                warn!(error = %e, "failed to kill child process");
            }
        }

        drain(readers, self.drain_timeout).await;

        let captured = captured.lock().unwrap_or_else(PoisonError::into_inner).take();
        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }
        match exit {
            Exit::Cancelled => RunOutcome::Cancelled,
            Exit::Exited(status) if status.success() => RunOutcome::Success,
            Exit::Exited(status) => RunOutcome::Failed {
                message: captured.unwrap_or_else(|| format!("Command failed: {status}")),
            },
            Exit::WaitFailed(e) => RunOutcome::Failed {
                message: captured.unwrap_or_else(|| format!("Command failed: {e}")),
            },
        }
    }
}

async fn read_lines<R>(
    reader: R,
    stream: OutputStream,
    sink: Arc<dyn LineSink>,
    capture: Option<Arc<Mutex<Option<String>>>>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(|c: char| c == '\n' || c == '\r')
                    .to_owned();
                if line.is_empty() {
                    continue;
                }
                if let Some(capture) = &capture {
                    if is_error_line(&line) {
                        *capture.lock().unwrap_or_else(PoisonError::into_inner) = Some(line.clone());
                    }
                }
                sink.line(stream, line);
            }
            Err(e) => {
                warn!(%stream, error = %e, "failed to read process output");
                break;
            }
        }
    }
}

async fn drain(readers: [JoinHandle<()>; 2], timeout: Duration) {
    for reader in readers {
        let abort = reader.abort_handle();
        match tokio::time::timeout(timeout, reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "output reader task failed"),
            Err(_) => {
                warn!(?timeout, "output reader did not finish in time; aborting");
                abort.abort();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(OutputStream, String)>>);

    impl LineSink for Collect {
        fn line(&self, stream: OutputStream, line: String) {
            self.0.lock().unwrap().push((stream, line));
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn classifier_matches_markers_case_insensitively() {
        assert!(is_error_line("ERROR: Unsupported URL"));
        assert!(is_error_line("postprocessing Failed"));
        assert!(is_error_line("cannot open file"));
        assert!(!is_error_line("[download]  42.0% of 3.1MiB"));
    }

    #[test]
    fn empty_argv_is_rejected() {
        let err = ProcessRunner::default().spawn(&[]).unwrap_err();
        assert!(matches!(err, SpawnError::EmptyCommand));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let err = ProcessRunner::default()
            .spawn(&["/nonexistent/scyd-test-binary".to_owned()])
            .unwrap_err();
        assert!(matches!(err, SpawnError::Io { .. }));
        assert!(err.to_string().starts_with("/nonexistent/scyd-test-binary: "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_both_streams_and_succeeds() {
        let sink = Arc::new(Collect::default());
        let process = ProcessRunner::default()
            .spawn(&sh("printf 'one\\r\\ntwo\\n'; echo 'ERROR: harmless' >&2"))
            .unwrap();
        let outcome = process.wait(&CancellationToken::new(), sink.clone()).await;

        assert_eq!(outcome, RunOutcome::Success);
        let lines = sink.0.lock().unwrap().clone();
        let stdout: Vec<_> = lines
            .iter()
            .filter(|(s, _)| *s == OutputStream::Stdout)
            .map(|(_, l)| l.as_str())
            .collect();
        assert_eq!(stdout, ["one", "two"]);
        assert!(lines.contains(&(OutputStream::Stderr, "ERROR: harmless".to_owned())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_reports_last_error_line() {
        let sink = Arc::new(Collect::default());
        let process = ProcessRunner::default()
            .spawn(&sh("echo 'ERROR: first' >&2; echo 'noise' >&2; echo 'cannot continue' >&2; exit 2"))
            .unwrap();
        let outcome = process.wait(&CancellationToken::new(), sink).await;
        assert_eq!(outcome, RunOutcome::Failed { message: "cannot continue".into() });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_without_diagnostic_uses_exit_status() {
        let sink = Arc::new(Collect::default());
        let process = ProcessRunner::default().spawn(&sh("echo quiet >&2; exit 3")).unwrap();
        match process.wait(&CancellationToken::new(), sink).await {
            RunOutcome::Failed { message } => assert!(message.starts_with("Command failed: ")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let sink = Arc::new(Collect::default());
        let cancel = CancellationToken::new();
        let process = ProcessRunner::default().spawn(&sh("echo started; exec sleep 30")).unwrap();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(10), process.wait(&cancel, sink))
            .await
            .expect("cancelled process should not run to completion");
        assert_eq!(outcome, RunOutcome::Cancelled);
    }
}
