/// File-date stamping through exiftool.
///
/// Once sidecars exist, exiftool copies each sidecar's
/// `photoTakenTime.timestamp` onto the file system creation and
/// modification dates of its media file. The tool runs recursively from the
/// processing root; its output is streamed line by line to the progress
/// sink.
use crate::batch::{BatchControls, BatchTotals, Operation, ProgressEvent};
use crate::error::{LifecycleError, LifecycleResult};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Program name looked up beside the executable and on `PATH`.
pub const EXIFTOOL: &str = "exiftool";

/// Arguments passed to exiftool, in order. The final `.` is the root, used
/// as the working directory.
pub const EXIFTOOL_ARGS: &[&str] = &[
    "-r",
    "-d",
    "%s",
    "-tagsfromfile",
    "%d/%F.json",
    "-FileCreateDate<PhotoTakenTimeTimestamp",
    "-FileModifyDate<PhotoTakenTimeTimestamp",
    "-ext",
    "*",
    "--ext",
    "json",
    "-overwrite_original",
    "-progress",
    ".",
];

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatestampOutcome {
    pub program: PathBuf,
    /// `None` when the process was killed, by cancellation or a signal.
    pub exit_code: Option<i32>,
    pub lines: usize,
    pub duration: Duration,
    pub cancelled: bool,
}

impl DatestampOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs exiftool against one root.
#[derive(Debug, Clone)]
pub struct Datestamper {
    root: PathBuf,
    configured_program: Option<PathBuf>,
}

impl Datestamper {
    pub fn new(root: impl Into<PathBuf>, configured_program: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            configured_program,
        }
    }

    /// The binary to run: the configured path, else exiftool next to the
    /// current executable, else `exiftool` from `PATH`.
    pub fn program(&self) -> PathBuf {
        if let Some(program) = &self.configured_program {
            return program.clone();
        }
        if let Ok(exe) = std::env::current_exe()
            && let Some(dir) = exe.parent()
        {
            let beside = dir.join(format!("{}{}", EXIFTOOL, std::env::consts::EXE_SUFFIX));
            if beside.is_file() {
                return beside;
            }
        }
        PathBuf::from(EXIFTOOL)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs the tool to completion, forwarding every stdout and stderr line.
    ///
    /// A non-zero exit status is reported in the outcome, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ToolNotFound`] when the binary does not
    /// exist and [`LifecycleError::Subprocess`] when it cannot be started
    /// or waited on.
    pub fn run(&self, controls: &BatchControls) -> LifecycleResult<DatestampOutcome> {
        let program = self.program();
        let started = Instant::now();
        info!(program = %program.display(), root = %self.root.display(), "running date stamping");

        let mut child = Command::new(&program)
            .args(EXIFTOOL_ARGS)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => LifecycleError::ToolNotFound {
                    program: program.display().to_string(),
                },
                _ => LifecycleError::Subprocess {
                    reason: format!("failed to start {}: {}", program.display(), e),
                },
            })?;

        controls.sink.emit(ProgressEvent::Started {
            operation: Operation::Datestamp,
            total: 1,
        });

        let (tx, rx) = mpsc::channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut lines = 0;
        let mut cancelled = false;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    lines += 1;
                    controls.line(line);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
            if !cancelled && controls.cancel.is_cancelled() {
                cancelled = true;
                warn!(program = %program.display(), "cancelling date stamping");
                if let Err(e) = child.kill() {
                    warn!(error = %e, "failed to stop date stamping process");
                }
            }
        }
        for reader in readers {
            let _ = reader.join();
        }

        let status = child.wait().map_err(|e| LifecycleError::Subprocess {
            reason: format!("failed to wait for {}: {}", program.display(), e),
        })?;
        let outcome = DatestampOutcome {
            program,
            exit_code: status.code(),
            lines,
            duration: started.elapsed(),
            cancelled,
        };

        let message = match outcome.exit_code {
            Some(0) => "date stamping finished".to_string(),
            Some(code) => format!("date stamping exited with code {}", code),
            None => "date stamping was terminated".to_string(),
        };
        controls.line(message);
        let succeeded = usize::from(outcome.succeeded());
        controls.sink.emit(ProgressEvent::Finished {
            operation: Operation::Datestamp,
            totals: BatchTotals {
                total: 1,
                succeeded,
                skipped: 0,
                errored: 1 - succeeded,
                duration: outcome.duration,
            },
        });
        info!(exit_code = ?outcome.exit_code, lines, cancelled, "date stamping done");
        Ok(outcome)
    }
}

/// Forwards each line of `stream` until it closes or the receiver hangs up.
fn forward_lines<R: Read + Send + 'static>(stream: R, tx: mpsc::Sender<String>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stopped reading tool output");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::CollectingSink;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_arguments_copy_sidecar_timestamp() {
        assert_eq!(EXIFTOOL_ARGS.first(), Some(&"-r"));
        assert!(EXIFTOOL_ARGS.contains(&"%d/%F.json"));
        assert!(EXIFTOOL_ARGS.contains(&"-FileModifyDate<PhotoTakenTimeTimestamp"));
        assert_eq!(EXIFTOOL_ARGS.last(), Some(&"."));
    }

    #[test]
    fn test_configured_program_wins() {
        let stamper = Datestamper::new("/photos", Some(PathBuf::from("/opt/exiftool/exiftool")));
        assert_eq!(stamper.program(), PathBuf::from("/opt/exiftool/exiftool"));
    }

    #[test]
    fn test_missing_program_is_tool_not_found() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let stamper = Datestamper::new(
            temp_dir.path(),
            Some(temp_dir.path().join("no-such-exiftool")),
        );
        assert!(matches!(
            stamper.run(&BatchControls::default()),
            Err(LifecycleError::ToolNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_streamed_and_exit_code_reported() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let script = temp_dir.path().join("fake-exiftool");
        std::fs::write(&script, "#!/bin/sh\necho \"args: $1 $2 $3\"\necho oops 1>&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let sink = Arc::new(CollectingSink::default());
        let controls = BatchControls::default().with_sink(sink.clone());
        let outcome = Datestamper::new(temp_dir.path(), Some(script))
            .run(&controls)
            .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.succeeded());
        assert_eq!(outcome.lines, 2);
        let lines = sink.lines();
        assert!(lines.contains(&"args: -r -d %s".to_string()));
        assert!(lines.contains(&"oops".to_string()));
        assert!(matches!(
            sink.events().last(),
            Some(ProgressEvent::Finished { totals, .. }) if totals.errored == 1
        ));
    }
}
