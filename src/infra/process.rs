//! Blocking subprocess execution bounded by a wall-clock timeout.

use std::{
    io::{ErrorKind, Read, Write},
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::application::renderer::RendererError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const STDERR_LIMIT: usize = 2_048;

#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Runs `command` to completion, feeding `stdin` when given. The child is
/// killed once `timeout` elapses.
pub fn run(
    mut command: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<ProcessOutput, RendererError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let started = Instant::now();

    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|err| {
        warn!(
            target = "application::process",
            op = "process::run",
            result = "error",
            error_code = "spawn",
            command = %program,
            error = %err,
            "Failed to spawn renderer process"
        );
        if err.kind() == ErrorKind::NotFound {
            RendererError::command_not_found(program.clone())
        } else {
            RendererError::Spawn {
                command: program.clone(),
                source: err,
            }
        }
    })?;

    let writer = stdin.zip(child.stdin.take()).map(|(input, mut pipe)| {
        let input = input.to_vec();
        thread::spawn(move || {
            // A child that exits early closes the pipe; its exit status tells the story.
            let _ = pipe.write_all(&input);
        })
    });
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match wait_with_deadline(&mut child, started, timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!(
                target = "application::process",
                op = "process::run",
                result = "timeout",
                command = %program,
                elapsed_ms = started.elapsed().as_millis() as u64,
                timeout_ms = timeout.as_millis() as u64,
                "Renderer process exceeded its time budget"
            );
            return Err(RendererError::Timeout { after: timeout });
        }
        Err(err) => return Err(RendererError::Io(err)),
    };

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    let stdout = collect(stdout);
    let stderr = truncate(&String::from_utf8_lossy(&collect(stderr)));
    let elapsed = started.elapsed();

    if !status.success() {
        warn!(
            target = "application::process",
            op = "process::run",
            result = "error",
            command = %program,
            exit_code = status.code().map(i64::from).unwrap_or(-1),
            elapsed_ms = elapsed.as_millis() as u64,
            stderr = %stderr,
            "Renderer process failed"
        );
        return Err(RendererError::ProcessFailed {
            exit_code: status.code(),
            stderr,
        });
    }

    debug!(
        target = "application::process",
        op = "process::run",
        result = "success",
        command = %program,
        stdout_bytes = stdout.len(),
        elapsed_ms = elapsed.as_millis() as u64,
    );
    Ok(ProcessOutput { stdout, stderr, elapsed })
}

/// `Ok(None)` means the deadline passed and the child was killed.
fn wait_with_deadline(
    child: &mut Child,
    started: Instant,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|handle| handle.join().ok()).unwrap_or_default()
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_LIMIT {
        return trimmed.to_string();
    }
    let mut end = STDERR_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn captures_stdout_and_feeds_stdin() {
        let output = run(sh("tr a-z A-Z"), Some(b"graph"), Duration::from_secs(5)).unwrap();
        assert_eq!(output.stdout, b"GRAPH");
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let err = run(sh("echo boom >&2; exit 42"), None, Duration::from_secs(5)).unwrap_err();
        match err {
            RendererError::ProcessFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(42));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn slow_processes_are_killed() {
        let started = Instant::now();
        let err = run(sh("sleep 5"), None, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, RendererError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_binaries_map_to_command_not_found() {
        let err = run(
            Command::new("/nonexistent/diagram-relay-test-binary"),
            None,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, RendererError::CommandNotFound { .. }));
    }
}
