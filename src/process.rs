//! Bounded execution of external capture and detection programs.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

const POLL_STEP: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("i/o error talking to {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
}

/// Run `program` with `args`, feeding `input` on stdin, and return its stdout.
///
/// The child is killed once `timeout` elapses. A non-zero exit status is an error.
pub fn run_with_timeout(
    program: &str,
    args: &[String],
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<Vec<u8>, ProcessError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let writer = match (input, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => {
            let bytes = bytes.to_vec();
            Some(std::thread::spawn(move || {
                // Broken pipe just means the program stopped reading early.
                let _ = stdin.write_all(&bytes);
            }))
        }
        _ => None,
    };
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now().checked_add(timeout);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if deadline.is_some_and(|deadline| Instant::now() >= deadline) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
            Ok(None) => std::thread::sleep(POLL_STEP),
            Err(source) => {
                let _ = child.kill();
                return Err(ProcessError::Io {
                    program: program.to_string(),
                    source,
                });
            }
        }
    };

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    let stdout = join_reader(stdout);
    let stderr = join_reader(stderr);

    if !status.success() {
        return Err(ProcessError::Failed {
            program: program.to_string(),
            status,
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        });
    }
    Ok(stdout)
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_stdout() {
        let out = run_with_timeout("sh", &sh("printf frame"), None, Duration::from_secs(5)).unwrap();
        assert_eq!(out, b"frame");
    }

    #[test]
    fn pipes_stdin() {
        let out = run_with_timeout("cat", &[], Some(b"jpeg"), Duration::from_secs(5)).unwrap();
        assert_eq!(out, b"jpeg");
    }

    #[test]
    fn kills_on_timeout() {
        let started = Instant::now();
        let err = run_with_timeout("sleep", &["5".to_string()], None, Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn reports_failures_and_missing_programs() {
        let err = run_with_timeout("sh", &sh("echo boom >&2; exit 3"), None, Duration::from_secs(5))
            .unwrap_err();
        match err {
            ProcessError::Failed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
        let err = run_with_timeout("/nonexistent/parkcam-capture", &[], None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
