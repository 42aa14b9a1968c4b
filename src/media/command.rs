use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};

use super::DetectError;

/// Runs an external tool and returns its stdout, killing it if it outlives
/// `timeout`. A non-zero exit is reported as an error.
pub(crate) fn run_captured(program: &str, args: &[&str], timeout: Duration) -> Result<String, DetectError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| DetectError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill();
        return Err(DetectError::Malformed(format!("no stdout handle for `{}`", program)));
    };

    // Reader thread finishes once the child closes its stdout
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = stdout.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send(result);
    });

    let bytes = match rx.recv_timeout(timeout) {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DetectError::Os(e.to_string()));
        }
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DetectError::Timeout(program.to_string(), timeout));
        }
    };

    let status = child.wait().map_err(|e| DetectError::Os(e.to_string()))?;
    if !status.success() {
        return Err(DetectError::ExitStatus(program.to_string(), status));
    }

    String::from_utf8(bytes).map_err(|_| DetectError::Utf8(program.to_string()))
}
