use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

const STATUS_ATTEMPTS: usize = 5;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One newline-delimited JSON request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workshop: Option<String>,
}

impl DaemonRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            workshop: None,
        }
    }

    pub fn reconcile(workshop: &str) -> Self {
        Self {
            cmd: "reconcile".to_string(),
            workshop: Some(workshop.to_string()),
        }
    }
}

/// One newline-delimited JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// The payload of a successful response; a failed one becomes `Protocol`.
    pub fn into_data(self) -> Result<Value, DaemonError> {
        match (self.ok, self.error) {
            (true, _) => Ok(self.data.unwrap_or(Value::Null)),
            (false, Some(message)) => Err(DaemonError::Protocol(message)),
            (false, None) => Err(DaemonError::Protocol("daemon reported a failure without a message".into())),
        }
    }
}

/// Send one request to the daemon socket and read one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    let not_running = || DaemonError::DaemonNotRunning { socket: socket.clone() };

    let mut stream = match UnixStream::connect(&socket) {
        Ok(stream) => stream,
        Err(err) => {
            return Err(match err.kind() {
                ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => not_running(),
                _ => io_err(&socket, err),
            })
        }
    };

    let mut frame = serde_json::to_vec(request)?;
    frame.push(b'\n');
    stream.write_all(&frame).map_err(|e| io_err(&socket, e))?;

    let mut reply = String::new();
    match BufReader::new(stream).read_line(&mut reply) {
        Ok(0) => Err(DaemonError::Protocol("daemon hung up without a response".into())),
        Ok(_) => Ok(serde_json::from_str(reply.trim_end())?),
        Err(err) => Err(io_err(&socket, err)),
    }
}

/// `status`, retried briefly so a just-started daemon has time to bind.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::command("status");
    for _ in 1..STATUS_ATTEMPTS {
        match send_request(home, &request) {
            Err(DaemonError::DaemonNotRunning { .. }) => sleep(STATUS_RETRY_DELAY),
            other => return other?.into_data(),
        }
    }
    send_request(home, &request)?.into_data()
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    send_request(home, &DaemonRequest::command("stop"))?.into_data().map(drop)
}

/// Ask the daemon to schedule one tick for `workshop`. Returns once the
/// request is queued, not when the tick finishes.
pub fn request_reconcile(home: &Path, workshop: &str) -> Result<Value, DaemonError> {
    send_request(home, &DaemonRequest::reconcile(workshop))?.into_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reconcile_request_carries_workshop() {
        let encoded = serde_json::to_string(&DaemonRequest::reconcile("ocp-dev")).expect("encode");
        assert_eq!(encoded, r#"{"cmd":"reconcile","workshop":"ocp-dev"}"#);
        let status = serde_json::to_string(&DaemonRequest::command("status")).expect("encode");
        assert_eq!(status, r#"{"cmd":"status"}"#);
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = TempDir::new().expect("home");
        let err = request_stop(home.path()).expect_err("no daemon");
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = DaemonResponse::error("unknown workshop 'x'").into_data().expect_err("error");
        assert_eq!(err.to_string(), "daemon protocol error: unknown workshop 'x'");
    }
}
