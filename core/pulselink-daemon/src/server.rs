//! Connection handling and the daemon's in-memory state.
//!
//! The daemon is the single writer for the socket channel. On every
//! accepted connection it immediately delivers the current record as one
//! JSON line, then reads at most one optional request line (publish /
//! ingest / status) before closing.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::time::Duration;

use pulselink_core::{normalize_sample, transport, BridgePaths, PulselinkError};
use pulselink_protocol::{
    now_ms, ErrorInfo, PushRequest, PushResponse, StateRecord, StateSummary, StatusPayload,
    MAX_PAYLOAD_BYTES,
};
use tracing::{debug, warn};

const REQUEST_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Current record, guarded for the connection threads. Adopted records are
/// re-stamped with the daemon's pid and persisted to the file channel
/// before they become visible on the socket.
pub struct SharedState {
    paths: BridgePaths,
    current: Mutex<StateRecord>,
}

impl SharedState {
    pub fn new(paths: BridgePaths, initial: StateRecord) -> Self {
        SharedState {
            paths,
            current: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> StateRecord {
        match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Adopts a record as the new current state: re-stamps the producer id,
    /// clamps, persists to the file channel, then swaps it in.
    pub fn adopt(&self, mut record: StateRecord) -> Result<StateRecord, PulselinkError> {
        record.daemon_pid = std::process::id() as i64;
        let record = record.sanitized();
        transport::write_state_file(&self.paths, &record)?;
        match self.current.lock() {
            Ok(mut guard) => *guard = record.clone(),
            Err(poisoned) => *poisoned.into_inner() = record.clone(),
        }
        Ok(record)
    }
}

/// Serves one client connection end to end.
pub fn handle_connection(mut stream: UnixStream, state: &SharedState) {
    let _ = stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT));
    let _ = stream.set_write_timeout(Some(REQUEST_READ_TIMEOUT));

    // Greeting: the current record, so a plain fetch needs a single read.
    if let Err(err) = write_line(&mut stream, &state.current()) {
        debug!(error = %err, "Failed to deliver state greeting");
        return;
    }

    let line = match read_optional_line(&mut stream) {
        Some(line) => line,
        None => return,
    };

    let response = match serde_json::from_slice::<PushRequest>(&line) {
        Ok(request) => handle_request(request, state),
        Err(err) => PushResponse::error(ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )),
    };

    if let Err(err) = write_line(&mut stream, &response) {
        debug!(error = %err, "Failed to write response");
    }
}

fn handle_request(request: PushRequest, state: &SharedState) -> PushResponse {
    match request {
        PushRequest::Publish { record } => {
            debug!(source = %record.source, stress = record.stress_index, "Publish request");
            match state.adopt(record) {
                Ok(adopted) => match serde_json::to_value(StateSummary::from(&adopted)) {
                    Ok(value) => PushResponse::ok(value),
                    Err(err) => serialization_error(err),
                },
                Err(err) => {
                    warn!(error = %err, "Failed to persist published record");
                    PushResponse::error(ErrorInfo::new("persist_failed", err.to_string()))
                }
            }
        }
        PushRequest::Ingest { sample } => {
            if let Err(err) = sample.validate() {
                return PushResponse::error(err);
            }
            let record = match normalize_sample(&sample, std::process::id() as i64) {
                Ok(record) => record,
                Err(err) => {
                    return PushResponse::error(ErrorInfo::new("missing_signal", err.to_string()))
                }
            };
            debug!(source = %record.source, stress = record.stress_index, "Ingest request");
            match state.adopt(record) {
                Ok(adopted) => match serde_json::to_value(StateSummary::from(&adopted)) {
                    Ok(value) => PushResponse::ok(value),
                    Err(err) => serialization_error(err),
                },
                Err(err) => {
                    warn!(error = %err, "Failed to persist ingested record");
                    PushResponse::error(ErrorInfo::new("persist_failed", err.to_string()))
                }
            }
        }
        PushRequest::Status => {
            let payload = StatusPayload {
                daemon_running: true,
                state: state.current(),
            };
            match serde_json::to_value(payload) {
                Ok(value) => PushResponse::ok(value),
                Err(err) => serialization_error(err),
            }
        }
    }
}

fn serialization_error(err: serde_json::Error) -> PushResponse {
    PushResponse::error(ErrorInfo::new(
        "serialization_error",
        format!("Failed to serialize response: {}", err),
    ))
}

fn write_line<T: serde::Serialize>(stream: &mut UnixStream, value: &T) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, value).map_err(std::io::Error::other)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

/// Reads one request line. `None` means the client closed or stayed quiet
/// past the timeout; both end the exchange without error.
fn read_optional_line(stream: &mut UnixStream) -> Option<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_PAYLOAD_BYTES {
                    warn!("Request exceeded maximum size; dropping connection");
                    return None;
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(err) => {
                debug!(error = %err, "Request read failed");
                return None;
            }
        }
    }

    let end = buffer.iter().position(|b| *b == b'\n')?;
    buffer.truncate(end);
    if buffer.iter().all(|b| b.is_ascii_whitespace()) {
        return None;
    }
    Some(buffer)
}

/// The record the daemon announces before any signal has arrived.
pub fn initial_record() -> StateRecord {
    let mut record = StateRecord::default_unknown(now_ms());
    record.daemon_pid = std::process::id() as i64;
    record.ttl_seconds = pulselink_protocol::DEFAULT_TTL_SECONDS;
    record.source = "initialization".to_string();
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulselink_protocol::FlowState;
    use std::io::BufRead;
    use std::io::BufReader;
    use tempfile::tempdir;

    fn state_in(dir: &std::path::Path) -> SharedState {
        SharedState::new(BridgePaths::under(dir), initial_record())
    }

    fn exchange(state: &SharedState, request: Option<&str>) -> (StateRecord, Option<PushResponse>) {
        let (server_side, client_side) = UnixStream::pair().unwrap();
        let state_ref: &SharedState = state;
        std::thread::scope(|scope| {
            scope.spawn(move || handle_connection(server_side, state_ref));

            let mut client = client_side;
            let mut reader = BufReader::new(client.try_clone().unwrap());

            let mut greeting = String::new();
            reader.read_line(&mut greeting).unwrap();
            let record: StateRecord = serde_json::from_str(&greeting).unwrap();

            let response = request.map(|line| {
                client.write_all(line.as_bytes()).unwrap();
                client.write_all(b"\n").unwrap();
                client.flush().unwrap();

                let mut reply = String::new();
                reader.read_line(&mut reply).unwrap();
                serde_json::from_str(&reply).unwrap()
            });

            (record, response)
        })
    }

    #[test]
    fn greeting_delivers_current_record() {
        let temp = tempdir().unwrap();
        let state = state_in(temp.path());

        let (record, _) = exchange(&state, None);
        assert_eq!(record.source, "initialization");
        assert_eq!(record.flow_state, FlowState::Unknown);
        assert_eq!(record.daemon_pid, std::process::id() as i64);
    }

    #[test]
    fn publish_replaces_state_and_restamps_pid() {
        let temp = tempdir().unwrap();
        let state = state_in(temp.path());

        let line = serde_json::json!({
            "kind": "publish",
            "record": {
                "stress_index": 0.5,
                "flow_state": "NORMAL",
                "timestamp": now_ms(),
                "ttl_seconds": 30,
                "daemon_pid": 1,
                "confidence": 0.8,
                "source": "keystroke"
            }
        })
        .to_string();
        let (_, response) = exchange(&state, Some(&line));
        assert!(response.unwrap().ok);

        let current = state.current();
        assert_eq!(current.stress_index, 0.5);
        assert_eq!(current.daemon_pid, std::process::id() as i64);
        // Persisted on the file channel too.
        assert!(temp.path().join("state.json").exists());
    }

    #[test]
    fn ingest_normalizes_and_returns_summary() {
        let temp = tempdir().unwrap();
        let state = state_in(temp.path());

        let (_, response) = exchange(
            &state,
            Some(r#"{"kind":"ingest","sample":{"hrv":90.0,"source":"mobile_healthkit"}}"#),
        );
        let response = response.unwrap();
        assert!(response.ok);
        let summary: StateSummary = serde_json::from_value(response.data.unwrap()).unwrap();
        assert_eq!(summary.stress_index, 0.2);
        assert_eq!(summary.flow_state, FlowState::DeepFlow);
        assert_eq!(summary.source, "mobile_healthkit");
    }

    #[test]
    fn ingest_without_signals_is_rejected() {
        let temp = tempdir().unwrap();
        let state = state_in(temp.path());

        let (_, response) = exchange(&state, Some(r#"{"kind":"ingest","sample":{}}"#));
        let response = response.unwrap();
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().code, "missing_signal");
        // Rejected input must not disturb the current state.
        assert_eq!(state.current().source, "initialization");
    }

    #[test]
    fn status_reports_running_with_current_state() {
        let temp = tempdir().unwrap();
        let state = state_in(temp.path());

        let (_, response) = exchange(&state, Some(r#"{"kind":"status"}"#));
        let response = response.unwrap();
        assert!(response.ok);
        let payload: StatusPayload = serde_json::from_value(response.data.unwrap()).unwrap();
        assert!(payload.daemon_running);
        assert_eq!(payload.state.source, "initialization");
    }

    #[test]
    fn malformed_request_yields_invalid_json_error() {
        let temp = tempdir().unwrap();
        let state = state_in(temp.path());

        let (_, response) = exchange(&state, Some("{not json"));
        let response = response.unwrap();
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().code, "invalid_json");
    }
}
