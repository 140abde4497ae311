//! Dual-channel state transport.
//!
//! Records travel over two paths addressed by well-known locations: the
//! unix socket (low latency, primary) and the state file (durable
//! fallback). `fetch` walks the channels in a fixed order and tags the
//! outcome, so callers and tests can see which path satisfied a read.
//! Neither path ever surfaces a missing-signal condition as an error; the
//! last resort is always the default record.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use pulselink_protocol::{now_ms, PushRequest, StateRecord, MAX_PAYLOAD_BYTES};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::BridgePaths;
use crate::error::{PulselinkError, Result};

/// Per-request socket budget. Deliberately short: a slow socket must fail
/// over to the file path, not stall the caller. Independent of the
/// validator's staleness ceiling.
pub const SOCKET_TIMEOUT_MS: u64 = 100;

/// Which transport strategy satisfied a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Socket,
    File,
    Default,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Socket => "socket",
            Channel::File => "file",
            Channel::Default => "default",
        }
    }
}

/// A fetched record together with the channel that produced it.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub record: StateRecord,
    pub channel: Channel,
}

/// Retrieves the current record: socket first, file second, default last.
///
/// Total failure of both channels is not an error; it yields the default
/// record tagged [`Channel::Default`].
pub fn fetch(paths: &BridgePaths) -> Fetched {
    match fetch_socket(paths) {
        Ok(record) => {
            return Fetched {
                record: record.sanitized(),
                channel: Channel::Socket,
            }
        }
        Err(err) => debug!(error = %err, "Socket channel unavailable, trying file"),
    }

    match read_state_file(paths) {
        Ok(record) => Fetched {
            record: record.sanitized(),
            channel: Channel::File,
        },
        Err(err) => {
            debug!(error = %err, "File channel unavailable, substituting default record");
            Fetched {
                record: StateRecord::default_unknown(now_ms()),
                channel: Channel::Default,
            }
        }
    }
}

/// Publishes a record: durable file write first (the correctness
/// backstop), then a best-effort socket push to notify a live producer.
/// Socket push failures are swallowed.
pub fn publish(paths: &BridgePaths, record: &StateRecord) -> Result<()> {
    write_state_file(paths, record)?;

    if let Err(err) = push_socket(paths, record) {
        debug!(error = %err, "Socket push failed; file channel remains authoritative");
    }
    Ok(())
}

/// Writes the record to the state file with write-then-rename semantics so
/// a concurrent reader never observes a partial document.
pub fn write_state_file(paths: &BridgePaths, record: &StateRecord) -> Result<()> {
    paths.ensure_base_dir()?;

    let content = serde_json::to_string_pretty(record)
        .map_err(|err| PulselinkError::json("serialize state record", err))?;

    let mut temp = NamedTempFile::new_in(&paths.base_dir)
        .map_err(|err| PulselinkError::io("create temp state file", err))?;
    temp.write_all(content.as_bytes())
        .map_err(|err| PulselinkError::io("write temp state file", err))?;
    temp.flush()
        .map_err(|err| PulselinkError::io("flush temp state file", err))?;
    temp.persist(&paths.state_file)
        .map_err(|err| PulselinkError::io("replace state file", err.error))?;
    Ok(())
}

/// Reads and parses the state file. A missing or unparsable file is an
/// error here; `fetch` turns it into the default record.
pub fn read_state_file(paths: &BridgePaths) -> Result<StateRecord> {
    let content = std::fs::read_to_string(&paths.state_file)
        .map_err(|err| PulselinkError::io("read state file", err))?;
    serde_json::from_str(&content).map_err(|err| PulselinkError::json("parse state file", err))
}

fn fetch_socket(paths: &BridgePaths) -> Result<StateRecord> {
    let mut stream = connect(paths)?;
    let line = read_line(&mut stream)?;
    serde_json::from_slice(&line).map_err(|err| PulselinkError::json("parse socket record", err))
}

fn push_socket(paths: &BridgePaths, record: &StateRecord) -> Result<()> {
    let mut stream = connect(paths)?;

    // Drain the greeting the daemon sends on accept before pushing.
    let _ = read_line(&mut stream)?;

    let request = PushRequest::Publish {
        record: record.clone(),
    };
    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| PulselinkError::json("serialize publish request", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| PulselinkError::io("write publish request", err))?;
    stream
        .flush()
        .map_err(|err| PulselinkError::io("flush publish request", err))?;

    // The acknowledgement is advisory; the file write already succeeded.
    let _ = read_line(&mut stream);
    Ok(())
}

fn connect(paths: &BridgePaths) -> Result<UnixStream> {
    let stream = UnixStream::connect(&paths.socket_path)
        .map_err(|err| PulselinkError::io("connect state socket", err))?;
    let timeout = Some(Duration::from_millis(SOCKET_TIMEOUT_MS));
    let _ = stream.set_read_timeout(timeout);
    let _ = stream.set_write_timeout(timeout);
    Ok(stream)
}

/// Reads one newline-delimited payload, bounded by the socket timeout and
/// the payload size limit; never hangs past the budget.
fn read_line(stream: &mut UnixStream) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_PAYLOAD_BYTES {
                    return Err(PulselinkError::io(
                        "read socket payload",
                        std::io::Error::other("payload exceeded maximum size"),
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(PulselinkError::io(
                    "read socket payload",
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "socket read timed out"),
                ));
            }
            Err(err) => return Err(PulselinkError::io("read socket payload", err)),
        }
    }

    if buffer.is_empty() {
        return Err(PulselinkError::io(
            "read socket payload",
            std::io::Error::other("empty socket payload"),
        ));
    }

    let end = buffer
        .iter()
        .position(|b| *b == b'\n')
        .unwrap_or(buffer.len());
    buffer.truncate(end);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulselink_protocol::FlowState;
    use std::os::unix::net::UnixListener;
    use tempfile::tempdir;

    fn record(stress: f64, source: &str) -> StateRecord {
        StateRecord {
            stress_index: stress,
            flow_state: FlowState::Normal,
            timestamp: now_ms(),
            ttl_seconds: 30,
            daemon_pid: 4242,
            confidence: 0.8,
            source: source.to_string(),
        }
    }

    #[test]
    fn fetch_without_socket_or_file_returns_default() {
        let temp = tempdir().unwrap();
        let paths = BridgePaths::under(temp.path());

        let fetched = fetch(&paths);
        assert_eq!(fetched.channel, Channel::Default);
        assert_eq!(fetched.record.stress_index, 0.0);
        assert_eq!(fetched.record.flow_state, FlowState::Unknown);
        assert_eq!(fetched.record.confidence, 0.0);
        assert!(!fetched.record.has_producer());
    }

    #[test]
    fn publish_then_fetch_falls_back_to_file_when_socket_absent() {
        let temp = tempdir().unwrap();
        let paths = BridgePaths::under(temp.path());

        publish(&paths, &record(0.5, "keystroke")).unwrap();

        let fetched = fetch(&paths);
        assert_eq!(fetched.channel, Channel::File);
        assert_eq!(fetched.record.stress_index, 0.5);
        assert_eq!(fetched.record.source, "keystroke");
    }

    #[test]
    fn publish_is_idempotent_on_the_file_channel() {
        let temp = tempdir().unwrap();
        let paths = BridgePaths::under(temp.path());
        let sample = record(0.3, "simulation");

        publish(&paths, &sample).unwrap();
        let first = fetch(&paths).record;
        publish(&paths, &sample).unwrap();
        let second = fetch(&paths).record;

        assert_eq!(first, second);
    }

    #[test]
    fn fetch_prefers_socket_over_file() {
        let temp = tempdir().unwrap();
        let paths = BridgePaths::under(temp.path());

        // File channel holds an older record.
        write_state_file(&paths, &record(0.9, "file-copy")).unwrap();

        let listener = UnixListener::bind(&paths.socket_path).unwrap();
        let served = record(0.2, "socket-copy");
        let served_clone = served.clone();
        let server = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut payload = serde_json::to_vec(&served_clone).unwrap();
                payload.push(b'\n');
                let _ = stream.write_all(&payload);
            }
        });

        let fetched = fetch(&paths);
        server.join().unwrap();

        assert_eq!(fetched.channel, Channel::Socket);
        assert_eq!(fetched.record.source, "socket-copy");
        assert_eq!(fetched.record.stress_index, 0.2);
    }

    #[test]
    fn garbage_on_socket_falls_back_to_file() {
        let temp = tempdir().unwrap();
        let paths = BridgePaths::under(temp.path());
        write_state_file(&paths, &record(0.4, "file-copy")).unwrap();

        let listener = UnixListener::bind(&paths.socket_path).unwrap();
        let server = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = stream.write_all(b"not json\n");
            }
        });

        let fetched = fetch(&paths);
        server.join().unwrap();

        assert_eq!(fetched.channel, Channel::File);
        assert_eq!(fetched.record.source, "file-copy");
    }

    #[test]
    fn corrupt_state_file_yields_default() {
        let temp = tempdir().unwrap();
        let paths = BridgePaths::under(temp.path());
        std::fs::write(&paths.state_file, "{truncated").unwrap();

        let fetched = fetch(&paths);
        assert_eq!(fetched.channel, Channel::Default);
        assert_eq!(fetched.record.source, "default");
    }

    #[test]
    fn fetched_records_are_clamped() {
        let temp = tempdir().unwrap();
        let paths = BridgePaths::under(temp.path());
        std::fs::write(
            &paths.state_file,
            serde_json::json!({
                "stress_index": 7.5,
                "flow_state": "STRESSED",
                "timestamp": now_ms(),
                "ttl_seconds": 30,
                "daemon_pid": 1,
                "confidence": -3.0,
                "source": "keystroke"
            })
            .to_string(),
        )
        .unwrap();

        let fetched = fetch(&paths);
        assert_eq!(fetched.channel, Channel::File);
        assert_eq!(fetched.record.stress_index, 1.0);
        assert_eq!(fetched.record.confidence, 0.0);
    }

    #[test]
    fn publish_pushes_to_a_live_socket() {
        let temp = tempdir().unwrap();
        let paths = BridgePaths::under(temp.path());

        let listener = UnixListener::bind(&paths.socket_path).unwrap();
        let server = std::thread::spawn(move || -> Option<PushRequest> {
            let (mut stream, _) = listener.accept().ok()?;
            // Greeting the daemon would normally send.
            let greeting = StateRecord::default_unknown(now_ms());
            let mut payload = serde_json::to_vec(&greeting).unwrap();
            payload.push(b'\n');
            stream.write_all(&payload).ok()?;

            let mut buffer = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        buffer.extend_from_slice(&chunk[..n]);
                        if buffer.contains(&b'\n') {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            let end = buffer.iter().position(|b| *b == b'\n')?;
            serde_json::from_slice(&buffer[..end]).ok()
        });

        publish(&paths, &record(0.6, "keystroke")).unwrap();

        match server.join().unwrap() {
            Some(PushRequest::Publish { record }) => {
                assert_eq!(record.stress_index, 0.6);
                assert_eq!(record.source, "keystroke");
            }
            other => panic!("expected publish request, got {:?}", other),
        }
    }
}
