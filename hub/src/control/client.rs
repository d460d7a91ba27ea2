// Control client - blocking request/response over the daemon's Unix socket
// Used by the claudehub CLI; every call opens a connection and handshakes first

use crate::config::Config;
use crate::control::protocol::{
    deserialize_message, serialize_message, ControlErrorCode, ControlRequest, ControlResponse,
    CONTROL_PROTOCOL_VERSION, MAX_FRAME_SIZE,
};
use anyhow::{anyhow, bail, Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

fn connect(config: &Config) -> Result<UnixStream> {
    let stream = UnixStream::connect(&config.socket_path).with_context(|| {
        format!(
            "Daemon not reachable at {} (is claudehub-daemon running?)",
            config.socket_path.display()
        )
    })?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    Ok(stream)
}

fn write_request(stream: &mut UnixStream, request: &ControlRequest) -> Result<()> {
    let bytes = serialize_message(request)?;
    stream.write_all(&bytes)?;
    stream.flush()?;
    Ok(())
}

/// Read one response line, enforcing the frame size limit
fn read_response(reader: &mut BufReader<UnixStream>) -> Result<ControlResponse> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .context("Failed to read response from daemon")?;
    if read == 0 {
        bail!("Daemon closed connection unexpectedly");
    }
    if line.len() > MAX_FRAME_SIZE {
        bail!(
            "Response frame too large: {} bytes (max {})",
            line.len(),
            MAX_FRAME_SIZE
        );
    }
    deserialize_message(line.as_bytes()).context("Failed to parse daemon response")
}

/// Send a request to the daemon and receive its response
///
/// Transport problems and a rejected handshake are errors; a request the
/// daemon refused comes back as `ControlResponse::Error`.
pub fn send_request(config: &Config, request: ControlRequest) -> Result<ControlResponse> {
    let mut stream = connect(config)?;
    let mut reader = BufReader::new(stream.try_clone()?);

    write_request(
        &mut stream,
        &ControlRequest::Handshake {
            client_version: CONTROL_PROTOCOL_VERSION,
        },
    )
    .context("Failed to send handshake")?;
    match read_response(&mut reader)? {
        ControlResponse::Handshake { .. } => {}
        ControlResponse::Error {
            code: ControlErrorCode::VersionMismatch,
            message,
        } => bail!("Protocol version mismatch: {}", message),
        other => return Err(anyhow!("Expected handshake response, got: {:?}", other)),
    }

    write_request(&mut stream, &request).context("Failed to send request")?;
    read_response(&mut reader)
}

/// True when a daemon answers on the control socket
pub fn is_daemon_responsive(config: &Config) -> bool {
    matches!(
        send_request(config, ControlRequest::Ping),
        Ok(ControlResponse::Pong)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_daemon_is_an_error() {
        let temp = TempDir::new().unwrap();
        let config = Config::rooted_at(temp.path().to_path_buf());

        let err = send_request(&config, ControlRequest::Ping).unwrap_err();
        assert!(err.to_string().contains("Daemon not reachable"));
        assert!(!is_daemon_responsive(&config));
    }
}
