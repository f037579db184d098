//! Length-prefixed framing over a blocking `TcpStream`.
//!
//! Wire format: a 4-byte big-endian length `L` followed by exactly `L`
//! payload bytes. Zero-length messages are legal and are delivered as
//! `Ok(Some(vec![]))`, distinct from a clean close before any header bytes
//! arrive (`Ok(None)`). A close mid-message is an error.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::TransportError;

/// Payloads larger than this fail fast, before any allocation.
pub const MAX_PAYLOAD_BYTES: u32 = 10 * 1024 * 1024;

const HEADER_LEN: usize = 4;
const MAX_CONNECT_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 200;

/// A single framed connection. Blocking, single-connection-per-call: a
/// worker thread owns one `FramedConnection` for its whole lifetime.
pub struct FramedConnection {
    stream: TcpStream,
}

impl FramedConnection {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn try_clone(&self) -> std::io::Result<Self> {
        Ok(Self {
            stream: self.stream.try_clone()?,
        })
    }

    /// Write the 4-byte header then the full payload. Retries partial
    /// writes internally; `Interrupted` errors are retried silently.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let len = payload.len() as u32;
        let header = len.to_be_bytes();
        write_all_retrying(&mut self.stream, &header)?;
        write_all_retrying(&mut self.stream, payload)?;
        Ok(())
    }

    /// Read exactly one framed message.
    ///
    /// - `Ok(None)`: the peer closed cleanly before any header byte arrived.
    /// - `Ok(Some(bytes))`: a complete message, possibly empty.
    /// - `Err(_)`: a close (or other I/O error) in the middle of a message,
    ///   or a payload length over [`MAX_PAYLOAD_BYTES`].
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut header = [0u8; HEADER_LEN];
        match read_exact_or_clean_eof(&mut self.stream, &mut header)? {
            ReadOutcome::CleanEof => return Ok(None),
            ReadOutcome::Filled => {}
        }
        let len = u32::from_be_bytes(header);
        if len > MAX_PAYLOAD_BYTES {
            warn!(len, "rejecting oversized payload before allocating");
            return Err(TransportError::PayloadTooLarge(len));
        }
        let mut payload = vec![0u8; len as usize];
        self.stream
            .read_exact(&mut payload)
            .map_err(|e| classify_mid_message(e))?;
        Ok(Some(payload))
    }
}

enum ReadOutcome {
    CleanEof,
    Filled,
}

/// Like `Read::read_exact`, but distinguishes "zero bytes read, peer closed
/// cleanly" from any other outcome.
fn read_exact_or_clean_eof(
    stream: &mut TcpStream,
    buf: &mut [u8],
) -> Result<ReadOutcome, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(ReadOutcome::CleanEof);
                }
                return Err(TransportError::ClosedMidMessage);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
    Ok(ReadOutcome::Filled)
}

fn classify_mid_message(e: std::io::Error) -> TransportError {
    if e.kind() == ErrorKind::UnexpectedEof {
        TransportError::ClosedMidMessage
    } else {
        TransportError::Io(e)
    }
}

fn write_all_retrying(stream: &mut TcpStream, mut buf: &[u8]) -> Result<(), TransportError> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => return Err(TransportError::ClosedMidMessage),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
    Ok(())
}

/// Connect with up to 5 attempts and `200ms * 2^attempt` exponential
/// backoff. Never panics; exhaustion is returned as an error, not thrown.
pub fn connect_with_retry(host: &str, port: u16) -> Result<FramedConnection, TransportError> {
    let mut last_err = None;
    for attempt in 0..MAX_CONNECT_ATTEMPTS {
        match TcpStream::connect((host, port)) {
            Ok(stream) => return Ok(FramedConnection::new(stream)),
            Err(e) => {
                debug!(host, port, attempt, error = %e, "connect attempt failed");
                last_err = Some(e);
                if attempt + 1 < MAX_CONNECT_ATTEMPTS {
                    let backoff = BASE_BACKOFF_MS * (1u64 << attempt);
                    std::thread::sleep(Duration::from_millis(backoff));
                }
            }
        }
    }
    let _ = last_err;
    Err(TransportError::ConnectRetriesExhausted(
        MAX_CONNECT_ATTEMPTS,
        host.to_string(),
        port,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn loopback_pair() -> (FramedConnection, FramedConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (FramedConnection::new(client), FramedConnection::new(server))
    }

    #[test]
    fn round_trips_a_message() {
        let (mut client, mut server) = loopback_pair();
        client.send(b"hello").unwrap();
        assert_eq!(server.receive().unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn zero_length_payload_is_not_eof() {
        let (mut client, mut server) = loopback_pair();
        client.send(&[]).unwrap();
        assert_eq!(server.receive().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn clean_close_before_header_is_none() {
        let (client, mut server) = loopback_pair();
        drop(client);
        assert_eq!(server.receive().unwrap(), None);
    }

    #[test]
    fn oversized_length_fails_fast() {
        let (mut client, mut server) = loopback_pair();
        // Write a header claiming a payload bigger than the limit, then
        // nothing else -- receive() must reject before trying to read it.
        let header = (MAX_PAYLOAD_BYTES + 1).to_be_bytes();
        write_all_retrying(&mut client.stream, &header).unwrap();
        assert!(matches!(
            server.receive(),
            Err(TransportError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn round_trip_preserves_embedded_nul_and_pipe_bytes() {
        let (mut client, mut server) = loopback_pair();
        let payload = vec![0u8, b'|', 1, 2, 3, b'|', 0u8];
        client.send(&payload).unwrap();
        assert_eq!(server.receive().unwrap(), Some(payload));
    }
}
