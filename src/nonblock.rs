use std::io::{Error, ErrorKind, Read, Write};
use std::net::TcpStream;

/// Outcome of a single non-blocking read or write attempt.
pub enum IoStatus {
    /// The operation transferred this many bytes (possibly fewer than asked).
    Success(usize),
    /// The socket is not ready; retry on the next readiness event.
    WouldBlock,
    /// The peer has gone away: end-of-stream on read, or a disconnect-kind
    /// error on write.
    Shutdown,
    /// Any other I/O error.
    Err(Error),
}

pub trait ReadNonblocking: Read {
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> IoStatus {
        match self.read(buf) {
            // An orderly end-of-stream: the peer closed its write side.
            Ok(0) if !buf.is_empty() => IoStatus::Shutdown,
            Ok(len) => IoStatus::Success(len),
            Err(err) if err.kind() == ErrorKind::WouldBlock => IoStatus::WouldBlock,
            Err(err) if err.kind() == ErrorKind::Interrupted => IoStatus::WouldBlock,
            Err(err) => IoStatus::Err(err),
        }
    }
}

impl ReadNonblocking for TcpStream {}

pub trait WriteNonblocking: Write {
    fn write_nonblocking(&mut self, buf: &[u8]) -> IoStatus {
        if buf.is_empty() {
            return IoStatus::Success(0);
        }
        match self.write(buf) {
            Ok(0) => IoStatus::WouldBlock,
            Ok(len) => IoStatus::Success(len),
            Err(err) if err.kind() == ErrorKind::WouldBlock => IoStatus::WouldBlock,
            Err(err) if err.kind() == ErrorKind::Interrupted => IoStatus::WouldBlock,
            Err(err) if is_disconnect(&err) => IoStatus::Shutdown,
            Err(err) => IoStatus::Err(err),
        }
    }
}

impl WriteNonblocking for TcpStream {}

fn is_disconnect(err: &Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
