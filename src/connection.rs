// Single-threaded non-blocking connection server built on readiness polling.
//
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

//! Per-socket connection state: an explicit phase machine advancing on
//! readiness events, with exclusively owned inbound and outbound buffers.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::handler::Response;
use crate::nonblock::{IoStatus, ReadNonblocking, WriteNonblocking};
use crate::poller::IoType;
use crate::{Buffer, Timestamp};

/// Bytes pulled from the socket per read-readiness event.
const READ_CHUNK: usize = 4096;

/// Opaque connection handle, unique for the process lifetime.
///
/// Raw file descriptors are reused by the OS as sockets close, so they cannot
/// serve as a stable identity; worker-pool completions and deadline entries
/// carry this id instead and become harmless no-ops once the connection is
/// gone.
#[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, From)]
#[wrapper(Display)]
pub struct ConnId(u64);

/// Logical phase of a connection; the readiness interest registered with the
/// poller is always a pure function of the phase (see
/// [`Connection::interests`]).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum Phase {
    /// Accumulating request bytes; read-interested.
    #[display("reading")]
    Reading,
    /// A complete request is with the handler; no readiness interest.
    #[display("processing")]
    Processing,
    /// Flushing the response; write-interested.
    #[display("writing")]
    Writing,
    /// Tear-down decided; the socket is about to be deregistered and
    /// released.
    #[display("closing")]
    Closing,
    /// The socket has been released. Terminal, entered at most once.
    #[display("closed")]
    Closed,
}

/// Outcome of servicing one read-readiness event.
pub enum ReadOutcome {
    /// `n > 0` bytes were appended to the inbound buffer.
    Data(usize),
    /// The socket was not actually ready; nothing changed.
    WouldBlock,
    /// End-of-stream: the peer closed. The connection is now closing.
    Closed,
    /// Connection-scoped I/O failure. The connection is now closing.
    Failed(io::Error),
}

/// Outcome of servicing one write-readiness event.
pub enum WriteOutcome {
    /// The outbound buffer is fully flushed.
    Done,
    /// Some bytes went out; more remain pending.
    Partial,
    /// The socket was not actually ready; nothing changed.
    WouldBlock,
    /// Connection-scoped I/O failure (including a peer reset). The connection
    /// is now closing.
    Failed(io::Error),
}

/// State for one accepted socket.
///
/// The connection owns its socket handle and both buffers exclusively; all
/// access happens on the loop thread. The inbound buffer is append-only until
/// a complete request is recognized and drained; the outbound buffer is
/// consumed incrementally as partial writes succeed, its read cursor being the
/// count of bytes already flushed.
pub struct Connection {
    id: ConnId,
    stream: TcpStream,
    peer: SocketAddr,
    phase: Phase,
    inbound: Buffer,
    outbound: Buffer,
    keep_alive: bool,
    deadline: Option<Timestamp>,
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd { self.stream.as_raw_fd() }
}

impl Connection {
    /// Wraps an accepted socket; the stream must already be in non-blocking
    /// mode.
    pub fn new(id: ConnId, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            id,
            stream,
            peer,
            phase: Phase::Reading,
            inbound: Buffer::new(),
            outbound: Buffer::new(),
            keep_alive: false,
            deadline: None,
        }
    }

    pub fn id(&self) -> ConnId { self.id }

    pub fn peer(&self) -> SocketAddr { self.peer }

    pub fn phase(&self) -> Phase { self.phase }

    /// Unread bytes accumulated towards the current request.
    pub fn inbound(&self) -> &[u8] { self.inbound.readable() }

    /// Response bytes already flushed to the socket.
    pub fn bytes_written(&self) -> usize { self.outbound.consumed() }

    /// Readiness interest derived from the current phase: read-only while
    /// reading, write-only while writing, none otherwise.
    pub fn interests(&self) -> IoType {
        match self.phase {
            Phase::Reading => IoType::read_only(),
            Phase::Writing => IoType::write_only(),
            Phase::Processing | Phase::Closing | Phase::Closed => IoType::none(),
        }
    }

    /// Performs one non-blocking read into the inbound buffer.
    pub fn handle_readable(&mut self) -> ReadOutcome {
        debug_assert_eq!(self.phase, Phase::Reading);
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read_nonblocking(&mut chunk) {
            IoStatus::Success(n) => {
                self.inbound.append(&chunk[..n]);
                ReadOutcome::Data(n)
            }
            IoStatus::WouldBlock => ReadOutcome::WouldBlock,
            IoStatus::Shutdown => {
                self.phase = Phase::Closing;
                ReadOutcome::Closed
            }
            IoStatus::Err(err) => {
                self.phase = Phase::Closing;
                ReadOutcome::Failed(err)
            }
        }
    }

    /// Drains the accumulated request and suspends readiness interest while
    /// the handler produces a response.
    pub fn begin_processing(&mut self) -> Vec<u8> {
        debug_assert_eq!(self.phase, Phase::Reading);
        self.phase = Phase::Processing;
        self.inbound.take()
    }

    /// Loads the handler's response and starts flushing it: the written-bytes
    /// cursor resets to zero and the connection becomes write-interested.
    pub fn load_response(&mut self, response: Response) {
        debug_assert_eq!(self.phase, Phase::Processing);
        self.outbound.clear();
        self.outbound.append(&response.body);
        self.keep_alive = response.keep_alive;
        self.phase = Phase::Writing;
    }

    /// Performs one non-blocking write of the unflushed response suffix.
    pub fn handle_writable(&mut self) -> WriteOutcome {
        debug_assert_eq!(self.phase, Phase::Writing);
        match self.stream.write_nonblocking(self.outbound.readable()) {
            IoStatus::Success(n) => {
                self.outbound
                    .advance_read(n)
                    .expect("socket wrote more bytes than were pending");
                if self.outbound.is_empty() {
                    WriteOutcome::Done
                } else {
                    WriteOutcome::Partial
                }
            }
            IoStatus::WouldBlock => WriteOutcome::WouldBlock,
            IoStatus::Shutdown => {
                self.phase = Phase::Closing;
                WriteOutcome::Failed(io::ErrorKind::ConnectionReset.into())
            }
            IoStatus::Err(err) => {
                self.phase = Phase::Closing;
                WriteOutcome::Failed(err)
            }
        }
    }

    /// Keep-alive decision returned alongside the current response.
    pub fn keep_alive(&self) -> bool { self.keep_alive }

    /// Re-arms the connection for the next request on the same socket: both
    /// buffers are cleared and the connection reads again.
    pub fn reset_for_next(&mut self) {
        debug_assert_eq!(self.phase, Phase::Writing);
        debug_assert!(self.outbound.is_empty());
        self.inbound.clear();
        self.outbound.clear();
        self.keep_alive = false;
        self.phase = Phase::Reading;
    }

    /// Marks the connection for tear-down. Idempotent; has no effect on an
    /// already closed connection.
    pub fn begin_close(&mut self) {
        if self.phase != Phase::Closed {
            self.phase = Phase::Closing;
        }
    }

    /// Marks the socket released. Called once the connection has been
    /// deregistered from the poller; dropping the connection afterwards
    /// releases the handle.
    pub fn mark_closed(&mut self) { self.phase = Phase::Closed; }

    pub fn deadline(&self) -> Option<Timestamp> { self.deadline }

    pub fn set_deadline(&mut self, at: Timestamp) { self.deadline = Some(at); }

    pub fn take_deadline(&mut self) -> Option<Timestamp> { self.deadline.take() }
}
