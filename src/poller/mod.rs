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

//! Readiness multiplexing: the [`Poll`] abstraction over an OS-level readiness
//! primitive, plus the waker used to interrupt a blocked poll from another
//! thread.

#[cfg(feature = "popol")]
pub mod popol;

use std::fmt::{self, Display, Formatter};
use std::io::{self, Read, Write};
use std::ops;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

/// A single readiness event for a socket.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Io {
    Read,
    Write,
}

/// Readiness interest set for a socket: which of read and write events the
/// poller should report for it.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct IoType {
    /// Report when the socket has data to read (or a pending accept).
    pub read: bool,
    /// Report when the socket can accept a write.
    pub write: bool,
}

impl IoType {
    pub fn none() -> Self {
        Self {
            read: false,
            write: false,
        }
    }

    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    pub fn write_only() -> Self {
        Self {
            read: false,
            write: true,
        }
    }

    pub fn is_none(self) -> bool { !self.read && !self.write }
}

impl ops::Not for IoType {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self {
            read: !self.read,
            write: !self.write,
        }
    }
}

/// Iterates the events contained in the set; writes are yielded before reads
/// so a flushed response frees the socket before more inbound data is pulled.
impl Iterator for IoType {
    type Item = Io;

    fn next(&mut self) -> Option<Self::Item> {
        if self.write {
            self.write = false;
            Some(Io::Write)
        } else if self.read {
            self.read = false;
            Some(Io::Read)
        } else {
            None
        }
    }
}

impl Display for IoType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.read, self.write) {
            (false, false) => f.write_str("none"),
            (true, false) => f.write_str("read"),
            (false, true) => f.write_str("write"),
            (true, true) => f.write_str("read-write"),
        }
    }
}

/// Failure reported by the poller for a single registered socket.
#[derive(Copy, Clone, Debug, Display, Error)]
#[display(doc_comments)]
pub enum IoFail {
    /// connection is absent (POSIX events {0:#b})
    Connectivity(i16),
    /// OS-level error (POSIX events {0:#b})
    Os(i16),
}

/// A readiness multiplexer: one blocking call reporting which of many
/// registered sockets are ready for their requested operations.
///
/// Fired events are buffered by the implementation and drained through the
/// [`Iterator`] interface after [`Poll::poll`] returns.
pub trait Poll
where Self: Send + Iterator<Item = (RawFd, Result<IoType, IoFail>)>
{
    /// Waker flavor used to interrupt this poller from another thread.
    type Waker: Waker;

    fn register(&mut self, fd: &impl AsRawFd, interest: IoType);
    fn unregister(&mut self, fd: &impl AsRawFd);

    /// Replaces the interest set for an already-registered socket. Returns
    /// whether the socket was known to the poller.
    fn set_interest(&mut self, fd: &impl AsRawFd, interest: IoType) -> bool;

    /// Blocks until at least one registered socket is ready or the timeout
    /// elapses. Returns the number of newly buffered events.
    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize>;
}

/// Factory for a connected waker pair: the send half is cloned into other
/// threads, the receive half is registered with the poller as a plain
/// read-interested file descriptor.
pub trait Waker {
    type Send: WakerSend;
    type Recv: WakerRecv;

    fn pair() -> io::Result<(Self::Send, Self::Recv)>;
}

/// Thread-safe handle interrupting a blocked [`Poll::poll`] call.
pub trait WakerSend: Send + Clone + 'static {
    fn wake(&self) -> io::Result<()>;
}

/// Loop-side half of the waker; must be drained after every wake-up, otherwise
/// the poller keeps reporting it readable.
pub trait WakerRecv: AsRawFd + Send + 'static {
    fn reset(&self);
}

/// Waker backed by a connected [`UnixStream`] pair: a wake-up is one byte
/// written to the send half, read-readiness of the receive half is the signal.
pub enum UnixWaker {}

impl Waker for UnixWaker {
    type Send = UnixWakerSend;
    type Recv = UnixWakerRecv;

    fn pair() -> io::Result<(Self::Send, Self::Recv)> {
        let (send, recv) = UnixStream::pair()?;
        send.set_nonblocking(true)?;
        recv.set_nonblocking(true)?;
        Ok((UnixWakerSend(Arc::new(send)), UnixWakerRecv(recv)))
    }
}

#[derive(Clone)]
pub struct UnixWakerSend(Arc<UnixStream>);

impl WakerSend for UnixWakerSend {
    fn wake(&self) -> io::Result<()> {
        match (&*self.0).write(&[0x1]) {
            Ok(_) => Ok(()),
            // The stream buffer is full of unread wake-ups; the loop is
            // already due to wake.
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(err),
        }
    }
}

pub struct UnixWakerRecv(UnixStream);

impl WakerRecv for UnixWakerRecv {
    fn reset(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.0).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

impl AsRawFd for UnixWakerRecv {
    fn as_raw_fd(&self) -> RawFd { self.0.as_raw_fd() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_set_iteration_order() {
        let both = IoType {
            read: true,
            write: true,
        };
        let fired: Vec<_> = both.collect();
        assert_eq!(fired, vec![Io::Write, Io::Read]);
        assert_eq!(IoType::none().count(), 0);
    }

    #[test]
    fn interest_set_negation() {
        assert_eq!(!IoType::read_only(), IoType::write_only());
        assert!((!IoType {
            read: true,
            write: true,
        })
        .is_none());
    }

    #[test]
    fn waker_wakes_and_resets() {
        let (send, recv) = UnixWaker::pair().unwrap();

        // Many wake-ups collapse into readable state, reset drains them all.
        for _ in 0..3 {
            send.wake().unwrap();
        }
        recv.reset();

        let mut buf = [0u8; 8];
        let drained = matches!(
            (&recv.0).read(&mut buf),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock
        );
        assert!(drained, "reset must leave the waker stream empty");
    }
}
