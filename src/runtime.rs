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

//! The server event loop: one thread blocked on a readiness poll, dispatching
//! ready sockets to accept, read and write handling on their owning
//! [`Connection`]s.

#![allow(unused_variables)] // because we need them for feature-gated logger

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as chan;

use crate::connection::{ReadOutcome, WriteOutcome};
use crate::controller::Ctl;
use crate::poller::{Io, IoFail, IoType, Poll, Waker, WakerRecv};
use crate::timeouts::DeadlineQueue;
use crate::workers::{Completion, Job, WorkerPool};
use crate::{Config, ConnId, Connection, Controller, Phase, RequestHandler, Timestamp};

/// Loop-global failures. Everything connection-scoped is isolated and handled
/// inside the loop; only these terminate it.
#[derive(Debug, Display, Error)]
#[display(doc_comments)]
pub enum Error {
    /// binding listener to {addr} has failed. Details: {err}
    Bind { addr: SocketAddr, err: io::Error },

    /// setting up the loop waker has failed. Details: {0}
    Waker(io::Error),

    /// spawning a thread has failed. Details: {0}
    Thread(io::Error),

    /// the listening socket has failed ({0})
    Listener(IoFail),

    /// polling for I/O readiness has failed. Details: {0}
    Poll(io::Error),
}

#[derive(Copy, Clone)]
enum State {
    Running,
    Draining(Timestamp),
    Stopped,
}

/// The event loop: owns the readiness poller, the listening socket and the
/// registry of open connections. **Blocking**; single-threaded.
///
/// Use [`crate::Server`] to run the loop on a dedicated thread; use this type
/// directly only for full control over the loop thread (or for driving single
/// iterations through [`Runtime::run_once`]).
pub struct Runtime<H: RequestHandler, P: Poll> {
    service: Arc<H>,
    poller: P,
    listener: TcpListener,
    local: SocketAddr,
    listener_registered: bool,
    config: Config,
    connections: HashMap<ConnId, Connection>,
    by_fd: HashMap<RawFd, ConnId>,
    next_id: u64,
    waker: <P::Waker as Waker>::Recv,
    controller: Controller<<P::Waker as Waker>::Send>,
    ctl_recv: chan::Receiver<Ctl>,
    done_recv: chan::Receiver<Completion<H::Error>>,
    workers: Option<WorkerPool>,
    deadlines: DeadlineQueue,
    state: State,
}

impl<H: RequestHandler, P: Poll> Runtime<H, P> {
    /// Binds and listens on `addr` (non-blocking), registers the listener for
    /// accept readiness and assembles the loop. Failure to bind is fatal and
    /// surfaced here, before the loop begins.
    ///
    /// Returns the runtime together with a [`Controller`] for shutting it
    /// down from other threads.
    pub fn bind(
        service: H,
        mut poller: P,
        config: Config,
        addr: SocketAddr,
    ) -> Result<(Self, Controller<<P::Waker as Waker>::Send>), Error> {
        let listener = TcpListener::bind(addr)
            .and_then(|listener| listener.set_nonblocking(true).map(|_| listener))
            .map_err(|err| Error::Bind { addr, err })?;
        let local = listener.local_addr().map_err(|err| Error::Bind { addr, err })?;

        let (waker_send, waker_recv) = P::Waker::pair().map_err(Error::Waker)?;
        let (ctl_send, ctl_recv) = chan::unbounded();
        let controller = Controller::new(ctl_send, waker_send.clone());

        let service = Arc::new(service);
        let (done_send, done_recv) = chan::unbounded();
        let workers = if config.workers > 0 {
            let pool = WorkerPool::start(
                config.workers,
                Arc::clone(&service),
                done_send,
                waker_send.clone(),
            )
            .map_err(Error::Thread)?;
            Some(pool)
        } else {
            None
        };

        poller.register(&listener, IoType::read_only());
        poller.register(&waker_recv, IoType::read_only());

        #[cfg(feature = "log")]
        log::info!(target: "server", "Listening on {local}");

        let runtime = Runtime {
            service,
            poller,
            listener,
            local,
            listener_registered: true,
            config,
            connections: empty!(),
            by_fd: empty!(),
            next_id: 1,
            waker: waker_recv,
            controller: controller.clone(),
            ctl_recv,
            done_recv,
            workers,
            deadlines: DeadlineQueue::new(),
            state: State::Running,
        };
        Ok((runtime, controller))
    }

    /// Address the listener is actually bound to (relevant when binding to
    /// port zero).
    pub fn local_addr(&self) -> SocketAddr { self.local }

    /// Provides a [`Controller`] handle to this loop.
    pub fn controller(&self) -> Controller<<P::Waker as Waker>::Send> { self.controller.clone() }

    /// Executes the event loop until shutdown completes or a loop-global
    /// failure occurs. All connections, the worker pool and the listening
    /// socket are released on the way out.
    pub fn run(mut self) -> Result<(), Error> {
        loop {
            match self.run_once() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(err) => {
                    #[cfg(feature = "log")]
                    log::error!(target: "server", "Terminating event loop: {err}");
                    self.teardown();
                    return Err(err);
                }
            }
        }
    }

    /// One loop iteration: refresh interests, block on the poller with a
    /// bounded timeout, dispatch ready sockets, drain handler completions and
    /// control messages, expire deadlines.
    ///
    /// Returns whether the loop should keep running. Once the loop has
    /// stopped, further calls are fast no-ops returning `false`.
    pub fn run_once(&mut self) -> Result<bool, Error> {
        if matches!(self.state, State::Stopped) {
            return Ok(false);
        }

        // Interest sets mirror connection phases, re-asserted before every
        // poll.
        for (_, conn) in &self.connections {
            self.poller.set_interest(conn, conn.interests());
        }

        let now = Timestamp::now();
        let timeout = self.next_timeout(now);
        let res = self.poller.poll(Some(timeout));
        let now = Timestamp::now();

        if let Err(err) = res {
            return Err(Error::Poll(err));
        }

        while let Some((fd, res)) = self.poller.next() {
            if fd == self.waker.as_raw_fd() {
                if let Err(fail) = res {
                    return Err(Error::Waker(io::Error::new(
                        io::ErrorKind::Other,
                        fail.to_string(),
                    )));
                }
                self.waker.reset();
                continue;
            }
            if fd == self.listener.as_raw_fd() {
                match res {
                    Ok(_) => self.accept_ready(now),
                    Err(fail) => return Err(Error::Listener(fail)),
                }
                continue;
            }
            let Some(&id) = self.by_fd.get(&fd) else {
                // Event for a socket closed earlier in this very batch.
                continue;
            };
            match res {
                Ok(io) => {
                    for event in io {
                        match event {
                            Io::Read => self.read_ready(id, now),
                            Io::Write => self.write_ready(id, now),
                        }
                    }
                }
                Err(fail) => {
                    #[cfg(feature = "log")]
                    log::debug!(target: "server", "Connection {id} lost: {fail}");
                    self.close(id);
                }
            }
        }

        // Results of offloaded request processing are applied to connection
        // state only here, on the loop thread.
        while let Ok(done) = self.done_recv.try_recv() {
            self.apply(done.conn, done.result);
        }

        loop {
            match self.ctl_recv.try_recv() {
                Err(chan::TryRecvError::Empty) => break,
                Err(chan::TryRecvError::Disconnected) => panic!("control channel is broken"),
                Ok(Ctl::Shutdown { grace }) => self.begin_drain(now, grace),
            }
        }

        for id in self.deadlines.expire(now) {
            let reading = self
                .connections
                .get(&id)
                .map(|conn| conn.phase() == Phase::Reading)
                .unwrap_or_default();
            if reading {
                #[cfg(feature = "log")]
                log::debug!(target: "server", "Connection {id} timed out reading; closing");
                self.close(id);
            }
        }

        if let State::Draining(deadline) = self.state {
            if self.connections.is_empty() {
                self.teardown();
            } else if now >= deadline {
                #[cfg(feature = "log")]
                log::warn!(target: "server",
                    "Grace deadline passed; force-closing {} connection(s)", self.connections.len());
                let remaining: Vec<ConnId> = self.connections.keys().copied().collect();
                for id in remaining {
                    self.close(id);
                }
                self.teardown();
            }
        }

        Ok(!matches!(self.state, State::Stopped))
    }

    /// Bound for one blocking poll: the configured cap, shortened by the
    /// nearest read or drain deadline.
    fn next_timeout(&self, now: Timestamp) -> Duration {
        let mut timeout = self.config.wait_timeout;
        if let Some(until) = self.deadlines.next_from(now) {
            timeout = timeout.min(until);
        }
        if let State::Draining(deadline) = self.state {
            timeout = timeout.min(deadline.duration_since(now));
        }
        timeout
    }

    fn accept_ready(&mut self, now: Timestamp) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        #[cfg(feature = "log")]
                        log::warn!(target: "server",
                            "Dropping accepted socket from {peer}: can't make it non-blocking ({err})");
                        continue;
                    }
                    if self.config.nodelay {
                        if let Err(err) = stream.set_nodelay(true) {
                            #[cfg(feature = "log")]
                            log::trace!(target: "server", "TCP_NODELAY not set for {peer}: {err}");
                        }
                    }
                    let id = ConnId::from(self.next_id);
                    self.next_id += 1;
                    let conn = Connection::new(id, stream, peer);
                    let fd = conn.as_raw_fd();
                    self.poller.register(&conn, IoType::read_only());
                    self.by_fd.insert(fd, id);
                    self.connections.insert(id, conn);
                    self.arm_read_deadline(id, now);

                    #[cfg(feature = "log")]
                    log::debug!(target: "server", "Accepted {peer} as connection {id} (fd {fd})");
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    // A failed accept (e.g. descriptor exhaustion) is skipped;
                    // it never terminates the loop.
                    #[cfg(feature = "log")]
                    log::warn!(target: "server", "Accept failed: {err}");
                    break;
                }
            }
        }
    }

    fn read_ready(&mut self, id: ConnId, now: Timestamp) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.phase() != Phase::Reading {
            return;
        }
        match conn.handle_readable() {
            ReadOutcome::WouldBlock => {}
            ReadOutcome::Closed => {
                #[cfg(feature = "log")]
                log::debug!(target: "server", "Connection {id} reached end-of-stream");
                self.close(id);
            }
            ReadOutcome::Failed(err) => {
                #[cfg(feature = "log")]
                log::debug!(target: "server", "Read failed on connection {id}: {err}");
                self.close(id);
            }
            ReadOutcome::Data(n) => {
                #[cfg(feature = "log")]
                log::trace!(target: "server", "Read {n} bytes from connection {id}");

                if self.service.is_complete(conn.inbound()) {
                    let request = conn.begin_processing();
                    let deadline = conn.take_deadline();
                    if let Some(at) = deadline {
                        self.deadlines.cancel(at, id);
                    }
                    self.dispatch(id, request);
                } else if conn.inbound().len() > self.config.max_request_size {
                    #[cfg(feature = "log")]
                    log::warn!(target: "server",
                        "Connection {id} exceeded the {} byte request limit; closing without a response",
                        self.config.max_request_size);
                    self.close(id);
                } else {
                    self.arm_read_deadline(id, now);
                }
            }
        }
    }

    /// Runs the handler for a framed request: inline for fast handlers, on
    /// the worker pool otherwise. Inline results are applied immediately;
    /// pool results come back through the completion queue.
    fn dispatch(&mut self, id: ConnId, request: Vec<u8>) {
        #[cfg(feature = "log")]
        log::trace!(target: "server",
            "Processing {} byte request from connection {id}", request.len());

        if let Some(pool) = &self.workers {
            if !pool.submit(Job { conn: id, request }) {
                #[cfg(feature = "log")]
                log::error!(target: "server", "Worker pool is gone; closing connection {id}");
                self.close(id);
            }
        } else {
            let result = self.service.handle(&request);
            self.apply(id, result);
        }
    }

    /// Applies a handler result to its connection. The connection may have
    /// been closed while the request was processing; the result is then
    /// dropped.
    fn apply(&mut self, id: ConnId, result: Result<crate::Response, H::Error>) {
        let Some(conn) = self.connections.get_mut(&id) else {
            #[cfg(feature = "log")]
            log::trace!(target: "server", "Dropping handler result for closed connection {id}");
            return;
        };
        if conn.phase() != Phase::Processing {
            return;
        }
        match result {
            Ok(response) => {
                #[cfg(feature = "log")]
                log::trace!(target: "server",
                    "Loading {} byte response into connection {id}", response.body.len());
                conn.load_response(response);
            }
            Err(err) => {
                #[cfg(feature = "log")]
                log::error!(target: "server",
                    "Handler failed for connection {id}: {err}; closing without a response");
                self.close(id);
            }
        }
    }

    fn write_ready(&mut self, id: ConnId, now: Timestamp) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.phase() != Phase::Writing {
            return;
        }
        match conn.handle_writable() {
            WriteOutcome::WouldBlock | WriteOutcome::Partial => {}
            WriteOutcome::Failed(err) => {
                #[cfg(feature = "log")]
                log::debug!(target: "server", "Write failed on connection {id}: {err}");
                self.close(id);
            }
            WriteOutcome::Done => {
                let keep = conn.keep_alive() && matches!(self.state, State::Running);
                if keep {
                    #[cfg(feature = "log")]
                    log::trace!(target: "server",
                        "Response flushed; connection {id} kept alive for the next request");
                    conn.reset_for_next();
                    self.arm_read_deadline(id, now);
                } else {
                    #[cfg(feature = "log")]
                    log::trace!(target: "server", "Response flushed; closing connection {id}");
                    self.close(id);
                }
            }
        }
    }

    fn arm_read_deadline(&mut self, id: ConnId, now: Timestamp) {
        let Some(timeout) = self.config.read_timeout else {
            return;
        };
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        let prev = conn.take_deadline();
        let at = now + timeout;
        conn.set_deadline(at);
        if let Some(prev) = prev {
            self.deadlines.cancel(prev, id);
        }
        self.deadlines.set(at, id);
    }

    /// Releases a connection: deadline disarmed, poller registration removed
    /// first, socket handle dropped last. Closing an unknown (already closed)
    /// connection is a no-op.
    fn close(&mut self, id: ConnId) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };
        self.by_fd.remove(&conn.as_raw_fd());
        if let Some(at) = conn.take_deadline() {
            self.deadlines.cancel(at, id);
        }
        self.poller.unregister(&conn);
        conn.begin_close();
        conn.mark_closed();

        #[cfg(feature = "log")]
        log::debug!(target: "server", "Connection {id} closed");
    }

    fn begin_drain(&mut self, now: Timestamp, grace: Option<Duration>) {
        if !matches!(self.state, State::Running) {
            return;
        }
        let grace = grace.unwrap_or(self.config.shutdown_grace);

        #[cfg(feature = "log")]
        log::info!(target: "server",
            "Shutdown requested: accepting stopped, draining {} connection(s) within {grace:?}",
            self.connections.len());

        self.poller.unregister(&self.listener);
        self.listener_registered = false;

        let idle: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.phase() == Phase::Reading)
            .map(|(id, _)| *id)
            .collect();
        for id in idle {
            self.close(id);
        }

        self.state = State::Draining(now + grace);
    }

    fn teardown(&mut self) {
        self.state = State::Stopped;

        let open: Vec<ConnId> = self.connections.keys().copied().collect();
        for id in open {
            self.close(id);
        }
        if self.listener_registered {
            self.poller.unregister(&self.listener);
            self.listener_registered = false;
        }
        if let Some(pool) = self.workers.take() {
            pool.stop();
        }

        #[cfg(feature = "log")]
        log::info!(target: "server", "Event loop stopped");
    }
}

#[cfg(test)]
mod test {
    use std::convert::Infallible;
    use std::io::{ErrorKind, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::sleep;
    use std::time::Duration;

    use super::*;
    use crate::poller::popol::Poller;
    use crate::{EchoHandler, HttpHandler, Response, Server};

    /// Blocking line-oriented client driving the server under test.
    struct EchoClient {
        stream: TcpStream,
    }

    impl EchoClient {
        fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
            Self { stream }
        }

        fn send(&mut self, msg: &str) -> String {
            self.stream.write_all(msg.as_bytes()).unwrap();
            self.read_line()
        }

        fn read_line(&mut self) -> String {
            let mut line = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                if self.stream.read(&mut byte).unwrap() == 0 {
                    break;
                }
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            String::from_utf8(line).unwrap()
        }

        /// Asserts the server closed the connection without sending a byte.
        fn expect_silent_close(&mut self) {
            let mut buf = [0u8; 16];
            match self.stream.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => panic!("server sent {n} unexpected byte(s)"),
                Err(err) if err.kind() == ErrorKind::ConnectionReset => {}
                Err(err) => panic!("unexpected read error: {err}"),
            }
        }
    }

    fn echo_server(config: Config) -> Server<Poller> {
        Server::bind(EchoHandler, Poller::new(), config, "127.0.0.1:0".parse().unwrap()).unwrap()
    }

    #[test]
    fn echo_roundtrip_on_kept_alive_connection() {
        let server = echo_server(Config::default());
        let mut client = EchoClient::connect(server.local_addr());

        assert_eq!(client.send("ping\n"), "ping\n");
        // Second request travels over the same socket.
        assert_eq!(client.send("ping\n"), "ping\n");

        server.stop().unwrap().unwrap();
    }

    #[test]
    fn http_handler_round_trip() {
        let body = "<html><body>Hello World</body></html>";
        let server = Server::bind(
            HttpHandler::new(body),
            Poller::new(),
            Config::default(),
            "127.0.0.1:0".parse().unwrap(),
        )
        .unwrap();

        let mut client = EchoClient::connect(server.local_addr());
        client
            .stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = Vec::new();
        client.stream.read_to_end(&mut response).unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with(body));

        server.stop().unwrap().unwrap();
    }

    #[test]
    fn eof_before_data_never_invokes_handler() {
        struct Counting(Arc<AtomicUsize>);

        impl RequestHandler for Counting {
            type Error = Infallible;

            fn is_complete(&self, inbound: &[u8]) -> bool { inbound.ends_with(b"\n") }

            fn handle(&self, request: &[u8]) -> Result<Response, Self::Error> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Response::keep_alive(request))
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let server = Server::bind(
            Counting(Arc::clone(&calls)),
            Poller::new(),
            Config::default(),
            "127.0.0.1:0".parse().unwrap(),
        )
        .unwrap();

        // Connect and close immediately without sending a byte.
        drop(TcpStream::connect(server.local_addr()).unwrap());

        // The loop keeps serving others.
        let mut client = EchoClient::connect(server.local_addr());
        assert_eq!(client.send("still alive\n"), "still alive\n");

        server.stop().unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn oversized_request_closed_without_response() {
        let config = Config {
            max_request_size: 8,
            ..Config::default()
        };
        let server = echo_server(config);

        let mut client = EchoClient::connect(server.local_addr());
        client.stream.write_all(&[b'x'; 64]).unwrap();
        client.expect_silent_close();

        server.stop().unwrap().unwrap();
    }

    #[test]
    fn handler_failure_closes_without_response() {
        struct Failing;

        impl RequestHandler for Failing {
            type Error = io::Error;

            fn is_complete(&self, inbound: &[u8]) -> bool { inbound.ends_with(b"\n") }

            fn handle(&self, _request: &[u8]) -> Result<Response, Self::Error> {
                Err(io::Error::new(ErrorKind::Other, "boom"))
            }
        }

        let server = Server::bind(
            Failing,
            Poller::new(),
            Config::default(),
            "127.0.0.1:0".parse().unwrap(),
        )
        .unwrap();

        let mut client = EchoClient::connect(server.local_addr());
        client.stream.write_all(b"ping\n").unwrap();
        client.expect_silent_close();

        server.stop().unwrap().unwrap();
    }

    #[test]
    fn silent_connection_closed_on_read_timeout() {
        let config = Config {
            read_timeout: Some(Duration::from_millis(100)),
            ..Config::default()
        };
        let server = echo_server(config);

        let mut client = EchoClient::connect(server.local_addr());
        client.expect_silent_close();

        server.stop().unwrap().unwrap();
    }

    #[test]
    fn large_response_survives_partial_writes() {
        let server = echo_server(Config::default());
        let mut client = EchoClient::connect(server.local_addr());

        let mut msg = vec![b'a'; 256 * 1024];
        msg.push(b'\n');
        client.stream.write_all(&msg).unwrap();

        let mut got = vec![0u8; msg.len()];
        client.stream.read_exact(&mut got).unwrap();
        assert_eq!(got, msg, "no byte skipped or duplicated");

        server.stop().unwrap().unwrap();
    }

    /// Echo with artificial latency, for exercising the worker pool.
    struct SlowEcho(Duration);

    impl RequestHandler for SlowEcho {
        type Error = Infallible;

        fn is_complete(&self, inbound: &[u8]) -> bool { inbound.ends_with(b"\n") }

        fn handle(&self, request: &[u8]) -> Result<Response, Self::Error> {
            sleep(self.0);
            Ok(Response::keep_alive(request))
        }
    }

    #[test]
    fn worker_pool_serves_many_slow_connections() {
        let config = Config {
            workers: 4,
            ..Config::default()
        };
        let server = Server::bind(
            SlowEcho(Duration::from_millis(25)),
            Poller::new(),
            config,
            "127.0.0.1:0".parse().unwrap(),
        )
        .unwrap();
        let addr = server.local_addr();

        let clients: Vec<_> = (0..50)
            .map(|n| {
                std::thread::spawn(move || {
                    let mut client = EchoClient::connect(addr);
                    let msg = format!("ping-{n}\n");
                    assert_eq!(client.send(&msg), msg);
                })
            })
            .collect();
        for client in clients {
            client.join().unwrap();
        }

        server.stop().unwrap().unwrap();
    }

    #[test]
    fn graceful_shutdown_drains_inflight_response() {
        let config = Config {
            workers: 1,
            ..Config::default()
        };
        let server = Server::bind(
            SlowEcho(Duration::from_millis(300)),
            Poller::new(),
            config,
            "127.0.0.1:0".parse().unwrap(),
        )
        .unwrap();

        let mut client = EchoClient::connect(server.local_addr());
        client.stream.write_all(b"ping\n").unwrap();
        // Let the request reach the worker before asking for shutdown.
        sleep(Duration::from_millis(50));

        let controller = server.controller();
        assert!(controller.shutdown().is_ok());

        // The in-flight response still arrives, then the socket closes.
        assert_eq!(client.read_line(), "ping\n");
        client.expect_silent_close();

        server.join().unwrap().unwrap();
    }

    #[test]
    fn shutdown_closes_idle_connections_and_releases_listener() {
        let server = echo_server(Config::default());
        let addr = server.local_addr();

        let mut client = EchoClient::connect(addr);
        sleep(Duration::from_millis(50));

        server.stop().unwrap().unwrap();
        client.expect_silent_close();

        // The listening socket is released; the port can be bound again.
        TcpListener::bind(addr).unwrap();
    }

    #[test]
    fn run_once_after_stop_is_a_noop() {
        let (mut runtime, controller) = Runtime::bind(
            EchoHandler,
            Poller::new(),
            Config::default(),
            "127.0.0.1:0".parse().unwrap(),
        )
        .unwrap();

        assert!(controller.shutdown().is_ok());

        let mut iterations = 0;
        while runtime.run_once().unwrap() {
            iterations += 1;
            assert!(iterations < 100, "loop failed to stop");
        }
        assert!(!runtime.run_once().unwrap());
    }

    #[test]
    fn bind_failure_is_fatal_at_startup() {
        let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap();

        let err = Server::bind(EchoHandler, Poller::new(), Config::default(), addr).unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[test]
    fn explicit_grace_force_closes_slow_drain() {
        let config = Config {
            workers: 1,
            ..Config::default()
        };
        let server = Server::bind(
            SlowEcho(Duration::from_millis(500)),
            Poller::new(),
            config,
            "127.0.0.1:0".parse().unwrap(),
        )
        .unwrap();

        let mut client = EchoClient::connect(server.local_addr());
        client.stream.write_all(b"ping\n").unwrap();
        sleep(Duration::from_millis(50));

        // A grace period shorter than the handler latency force-closes the
        // connection before its response is ready.
        let controller = server.controller();
        assert!(controller.shutdown_within(Duration::from_millis(100)).is_ok());
        server.join().unwrap().unwrap();

        client.expect_silent_close();
    }
}
