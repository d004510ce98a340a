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

//! The request-handler seam: the embedding application supplies framing and
//! request processing, the server core stays protocol-agnostic.

use std::convert::Infallible;
use std::error::Error as StdError;

/// Response produced by a [`RequestHandler`], together with the keep-alive
/// decision for the connection that carried the request.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Response {
    /// Bytes to flush to the peer.
    pub body: Vec<u8>,
    /// Whether the connection is reused for a subsequent request once the
    /// body is fully written, or closed.
    pub keep_alive: bool,
}

impl Response {
    pub fn new(body: impl Into<Vec<u8>>, keep_alive: bool) -> Self {
        Self {
            body: body.into(),
            keep_alive,
        }
    }

    /// Response after which the connection is kept open for the next request.
    pub fn keep_alive(body: impl Into<Vec<u8>>) -> Self { Self::new(body, true) }

    /// Response after which the connection is closed.
    pub fn and_close(body: impl Into<Vec<u8>>) -> Self { Self::new(body, false) }
}

/// Turns complete request bytes into response bytes; supplied by the embedding
/// application.
///
/// [`Self::is_complete`] is the framing check: it is consulted after every
/// read with the whole accumulated inbound buffer and decides when enough
/// bytes have arrived to constitute one request. Once it answers yes the
/// accumulation is drained and handed to [`Self::handle`] exactly once.
///
/// `handle` must not block the calling thread beyond a small bounded duration;
/// slow handlers belong on the worker pool (see
/// [`Config::workers`](crate::Config)), which is why implementations are
/// shared across threads.
pub trait RequestHandler: Send + Sync + 'static {
    /// Error failing a single request; the connection carrying the request is
    /// closed without a response.
    type Error: StdError + Send;

    /// Whether the accumulated bytes form one complete request.
    fn is_complete(&self, inbound: &[u8]) -> bool;

    /// Produces the response for a complete request.
    fn handle(&self, request: &[u8]) -> Result<Response, Self::Error>;
}

/// Echoes newline-terminated input back verbatim, keeping the connection
/// alive.
#[derive(Copy, Clone, Debug, Default)]
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    type Error = Infallible;

    fn is_complete(&self, inbound: &[u8]) -> bool { inbound.ends_with(b"\n") }

    fn handle(&self, request: &[u8]) -> Result<Response, Self::Error> {
        Ok(Response::keep_alive(request))
    }
}

/// Serves a fixed body as a minimal `HTTP/1.1 200 OK` response.
///
/// Header formatting only - this is not an HTTP implementation. A request is
/// complete once the header terminator arrives, and the connection is kept
/// alive unless the request carries a `Connection: close` header.
#[derive(Clone, Debug)]
pub struct HttpHandler {
    body: Vec<u8>,
}

impl HttpHandler {
    pub fn new(body: impl Into<Vec<u8>>) -> Self { Self { body: body.into() } }
}

impl RequestHandler for HttpHandler {
    type Error = Infallible;

    fn is_complete(&self, inbound: &[u8]) -> bool {
        inbound.windows(4).any(|window| window == b"\r\n\r\n")
    }

    fn handle(&self, request: &[u8]) -> Result<Response, Self::Error> {
        let keep_alive = !contains_ignore_case(request, b"connection: close");
        let head = format!(
            "HTTP/1.1 200 OK\r\nServer: io-loop\r\nContent-Type: text/html\r\nContent-Length: \
             {}\r\n\r\n",
            self.body.len()
        );
        let mut body = head.into_bytes();
        body.extend_from_slice(&self.body);
        Ok(Response { body, keep_alive })
    }
}

fn contains_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
