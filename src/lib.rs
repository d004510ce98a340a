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

#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Connection server ([`Server`]) multiplexing many non-blocking sockets over
//! a single thread blocked on a readiness poll. Each accepted socket is a
//! [`Connection`] advancing through an explicit phase machine (reading,
//! processing, writing, closing); readiness interest for the socket is always
//! derived from the current phase.
//!
//! Request semantics are supplied by the embedding application as a
//! [`RequestHandler`]: a framing check telling when the accumulated inbound
//! bytes form one complete request, and a function turning request bytes into
//! response bytes plus a keep-alive decision. Fast handlers run inline on the
//! loop thread; slow ones are dispatched to a bounded worker pool whose
//! completions re-enter the loop through a queue drained once per iteration,
//! so request processing never stalls readiness polling for other sockets.
//!
//! The loop is shut down cooperatively from any thread via the [`Controller`]:
//! accepting stops, in-flight responses drain up to a grace deadline, then the
//! remaining sockets are force-closed.

#[macro_use]
extern crate amplify;

pub mod poller;
mod buffer;
mod config;
mod connection;
mod controller;
mod handler;
mod nonblock;
mod runtime;
mod server;
mod timeouts;
mod workers;

pub use buffer::{AdvanceError, Buffer};
pub use config::Config;
pub use connection::{ConnId, Connection, Phase, ReadOutcome, WriteOutcome};
pub use controller::{Controller, Ctl};
pub use handler::{EchoHandler, HttpHandler, RequestHandler, Response};
pub use nonblock::{IoStatus, ReadNonblocking, WriteNonblocking};
pub use runtime::{Error, Runtime};
pub use server::Server;
pub use timeouts::{DeadlineQueue, Timestamp};
