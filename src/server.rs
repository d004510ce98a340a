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

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};

use crate::poller::{Poll, Waker};
use crate::runtime::{Error, Runtime};
use crate::{Config, Controller, RequestHandler};

/// High-level server API wrapping the event-loop [`Runtime`] into a dedicated
/// thread and providing basic thread management for it.
///
/// Binding happens on the calling thread, before the loop thread is spawned,
/// so a bind/listen failure is fatal at startup and never races the loop.
/// Apps interact with the running loop through the [`Controller`].
pub struct Server<P: Poll> {
    thread: JoinHandle<Result<(), Error>>,
    controller: Controller<<P::Waker as Waker>::Send>,
    local: SocketAddr,
}

impl<P: Poll + 'static> Server<P> {
    /// Binds to `addr` and spawns the event-loop thread serving `service`.
    ///
    /// # Error
    ///
    /// Errors if binding or listening on `addr` fails, or if the thread can't
    /// be spawned.
    pub fn bind<H: RequestHandler>(
        service: H,
        poller: P,
        config: Config,
        addr: SocketAddr,
    ) -> Result<Self, Error> {
        Server::named(service, poller, config, addr, String::from("server-loop"))
    }

    /// Same as [`Server::bind`], but allows to specify the name for the loop
    /// thread.
    pub fn named<H: RequestHandler>(
        service: H,
        poller: P,
        config: Config,
        addr: SocketAddr,
        thread_name: String,
    ) -> Result<Self, Error> {
        let (runtime, controller) = Runtime::bind(service, poller, config, addr)?;
        let local = runtime.local_addr();

        #[cfg(feature = "log")]
        log::debug!(target: "server", "Spawning the event loop thread");

        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || runtime.run())
            .map_err(Error::Thread)?;

        Ok(Self {
            thread,
            controller,
            local,
        })
    }

    /// Address the server is actually listening on (relevant when binding to
    /// port zero).
    pub fn local_addr(&self) -> SocketAddr { self.local }

    /// Provides a [`Controller`] handle for shutting the loop down from any
    /// thread.
    pub fn controller(&self) -> Controller<<P::Waker as Waker>::Send> { self.controller.clone() }

    /// Joins the loop thread, returning the loop's exit result.
    pub fn join(self) -> thread::Result<Result<(), Error>> { self.thread.join() }

    /// Requests a graceful shutdown and waits for the loop to finish.
    pub fn stop(self) -> thread::Result<Result<(), Error>> {
        let _ = self.controller.clone().shutdown();
        self.thread.join()
    }
}
