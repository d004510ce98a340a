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

use std::io;
use std::time::Duration;

use crossbeam_channel as chan;

use crate::poller::WakerSend;

/// Control messages delivered to the event loop from other threads.
pub enum Ctl {
    /// Stop accepting and drain in-flight connections; `grace` overrides the
    /// configured drain deadline when set.
    Shutdown { grace: Option<Duration> },
}

/// Cloneable cross-thread handle to a running event loop.
///
/// Messages travel over a channel which the loop drains once per iteration; a
/// waker interrupts the loop's blocking poll so an idle loop reacts
/// immediately.
pub struct Controller<W: WakerSend> {
    ctl_send: chan::Sender<Ctl>,
    waker: W,
}

impl<W: WakerSend> Clone for Controller<W> {
    fn clone(&self) -> Self {
        Controller {
            ctl_send: self.ctl_send.clone(),
            waker: self.waker.clone(),
        }
    }
}

impl<W: WakerSend> Controller<W> {
    pub(crate) fn new(ctl_send: chan::Sender<Ctl>, waker: W) -> Self { Self { ctl_send, waker } }

    /// Requests a graceful shutdown with the loop's configured grace period.
    ///
    /// Returns the controller back on failure (the loop is already gone).
    pub fn shutdown(self) -> Result<(), Self> { self.shutdown_request(None) }

    /// Requests a graceful shutdown with an explicit grace period, overriding
    /// the loop's configuration.
    pub fn shutdown_within(self, grace: Duration) -> Result<(), Self> {
        self.shutdown_request(Some(grace))
    }

    fn shutdown_request(self, grace: Option<Duration>) -> Result<(), Self> {
        #[cfg(feature = "log")]
        log::info!(target: "controller", "Initiating server shutdown (grace {grace:?})...");

        let sent = self.ctl_send.send(Ctl::Shutdown { grace });
        let woken = self.wake();
        sent.or(woken).map_err(|_| self)
    }

    pub(crate) fn wake(&self) -> io::Result<()> {
        #[cfg(feature = "log")]
        log::trace!(target: "controller", "Wakening the event loop");
        self.waker.wake()
    }
}
