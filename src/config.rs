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

use std::time::Duration;

/// Tunables for the server event loop.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of inbound bytes a connection may accumulate before the
    /// framing check recognizes a complete request; past it the connection is
    /// closed with no response. Guards against unbounded memory growth from a
    /// single slow or malicious peer.
    pub max_request_size: usize,

    /// Idle timeout for the reading phase: a connection which stays silent
    /// this long is closed with no response. `None` disables the timeout.
    pub read_timeout: Option<Duration>,

    /// How long a shutdown lets in-flight connections finish their current
    /// response before the remaining sockets are force-closed. Can be
    /// overridden per shutdown request.
    pub shutdown_grace: Duration,

    /// Number of worker threads request processing is dispatched to. Zero
    /// runs every handler inline on the loop thread, which is only suitable
    /// for fast handlers.
    pub workers: usize,

    /// Upper bound for one blocking poll, so that shutdown requests, worker
    /// completions and deadlines are serviced even with no I/O activity.
    pub wait_timeout: Duration,

    /// Whether to set TCP_NODELAY on accepted sockets.
    pub nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_request_size: 1024 * 1024,
            read_timeout: None,
            shutdown_grace: Duration::from_secs(5),
            workers: 0,
            wait_timeout: Duration::from_secs(1),
            nodelay: true,
        }
    }
}
