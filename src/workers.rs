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

//! Bounded worker pool for slow request handlers: requests leave the loop
//! thread as [`Job`]s and come back as [`Completion`]s through a channel
//! drained once per loop iteration, so processing never blocks readiness
//! polling.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel as chan;

use crate::handler::{RequestHandler, Response};
use crate::poller::WakerSend;
use crate::ConnId;

/// A complete request leaving the loop thread.
pub(crate) struct Job {
    pub conn: ConnId,
    pub request: Vec<u8>,
}

/// A handler result re-entering the loop thread.
///
/// Carries the connection id rather than a socket handle: by the time the
/// result arrives the connection may already be gone, in which case the
/// completion is dropped.
pub(crate) struct Completion<E> {
    pub conn: ConnId,
    pub result: Result<Response, E>,
}

/// Fixed-size pool of named worker threads sharing one job queue.
pub(crate) struct WorkerPool {
    jobs: chan::Sender<Job>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers; each runs jobs to completion, reports through
    /// `done` and wakes the loop so the completion is applied promptly.
    pub fn start<H, W>(
        size: usize,
        service: Arc<H>,
        done: chan::Sender<Completion<H::Error>>,
        waker: W,
    ) -> io::Result<Self>
    where
        H: RequestHandler,
        W: WakerSend,
    {
        let (jobs, intake) = chan::unbounded::<Job>();
        let mut threads = Vec::with_capacity(size);
        for n in 0..size {
            let intake = intake.clone();
            let service = Arc::clone(&service);
            let done = done.clone();
            let waker = waker.clone();
            let handle = thread::Builder::new()
                .name(format!("request-worker-{n}"))
                .spawn(move || {
                    while let Ok(job) = intake.recv() {
                        let result = service.handle(&job.request);
                        if done
                            .send(Completion {
                                conn: job.conn,
                                result,
                            })
                            .is_err()
                        {
                            break;
                        }
                        if waker.wake().is_err() {
                            // The loop-side waker half is gone; the loop is
                            // shutting down.
                            break;
                        }
                    }
                })?;
            threads.push(handle);
        }
        Ok(WorkerPool { jobs, threads })
    }

    /// Hands a request to the pool. Returns `false` if no worker can take it
    /// any more (all workers have died).
    pub fn submit(&self, job: Job) -> bool { self.jobs.send(job).is_ok() }

    /// Closes the job queue and waits for the workers to finish their current
    /// requests.
    pub fn stop(self) {
        drop(self.jobs);
        for handle in self.threads {
            #[cfg(feature = "log")]
            if let Some(name) = handle.thread().name() {
                log::trace!(target: "workers", "Joining {name}");
            }
            let _ = handle.join();
        }
    }
}
