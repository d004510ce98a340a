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

use std::collections::BTreeMap;
use std::mem;
use std::ops::Add;
use std::time::{Duration, SystemTime};

use crate::ConnId;

/// Millisecond-resolution UNIX timestamp which helps working with absolute
/// time inside the event loop.
#[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, From)]
#[wrapper(Display)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates timestamp matching the current moment.
    pub fn now() -> Self {
        let duration =
            SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).expect("system time");
        Self(duration.as_millis() as u64)
    }

    /// Time elapsed since an earlier timestamp; zero if `earlier` is actually
    /// later.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output { Timestamp(self.0 + rhs.as_millis() as u64) }
}

/// Tracks per-connection deadlines and reports the ones which have fired.
///
/// Multiple connections may share a deadline slot; a connection cancels its
/// deadline when it leaves the state the deadline guards.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    slots: BTreeMap<Timestamp, Vec<ConnId>>,
}

impl DeadlineQueue {
    pub fn new() -> Self { Self { slots: empty!() } }

    /// Number of armed deadlines.
    pub fn len(&self) -> usize { self.slots.values().map(Vec::len).sum() }

    pub fn is_empty(&self) -> bool { self.slots.is_empty() }

    /// Arms a deadline for a connection.
    pub fn set(&mut self, at: Timestamp, id: ConnId) {
        self.slots.entry(at).or_default().push(id);
    }

    /// Disarms a previously armed deadline. Unknown pairs are ignored.
    pub fn cancel(&mut self, at: Timestamp, id: ConnId) {
        if let Some(ids) = self.slots.get_mut(&at) {
            ids.retain(|armed| *armed != id);
            if ids.is_empty() {
                self.slots.remove(&at);
            }
        }
    }

    /// Minimum time to wait until the next deadline fires, measured from
    /// `now`. `None` when nothing is armed.
    pub fn next_from(&self, now: Timestamp) -> Option<Duration> {
        self.slots.keys().next().map(|at| at.duration_since(now))
    }

    /// Removes and returns the connections whose deadline has fired by `now`.
    pub fn expire(&mut self, now: Timestamp) -> Vec<ConnId> {
        // `split_off` keeps everything *at and after* the given key in the
        // returned map, so a deadline set for exactly `now` would survive as
        // unexpired. Splitting one millisecond later puts it in the fired set
        // instead.
        let unexpired = self.slots.split_off(&(now + Duration::from_millis(1)));
        let fired = mem::replace(&mut self.slots, unexpired);
        fired.into_values().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_exact() {
        let mut queue = DeadlineQueue::new();

        let now = Timestamp::now();
        queue.set(now + Duration::from_secs(8), ConnId::from(1));
        queue.set(now + Duration::from_secs(9), ConnId::from(2));
        queue.set(now + Duration::from_secs(10), ConnId::from(3));

        assert_eq!(queue.expire(now + Duration::from_secs(9)).len(), 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn expire_in_waves() {
        let mut queue = DeadlineQueue::new();

        let now = Timestamp::now();
        queue.set(now + Duration::from_secs(8), ConnId::from(1));
        queue.set(now + Duration::from_secs(16), ConnId::from(2));
        queue.set(now + Duration::from_secs(64), ConnId::from(3));
        queue.set(now + Duration::from_secs(72), ConnId::from(4));

        assert_eq!(queue.expire(now).len(), 0);
        assert_eq!(queue.len(), 4);

        assert_eq!(queue.expire(now + Duration::from_secs(9)), vec![ConnId::from(1)]);
        assert_eq!(queue.len(), 3, "one deadline has fired");

        assert_eq!(queue.expire(now + Duration::from_secs(66)).len(), 2);
        assert_eq!(queue.len(), 1, "another two deadlines have fired");

        assert_eq!(queue.expire(now + Duration::from_secs(96)).len(), 1);
        assert!(queue.is_empty(), "all deadlines have fired");
    }

    #[test]
    fn cancel_disarms() {
        let mut queue = DeadlineQueue::new();

        let now = Timestamp::now();
        let at = now + Duration::from_secs(1);
        queue.set(at, ConnId::from(7));
        queue.set(at, ConnId::from(8));

        queue.cancel(at, ConnId::from(7));
        assert_eq!(queue.expire(now + Duration::from_secs(2)), vec![ConnId::from(8)]);

        // Cancelling something never armed is a no-op.
        queue.cancel(at, ConnId::from(9));
        assert!(queue.is_empty());
    }

    #[test]
    fn next_wait_shrinks_with_time() {
        let mut queue = DeadlineQueue::new();

        let now = Timestamp::now();
        queue.set(now + Duration::from_secs(16), ConnId::from(1));
        queue.set(now + Duration::from_secs(8), ConnId::from(2));

        assert!(queue.next_from(now) <= Some(Duration::from_secs(8)));
        let later = now + Duration::from_secs(7);
        assert!(queue.next_from(later).unwrap() <= Duration::from_secs(1));

        // A deadline in the past asks for an immediate wake-up.
        assert_eq!(
            queue.next_from(now + Duration::from_secs(20)),
            Some(Duration::ZERO)
        );
    }
}
