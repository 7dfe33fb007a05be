// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! One-shot countdown latch.
//!
//! Producers call `count_down()`; waiters block in `wait()` until the count
//! reaches zero. The count never goes back up.

use std::fmt;

use crate::condition::Condition;
use crate::mutex::Mutex;

pub struct CountDownLatch {
    count: Mutex<usize>,
    condition: Condition,
}

impl CountDownLatch {
    /// Create a latch that opens after `count` calls to `count_down()`.
    /// A latch created with 0 is already open.
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            condition: Condition::new(),
        }
    }

    /// Decrement the count, waking all waiters when it reaches zero.
    ///
    /// Counting down an open latch is a caller bug; the count stays at zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock();
        match *count {
            0 => tracing::warn!("count_down on an open latch"),
            1 => {
                *count = 0;
                self.condition.notify_all();
            }
            _ => *count -= 1,
        }
    }

    /// Block until the count reaches zero. Returns at once if it already has.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        self.condition.wait_while(&mut count, |count| *count > 0);
    }

    /// Snapshot of the count, for diagnostics.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}

impl fmt::Debug for CountDownLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountDownLatch")
            .field("count", &self.count())
            .finish()
    }
}
