/*!
 * Counting Semaphore
 *
 * Condvar-backed semaphore used for the lifecycle handshakes between a
 * process and its parent (exit notification, reap release). `up` never
 * blocks; `down` blocks until a permit is available and consumes it.
 */

use parking_lot::{Condvar, Mutex};

/// Semaphore with `down`/`up` operations
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `permits` initial permits
    pub const fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    /// Block until a permit is available, then take it
    pub fn down(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.condvar.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Release one permit and wake one waiter
    pub fn up(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.condvar.notify_one();
    }
}
