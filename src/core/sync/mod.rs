/*!
 * Synchronization Primitives
 *
 * Blocking primitives shared by the lifecycle manager. Every user process
 * runs on its own host thread, so waiting is plain condvar parking.
 */

mod semaphore;

pub use semaphore::Semaphore;
