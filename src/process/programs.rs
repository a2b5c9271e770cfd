/*!
 * Program Table
 * Native handlers standing in for user machine code, keyed by entry address
 */

use super::context::UserContext;
use super::types::{Control, UserResult};
use crate::core::types::Address;
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;

/// Code run when a process enters user mode at an address
pub type UserEntry = Arc<dyn Fn(&mut UserContext) -> UserResult<Control> + Send + Sync>;

/// Entry address -> handler
#[derive(Clone)]
pub struct ProgramTable {
    entries: Arc<DashMap<Address, UserEntry, RandomState>>,
}

impl ProgramTable {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// Install `handler` at `entry`, replacing any previous one
    pub fn register<F>(&self, entry: Address, handler: F)
    where
        F: Fn(&mut UserContext) -> UserResult<Control> + Send + Sync + 'static,
    {
        self.entries.insert(entry, Arc::new(handler));
    }

    pub fn lookup(&self, entry: Address) -> Option<UserEntry> {
        self.entries.get(&entry).map(|handler| Arc::clone(handler.value()))
    }

    pub fn unregister(&self, entry: Address) -> bool {
        self.entries.remove(&entry).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ProgramTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProgramTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}
