/*!
 * Supplemental Page Table
 * Per-process record of every virtual page the process may touch
 */

use super::page::Page;
use super::types::{VmError, VmResult};
use crate::core::types::{vpn_to_addr, Vpn};
use ahash::RandomState;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SupplementalPageTable {
    pages: HashMap<Vpn, Page, RandomState>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page; fails if its vpn is already known
    pub fn insert(&mut self, page: Page) -> VmResult<()> {
        if self.pages.contains_key(&page.vpn) {
            return Err(VmError::AlreadyMapped(vpn_to_addr(page.vpn)));
        }
        self.pages.insert(page.vpn, page);
        Ok(())
    }

    pub fn find(&self, vpn: Vpn) -> Option<&Page> {
        self.pages.get(&vpn)
    }

    pub fn find_mut(&mut self, vpn: Vpn) -> Option<&mut Page> {
        self.pages.get_mut(&vpn)
    }

    pub fn contains(&self, vpn: Vpn) -> bool {
        self.pages.contains_key(&vpn)
    }

    /// Detach a page; the caller releases whatever backs it
    pub(crate) fn take(&mut self, vpn: Vpn) -> Option<Page> {
        self.pages.remove(&vpn)
    }

    /// Detach every page
    pub(crate) fn drain(&mut self) -> Vec<Page> {
        self.pages.drain().map(|(_, page)| page).collect()
    }

    /// Known vpns in ascending order
    pub fn vpns(&self) -> Vec<Vpn> {
        let mut vpns: Vec<Vpn> = self.pages.keys().copied().collect();
        vpns.sort_unstable();
        vpns
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    pub fn resident_count(&self) -> usize {
        self.pages.values().filter(|page| page.is_resident()).count()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
