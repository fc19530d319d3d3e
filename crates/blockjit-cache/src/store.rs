use std::collections::BTreeMap;
use std::rc::Rc;

use blockjit_il::GuestAddr;

use crate::block::CacheEntry;
use crate::error::IntegrityError;

/// Shared handle to a cache entry. Holding one keeps the block alive even after its generation
/// has been collected.
pub type EntryRef<C> = Rc<CacheEntry<C>>;

/// Ordered map from guest address to entry; the slow path behind [`crate::HashFrontEnd`].
pub struct AddressStore<C> {
    entries: BTreeMap<GuestAddr, EntryRef<C>>,
    max_entries: usize,
}

impl<C> AddressStore<C> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, addr: GuestAddr) -> Option<&EntryRef<C>> {
        self.entries.get(&addr)
    }

    /// Returns the entry for `addr`, inserting `make(addr)` if there is none. The flag is `true`
    /// when the entry was created by this call.
    pub fn find_or_create(
        &mut self,
        addr: GuestAddr,
        make: impl FnOnce(GuestAddr) -> CacheEntry<C>,
    ) -> Result<(EntryRef<C>, bool), IntegrityError> {
        if let Some(entry) = self.entries.get(&addr) {
            return Ok((Rc::clone(entry), false));
        }
        if self.entries.len() >= self.max_entries {
            tracing::error!(
                max = self.max_entries,
                "translation cache entry ceiling exceeded at {addr:#010x}"
            );
            return Err(IntegrityError::EntryCeiling {
                addr,
                max: self.max_entries,
            });
        }
        let entry = Rc::new(make(addr));
        self.entries.insert(addr, Rc::clone(&entry));
        Ok((entry, true))
    }

    /// Drops every entry and returns how many there were. Entries still referenced elsewhere
    /// live on until their last handle goes away.
    pub fn teardown(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}
