//! Generations: the unit of invalidation.
//!
//! Invalidation never destroys the current generation in place, because the block that asked for
//! the invalidation (e.g. a guest write to a cache-control register from inside a fallback) may
//! itself live in that generation. Instead the generation is retired and a fresh one takes its
//! place. Retired generations stay intact until the driver collects them at a point where nothing
//! is executing, which may be several invalidations later.

use std::mem;
use std::rc::Rc;

use blockjit_il::GuestAddr;

use crate::block::CacheEntry;
use crate::error::IntegrityError;
use crate::hash::HashFrontEnd;
use crate::store::{AddressStore, EntryRef};

pub struct Generation<C> {
    id: u64,
    store: AddressStore<C>,
}

impl<C> Generation<C> {
    fn new(id: u64, max_entries: usize) -> Self {
        Self {
            id,
            store: AddressStore::new(max_entries),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn store(&self) -> &AddressStore<C> {
        &self.store
    }
}

/// How [`GenerationManager::find`] resolved an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// Hash front-end hit.
    Fast,
    /// Found in the ordered store.
    Slow,
    /// Not present; a blank entry was inserted.
    Created,
}

/// Outcome of one [`GenerationManager::collect`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    pub generations: usize,
    pub entries: usize,
}

pub struct GenerationManager<C> {
    current: Generation<C>,
    index: HashFrontEnd<C>,
    retired: Vec<Generation<C>>,
    max_entries: usize,
}

impl<C> GenerationManager<C> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            current: Generation::new(0, max_entries),
            index: HashFrontEnd::new(),
            retired: Vec::new(),
            max_entries,
        }
    }

    pub fn current(&self) -> &Generation<C> {
        &self.current
    }

    pub fn index(&self) -> &HashFrontEnd<C> {
        &self.index
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    pub fn find(
        &mut self,
        addr: GuestAddr,
        make: impl FnOnce(GuestAddr) -> CacheEntry<C>,
    ) -> Result<(EntryRef<C>, Lookup), IntegrityError> {
        if let Some(entry) = self.index.lookup(addr) {
            return Ok((Rc::clone(entry), Lookup::Fast));
        }
        let (entry, created) = self.current.store.find_or_create(addr, make)?;
        self.index.remember(addr, &entry);
        Ok((entry, if created { Lookup::Created } else { Lookup::Slow }))
    }

    /// Ordered-store lookup that leaves the front-end untouched.
    pub fn find_slow(
        &mut self,
        addr: GuestAddr,
        make: impl FnOnce(GuestAddr) -> CacheEntry<C>,
    ) -> Result<(EntryRef<C>, Lookup), IntegrityError> {
        let (entry, created) = self.current.store.find_or_create(addr, make)?;
        Ok((entry, if created { Lookup::Created } else { Lookup::Slow }))
    }

    /// Moves the current generation onto the retired list and starts an empty one.
    pub fn retire(&mut self) -> Result<(), IntegrityError> {
        self.retired
            .try_reserve(1)
            .map_err(|_| IntegrityError::AllocFailed("retired generation list"))?;
        let next = Generation::new(self.current.id + 1, self.max_entries);
        let old = mem::replace(&mut self.current, next);
        tracing::debug!(
            generation = old.id,
            entries = old.store.len(),
            retired = self.retired.len() + 1,
            "retiring translation cache generation"
        );
        self.retired.push(old);
        self.index.reset();
        Ok(())
    }

    /// Tears down every retired generation.
    ///
    /// Only call this when no block from a retired generation is on the call stack.
    pub fn collect(&mut self) -> GcReport {
        let mut report = GcReport::default();
        for mut generation in self.retired.drain(..) {
            let entries = generation.store.teardown();
            tracing::trace!(generation = generation.id, entries, "collected generation");
            report.generations += 1;
            report.entries += entries;
        }
        report
    }
}
