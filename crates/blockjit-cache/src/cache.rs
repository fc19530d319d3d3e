use blockjit_il::{ExecContext, GuestAddr, IlBlock};

use crate::block::CacheEntry;
use crate::config::{Backend, CacheConfig};
use crate::error::{ExecError, IntegrityError};
use crate::generation::{GcReport, GenerationManager, Lookup};
use crate::store::EntryRef;

/// Lookup and reclamation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub fast_hits: u64,
    pub slow_hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub generations_collected: u64,
    pub entries_collected: u64,
}

/// Translation cache: guest address → compiled block, with whole-cache invalidation.
///
/// Typical driver loop:
///
/// 1. [`Self::find`] the entry for the current PC;
/// 2. if it is not [`CacheEntry::is_compiled`], translate the block and [`Self::compile_into`] it;
/// 3. [`Self::execute`] it to get the next PC;
/// 4. at a point where no block is running, [`Self::garbage_collect`].
///
/// [`Self::invalidate_all`] may be called at any time, including from a fallback handler of the
/// block that is currently executing.
pub struct TranslationCache<C> {
    config: CacheConfig,
    generations: GenerationManager<C>,
    stats: CacheStats,
}

impl<C> TranslationCache<C> {
    pub fn new(config: CacheConfig) -> Self {
        tracing::debug!(
            backend = ?config.backend,
            max_entries = config.max_entries,
            "creating translation cache"
        );
        Self {
            generations: GenerationManager::new(config.max_entries),
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> Backend {
        self.config.backend
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Live entries in the current generation.
    pub fn len(&self) -> usize {
        self.generations.current().store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.generations.current().id()
    }

    pub fn retired_len(&self) -> usize {
        self.generations.retired_len()
    }

    pub fn generations(&self) -> &GenerationManager<C> {
        &self.generations
    }

    /// Returns the entry for `addr`, creating a blank one on a miss.
    pub fn find(&mut self, addr: GuestAddr) -> Result<EntryRef<C>, IntegrityError> {
        let backend = self.config.backend;
        let (entry, lookup) = self
            .generations
            .find(addr, |addr| CacheEntry::blank(addr, backend))?;
        self.record(lookup, addr);
        Ok(entry)
    }

    /// Like [`Self::find`], but skips the hash front-end in both directions.
    pub fn find_slow(&mut self, addr: GuestAddr) -> Result<EntryRef<C>, IntegrityError> {
        let backend = self.config.backend;
        let (entry, lookup) = self
            .generations
            .find_slow(addr, |addr| CacheEntry::blank(addr, backend))?;
        self.record(lookup, addr);
        Ok(entry)
    }

    fn record(&mut self, lookup: Lookup, addr: GuestAddr) {
        match lookup {
            Lookup::Fast => self.stats.fast_hits += 1,
            Lookup::Slow => self.stats.slow_hits += 1,
            Lookup::Created => {
                self.stats.misses += 1;
                tracing::trace!(generation = self.generation(), "new cache entry at {addr:#010x}");
            }
        }
    }

    /// Retires the current generation. Nothing is freed until [`Self::garbage_collect`].
    pub fn invalidate_all(&mut self) -> Result<(), IntegrityError> {
        self.generations.retire()?;
        self.stats.invalidations += 1;
        Ok(())
    }

    /// Frees every retired generation.
    ///
    /// Must only be called when no block from a retired generation is executing. Entries the
    /// caller still holds an [`EntryRef`] to survive until that handle is dropped.
    pub fn garbage_collect(&mut self) -> GcReport {
        let report = self.generations.collect();
        self.stats.generations_collected += report.generations as u64;
        self.stats.entries_collected += report.entries as u64;
        report
    }
}

impl<C: ExecContext + 'static> TranslationCache<C> {
    /// Compiles `il` into a freshly created entry. Each entry is compiled exactly once.
    pub fn compile_into(
        &self,
        entry: &CacheEntry<C>,
        il: &IlBlock<C>,
        cycle_count: u32,
    ) -> Result<(), IntegrityError> {
        entry.compile(il, cycle_count)
    }

    /// Runs `entry` against `cpu`. Takes no cache borrow so the block may re-enter the cache.
    pub fn execute(entry: &CacheEntry<C>, cpu: &mut C) -> Result<GuestAddr, ExecError> {
        entry.execute(cpu)
    }
}

impl<C> Default for TranslationCache<C> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
