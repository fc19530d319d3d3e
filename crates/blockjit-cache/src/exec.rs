//! Reference driver loop on top of [`TranslationCache`].

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use blockjit_il::{ExecContext, GuestAddr, IlBlock};

use crate::cache::TranslationCache;
use crate::error::JitError;

/// A decoded block and its estimated cost in guest cycles.
pub struct Translation<C> {
    pub block: IlBlock<C>,
    pub cycle_count: u32,
}

/// Guest decoder. Called once per freshly created cache entry.
pub trait Translator<C> {
    type Error: fmt::Display;

    fn translate(&mut self, cpu: &mut C, addr: GuestAddr) -> Result<Translation<C>, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockExit {
    pub entry: GuestAddr,
    pub next: GuestAddr,
    pub cycles: u32,
}

/// Drives blocks through a shared cache.
///
/// The cache sits behind `Rc<RefCell<_>>` so that CPU-side code (typically the fallback handler
/// for a cache-control register write) can hold a clone and call
/// [`TranslationCache::invalidate_all`] while a block is running. The dispatcher never keeps the
/// cache borrowed across block execution.
pub struct ExecDispatcher<C, T> {
    cache: Rc<RefCell<TranslationCache<C>>>,
    translator: T,
}

impl<C, T> ExecDispatcher<C, T>
where
    C: ExecContext + 'static,
    T: Translator<C>,
{
    pub fn new(cache: Rc<RefCell<TranslationCache<C>>>, translator: T) -> Self {
        Self { cache, translator }
    }

    pub fn cache(&self) -> &Rc<RefCell<TranslationCache<C>>> {
        &self.cache
    }

    pub fn translator_mut(&mut self) -> &mut T {
        &mut self.translator
    }

    /// Executes the block at `pc`, translating it first if needed, then collects retired
    /// generations now that no block is running. Collection also happens when the block fails.
    pub fn step(&mut self, cpu: &mut C, pc: GuestAddr) -> Result<BlockExit, JitError> {
        let entry = self.cache.borrow_mut().find(pc)?;
        if !entry.is_compiled() {
            let translation = self
                .translator
                .translate(cpu, pc)
                .map_err(|err| JitError::Translate {
                    addr: pc,
                    reason: err.to_string(),
                })?;
            self.cache
                .borrow()
                .compile_into(&entry, &translation.block, translation.cycle_count)?;
        }

        let result = entry.execute(cpu);
        let cycles = entry.cycle_count();
        drop(entry);

        // The block has returned, faulted or not, so nothing retired is on the stack.
        let mut cache = self.cache.borrow_mut();
        if cache.retired_len() != 0 {
            cache.garbage_collect();
        }
        let next = result.map_err(|err| JitError::from_exec(pc, err))?;
        Ok(BlockExit {
            entry: pc,
            next,
            cycles,
        })
    }

    /// Runs `blocks` blocks starting at `pc` and returns the PC after the last one.
    pub fn run_blocks(
        &mut self,
        cpu: &mut C,
        mut pc: GuestAddr,
        blocks: u64,
    ) -> Result<GuestAddr, JitError> {
        for _ in 0..blocks {
            pc = self.step(cpu, pc)?.next;
        }
        Ok(pc)
    }
}
