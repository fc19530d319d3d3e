use core::cell::{Cell, RefCell};
use core::fmt;

use blockjit_il::{ExecContext, GuestAddr, IlBlock};

use crate::config::Backend;
use crate::error::{ExecError, IntegrityError};
use crate::interp::IntpBlock;
use crate::threaded::ThreadedBlock;

/// A block in the representation of the cache's backend. One cache never mixes variants.
pub enum CompiledBlock<C> {
    Interp(IntpBlock<C>),
    Threaded(ThreadedBlock<C>),
}

impl<C> CompiledBlock<C> {
    pub fn blank(backend: Backend) -> Self {
        match backend {
            Backend::Interpreter => Self::Interp(IntpBlock::blank()),
            Backend::Threaded => Self::Threaded(ThreadedBlock::blank()),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Interp(_) => Backend::Interpreter,
            Self::Threaded(_) => Backend::Threaded,
        }
    }

    pub fn inst_count(&self) -> usize {
        match self {
            Self::Interp(b) => b.inst_count(),
            Self::Threaded(b) => b.inst_count(),
        }
    }

    pub fn cycle_count(&self) -> u32 {
        match self {
            Self::Interp(b) => b.cycle_count(),
            Self::Threaded(b) => b.cycle_count(),
        }
    }

    pub fn slot_count(&self) -> usize {
        match self {
            Self::Interp(b) => b.slot_count(),
            Self::Threaded(b) => b.slot_count(),
        }
    }
}

impl<C: ExecContext + 'static> CompiledBlock<C> {
    pub fn compile(
        backend: Backend,
        il: &IlBlock<C>,
        cycle_count: u32,
    ) -> Result<Self, IntegrityError> {
        Ok(match backend {
            Backend::Interpreter => Self::Interp(IntpBlock::compile(il, cycle_count)),
            Backend::Threaded => Self::Threaded(ThreadedBlock::compile(il, cycle_count)?),
        })
    }

    pub fn execute(&self, entry: GuestAddr, cpu: &mut C) -> Result<GuestAddr, ExecError> {
        match self {
            Self::Interp(b) => b.execute(entry, cpu),
            Self::Threaded(b) => b.execute(entry, cpu),
        }
    }
}

/// One cache slot: a guest address and the block compiled for it.
///
/// Entries are created blank on a lookup miss. The driver compiles into a blank entry exactly once
/// before executing it; after that the block is immutable for the lifetime of the entry.
pub struct CacheEntry<C> {
    addr: GuestAddr,
    compiled: Cell<bool>,
    block: RefCell<CompiledBlock<C>>,
}

impl<C> fmt::Debug for CacheEntry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("addr", &format_args!("{:#010x}", self.addr))
            .field("compiled", &self.compiled.get())
            .finish_non_exhaustive()
    }
}

impl<C> CacheEntry<C> {
    pub fn blank(addr: GuestAddr, backend: Backend) -> Self {
        Self {
            addr,
            compiled: Cell::new(false),
            block: RefCell::new(CompiledBlock::blank(backend)),
        }
    }

    pub fn addr(&self) -> GuestAddr {
        self.addr
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.get()
    }

    pub fn backend(&self) -> Backend {
        self.block.borrow().backend()
    }

    pub fn inst_count(&self) -> usize {
        self.block.borrow().inst_count()
    }

    pub fn cycle_count(&self) -> u32 {
        self.block.borrow().cycle_count()
    }

    pub fn slot_count(&self) -> usize {
        self.block.borrow().slot_count()
    }

    /// Runs `f` against the compiled block, e.g. to inspect interpreter slots.
    pub fn with_block<R>(&self, f: impl FnOnce(&CompiledBlock<C>) -> R) -> R {
        f(&self.block.borrow())
    }
}

impl<C: ExecContext + 'static> CacheEntry<C> {
    pub(crate) fn compile(&self, il: &IlBlock<C>, cycle_count: u32) -> Result<(), IntegrityError> {
        if self.compiled.get() {
            return Err(IntegrityError::AlreadyCompiled { addr: self.addr });
        }
        let mut block = self
            .block
            .try_borrow_mut()
            .map_err(|_| IntegrityError::BlockBusy { addr: self.addr })?;
        let backend = block.backend();
        *block = CompiledBlock::compile(backend, il, cycle_count)?;
        self.compiled.set(true);
        Ok(())
    }

    /// Executes the block and returns the next guest address.
    ///
    /// Does not touch the cache, so a fallback handler may invalidate the cache while this runs;
    /// the entry stays alive for as long as the caller holds it.
    pub fn execute(&self, cpu: &mut C) -> Result<GuestAddr, ExecError> {
        if !self.compiled.get() {
            return Err(IntegrityError::NotCompiled { addr: self.addr }.into());
        }
        let block = self
            .block
            .try_borrow()
            .map_err(|_| IntegrityError::BlockBusy { addr: self.addr })?;
        block.execute(self.addr, cpu)
    }
}
