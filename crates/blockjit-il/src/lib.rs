//! Block IL consumed by the translation cache.
//!
//! The guest decoder lowers a basic block into an [`IlBlock`]: a linear list of [`Inst`]s that
//! operate on typed, block-local slots. The cache deep-copies this descriptor when it compiles a
//! block, so the decoder is free to reuse its buffers afterwards.
//!
//! Memory operations reach guest memory through the [`MemoryInterface`] exposed by the CPU
//! context ([`ExecContext`]); anything the IL can't express is delegated to a fallback handler
//! that mutates the CPU context directly.

pub mod ir;
mod mem;

pub use ir::{
    CallFn, FallbackFn, IlBlock, IlBuilder, Inst, LoadFn, LoadFn16, SlotId, SlotKind, StoreFn,
};
pub use mem::{AccessWidth, ExecContext, FlatMemory, MemFault, MemoryInterface};

/// Guest address type used as the cache key and as the jump target of every block.
pub type GuestAddr = u32;
