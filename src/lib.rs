//! Guest block translation cache with an interpreted and a closure-threaded backend.
//!
//! See [`blockjit_cache`] for the cache itself and [`blockjit_il`] for the block IL that the
//! guest decoder produces.

pub use blockjit_cache::*;
pub use blockjit_il::{
    AccessWidth, ExecContext, FlatMemory, GuestAddr, IlBlock, IlBuilder, Inst, MemFault,
    MemoryInterface, SlotId, SlotKind,
};
