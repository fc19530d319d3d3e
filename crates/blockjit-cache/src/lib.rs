//! Translation cache and execution backends for guest basic blocks.
//!
//! - [`TranslationCache`]: address → [`CacheEntry`] lookup through a direct-mapped
//!   [`HashFrontEnd`] backed by an ordered [`AddressStore`], with retire/collect invalidation
//!   handled by the [`GenerationManager`].
//! - [`interp`]: the canonical tag-checked interpreter.
//! - [`threaded`]: the alternate closure-threaded backend, chosen per cache via
//!   [`CacheConfig::backend`].
//! - [`exec`]: a reference driver loop.

mod alu;
mod block;
mod cache;
mod config;
mod error;
pub mod exec;
mod generation;
mod hash;
pub mod interp;
mod slot;
mod store;
pub mod threaded;

pub use block::{CacheEntry, CompiledBlock};
pub use cache::{CacheStats, TranslationCache};
pub use config::{Backend, CacheConfig, MAX_ENTRIES};
pub use error::{ExecError, IntegrityError, JitError, Result};
pub use exec::{BlockExit, ExecDispatcher, Translation, Translator};
pub use generation::{GcReport, Generation, GenerationManager, Lookup};
pub use hash::{HashFrontEnd, HASH_TABLE_LEN, HASH_TABLE_MASK};
pub use slot::{Slot, SlotStore};
pub use store::{AddressStore, EntryRef};

pub use blockjit_il as il;
