/// Maximum number of entries one cache generation may hold before the cache assumes its
/// invalidation policy is broken.
///
/// A healthy guest resets the cache (e.g. via a cache-control register write) long before
/// reaching this; hitting it means the cache keeps creating entries it can't find again.
pub const MAX_ENTRIES: usize = 1024 * 1024;

/// Execution backend used for every block of one cache instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// Tag-checked interpreter over the instruction stream.
    #[default]
    Interpreter,
    /// Closure-threaded code with slot kinds verified at compile time.
    Threaded,
}

/// Read once when the cache is constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub backend: Backend,
    /// Entry ceiling per generation; see [`MAX_ENTRIES`].
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Interpreter,
            max_entries: MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }
}
