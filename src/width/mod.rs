//! # Label Width Resolution
//!
//! Maps the code printed on (or stored in the RFID tag of) a label roll to the
//! label's physical width in millimeters.
//!
//! ## Lookup Order
//!
//! ```text
//! code ──► WidthCache::get ──hit──► width
//!              │
//!             miss
//!              ▼
//!        WidthResolver (remote) ──ok──► WidthCache::put ──► width
//!              │
//!             err ──► WidthError
//! ```
//!
//! ## Implementations
//!
//! | Type | Role |
//! |------|------|
//! | [`CachedWidthResolver`] | cache first, remote on miss |
//! | [`cloud::CloudTemplateLookup`] | vendor template service over HTTPS |
//! | [`cache::JsonFileCache`] | persistent cache in a JSON file |
//! | [`cache::MemoryCache`] | process-local cache |
//! | [`FixedWidth`] | same width for every code (offline use) |

pub mod cache;
pub mod cloud;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::WidthError;

pub use cache::{JsonFileCache, MemoryCache};
pub use cloud::CloudTemplateLookup;

/// Resolves a label code to a width in millimeters.
#[async_trait]
pub trait WidthResolver: Send + Sync {
    async fn resolve_width(&self, code: &str) -> Result<u32, WidthError>;
}

/// Stores resolved widths by label code.
#[async_trait]
pub trait WidthCache: Send + Sync {
    async fn get(&self, code: &str) -> Option<u32>;

    async fn put(&self, code: &str, width_mm: u32) -> Result<(), WidthError>;
}

/// # Cached Width Resolver
///
/// Answers from `cache` when it can, otherwise asks `remote` and stores the
/// answer. A failed store is logged; the width is still returned.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use labelwire::width::{CachedWidthResolver, FixedWidth, MemoryCache, WidthCache, WidthResolver};
///
/// let resolver = CachedWidthResolver::new(MemoryCache::default(), FixedWidth(12));
/// assert_eq!(resolver.resolve_width("6972842743596").await.unwrap(), 12);
/// assert_eq!(resolver.cache().get("6972842743596").await, Some(12));
/// # }
/// ```
pub struct CachedWidthResolver<C, R> {
    cache: C,
    remote: R,
}

impl<C: WidthCache, R: WidthResolver> CachedWidthResolver<C, R> {
    pub fn new(cache: C, remote: R) -> Self {
        Self { cache, remote }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }
}

#[async_trait]
impl<C: WidthCache, R: WidthResolver> WidthResolver for CachedWidthResolver<C, R> {
    async fn resolve_width(&self, code: &str) -> Result<u32, WidthError> {
        if let Some(width) = self.cache.get(code).await {
            debug!(code, width, "width cache hit");
            return Ok(width);
        }

        let width = self.remote.resolve_width(code).await?;
        info!(code, width, "resolved label width");
        if let Err(e) = self.cache.put(code, width).await {
            warn!(code, error = %e, "failed to cache label width");
        }
        Ok(width)
    }
}

/// Resolves every code to the same width.
#[derive(Debug, Clone, Copy)]
pub struct FixedWidth(pub u32);

#[async_trait]
impl WidthResolver for FixedWidth {
    async fn resolve_width(&self, _code: &str) -> Result<u32, WidthError> {
        Ok(self.0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Remote that counts calls and fails for unknown codes.
    #[derive(Default, Clone)]
    struct CountingRemote {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl WidthResolver for CountingRemote {
        async fn resolve_width(&self, code: &str) -> Result<u32, WidthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match code {
                "6972842743596" => Ok(30),
                other => Err(WidthError::NotFound(other.to_string())),
            }
        }
    }

    /// Cache whose writes always fail.
    struct ReadOnlyCache;

    #[async_trait]
    impl WidthCache for ReadOnlyCache {
        async fn get(&self, _code: &str) -> Option<u32> {
            None
        }
        async fn put(&self, _code: &str, _width_mm: u32) -> Result<(), WidthError> {
            Err(WidthError::Cache("read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let remote = CountingRemote::default();
        let resolver = CachedWidthResolver::new(MemoryCache::default(), remote.clone());

        assert_eq!(resolver.resolve_width("6972842743596").await, Ok(30));
        assert_eq!(resolver.resolve_width("6972842743596").await, Ok(30));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_not_cached() {
        let remote = CountingRemote::default();
        let resolver = CachedWidthResolver::new(MemoryCache::default(), remote.clone());

        assert_eq!(
            resolver.resolve_width("unknown").await,
            Err(WidthError::NotFound("unknown".to_string()))
        );
        assert_eq!(resolver.cache().get("unknown").await, None);
        assert!(resolver.resolve_width("unknown").await.is_err());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_resolves() {
        let resolver = CachedWidthResolver::new(ReadOnlyCache, CountingRemote::default());
        assert_eq!(resolver.resolve_width("6972842743596").await, Ok(30));
    }

    #[tokio::test]
    async fn test_fixed_width() {
        assert_eq!(FixedWidth(40).resolve_width("anything").await, Ok(40));
    }
}
