//! The hierarchical context engine: merge rule, cache, resolver,
//! delegation and post-mutation sync.

pub mod cache;
pub mod delegation;
pub mod merge;
pub mod resolver;
pub mod sync;

pub use cache::{CacheKey, CacheMetrics, ContextCache, DEFAULT_CACHE_CAPACITY};
pub use delegation::DelegationEngine;
pub use resolver::ContextService;
pub use sync::ContextSyncService;
