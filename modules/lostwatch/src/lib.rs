pub mod classify;
pub mod detail_cache;
pub mod normalizer;
pub mod notify;
pub mod rank_cache;
pub mod sources;
pub mod store;
pub mod sweeper;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod types;
pub mod watcher;
