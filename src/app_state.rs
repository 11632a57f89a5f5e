use crate::{
    Config,
    lifecycle::{LifecycleEngine, SharedClock},
    store::LibraryStore,
    utils::{KeyedRateLimiter, build_rate_limiter},
};
use std::sync::Arc;

pub struct AppState {
    pub store: Arc<dyn LibraryStore>,
    pub engine: LifecycleEngine,
    pub config: Config,
    pub rate_limiter: Arc<KeyedRateLimiter>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn LibraryStore>, clock: SharedClock, config: Config) -> Self {
        let engine = LifecycleEngine::new(Arc::clone(&store), clock, config.library_utc_offset);
        Self {
            store,
            engine,
            config,
            rate_limiter: build_rate_limiter(),
        }
    }
}
