use std::sync::Arc;

use crate::cache::ItemCache;
use crate::config::Config;
use crate::db::DbPool;
use crate::pages::PageServer;
use crate::scheduler::ImportScheduler;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DbPool,
    pub scheduler: Arc<ImportScheduler>,
    pub cache: Arc<ItemCache>,
    pub pages: PageServer,
}

impl AppState {
    /// Wire up the shared services. Spawns the import workers, so it must
    /// run inside a Tokio runtime.
    pub fn new(config: Config, db: DbPool) -> Self {
        let cache = Arc::new(ItemCache::new());
        let scheduler = ImportScheduler::start(db.clone(), &config, Arc::clone(&cache));
        let pages = PageServer::new(&config.reader);
        Self {
            config: Arc::new(config),
            db,
            scheduler,
            cache,
            pages,
        }
    }
}
