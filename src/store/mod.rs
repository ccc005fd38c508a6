pub mod bootstrap;
pub mod gateway;
pub mod locks;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use gateway::{Store, StoreError, StoreResult};
pub use locks::PathLocks;
pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub http: reqwest::Client,
    pub locks: Arc<PathLocks>,
    pub config: Arc<Config>,
    /// Cancelled on graceful shutdown; in-flight refreshes observe a child token.
    pub shutdown: CancellationToken,
}
