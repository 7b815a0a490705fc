pub mod bulk;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod filter;
pub mod models;
pub mod review;
pub mod saved_filters;
pub mod selection;
pub mod session;
pub mod sort;
pub mod store;
pub mod training;

#[cfg(test)]
mod testing;

use tracing_subscriber::EnvFilter;

pub use driver::{drive_blocking, DriverHandle, SessionDriver};
pub use error::{ErrorKind, StaleStateError, ValidationError};
pub use session::{Effect, ReviewSession, SessionError, SessionEvent, SessionNotice};
pub use store::{InMemoryItemStore, ItemStore, SqliteItemStore, StoreError};

/// Install the fmt subscriber. `RUST_LOG` wins over the default filter.
/// A no-op when the embedding application already installed one.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}

/// Open (and migrate) the SQLite store under the app data directory.
pub fn open_default_store() -> Result<SqliteItemStore, StoreError> {
    let dir = config::app_data_dir();
    std::fs::create_dir_all(&dir)
        .map_err(|e| StoreError::Unavailable(format!("{}: {e}", dir.display())))?;
    SqliteItemStore::open(&config::database_path())
}
