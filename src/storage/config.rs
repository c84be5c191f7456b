use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Connection settings for the SQLite store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    /// Create the database file when it does not exist yet
    pub create_if_missing: bool,
    /// Upper bound on waiting for the write lock or a pooled connection
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            create_if_missing: false,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}
