mod schema;

pub use schema::{describe_table, list_tables, table_exists};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::ConnectionDescriptor;
use crate::error::{Error, Result};
use crate::executor::{Connector, ExecutorMode, StoreBackend};
use crate::metrics::record_sessions_opened;

/// One connect/disconnect cycle against the store. Owned by a single job and closed on every exit
/// path, either explicitly or when dropped.
pub struct Session {
    id: Uuid,
    mode: ExecutorMode,
    database: String,
    backend: Option<Box<dyn StoreBackend>>,
}

impl Session {
    /// Connects and runs a probe statement. Any failure comes back as `Error::Connection`.
    pub async fn open(connector: &dyn Connector, descriptor: &ConnectionDescriptor) -> Result<Self> {
        descriptor.validate()?;

        let id = Uuid::new_v4();
        debug!(session_id = %id, host = %descriptor.host, port = descriptor.port, "Opening session");

        let backend = connector.connect(descriptor).await.map_err(as_connection_error)?;
        if let Err(e) = backend.ping().await {
            warn!(session_id = %id, error = %e, "Probe failed, releasing connection");
            drop(backend);
            return Err(as_connection_error(e));
        }

        record_sessions_opened();
        info!(session_id = %id, database = %descriptor.database, "Session opened");
        Ok(Self {
            id,
            mode: backend.mode(),
            database: descriptor.database.clone(),
            backend: Some(backend),
        })
    }

    /// Wraps an already connected backend without probing it.
    pub fn from_backend(backend: Box<dyn StoreBackend>, database: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode: backend.mode(),
            database: database.into(),
            backend: Some(backend),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ExecutorMode {
        self.mode
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> Result<&dyn StoreBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| Error::Connection(format!("Session {} is closed", self.id)))
    }

    /// Releases the underlying handle. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.backend.take().is_some() {
            info!(session_id = %self.id, "Session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn as_connection_error(err: Error) -> Error {
    match err {
        Error::Connection(_) => err,
        other => Error::Connection(other.to_string()),
    }
}
