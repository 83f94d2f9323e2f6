//! Database connection management with pragma configuration.
//!
//! Opens the SQLite metadata database, applies the pragmas the consistency
//! contract needs (WAL mode, foreign keys), and runs migrations. Writes go
//! through one connection whose background thread serializes them; reads go
//! through a second read-only connection, so a lookup never queues behind
//! pending writer calls and WAL keeps it on the last-committed state.

use super::migrations;
use crate::Error;
use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::OpenFlags;

/// Metadata database handle.
///
/// Holds the single serialized writer connection plus a read-only
/// connection for lookups.
#[derive(Clone, Debug)]
pub struct MetaDb {
    pub(crate) conn: Connection,
    pub(crate) reader: Connection,
}

impl MetaDb {
    /// Open the database at the specified path.
    ///
    /// Creates the file (and its parent directory) if absent, applies
    /// pragmas, and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::MigrationFailed(format!("cannot create store directory: {e}")))?;
        }

        let conn = Connection::open(path.as_ref()).await.map_err(|e| Error::Database(e.into()))?;
        Self::init(&conn).await?;

        let reader = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .await
        .map_err(|e| Error::Database(e.into()))?;

        Ok(Self { conn, reader })
    }

    /// Open an in-memory database for testing.
    ///
    /// A private in-memory database is only visible to one handle, so the
    /// reader shares the writer connection here.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::init(&conn).await?;
        let reader = conn.clone();
        Ok(Self { conn, reader })
    }

    async fn init(conn: &Connection) -> Result<(), Error> {
        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA temp_store=MEMORY;
                 PRAGMA foreign_keys=ON;",
            )?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(conn).await?;

        Ok(())
    }
}
