//! Group/item rows and their membership edges.
//!
//! All writer operations run inside one transaction per logical operation;
//! a failed transaction leaves the store exactly as before the call. The
//! two halves of a delete have different failure tolerance: edge removal is
//! transactional and always committed, orphan row removal waits until the
//! caller has confirmed the blob is gone.

use super::connection::MetaDb;
use crate::Error;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// One logical cacheable unit, typically one article.
///
/// Exists iff the user asked for that unit to be available offline. A group
/// with zero items is in progress, not an error.
#[derive(Debug, Clone)]
pub struct CacheGroup {
    pub key: String,
    pub created_at: String,
}

/// One cached blob: an HTML document, a stylesheet, a script, or one image
/// variant. Shared across groups when articles reference the same asset.
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub key: String,
    pub created_at: String,
}

impl MetaDb {
    /// Look up a group row by key. Read-only.
    pub async fn find_group(&self, key: &str) -> Result<Option<CacheGroup>, Error> {
        let key = key.to_string();
        self.reader
            .call(move |conn| -> Result<Option<CacheGroup>, Error> {
                let result = conn.query_row(
                    "SELECT key, created_at FROM cache_groups WHERE key = ?1",
                    params![key],
                    |row| Ok(CacheGroup { key: row.get(0)?, created_at: row.get(1)? }),
                );
                match result {
                    Ok(g) => Ok(Some(g)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Look up an item row by key. Read-only.
    pub async fn find_item(&self, key: &str) -> Result<Option<CacheItem>, Error> {
        let key = key.to_string();
        self.reader
            .call(move |conn| -> Result<Option<CacheItem>, Error> {
                let result = conn.query_row(
                    "SELECT key, created_at FROM cache_items WHERE key = ?1",
                    params![key],
                    |row| Ok(CacheItem { key: row.get(0)?, created_at: row.get(1)? }),
                );
                match result {
                    Ok(i) => Ok(Some(i)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Whether a group row exists. The backing query for `is_cached`.
    pub async fn group_exists(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.reader
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM cache_groups WHERE key = ?1)",
                        params![key],
                        |row| row.get(0),
                    )
                    .map_err(Error::from)?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Create both rows if absent, then add the membership edge.
    ///
    /// Idempotent: re-linking an existing edge is a no-op. The whole
    /// operation is one transaction, so concurrent saves for one article
    /// can never observe a half-linked state.
    pub async fn link_item_to_group(&self, item_key: &str, group_key: &str) -> Result<(), Error> {
        let item_key = item_key.to_string();
        let group_key = group_key.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO cache_groups (key, created_at) VALUES (?1, ?2)",
                    params![group_key, now],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO cache_items (key, created_at) VALUES (?1, ?2)",
                    params![item_key, now],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO cache_group_items (group_key, item_key) VALUES (?1, ?2)",
                    params![group_key, item_key],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Remove the group row and every edge to it; return the keys of items
    /// left with zero owning groups.
    ///
    /// Orphan item rows are NOT deleted here. Their removal waits for the
    /// caller to confirm blob deletion, so a metadata row can never outlive
    /// its blob the wrong way round.
    pub async fn unlink_and_collect_orphans(&self, group_key: &str) -> Result<Vec<String>, Error> {
        let group_key = group_key.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;

                let orphans: Vec<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT item_key FROM cache_group_items
                         WHERE group_key = ?1
                         AND item_key NOT IN (
                             SELECT item_key FROM cache_group_items WHERE group_key != ?1
                         )",
                    )?;
                    let rows = stmt.query_map(params![group_key], |row| row.get::<_, String>(0))?;
                    rows.collect::<Result<_, _>>()?
                };

                // Edges cascade with the group row.
                tx.execute("DELETE FROM cache_groups WHERE key = ?1", params![group_key])?;
                tx.commit()?;
                Ok(orphans)
            })
            .await
            .map_err(Error::from)
    }

    /// Remove an item row once its blob is confirmed gone.
    pub async fn delete_item(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM cache_items WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Keys of items with zero owning groups, for the cleanup sweep.
    pub async fn orphaned_item_keys(&self) -> Result<Vec<String>, Error> {
        self.reader
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key FROM cache_items
                     WHERE key NOT IN (SELECT item_key FROM cache_group_items)",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                Ok(rows.collect::<Result<_, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Item keys linked to a group, sorted for stable assertions.
    pub async fn item_keys_in_group(&self, group_key: &str) -> Result<Vec<String>, Error> {
        let group_key = group_key.to_string();
        self.reader
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT item_key FROM cache_group_items WHERE group_key = ?1 ORDER BY item_key",
                )?;
                let rows = stmt.query_map(params![group_key], |row| row.get::<_, String>(0))?;
                Ok(rows.collect::<Result<_, _>>()?)
            })
            .await
            .map_err(Error::from)
    }

    /// Group keys owning an item, sorted for stable assertions.
    pub async fn group_keys_for_item(&self, item_key: &str) -> Result<Vec<String>, Error> {
        let item_key = item_key.to_string();
        self.reader
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT group_key FROM cache_group_items WHERE item_key = ?1 ORDER BY group_key",
                )?;
                let rows = stmt.query_map(params![item_key], |row| row.get::<_, String>(0))?;
                Ok(rows.collect::<Result<_, _>>()?)
            })
            .await
            .map_err(Error::from)
    }
}
