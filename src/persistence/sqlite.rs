//! SQLite implementation of the record/config store access.
//!
//! Write paths that must pair a `client_traffics` update with a config
//! document rewrite are associated functions over a raw connection so the
//! caller can compose them inside one transaction. Read paths run on the
//! pool and are never blocked by the single writer (WAL).

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqliteConnection};

use super::models::{ClientRow, InboundRow, NewClient, StoreStats};
use super::schema::SCHEMA_SQL;
use crate::error::ManagerError;

/// Which "unlimited" dimension a query filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlimitedFilter {
    /// No expiry (`expiry_time = 0`).
    Expiry,
    /// No traffic cap (`total = 0`).
    Traffic,
    /// Neither limit set.
    Both,
}

/// SQLite-backed store over the vendor database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Opens the vendor database file, creating it (and the vendor-mirror
    /// schema) when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::StoreUnavailable`] when the file cannot be
    /// opened or the pool cannot connect.
    pub async fn connect(
        path: impl AsRef<Path>,
        max_connections: u32,
        busy_timeout_secs: u64,
    ) -> Result<Self, ManagerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ManagerError::StoreUnavailable(e.to_string()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(|e| ManagerError::StoreUnavailable(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(|e| ManagerError::StoreUnavailable(e.to_string()))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Creates the vendor-mirror tables when missing. A no-op on a live
    /// vendor database.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn ensure_schema(&self) -> Result<(), ManagerError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Checks database connectivity.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] when the store is unreachable.
    pub async fn health_check(&self) -> Result<(), ManagerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Begins a transaction for a paired record + document write.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] when a connection cannot be acquired.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, Sqlite>, ManagerError> {
        Ok(self.pool.begin().await?)
    }

    // ---- transactional write path (compose under one transaction) ----

    /// Inserts a new client row, returning the store-generated id.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Conflict`] on a duplicate email, other
    /// [`ManagerError`] variants on database failure.
    pub async fn insert_client(
        conn: &mut SqliteConnection,
        new: &NewClient,
    ) -> Result<i64, ManagerError> {
        let result = sqlx::query(
            "INSERT INTO client_traffics \
             (inbound_id, enable, email, up, down, expiry_time, total, reset) \
             VALUES (?, 1, ?, 0, 0, ?, ?, ?)",
        )
        .bind(new.inbound_id)
        .bind(&new.email)
        .bind(new.expiry_time)
        .bind(new.total)
        .bind(new.reset)
        .execute(conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Deletes a client row, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn delete_client_row(
        conn: &mut SqliteConnection,
        client_id: i64,
    ) -> Result<bool, ManagerError> {
        let result = sqlx::query("DELETE FROM client_traffics WHERE id = ?")
            .bind(client_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sets the enable flag, returning whether the row existed.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn update_enable(
        conn: &mut SqliteConnection,
        client_id: i64,
        enable: bool,
    ) -> Result<bool, ManagerError> {
        let result = sqlx::query("UPDATE client_traffics SET enable = ? WHERE id = ?")
            .bind(i64::from(enable))
            .bind(client_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sets the expiry timestamp, returning whether the row existed.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn update_expiry(
        conn: &mut SqliteConnection,
        client_id: i64,
        expiry_time: i64,
    ) -> Result<bool, ManagerError> {
        let result = sqlx::query("UPDATE client_traffics SET expiry_time = ? WHERE id = ?")
            .bind(expiry_time)
            .bind(client_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sets the traffic cap, returning whether the row existed.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn update_total(
        conn: &mut SqliteConnection,
        client_id: i64,
        total: i64,
    ) -> Result<bool, ManagerError> {
        let result = sqlx::query("UPDATE client_traffics SET total = ? WHERE id = ?")
            .bind(total)
            .bind(client_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Adds to the traffic cap without touching the counters.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn add_total(
        conn: &mut SqliteConnection,
        client_id: i64,
        additional: i64,
    ) -> Result<bool, ManagerError> {
        let result = sqlx::query("UPDATE client_traffics SET total = total + ? WHERE id = ?")
            .bind(additional)
            .bind(client_id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Zeroes the usage counters and sets a new cap.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn reset_traffic(
        conn: &mut SqliteConnection,
        client_id: i64,
        new_limit: i64,
    ) -> Result<bool, ManagerError> {
        let result =
            sqlx::query("UPDATE client_traffics SET total = ?, up = 0, down = 0 WHERE id = ?")
                .bind(new_limit)
                .bind(client_id)
                .execute(conn)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reads one client row inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn fetch_client(
        conn: &mut SqliteConnection,
        client_id: i64,
    ) -> Result<Option<ClientRow>, ManagerError> {
        let row = sqlx::query_as::<_, ClientRow>(
            "SELECT id, inbound_id, enable, email, up, down, expiry_time, total, reset \
             FROM client_traffics WHERE id = ?",
        )
        .bind(client_id)
        .fetch_optional(conn)
        .await?;
        Ok(row)
    }

    /// Reads one inbound row inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn fetch_inbound(
        conn: &mut SqliteConnection,
        inbound_id: i64,
    ) -> Result<Option<InboundRow>, ManagerError> {
        let row = sqlx::query_as::<_, InboundRow>(
            "SELECT id, remark, port, protocol, settings FROM inbounds WHERE id = ?",
        )
        .bind(inbound_id)
        .fetch_optional(conn)
        .await?;
        Ok(row)
    }

    /// Rewrites an inbound's config document column.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn update_inbound_settings(
        conn: &mut SqliteConnection,
        inbound_id: i64,
        settings: &str,
    ) -> Result<(), ManagerError> {
        sqlx::query("UPDATE inbounds SET settings = ? WHERE id = ?")
            .bind(settings)
            .bind(inbound_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    // ---- pooled read path ----

    /// Reads one client row.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn get_client(&self, client_id: i64) -> Result<Option<ClientRow>, ManagerError> {
        let row = sqlx::query_as::<_, ClientRow>(
            "SELECT id, inbound_id, enable, email, up, down, expiry_time, total, reset \
             FROM client_traffics WHERE id = ?",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Reads one client row by email.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn get_client_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ClientRow>, ManagerError> {
        let row = sqlx::query_as::<_, ClientRow>(
            "SELECT id, inbound_id, enable, email, up, down, expiry_time, total, reset \
             FROM client_traffics WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Reads one inbound row.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn get_inbound(&self, inbound_id: i64) -> Result<Option<InboundRow>, ManagerError> {
        let row = sqlx::query_as::<_, InboundRow>(
            "SELECT id, remark, port, protocol, settings FROM inbounds WHERE id = ?",
        )
        .bind(inbound_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Lists all inbounds ordered by id.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_inbounds(&self) -> Result<Vec<InboundRow>, ManagerError> {
        let rows = sqlx::query_as::<_, InboundRow>(
            "SELECT id, remark, port, protocol, settings FROM inbounds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Lists clients with pagination and an optional inbound filter and
    /// email substring search. Returns the page plus the unpaged count.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_clients(
        &self,
        inbound_id: Option<i64>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ClientRow>, i64), ManagerError> {
        let pattern = search.map(|s| format!("%{s}%"));

        let mut count_query = String::from("SELECT COUNT(*) FROM client_traffics WHERE 1=1");
        let mut page_query = String::from(
            "SELECT id, inbound_id, enable, email, up, down, expiry_time, total, reset \
             FROM client_traffics WHERE 1=1",
        );
        if inbound_id.is_some() {
            count_query.push_str(" AND inbound_id = ?");
            page_query.push_str(" AND inbound_id = ?");
        }
        if pattern.is_some() {
            count_query.push_str(" AND email LIKE ?");
            page_query.push_str(" AND email LIKE ?");
        }
        page_query.push_str(" ORDER BY id LIMIT ? OFFSET ?");

        let mut count = sqlx::query_scalar::<_, i64>(&count_query);
        let mut page = sqlx::query_as::<_, ClientRow>(&page_query);
        if let Some(id) = inbound_id {
            count = count.bind(id);
            page = page.bind(id);
        }
        if let Some(p) = &pattern {
            count = count.bind(p.clone());
            page = page.bind(p.clone());
        }
        page = page.bind(limit).bind(offset);

        let total = count.fetch_one(&self.pool).await?;
        let rows = page.fetch_all(&self.pool).await?;
        Ok((rows, total))
    }

    /// Record ids of all clients on one inbound.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn client_ids_for_inbound(
        &self,
        inbound_id: i64,
    ) -> Result<Vec<i64>, ManagerError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM client_traffics WHERE inbound_id = ? ORDER BY id",
        )
        .bind(inbound_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Clients whose expiry has passed (`expiry_time > 0 AND < now`).
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_expired(
        &self,
        now_ms: i64,
        inbound_id: Option<i64>,
    ) -> Result<Vec<ClientRow>, ManagerError> {
        let mut query = String::from(
            "SELECT id, inbound_id, enable, email, up, down, expiry_time, total, reset \
             FROM client_traffics WHERE expiry_time > 0 AND expiry_time < ?",
        );
        if inbound_id.is_some() {
            query.push_str(" AND inbound_id = ?");
        }
        query.push_str(" ORDER BY expiry_time ASC");

        let mut q = sqlx::query_as::<_, ClientRow>(&query).bind(now_ms);
        if let Some(id) = inbound_id {
            q = q.bind(id);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    /// Clients with `enable = 0`.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_disabled(
        &self,
        inbound_id: Option<i64>,
    ) -> Result<Vec<ClientRow>, ManagerError> {
        let mut query = String::from(
            "SELECT id, inbound_id, enable, email, up, down, expiry_time, total, reset \
             FROM client_traffics WHERE enable = 0",
        );
        if inbound_id.is_some() {
            query.push_str(" AND inbound_id = ?");
        }
        query.push_str(" ORDER BY email ASC");

        let mut q = sqlx::query_as::<_, ClientRow>(&query);
        if let Some(id) = inbound_id {
            q = q.bind(id);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    /// Clients that have never moved a byte (`up + down = 0`).
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_no_traffic(
        &self,
        inbound_id: Option<i64>,
    ) -> Result<Vec<ClientRow>, ManagerError> {
        let mut query = String::from(
            "SELECT id, inbound_id, enable, email, up, down, expiry_time, total, reset \
             FROM client_traffics WHERE (up + down) = 0",
        );
        if inbound_id.is_some() {
            query.push_str(" AND inbound_id = ?");
        }
        query.push_str(" ORDER BY id");

        let mut q = sqlx::query_as::<_, ClientRow>(&query);
        if let Some(id) = inbound_id {
            q = q.bind(id);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    /// Capped clients whose remaining traffic is at or below `threshold`
    /// bytes, least remaining first.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_low_traffic(
        &self,
        threshold: i64,
        inbound_id: Option<i64>,
    ) -> Result<Vec<ClientRow>, ManagerError> {
        let mut query = String::from(
            "SELECT id, inbound_id, enable, email, up, down, expiry_time, total, reset \
             FROM client_traffics WHERE total > 0 AND (total - up - down) <= ?",
        );
        if inbound_id.is_some() {
            query.push_str(" AND inbound_id = ?");
        }
        query.push_str(" ORDER BY (total - up - down) ASC");

        let mut q = sqlx::query_as::<_, ClientRow>(&query).bind(threshold);
        if let Some(id) = inbound_id {
            q = q.bind(id);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    /// Clients with no expiry, no cap, or neither.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn list_unlimited(
        &self,
        filter: UnlimitedFilter,
        inbound_id: Option<i64>,
    ) -> Result<Vec<ClientRow>, ManagerError> {
        let mut query = String::from(
            "SELECT id, inbound_id, enable, email, up, down, expiry_time, total, reset \
             FROM client_traffics WHERE ",
        );
        query.push_str(match filter {
            UnlimitedFilter::Expiry => "expiry_time = 0",
            UnlimitedFilter::Traffic => "total = 0",
            UnlimitedFilter::Both => "expiry_time = 0 AND total = 0",
        });
        if inbound_id.is_some() {
            query.push_str(" AND inbound_id = ?");
        }
        query.push_str(" ORDER BY (up + down) DESC");

        let mut q = sqlx::query_as::<_, ClientRow>(&query);
        if let Some(id) = inbound_id {
            q = q.bind(id);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    /// Aggregate counters for the whole store.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn stats(&self) -> Result<StoreStats, ManagerError> {
        let (total_clients, enabled_clients, total_upload, total_download) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                "SELECT COUNT(*), \
                        COALESCE(SUM(CASE WHEN enable = 1 THEN 1 ELSE 0 END), 0), \
                        COALESCE(SUM(up), 0), \
                        COALESCE(SUM(down), 0) \
                 FROM client_traffics",
            )
            .fetch_one(&self.pool)
            .await?;
        let total_inbounds =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM inbounds")
                .fetch_one(&self.pool)
                .await?;
        Ok(StoreStats {
            total_clients,
            enabled_clients,
            total_upload,
            total_download,
            total_inbounds,
        })
    }

    /// Inserts an inbound row. Fresh-install and test helper; live vendor
    /// databases already carry their inbounds.
    ///
    /// # Errors
    ///
    /// Returns a [`ManagerError`] on database failure.
    pub async fn insert_inbound(
        &self,
        remark: &str,
        port: i64,
        protocol: &str,
        settings: &str,
    ) -> Result<i64, ManagerError> {
        let result = sqlx::query(
            "INSERT INTO inbounds (remark, port, protocol, settings) VALUES (?, ?, ?, ?)",
        )
        .bind(remark)
        .bind(port)
        .bind(protocol)
        .bind(settings)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().ok().unwrap_or_else(|| {
            panic!("tempdir failed");
        });
        let store = SqliteStore::connect(dir.path().join("x-ui.db"), 5, 5).await;
        let Ok(store) = store else {
            panic!("store connect failed");
        };
        (store, dir)
    }

    fn new_client(inbound_id: i64, email: &str) -> NewClient {
        NewClient {
            inbound_id,
            email: email.to_string(),
            total: 0,
            expiry_time: 0,
            reset: 0,
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let (store, _dir) = temp_store().await;
        let inbound = store
            .insert_inbound("test", 10000, "vless", r#"{"clients":[]}"#)
            .await;
        let Ok(inbound_id) = inbound else {
            panic!("inbound insert failed");
        };

        let mut tx = store.begin().await.ok().unwrap_or_else(|| {
            panic!("begin failed");
        });
        let id = SqliteStore::insert_client(&mut *tx, &new_client(inbound_id, "alice")).await;
        let Ok(id) = id else {
            panic!("insert failed");
        };
        let Ok(()) = tx.commit().await else {
            panic!("commit failed");
        };

        let fetched = store.get_client(id).await;
        let Ok(Some(row)) = fetched else {
            panic!("client not found after insert");
        };
        assert_eq!(row.email, "alice");
        assert!(row.enable);
        assert_eq!(row.up, 0);
        assert_eq!(row.down, 0);
    }

    #[tokio::test]
    async fn duplicate_email_maps_to_conflict() {
        let (store, _dir) = temp_store().await;
        let Ok(inbound_id) = store
            .insert_inbound("test", 10000, "vless", r#"{"clients":[]}"#)
            .await
        else {
            panic!("inbound insert failed");
        };

        let mut tx = store.begin().await.ok().unwrap_or_else(|| {
            panic!("begin failed");
        });
        let first = SqliteStore::insert_client(&mut *tx, &new_client(inbound_id, "dup")).await;
        assert!(first.is_ok());
        let second = SqliteStore::insert_client(&mut *tx, &new_client(inbound_id, "dup")).await;
        assert!(matches!(second, Err(ManagerError::Conflict(_))));
    }

    #[tokio::test]
    async fn lifecycle_updates_report_missing_rows() {
        let (store, _dir) = temp_store().await;
        let mut tx = store.begin().await.ok().unwrap_or_else(|| {
            panic!("begin failed");
        });
        let updated = SqliteStore::update_enable(&mut *tx, 999, false).await;
        let Ok(updated) = updated else {
            panic!("update failed");
        };
        assert!(!updated);
    }

    #[tokio::test]
    async fn list_clients_paginates_and_counts() {
        let (store, _dir) = temp_store().await;
        let Ok(inbound_id) = store
            .insert_inbound("test", 10000, "trojan", r#"{"clients":[]}"#)
            .await
        else {
            panic!("inbound insert failed");
        };

        let mut tx = store.begin().await.ok().unwrap_or_else(|| {
            panic!("begin failed");
        });
        for i in 0..5 {
            let insert =
                SqliteStore::insert_client(&mut *tx, &new_client(inbound_id, &format!("u{i}")))
                    .await;
            assert!(insert.is_ok());
        }
        let Ok(()) = tx.commit().await else {
            panic!("commit failed");
        };

        let page = store.list_clients(Some(inbound_id), None, 2, 2).await;
        let Ok((rows, total)) = page else {
            panic!("list failed");
        };
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 2);

        let search = store.list_clients(None, Some("u3"), 10, 0).await;
        let Ok((rows, total)) = search else {
            panic!("search failed");
        };
        assert_eq!(total, 1);
        assert_eq!(rows.first().map(|r| r.email.clone()).as_deref(), Some("u3"));
    }

    #[tokio::test]
    async fn expired_and_low_traffic_queries_filter() {
        let (store, _dir) = temp_store().await;
        let Ok(inbound_id) = store
            .insert_inbound("test", 10000, "vmess", r#"{"clients":[]}"#)
            .await
        else {
            panic!("inbound insert failed");
        };

        let mut tx = store.begin().await.ok().unwrap_or_else(|| {
            panic!("begin failed");
        });
        let mut expired = new_client(inbound_id, "old");
        expired.expiry_time = 1_000;
        let Ok(expired_id) = SqliteStore::insert_client(&mut *tx, &expired).await else {
            panic!("insert failed");
        };
        let mut capped = new_client(inbound_id, "capped");
        capped.total = 100;
        let Ok(_capped_id) = SqliteStore::insert_client(&mut *tx, &capped).await else {
            panic!("insert failed");
        };
        let Ok(()) = tx.commit().await else {
            panic!("commit failed");
        };

        let expired_rows = store.list_expired(2_000, None).await;
        let Ok(expired_rows) = expired_rows else {
            panic!("expired query failed");
        };
        assert_eq!(expired_rows.len(), 1);
        assert_eq!(expired_rows.first().map(|r| r.id), Some(expired_id));

        // capped client has used nothing, remaining 100 <= threshold 100
        let low = store.list_low_traffic(100, None).await;
        let Ok(low) = low else {
            panic!("low traffic query failed");
        };
        assert_eq!(low.len(), 1);
        assert_eq!(low.first().map(|r| r.email.clone()).as_deref(), Some("capped"));
    }

    #[tokio::test]
    async fn stats_aggregate_counts() {
        let (store, _dir) = temp_store().await;
        let Ok(inbound_id) = store
            .insert_inbound("test", 10000, "vless", r#"{"clients":[]}"#)
            .await
        else {
            panic!("inbound insert failed");
        };
        let mut tx = store.begin().await.ok().unwrap_or_else(|| {
            panic!("begin failed");
        });
        let Ok(a) = SqliteStore::insert_client(&mut *tx, &new_client(inbound_id, "a")).await
        else {
            panic!("insert failed");
        };
        let Ok(_b) = SqliteStore::insert_client(&mut *tx, &new_client(inbound_id, "b")).await
        else {
            panic!("insert failed");
        };
        let disabled = SqliteStore::update_enable(&mut *tx, a, false).await;
        assert!(disabled.is_ok());
        let Ok(()) = tx.commit().await else {
            panic!("commit failed");
        };

        let stats = store.stats().await;
        let Ok(stats) = stats else {
            panic!("stats failed");
        };
        assert_eq!(stats.total_clients, 2);
        assert_eq!(stats.enabled_clients, 1);
        assert_eq!(stats.total_inbounds, 1);
    }
}
