use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::io::AsyncWriteExt;

use crate::config::{validate_identifier, Config, TableNames};
use crate::handlers::encode_target_rows;
use crate::models::*;
use crate::storage::{ReplaceCounts, TableRole, WarehouseStore};

// Rows per COPY message when bulk-writing the temp table
const COPY_IN_BATCH: usize = 10_000;

// $1 = first instant of the window (NULL when unbounded), $2 = first instant after it, $3 = customer list
const WINDOW_PREDICATE: &str = "(((modified_date >= created_date) \
     AND ($1::timestamp IS NULL OR modified_date >= $1::timestamp) \
     AND modified_date < $2::timestamp) \
  OR (($1::timestamp IS NULL OR created_date >= $1::timestamp) \
     AND created_date < $2::timestamp)) \
  AND customer_list_id = $3";

// Same character set `staging_safe_text` replaces in process
fn line_safe(expr: &str) -> String {
    format!(r"translate({}, E'\t\r\n\\', '    ')", expr)
}

/// PostgreSQL-backed [`WarehouseStore`]. Bulk transfers go through `COPY`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    tables: TableNames,
    segment: i32,
}

impl PgStore {
    pub fn new(pool: PgPool, tables: TableNames, segment: i32) -> Result<Self> {
        for name in [&tables.source, &tables.staging, &tables.temp, &tables.target] {
            validate_identifier(name)?;
        }
        Ok(Self { pool, tables, segment })
    }

    pub async fn connect(cfg: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.database_max_connections)
            .connect(&cfg.database_url)
            .await?;
        Self::new(pool, cfg.tables.clone(), cfg.customer_list_id)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self, role: TableRole) -> &str {
        match role {
            TableRole::Staging => &self.tables.staging,
            TableRole::Temp => &self.tables.temp,
            TableRole::Target => &self.tables.target,
        }
    }
}

#[async_trait]
impl WarehouseStore for PgStore {
    async fn count_candidates(&self, window: &RunWindow) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", self.tables.source, WINDOW_PREDICATE);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(window.lower_start())
            .bind(window.upper_exclusive())
            .bind(self.segment)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn drop_table(&self, role: TableRole) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.table(role));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn create_table(&self, role: TableRole, if_absent: bool) -> Result<bool> {
        let name = self.table(role);
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        if exists && if_absent {
            return Ok(false);
        }
        let sql = format!("CREATE TABLE {} {}", name, role.schema());
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(true)
    }

    async fn populate_staging(&self, window: &RunWindow) -> Result<u64> {
        let sql = format!(
            "INSERT INTO {} (id, name) SELECT {}, {} FROM {} WHERE {}",
            self.tables.staging,
            line_safe("customer_id::text"),
            line_safe(
                "SUBSTRING(COALESCE(first_name, '') || ' ' || COALESCE(middle_name, '') || ' ' || COALESCE(last_name, '') FROM 1 FOR 50)"
            ),
            self.tables.source,
            WINDOW_PREDICATE
        );
        let result = sqlx::query(&sql)
            .bind(window.lower_start())
            .bind(window.upper_exclusive())
            .bind(self.segment)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Text-format export. Staging values never hold tab, CR, LF or backslash
    /// (see `populate_staging`), so each row is exactly one unescaped line.
    async fn export_staging(&self, path: &Path) -> Result<u64> {
        let statement = format!("COPY {} (id, name) TO STDOUT", self.tables.staging);
        let mut conn = self.pool.acquire().await?;
        let mut stream = conn.copy_out_raw(&statement).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut lines: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            lines += chunk.iter().filter(|b| **b == b'\n').count() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(lines)
    }

    async fn bulk_write_temp(&self, entries: &[TargetTableEntry]) -> Result<u64> {
        if entries.is_empty() {
            return Ok(0);
        }
        let statement = format!(
            "COPY {} (customer_id, ethnicity, assigned_on) FROM STDIN WITH (FORMAT csv, DELIMITER E'\\t')",
            self.tables.temp
        );
        let mut conn = self.pool.acquire().await?;
        let mut copy = conn.copy_in_raw(&statement).await?;
        for batch in entries.chunks(COPY_IN_BATCH) {
            let payload = encode_target_rows(batch)?;
            let sent = copy.send(payload).await.map(|_| ());
            if let Err(e) = sent {
                // Leave the connection usable for the pool
                let _ = copy.abort(e.to_string()).await;
                return Err(e.into());
            }
        }
        Ok(copy.finish().await?)
    }

    async fn count_rows(&self, role: TableRole) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table(role));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn replace_from_temp(&self, atomic: bool) -> Result<ReplaceCounts> {
        let delete_sql = format!(
            "DELETE FROM {} WHERE customer_id IN (SELECT customer_id FROM {})",
            self.tables.target, self.tables.temp
        );
        let insert_sql = format!(
            "INSERT INTO {} (customer_id, ethnicity, assigned_on) SELECT customer_id, ethnicity, assigned_on FROM {}",
            self.tables.target, self.tables.temp
        );

        if atomic {
            let mut tx = self.pool.begin().await?;
            let deleted = sqlx::query(&delete_sql).execute(&mut *tx).await?.rows_affected();
            let inserted = sqlx::query(&insert_sql).execute(&mut *tx).await?.rows_affected();
            tx.commit().await?;
            Ok(ReplaceCounts { deleted, inserted })
        } else {
            let deleted = sqlx::query(&delete_sql).execute(&self.pool).await?.rows_affected();
            let inserted = sqlx::query(&insert_sql).execute(&self.pool).await?.rows_affected();
            Ok(ReplaceCounts { deleted, inserted })
        }
    }
}
