use crate::settings;
use crate::types::{NewFetchTime, NewMetric, PoolRow};
use crate::types::conversions::to_iso_timestamp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

/// Columns bound per `pools` row.
pub const POOL_ROW_COLUMNS: usize = 33;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

/// Rows per INSERT so no statement exceeds the bind-parameter cap.
pub const MAX_ROWS_PER_STATEMENT: usize = MAX_BIND_PARAMS / POOL_ROW_COLUMNS;

const MIGRATION_LOCK_ID: i64 = 0x444C4D4D4D494E45; // "DLMMMINE" in hex

/// Failure from a snapshot repository.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (e.g. the capture timestamp is already indexed).
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                };
            }
        }
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Storage capabilities the indexer, reconciler and data engine rely on.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Inserts a fetch-time header and returns its id.
    async fn insert_fetch_time(&self, fetch_time: &NewFetchTime) -> Result<i64, StoreError>;

    /// Inserts pool rows atomically. Returns the number of rows written.
    async fn insert_pool_rows(&self, rows: &[PoolRow]) -> Result<u64, StoreError>;

    /// Deletes a fetch-time header and, by cascade, its pool rows.
    async fn delete_fetch_time(&self, id: i64) -> Result<(), StoreError>;

    async fn fetch_time_exists(&self, timestamp: &str) -> Result<bool, StoreError>;

    /// Distinct query keys indexed for a `YYYY-MM-DD` date.
    async fn indexed_query_keys_for_date(&self, date: &str) -> Result<HashSet<String>, StoreError>;

    async fn insert_metric(&self, metric: &NewMetric) -> Result<i64, StoreError>;
}

/// Connects to Postgres, retrying with exponential backoff, and ensures the schema exists.
pub async fn connect(config: &settings::Database) -> Result<DbPool> {
    if config.url.trim().is_empty() {
        anyhow::bail!("Database URL is not configured (set MINER_DATABASE_URL or DATABASE_URL)");
    }

    let attempts = config.connect_attempts.max(1);
    // 200ms, 400ms, 800ms, ... capped at ~12.8s
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(100)
        .max_delay(Duration::from_millis(12_800))
        .map(jitter)
        .take(attempts - 1);

    let mut attempt = 0usize;
    let pool = Retry::spawn(strategy, || {
        attempt += 1;
        let current = attempt;
        let url = config.url.clone();
        let max_connections = config.max_connections;
        let acquire_timeout = Duration::from_secs(config.acquire_timeout_seconds);
        async move {
            let result: Result<DbPool> = async {
                let pool = PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&url)
                    .await?;
                initialize_database(&pool).await?;
                Ok(pool)
            }
            .await;
            match &result {
                Ok(_) => log::info!(
                    "✅ Successfully connected to database (attempt {}/{}).",
                    current,
                    attempts
                ),
                Err(e) => log::warn!(
                    "DB connect/init attempt {}/{} failed: {}",
                    current,
                    attempts,
                    e
                ),
            }
            result
        }
    })
    .await
    .context("Could not connect to database")?;

    Ok(pool)
}

/// Creates tables and indexes idempotently under an advisory lock.
pub async fn initialize_database(pool: &DbPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    log::info!("Acquiring database migration lock...");
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&mut *tx)
        .await?;

    create_tables(&mut tx).await?;

    tx.commit().await?;
    log::info!("Database initialization complete, transaction committed.");
    Ok(())
}

async fn create_tables(tx: &mut sqlx::Transaction<'_, Postgres>) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS fetch_times (
            id BIGSERIAL PRIMARY KEY,
            \"timestamp\" TEXT NOT NULL,
            date TEXT NOT NULL,
            query_key TEXT NOT NULL,
            meta_data TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT unique_timestamp UNIQUE (\"timestamp\")
        )",
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pools (
            id BIGSERIAL PRIMARY KEY,
            pair_address TEXT NOT NULL,
            chain_id TEXT NOT NULL,
            dex_id TEXT NOT NULL,
            fetch_time_id BIGINT NOT NULL REFERENCES fetch_times(id) ON DELETE CASCADE,
            base_symbol TEXT,
            quote_symbol TEXT,
            base_address TEXT,
            quote_address TEXT,
            liquidity_usd DOUBLE PRECISION NOT NULL,
            market_cap DOUBLE PRECISION NOT NULL,
            fdv DOUBLE PRECISION NOT NULL,
            pair_created_at TEXT NOT NULL,
            txns_24h BIGINT NOT NULL,
            buys_24h BIGINT NOT NULL,
            sells_24h BIGINT NOT NULL,
            volume_24h DOUBLE PRECISION NOT NULL,
            price_change_24h DOUBLE PRECISION NOT NULL,
            txns_6h BIGINT NOT NULL,
            buys_6h BIGINT NOT NULL,
            sells_6h BIGINT NOT NULL,
            volume_6h DOUBLE PRECISION NOT NULL,
            price_change_6h DOUBLE PRECISION NOT NULL,
            txns_1h BIGINT NOT NULL,
            buys_1h BIGINT NOT NULL,
            sells_1h BIGINT NOT NULL,
            volume_1h DOUBLE PRECISION NOT NULL,
            price_change_1h DOUBLE PRECISION NOT NULL,
            txns_5m BIGINT NOT NULL,
            buys_5m BIGINT NOT NULL,
            sells_5m BIGINT NOT NULL,
            volume_5m DOUBLE PRECISION NOT NULL,
            price_change_5m DOUBLE PRECISION NOT NULL,
            raw_data TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT unique_pair_address_fetch_time UNIQUE (pair_address, fetch_time_id)
        )",
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS metrics (
            id BIGSERIAL PRIMARY KEY,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            key TEXT NOT NULL,
            meta_data TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&mut **tx)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_fetch_times_date ON fetch_times (date)",
        "CREATE INDEX IF NOT EXISTS idx_fetch_times_query_key ON fetch_times (query_key)",
        "CREATE INDEX IF NOT EXISTS idx_pools_fetch_time_id_id ON pools (fetch_time_id, id)",
        "CREATE INDEX IF NOT EXISTS idx_pools_base_quote_symbols ON pools (base_symbol, quote_symbol)",
        "CREATE INDEX IF NOT EXISTS idx_pools_liquidity_usd ON pools (liquidity_usd)",
        "CREATE INDEX IF NOT EXISTS idx_pools_market_cap ON pools (market_cap)",
        "CREATE INDEX IF NOT EXISTS idx_pools_pair_created_at ON pools (pair_created_at)",
        "CREATE INDEX IF NOT EXISTS idx_pools_txns_24h ON pools (txns_24h)",
    ];
    for statement in indexes {
        sqlx::query(statement).execute(&mut **tx).await?;
    }

    Ok(())
}

/// Postgres-backed repository.
#[derive(Clone)]
pub struct PgRepository {
    pool: DbPool,
}

impl PgRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Fills null token symbol/address columns from the `raw_data` snapshot.
    pub async fn backfill_token_columns(&self) -> Result<u64, StoreError> {
        let pending: i64 = sqlx::query(
            "SELECT COUNT(id) AS count FROM pools
             WHERE base_symbol IS NULL OR quote_symbol IS NULL
                OR base_address IS NULL OR quote_address IS NULL",
        )
        .fetch_one(&self.pool)
        .await?
        .try_get("count")?;

        log::info!("Found {} pool rows with missing token columns", pending);
        if pending == 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE pools
             SET
                base_symbol = COALESCE((raw_data::json->'baseToken'->>'symbol')::text, base_symbol),
                quote_symbol = COALESCE((raw_data::json->'quoteToken'->>'symbol')::text, quote_symbol),
                base_address = COALESCE((raw_data::json->'baseToken'->>'address')::text, base_address),
                quote_address = COALESCE((raw_data::json->'quoteToken'->>'address')::text, quote_address),
                updated_at = NOW()
             WHERE base_symbol IS NULL OR quote_symbol IS NULL
                OR base_address IS NULL OR quote_address IS NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SnapshotRepository for PgRepository {
    async fn insert_fetch_time(&self, fetch_time: &NewFetchTime) -> Result<i64, StoreError> {
        let meta_data = serde_json::to_string(&fetch_time.meta_data)?;
        let row = sqlx::query(
            "INSERT INTO fetch_times (\"timestamp\", date, query_key, meta_data)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(&fetch_time.timestamp)
        .bind(&fetch_time.date)
        .bind(&fetch_time.query_key)
        .bind(meta_data)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn insert_pool_rows(&self, rows: &[PoolRow]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO pools (pair_address, chain_id, dex_id, fetch_time_id, \
                 base_symbol, quote_symbol, base_address, quote_address, \
                 liquidity_usd, market_cap, fdv, pair_created_at, \
                 txns_24h, buys_24h, sells_24h, volume_24h, price_change_24h, \
                 txns_6h, buys_6h, sells_6h, volume_6h, price_change_6h, \
                 txns_1h, buys_1h, sells_1h, volume_1h, price_change_1h, \
                 txns_5m, buys_5m, sells_5m, volume_5m, price_change_5m, \
                 raw_data) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(&row.pair_address)
                    .push_bind(&row.chain_id)
                    .push_bind(&row.dex_id)
                    .push_bind(row.fetch_time_id)
                    .push_bind(&row.base_symbol)
                    .push_bind(&row.quote_symbol)
                    .push_bind(&row.base_address)
                    .push_bind(&row.quote_address)
                    .push_bind(row.liquidity_usd)
                    .push_bind(row.market_cap)
                    .push_bind(row.fdv)
                    .push_bind(&row.pair_created_at);
                for window in [&row.h24, &row.h6, &row.h1, &row.m5] {
                    b.push_bind(window.txns)
                        .push_bind(window.buys)
                        .push_bind(window.sells)
                        .push_bind(window.volume)
                        .push_bind(window.price_change);
                }
                b.push_bind(&row.raw_data);
            });
            let result = builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn delete_fetch_time(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM fetch_times WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_time_exists(&self, timestamp: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS found FROM fetch_times WHERE \"timestamp\" = $1 LIMIT 1")
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn indexed_query_keys_for_date(&self, date: &str) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT query_key FROM fetch_times WHERE date = $1")
            .bind(date)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("query_key").map_err(StoreError::from))
            .collect()
    }

    async fn insert_metric(&self, metric: &NewMetric) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "INSERT INTO metrics (start_time, end_time, key, meta_data)
             VALUES ($1, $2, $3, $4)
             RETURNING id",
        )
        .bind(to_iso_timestamp(&metric.start_time))
        .bind(to_iso_timestamp(&metric.end_time))
        .bind(&metric.key)
        .bind(serde_json::to_string(&metric.meta_data)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }
}
