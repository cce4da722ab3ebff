//! Versioned schema bootstrap for pgfifo.
//!
//! [`ensure`] is idempotent and safe to call concurrently from multiple
//! processes against the same database. All statements are namespaced by the
//! configured table prefix, so independent queues can share a database.

use crate::config::Config;
use crate::error::Result;
use sqlx::PgPool;

/// Schema revision written to the version table at first bootstrap.
///
/// Only a single bootstrap revision exists; no migration chain beyond
/// "exists or not" is implemented.
pub(crate) const SCHEMA_VERSION: i32 = 1;

/// Salt for the advisory lock key, so pgfifo bootstraps don't collide with
/// other users of advisory locks in the same database.
const ADVISORY_LOCK_SALT: i64 = 0x7066_6966; // "pfif"

const CREATE_VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS {prefix}_version (
        id integer PRIMARY KEY,
        version integer NOT NULL
    );
"#;

const SELECT_VERSION: &str = r#"
    SELECT version FROM {prefix}_version WHERE id = 1;
"#;

const INSERT_VERSION: &str = r#"
    INSERT INTO {prefix}_version (id, version)
    VALUES (1, $1)
    ON CONFLICT (id) DO NOTHING;
"#;

const CREATE_QUEUE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS {prefix}_queue (
        id bigserial PRIMARY KEY,
        queue_time timestamptz NOT NULL DEFAULT now(),
        topic varchar(256) NOT NULL,
        payload bytea NOT NULL
    );
"#;

// varchar_pattern_ops so LIKE 'x%' prefix scans can use the index under any
// collation.
const CREATE_TOPIC_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS {prefix}_topic_index
    ON {prefix}_queue (topic varchar_pattern_ops);
"#;

/// Render a SQL template for the configured table prefix.
pub(crate) fn render(template: &str, config: &Config) -> String {
    template.replace("{prefix}", &config.table_prefix)
}

/// Advisory lock key for first-time bootstrap, stable across processes for
/// a given table prefix.
fn bootstrap_lock_key(config: &Config) -> i64 {
    (ADVISORY_LOCK_SALT << 32) | i64::from(crc32fast::hash(config.table_prefix.as_bytes()))
}

/// Ensure the pgfifo schema exists at the current revision.
///
/// 1. Create the version table if absent.
/// 2. Read the singleton version row; if present, the schema is already
///    bootstrapped and nothing further happens.
/// 3. Otherwise run the bootstrap transaction: version row, backlog table,
///    and topic index come into existence together or not at all. An
///    advisory transaction lock keyed on the table prefix serializes
///    concurrent first-time callers.
///
/// Any database error is fatal to construction; a `Queue` is never returned
/// over a partially bootstrapped schema.
pub(crate) async fn ensure(pool: &PgPool, config: &Config) -> Result<()> {
    sqlx::query(&render(CREATE_VERSION_TABLE, config))
        .execute(pool)
        .await?;

    let version: Option<i32> = sqlx::query_scalar(&render(SELECT_VERSION, config))
        .fetch_optional(pool)
        .await?;

    if let Some(version) = version {
        tracing::debug!(version, prefix = %config.table_prefix, "pgfifo schema already bootstrapped");
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(bootstrap_lock_key(config))
        .execute(&mut *tx)
        .await?;

    sqlx::query(&render(INSERT_VERSION, config))
        .bind(SCHEMA_VERSION)
        .execute(&mut *tx)
        .await?;

    sqlx::query(&render(CREATE_QUEUE_TABLE, config))
        .execute(&mut *tx)
        .await?;

    sqlx::query(&render(CREATE_TOPIC_INDEX, config))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::debug!(
        version = SCHEMA_VERSION,
        prefix = %config.table_prefix,
        "pgfifo schema bootstrapped"
    );
    Ok(())
}
