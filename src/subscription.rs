//! Subscription workers and the lease protocol.
//!
//! Each call to [`crate::Queue::subscribe`] spawns one [`SubscriptionWorker`]
//! task. A worker repeatedly opens a transaction, leases a batch of matching
//! messages with [`lease_batch`], hands the batch to the user callback, and
//! commits (batch durably removed) or rolls back (batch re-leasable in full).
//!
//! All coordination between competing workers happens in PostgreSQL:
//! `FOR UPDATE SKIP LOCKED` makes concurrent leases partition the backlog
//! without double delivery, and deleting inside the selecting transaction
//! makes "selected" and "removed" inseparable.

use crate::error::{CallbackError, Result};
use crate::types::Message;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Lease up to `$2` messages whose topic matches the `$1` LIKE pattern and
/// delete them in the same statement. Rows locked by a concurrent in-flight
/// lease are skipped, not waited on. The deletion is durable only if the
/// enclosing transaction commits.
pub(crate) const LEASE_BATCH: &str = r#"
    DELETE FROM {prefix}_queue
    USING (
        SELECT id FROM {prefix}_queue
        WHERE topic LIKE $1
        LIMIT $2
        FOR UPDATE SKIP LOCKED
    ) leased
    WHERE {prefix}_queue.id = leased.id
    RETURNING {prefix}_queue.id, {prefix}_queue.queue_time,
              {prefix}_queue.topic, {prefix}_queue.payload;
"#;

/// Build the LIKE pattern for a literal topic-prefix match.
///
/// LIKE metacharacters in the subscribed prefix are escaped so that a
/// subscription on `"a_b"` matches stored topics starting with exactly
/// `a_b`, not `a` + any char + `b`.
pub(crate) fn like_prefix(topic: &str) -> String {
    let mut pattern = String::with_capacity(topic.len() + 1);
    for c in topic.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Atomically select-and-delete up to `limit` matching messages inside the
/// caller's transaction.
///
/// Returns an empty batch (not an error) when no eligible message exists.
pub(crate) async fn lease_batch(
    tx: &mut Transaction<'_, Postgres>,
    lease_sql: &str,
    pattern: &str,
    limit: i64,
) -> Result<Vec<Message>> {
    let batch = sqlx::query_as::<_, Message>(lease_sql)
        .bind(pattern)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;
    Ok(batch)
}

/// Long-running control loop for one `(topic, callback)` registration.
pub(crate) struct SubscriptionWorker<F> {
    pool: PgPool,
    topic: String,
    lease_sql: String,
    pattern: String,
    batch_size: i64,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
    callback: F,
}

impl<F, Fut> SubscriptionWorker<F>
where
    F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), CallbackError>> + Send,
{
    pub(crate) fn new(
        pool: PgPool,
        topic: String,
        lease_sql: String,
        batch_size: usize,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
        callback: F,
    ) -> Self {
        let pattern = like_prefix(&topic);
        Self {
            pool,
            topic,
            lease_sql,
            pattern,
            batch_size: batch_size as i64,
            poll_interval,
            shutdown,
            callback,
        }
    }

    /// Run until shutdown is signalled.
    ///
    /// Store errors and callback errors inside a cycle are rollback-and-retry
    /// conditions, never terminating ones; the shutdown flag is the only way
    /// out of the loop. It is checked before each new lease transaction and
    /// during every idle delay, so shutdown is bounded by at most one
    /// in-flight cycle.
    pub(crate) async fn run(mut self) {
        tracing::debug!(topic = %self.topic, "subscription worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.cycle().await {
                Ok(0) => {}
                Ok(delivered) => {
                    tracing::debug!(topic = %self.topic, delivered, "batch committed");
                }
                Err(err) => {
                    tracing::warn!(topic = %self.topic, error = %err, "lease cycle failed; will retry");
                }
            }

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracing::debug!(topic = %self.topic, "subscription worker stopped");
    }

    /// One lease cycle. Returns the number of messages durably delivered.
    ///
    /// The transaction, and therefore the exclusive lock on the leased rows,
    /// is held for the callback's entire duration.
    async fn cycle(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let batch = lease_batch(&mut tx, &self.lease_sql, &self.pattern, self.batch_size).await?;
        if batch.is_empty() {
            // Nothing changed; commit vs rollback is immaterial here.
            tx.rollback().await?;
            return Ok(0);
        }

        let leased = batch.len();
        match (self.callback)(batch).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(leased)
            }
            Err(err) => {
                tracing::warn!(
                    topic = %self.topic,
                    leased,
                    error = %err,
                    "subscription callback failed; batch rolled back for redelivery"
                );
                tx.rollback().await?;
                Ok(0)
            }
        }
    }
}
