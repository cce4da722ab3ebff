//! Queue construction, producer path, and subscription registration.
//!
//! This module defines the [`Queue`] struct, the main interface for a
//! PostgreSQL-backed pub/sub queue: publishing messages, registering
//! subscription workers, and cooperative shutdown.
//!
//! ## What
//!
//! - [`Queue::connect`] / [`Queue::with_config`] build the connection pool
//!   and run the idempotent schema bootstrap before returning.
//! - [`Queue::publish`] appends one message to the backlog.
//! - [`Queue::subscribe`] spawns a background worker that leases batches for
//!   a topic prefix and dispatches them to a callback.
//!
//! ## How
//!
//! ```no_run
//! use pgfifo::Queue;
//!
//! # async fn example() -> pgfifo::Result<()> {
//! let queue = Queue::connect("postgresql://localhost/mydb").await?;
//!
//! queue.publish_json("orders.created", &serde_json::json!({"id": 7})).await?;
//!
//! queue
//!     .subscribe("orders", |batch| async move {
//!         for msg in &batch {
//!             println!("got {} on {}", msg.id, msg.topic);
//!         }
//!         Ok(())
//!     })
//!     .await?;
//!
//! // ... later:
//! queue.shutdown().await;
//! # Ok(())
//! # }
//! ```
use crate::config::Config;
use crate::error::{CallbackError, Result};
use crate::schema;
use crate::subscription::{self, SubscriptionWorker};
use crate::types::Message;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

const INSERT_MESSAGE: &str = r#"
    INSERT INTO {prefix}_queue (topic, payload)
    VALUES ($1, $2)
    RETURNING id;
"#;

const PENDING_COUNT: &str = r#"
    SELECT count(*) FROM {prefix}_queue WHERE topic LIKE $1;
"#;

/// A topic-based pub/sub queue backed by PostgreSQL.
///
/// Durable storage and all cross-process coordination are delegated to the
/// database; the `Queue` itself holds no message state. Publishes never block
/// on or are blocked by in-flight leases.
pub struct Queue {
    pool: PgPool,
    config: Config,
    insert_sql: String,
    lease_sql: String,
    pending_sql: String,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Queue {
    /// Connect with default configuration.
    ///
    /// Equivalent to `Queue::with_config(Config::from_dsn(dsn))`.
    pub async fn connect(dsn: &str) -> Result<Self> {
        Self::with_config(Config::from_dsn(dsn)).await
    }

    /// Connect with the given configuration.
    ///
    /// Validates the configuration, builds the connection pool, and runs the
    /// idempotent schema bootstrap. Any failure here means no usable `Queue`
    /// is returned.
    pub async fn with_config(config: Config) -> Result<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.dsn)
            .await?;

        schema::ensure(&pool, &config).await?;

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            insert_sql: schema::render(INSERT_MESSAGE, &config),
            lease_sql: schema::render(subscription::LEASE_BATCH, &config),
            pending_sql: schema::render(PENDING_COUNT, &config),
            pool,
            config,
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// The configuration this queue was constructed with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Publish an opaque payload on a topic.
    ///
    /// Returns the database-assigned message id once the insert has durably
    /// committed. Each call is one round trip; there is no batching and no
    /// ordering guarantee relative to concurrent publishes.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(&self.insert_sql)
            .bind(topic)
            .bind(payload)
            .fetch_one(&self.pool)
            .await?;
        tracing::debug!(topic, id, "published message");
        Ok(id)
    }

    /// Publish a value serialized as JSON.
    ///
    /// Convenience wrapper around [`Queue::publish`]; the stored payload can
    /// be recovered with [`Message::decode`].
    pub async fn publish_json<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> Result<i64> {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, &payload).await
    }

    /// Register a subscription for a topic prefix and start its worker.
    ///
    /// The callback receives each leased batch in full. Returning `Ok(())`
    /// commits the lease transaction and durably removes the batch; returning
    /// an error rolls it back, making the whole batch re-leasable. Delivery is
    /// therefore at-least-once, with redelivery on explicit failure only.
    ///
    /// A subscription on `"orders"` also receives messages published to
    /// `"orders.created"` and any other topic sharing the prefix.
    ///
    /// Returns immediately after spawning the worker; it does not block on
    /// the worker's lifetime. The worker runs until [`Queue::shutdown`].
    pub async fn subscribe<F, Fut>(&self, topic: &str, callback: F) -> Result<()>
    where
        F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), CallbackError>> + Send + 'static,
    {
        let worker = SubscriptionWorker::new(
            self.pool.clone(),
            topic.to_string(),
            self.lease_sql.clone(),
            self.config.subscription_batch_size,
            Duration::from_millis(self.config.poll_interval_ms),
            self.shutdown_tx.subscribe(),
            callback,
        );
        let handle = tokio::spawn(worker.run());
        self.workers.lock().await.push(handle);
        Ok(())
    }

    /// Number of messages currently in the backlog for a topic prefix.
    ///
    /// Messages held by an in-flight lease are still counted; they remain in
    /// the backlog until that lease commits.
    pub async fn pending_count(&self, topic: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&self.pending_sql)
            .bind(subscription::like_prefix(topic))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Cooperatively stop all subscription workers and wait for them.
    ///
    /// Workers observe the shutdown flag at idle boundaries and before
    /// opening a new lease transaction, so shutdown completes within at most
    /// one in-flight lease cycle per worker. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "subscription worker did not shut down cleanly");
            }
        }
    }
}
