/**
 # pgfifo

A barebones topic-based Pub/Sub message queue backed by a PostgreSQL database.

## Features

- **Efficient**: Uses PostgreSQL's `SKIP LOCKED` for concurrent batch leasing
- **At-least-once**: Failed callbacks roll back their batch for redelivery
- **Prefix topics**: A subscription on `"orders"` also receives `"orders.created"`
- **Namespaced**: A table prefix lets independent queues share one database

## Quick Start

```no_run
use pgfifo::Queue;

# async fn example() -> pgfifo::Result<()> {
let queue = Queue::connect("postgresql://localhost/mydb").await?;

queue.publish_json("orders.created", &serde_json::json!({"id": 7})).await?;

queue
    .subscribe("orders", |batch| async move {
        for msg in &batch {
            println!("order event: {}", msg.topic);
        }
        Ok(())
    })
    .await?;
# Ok(())
# }
```
*/

pub mod config;
pub mod error;
pub mod queue;
pub mod types;

mod schema;
mod subscription;

pub use crate::config::Config;
pub use crate::error::{CallbackError, Error, Result};
pub use crate::queue::Queue;
pub use crate::types::Message;
