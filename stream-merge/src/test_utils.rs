//! Shared helpers for tests.

use std::sync::Arc;
use std::sync::Once;

use tokio::task::JoinHandle;

use crate::source::QueueWriter;
use crate::types::{Row, Schema};

static TRACING_INIT: Once = Once::new();

/// Initializes tracing output for tests.
///
/// Respects `RUST_LOG` when set, defaults to `info` otherwise. Safe to call
/// from every test; only the first call installs the subscriber.
pub fn init_test_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// Spawns a producer task that pushes the given rows and then finishes.
pub fn spawn_producer(
    writer: QueueWriter,
    schema: Arc<Schema>,
    rows: Vec<Row>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for row in rows {
            writer.put_row(&schema, row).await;
        }
        writer.finish().await;
    })
}

/// Spawns a producer task that finishes immediately without sending any rows.
pub fn spawn_empty_producer(writer: QueueWriter) -> JoinHandle<()> {
    tokio::spawn(async move {
        writer.finish().await;
    })
}
