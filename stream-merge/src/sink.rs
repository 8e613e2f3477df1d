//! Downstream collaborators that receive merged rows.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::MergeResult;
use crate::types::{Row, Schema};

/// Trait for systems that receive the merged output stream.
///
/// [`Sink`] implementations define where rows mapped to the union schema go.
/// The engine emits rows one at a time, in the interleaving the merge
/// produced, each accompanied by the union schema the row is shaped to, and
/// calls [`Sink::signal_complete`] exactly once when no further rows will
/// follow. Rows already emitted stay valid even if the run is cancelled
/// afterwards.
pub trait Sink {
    /// Accepts one merged row shaped to the given union schema.
    fn emit(&self, schema: &Arc<Schema>, row: Row) -> impl Future<Output = MergeResult<()>> + Send;

    /// Signals that the merged stream is complete.
    fn signal_complete(&self) -> impl Future<Output = MergeResult<()>> + Send;
}

#[derive(Debug, Default)]
struct Inner {
    schema: Option<Arc<Schema>>,
    rows: Vec<Row>,
    completed: bool,
}

/// In-memory sink for testing and development purposes.
///
/// [`MemorySink`] stores every emitted row and the union schema they were
/// shaped to, making it ideal for asserting on merge output in tests. All
/// data is held in memory and lost when the process terminates.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    /// Creates a new empty memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the union schema seen on the first emitted row, if any.
    pub async fn schema(&self) -> Option<Arc<Schema>> {
        self.inner.lock().await.schema.clone()
    }

    /// Returns a copy of all rows emitted so far.
    pub async fn rows(&self) -> Vec<Row> {
        self.inner.lock().await.rows.clone()
    }

    /// Returns whether completion has been signaled.
    pub async fn completed(&self) -> bool {
        self.inner.lock().await.completed
    }

    /// Clears captured rows, the captured schema, and the completion flag.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.schema = None;
        inner.rows.clear();
        inner.completed = false;
    }
}

impl Sink for MemorySink {
    async fn emit(&self, schema: &Arc<Schema>, row: Row) -> MergeResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.schema.is_none() {
            inner.schema = Some(Arc::clone(schema));
        }
        inner.rows.push(row);

        Ok(())
    }

    async fn signal_complete(&self) -> MergeResult<()> {
        let mut inner = self.inner.lock().await;
        inner.completed = true;

        info!(rows = inner.rows.len(), "memory sink received completion");

        Ok(())
    }
}
