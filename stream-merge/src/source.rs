//! Bounded in-process queues binding upstream producers to the engine.
//!
//! Producers register a queue per source and push rows into it under
//! capacity backpressure; the engine locates queues by source name and reads
//! from them, never writing. A source's schema becomes observable on its
//! queue only once the producer has pushed at least one row or finished,
//! which is exactly the window the engine's discovery phase has to survive.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::types::{Row, Schema};

/// Stable identity of a source queue.
///
/// Used to recover the origin of a row obtained through a non-blocking drain,
/// independent of the queue's name or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

#[derive(Debug)]
struct QueueState {
    schema: Option<Arc<Schema>>,
    rows: VecDeque<Row>,
    done: bool,
}

/// A bounded row queue for one source.
///
/// The engine side is dequeue-only: [`peek_schema`](SourceQueue::peek_schema),
/// [`try_dequeue`](SourceQueue::try_dequeue), and the done/drained probes.
/// Producers write through a [`QueueWriter`].
#[derive(Debug)]
pub struct SourceQueue {
    id: QueueId,
    name: String,
    capacity: usize,
    state: Mutex<QueueState>,
    /// Pinged on every append and on finish; shared with the registry so a
    /// reader blocked across the whole queue set wakes up.
    activity: Arc<Notify>,
    /// Pinged when a dequeue frees capacity.
    space: Notify,
}

impl SourceQueue {
    fn new(id: QueueId, name: String, capacity: usize, activity: Arc<Notify>) -> Self {
        Self {
            id,
            name,
            capacity,
            state: Mutex::new(QueueState {
                schema: None,
                rows: VecDeque::new(),
                done: false,
            }),
            activity,
            space: Notify::new(),
        }
    }

    /// Returns the queue's stable identity.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Returns the source name this queue was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the source's schema, once the producer has made it visible.
    pub async fn peek_schema(&self) -> Option<Arc<Schema>> {
        self.state.lock().await.schema.clone()
    }

    /// Dequeues the next row without waiting, if one is ready.
    pub async fn try_dequeue(&self) -> Option<Row> {
        let row = self.state.lock().await.rows.pop_front();
        if row.is_some() {
            self.space.notify_one();
        }
        row
    }

    /// Returns whether the producer has signaled end-of-stream.
    ///
    /// Rows may still be queued after the signal; see
    /// [`is_drained`](SourceQueue::is_drained).
    pub async fn is_done(&self) -> bool {
        self.state.lock().await.done
    }

    /// Returns whether the producer finished and every queued row was taken.
    pub async fn is_drained(&self) -> bool {
        let state = self.state.lock().await;
        state.done && state.rows.is_empty()
    }
}

/// Producer handle for one source queue.
#[derive(Debug, Clone)]
pub struct QueueWriter {
    queue: Arc<SourceQueue>,
}

impl QueueWriter {
    /// Appends a row, waiting while the queue is at capacity.
    ///
    /// The first append also publishes the source's schema, making it
    /// observable to [`SourceQueue::peek_schema`].
    pub async fn put_row(&self, schema: &Arc<Schema>, row: Row) {
        loop {
            {
                let mut state = self.queue.state.lock().await;
                if state.rows.len() < self.queue.capacity {
                    if state.schema.is_none() {
                        state.schema = Some(Arc::clone(schema));
                    }
                    state.rows.push_back(row);
                    drop(state);
                    self.queue.activity.notify_one();
                    return;
                }
            }
            self.queue.space.notified().await;
        }
    }

    /// Signals end-of-stream for this source.
    pub async fn finish(&self) {
        self.queue.state.lock().await.done = true;
        self.queue.activity.notify_one();
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    queues: HashMap<String, Arc<SourceQueue>>,
}

/// Shared registry of source queues for one merge run.
///
/// Producers call [`register`](SourceRegistry::register) to obtain a writer;
/// the engine calls [`locate`](SourceRegistry::locate), which returns absent
/// until the producer side has registered - late binding the engine covers
/// with a bounded retry.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    state: Arc<Mutex<RegistryState>>,
    activity: Arc<Notify>,
    next_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl SourceRegistry {
    /// Creates a registry whose queues buffer at most `queue_capacity` rows.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            activity: Arc::new(Notify::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            queue_capacity,
        }
    }

    /// Registers the queue for `name` and returns its producer handle.
    ///
    /// Registering a name twice hands back a writer to the existing queue, so
    /// multiple producer tasks may feed one source.
    pub async fn register(&self, name: &str) -> QueueWriter {
        let mut state = self.state.lock().await;
        let queue = state
            .queues
            .entry(name.to_string())
            .or_insert_with(|| {
                let id = QueueId(self.next_id.fetch_add(1, Ordering::Relaxed));
                debug!(source = name, ?id, "registering source queue");
                Arc::new(SourceQueue::new(
                    id,
                    name.to_string(),
                    self.queue_capacity,
                    Arc::clone(&self.activity),
                ))
            })
            .clone();

        QueueWriter { queue }
    }

    /// Returns the queue registered under `name`, if any.
    pub async fn locate(&self, name: &str) -> Option<Arc<SourceQueue>> {
        self.state.lock().await.queues.get(name).cloned()
    }

    /// Waits until some queue in the registry sees an append or a finish.
    ///
    /// Wakeups are permit-based: an append racing this call is never lost,
    /// and a spurious wakeup only costs the caller one extra scan.
    pub async fn wait_for_activity(&self) {
        self.activity.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, FieldSchema, FieldType};

    fn test_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![FieldSchema::new(
            "id",
            FieldType::I64,
            "test",
        )]))
    }

    fn test_row(id: i64) -> Row {
        Row::new(vec![Cell::I64(id)])
    }

    #[tokio::test]
    async fn test_schema_invisible_until_first_put() {
        let registry = SourceRegistry::new(4);
        let writer = registry.register("a").await;
        let queue = registry.locate("a").await.unwrap();

        assert!(queue.peek_schema().await.is_none());

        writer.put_row(&test_schema(), test_row(1)).await;

        assert!(queue.peek_schema().await.is_some());
    }

    #[tokio::test]
    async fn test_rows_dequeue_in_fifo_order() {
        let registry = SourceRegistry::new(4);
        let writer = registry.register("a").await;
        let queue = registry.locate("a").await.unwrap();
        let schema = test_schema();

        writer.put_row(&schema, test_row(1)).await;
        writer.put_row(&schema, test_row(2)).await;
        writer.finish().await;

        assert_eq!(queue.try_dequeue().await, Some(test_row(1)));
        assert!(queue.is_done().await);
        assert!(!queue.is_drained().await);
        assert_eq!(queue.try_dequeue().await, Some(test_row(2)));
        assert_eq!(queue.try_dequeue().await, None);
        assert!(queue.is_drained().await);
    }

    #[tokio::test]
    async fn test_locate_absent_before_register() {
        let registry = SourceRegistry::new(4);

        assert!(registry.locate("missing").await.is_none());

        registry.register("missing").await;

        assert!(registry.locate("missing").await.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bounded_put_unblocks_as_consumer_drains() {
        let registry = SourceRegistry::new(2);
        let writer = registry.register("a").await;
        let queue = registry.locate("a").await.unwrap();

        let producer = tokio::spawn(async move {
            let schema = test_schema();
            for id in 0..10 {
                writer.put_row(&schema, test_row(id)).await;
            }
            writer.finish().await;
        });

        let mut collected = Vec::new();
        while !queue.is_drained().await {
            match queue.try_dequeue().await {
                Some(row) => collected.push(row),
                None => registry.wait_for_activity().await,
            }
        }

        producer.await.unwrap();
        assert_eq!(collected.len(), 10);
        assert_eq!(collected[0], test_row(0));
        assert_eq!(collected[9], test_row(9));
    }
}
