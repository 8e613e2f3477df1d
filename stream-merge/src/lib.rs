//! Merges rows from multiple independently-schemed sources into one stream.
//!
//! Unlike a plain fan-in, the sources feeding this engine do not need to share
//! a schema. The engine examines every source's schema, takes the union of the
//! field sets, and routes each incoming row into the union shape. Fields with
//! the same name land in the same output position; a field declared with two
//! different types across sources becomes a text field, and its values are
//! rendered as text on the way through.
//!
//! # Architecture
//!
//! A source's schema is only observable once that source has produced a row
//! or finished, yet nothing can be emitted before every schema is known. The
//! engine therefore runs a discovery phase that polls for schemas without
//! blocking and, past a configured threshold, spills already-queued rows to
//! per-source disk logs so bounded queues cannot deadlock their producers.
//! Spilled rows replay in capture order before live reads resume.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use stream_merge::concurrency::shutdown::create_shutdown_channel;
//! use stream_merge::types::{Cell, FieldSchema, FieldType, Row, Schema};
//! use stream_merge::{MemorySink, MergeConfig, MergeEngine, SourceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MergeConfig::new(vec!["orders".to_string(), "refunds".to_string()]);
//!     let registry = SourceRegistry::new(config.queue_capacity);
//!     let sink = MemorySink::new();
//!     let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
//!
//!     // Producers register their queues and push rows concurrently.
//!     let writer = registry.register("orders").await;
//!     tokio::spawn(async move {
//!         let schema = Arc::new(Schema::new(vec![
//!             FieldSchema::new("id", FieldType::I64, "orders"),
//!             FieldSchema::new("total", FieldType::F64, "orders"),
//!         ]));
//!         writer
//!             .put_row(&schema, Row::new(vec![Cell::I64(1), Cell::F64(9.5)]))
//!             .await;
//!         writer.finish().await;
//!     });
//!     // ... same for "refunds" ...
//!
//!     let engine = MergeEngine::new(config, registry, sink.clone(), shutdown_rx)?;
//!     let summary = engine.run().await?;
//!     println!("merged {} rows", summary.rows_emitted);
//!
//!     Ok(())
//! }
//! ```

pub mod concurrency;
mod config;
mod engine;
mod error;
mod resolver;
mod sink;
mod source;
mod spill;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{MergeConfig, ValidationError};
pub use engine::{MergeEngine, MergeSummary};
pub use error::{MergeError, MergeResult};
pub use resolver::{FieldMapping, SchemaResolution, resolve};
pub use sink::{MemorySink, Sink};
pub use source::{QueueId, QueueWriter, SourceQueue, SourceRegistry};
pub use spill::SpillBuffer;
