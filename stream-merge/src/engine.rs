//! The merge engine: schema discovery, spill draining, and live routing.
//!
//! One [`MergeEngine`] instance owns the whole mutable context of one run:
//! the located queues, the schemas collected per source, the resolved union
//! mapping, the spill buffer and its capture order, and the running counters.
//! Nothing is shared process-wide.
//!
//! The engine cannot emit a single row before every source's schema is known,
//! and a schema only becomes observable once its source has produced a row or
//! finished. Discovery therefore never blocks on a row read: it polls with an
//! iteration counter and, past the configured threshold, starts draining
//! whichever source has a row ready into that source's spill log, keeping the
//! bounded queues from wedging their producers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::{ShutdownRx, is_shutdown};
use crate::config::MergeConfig;
use crate::error::{MergeError, MergeResult};
use crate::resolver::{self, SchemaResolution};
use crate::sink::Sink;
use crate::source::{SourceQueue, SourceRegistry};
use crate::spill::SpillBuffer;
use crate::types::{Cell, Row, Schema};

/// Side-table keeping a source's identity alive across discovery.
///
/// Populated whenever a row is drained from a source during discovery, so the
/// source's schema and name survive even if its live queue handle later
/// becomes unreachable. Consulted when discovery closes, before resolution.
#[derive(Debug, Default)]
struct DiscoveryLedger {
    entries: HashMap<usize, LedgerEntry>,
}

#[derive(Debug)]
struct LedgerEntry {
    schema: Arc<Schema>,
    name: String,
}

impl DiscoveryLedger {
    fn record(&mut self, source: usize, schema: Arc<Schema>, name: &str) {
        self.entries.entry(source).or_insert_with(|| LedgerEntry {
            schema,
            name: name.to_string(),
        });
    }

    fn schema(&self, source: usize) -> Option<&Arc<Schema>> {
        self.entries.get(&source).map(|entry| &entry.schema)
    }

    fn name(&self, source: usize) -> Option<&str> {
        self.entries.get(&source).map(|entry| entry.name.as_str())
    }
}

/// Lifecycle of a merge run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    /// Created, no work performed yet.
    Init,
    /// Binding queues and collecting source schemas.
    Discovery,
    /// Replaying rows captured to disk during discovery.
    DrainSpill,
    /// Reading rows straight from the live queues.
    Live,
    /// Terminal; completion signaled or run cancelled, resources released.
    Done,
    /// Terminal after an unrecoverable error.
    Failed,
}

/// Counters describing a finished (or cancelled) merge run.
#[derive(Debug, Clone, Default)]
pub struct MergeSummary {
    /// Rows emitted downstream.
    pub rows_emitted: u64,
    /// Rows captured to spill logs during discovery.
    pub rows_spilled: u64,
    /// Total discovery poll iterations across all sources.
    pub discovery_iterations: u64,
    /// Whether the run stopped on a shutdown signal instead of exhaustion.
    pub cancelled: bool,
}

/// Merges rows from independently-schemed sources into one union stream.
///
/// Rows are pulled from the queues registered in a [`SourceRegistry`], routed
/// through the union field mapping, and pushed to the [`Sink`]. Within one
/// source, row order is preserved end to end (spilled rows replay before live
/// ones, in capture order); across sources no ordering is promised.
///
/// Drive the engine either with [`run`](MergeEngine::run), or one unit of
/// work at a time with [`process`](MergeEngine::process).
#[derive(Debug)]
pub struct MergeEngine<S> {
    config: MergeConfig,
    registry: SourceRegistry,
    sink: S,
    shutdown_rx: ShutdownRx,
    state: EngineState,
    /// Located queue per configured source, `None` when binding failed.
    queues: Vec<Option<Arc<SourceQueue>>>,
    /// Schema collected per configured source, `None` for silent sources.
    schemas: Vec<Option<Arc<Schema>>>,
    resolution: Option<SchemaResolution>,
    union_schema: Option<Arc<Schema>>,
    spill: Option<SpillBuffer>,
    /// Source index of every spilled row, in capture order.
    spill_order: VecDeque<usize>,
    ledger: DiscoveryLedger,
    /// Round-robin position for live reads, so one busy source cannot starve
    /// the others.
    live_cursor: usize,
    summary: MergeSummary,
}

impl<S> MergeEngine<S>
where
    S: Sink,
{
    /// Creates an engine for one run.
    ///
    /// Validates the configuration and opens one spill log per configured
    /// source up front, so discovery can start capturing immediately.
    pub fn new(
        config: MergeConfig,
        registry: SourceRegistry,
        sink: S,
        shutdown_rx: ShutdownRx,
    ) -> MergeResult<Self> {
        config.validate()?;

        let num_sources = config.sources.len();
        let spill = SpillBuffer::create(config.spill_dir.as_deref(), num_sources)?;

        Ok(Self {
            config,
            registry,
            sink,
            shutdown_rx,
            state: EngineState::Init,
            queues: vec![None; num_sources],
            schemas: vec![None; num_sources],
            resolution: None,
            union_schema: None,
            spill: Some(spill),
            spill_order: VecDeque::new(),
            ledger: DiscoveryLedger::default(),
            live_cursor: 0,
            summary: MergeSummary::default(),
        })
    }

    /// Returns the union schema, available once discovery has completed.
    pub fn union_schema(&self) -> Option<Arc<Schema>> {
        self.union_schema.clone()
    }

    /// Returns the run counters accumulated so far.
    pub fn summary(&self) -> &MergeSummary {
        &self.summary
    }

    /// Performs one unit of work.
    ///
    /// Returns `Ok(true)` when the engine should be invoked again and
    /// `Ok(false)` once the run reached a terminal state. Errors are fatal:
    /// the engine moves to its terminal error state and releases the spill
    /// resources before returning.
    pub async fn process(&mut self) -> MergeResult<bool> {
        if is_shutdown(&self.shutdown_rx) {
            return Ok(self.cancel());
        }

        let step = match self.state {
            EngineState::Init | EngineState::Discovery => self.run_discovery().await,
            EngineState::DrainSpill => self.drain_one_spilled().await,
            EngineState::Live => self.process_one_live().await,
            EngineState::Done | EngineState::Failed => Ok(false),
        };

        match step {
            Ok(more) => Ok(more),
            Err(err) => {
                self.state = EngineState::Failed;
                if let Some(spill) = self.spill.as_mut() {
                    spill.dispose();
                }
                Err(err)
            }
        }
    }

    /// Runs the engine to completion and returns the run counters.
    pub async fn run(mut self) -> MergeResult<MergeSummary> {
        while self.process().await? {}

        Ok(self.summary)
    }

    /// Binds the configured sources and collects every source's schema,
    /// spilling queued rows past the configured iteration threshold.
    async fn run_discovery(&mut self) -> MergeResult<bool> {
        self.state = EngineState::Discovery;
        info!(sources = self.config.sources.len(), "starting schema discovery");

        self.bind_queues().await;

        for index in 0..self.queues.len() {
            let Some(queue) = self.queues[index].clone() else {
                continue;
            };

            // Schemas are not observable until the producer has pushed at
            // least one row or finished. The extra iteration after the done
            // signal closes the race between the signal and a schema becoming
            // visible in the same instant.
            let mut iterations: u64 = 0;
            let mut done_signal = false;
            let mut looped_post_done = false;
            while self.schemas[index].is_none() && !looped_post_done {
                if is_shutdown(&self.shutdown_rx) {
                    return Ok(self.cancel());
                }

                self.schemas[index] = queue.peek_schema().await;
                iterations += 1;
                self.summary.discovery_iterations += 1;
                if done_signal {
                    looped_post_done = true;
                }
                if queue.is_done().await {
                    done_signal = true;
                }
                if iterations > self.config.spill_trigger {
                    self.spill_one_ready().await?;
                }
                tokio::task::yield_now().await;
            }

            debug!(
                source = %self.config.sources[index],
                iterations,
                schema_found = self.schemas[index].is_some(),
                "finished waiting for source schema"
            );
        }

        // A source whose rows were captured before its own wait turn keeps
        // its identity through the ledger even if its queue went silent.
        for index in 0..self.schemas.len() {
            if self.schemas[index].is_none()
                && let Some(schema) = self.ledger.schema(index)
            {
                self.schemas[index] = Some(Arc::clone(schema));
            }
        }

        if let Some(spill) = self.spill.as_mut() {
            spill.finish_writes()?;
        }

        if self.schemas.iter().all(Option::is_none) {
            info!("no source produced a schema; completing with no rows");
            self.sink.signal_complete().await?;
            self.finish();
            return Ok(false);
        }

        let collected: Vec<Option<Schema>> = self
            .schemas
            .iter()
            .map(|schema| schema.as_deref().cloned())
            .collect();
        let resolution = resolver::resolve(&collected);
        info!(
            union_fields = resolution.schema.len(),
            coerced_fields = resolution.convert_to_text.len(),
            spilled_rows = self.spill_order.len(),
            "union schema resolved"
        );
        self.union_schema = Some(Arc::new(resolution.schema.clone()));
        self.resolution = Some(resolution);

        if self.spill_order.is_empty() {
            self.state = EngineState::Live;
        } else {
            self.state = EngineState::DrainSpill;
        }

        Ok(true)
    }

    /// Locates every configured source's queue, retrying a bounded number of
    /// times with a fixed delay. An unbound queue is non-fatal: the source
    /// contributes zero rows and the run continues.
    async fn bind_queues(&mut self) {
        for index in 0..self.config.sources.len() {
            let name = self.config.sources[index].clone();
            let mut attempts: u32 = 0;
            let queue = loop {
                if let Some(queue) = self.registry.locate(&name).await {
                    break Some(queue);
                }
                attempts += 1;
                if attempts >= self.config.locate_retries || is_shutdown(&self.shutdown_rx) {
                    break None;
                }
                sleep(Duration::from_millis(self.config.locate_retry_delay_ms)).await;
            };

            match queue {
                Some(queue) => self.queues[index] = Some(queue),
                None => warn!(
                    source = %name,
                    attempts,
                    "source queue not found after retries; source will contribute no rows"
                ),
            }
        }
    }

    /// Non-blockingly drains one row from whichever source has one ready and
    /// appends it to that source's spill log.
    ///
    /// Not necessarily the source currently being waited on: relieving any
    /// full queue is what keeps the producers from deadlocking against the
    /// discovery wait.
    async fn spill_one_ready(&mut self) -> MergeResult<()> {
        for index in 0..self.queues.len() {
            let Some(queue) = self.queues[index].clone() else {
                continue;
            };
            let Some(row) = queue.try_dequeue().await else {
                continue;
            };

            let spill = self
                .spill
                .as_mut()
                .ok_or(MergeError::SpillLifecycle("spill buffer already released"))?;
            spill.append(index, &row)?;
            self.spill_order.push_back(index);
            debug!(
                source = %queue.name(),
                queue = ?queue.id(),
                buffered = self.spill_order.len(),
                "captured row to spill log during discovery"
            );
            if let Some(schema) = queue.peek_schema().await {
                self.ledger.record(index, schema, queue.name());
            }
            return Ok(());
        }

        Ok(())
    }

    /// Replays one spilled row in capture order, routing it like a live row.
    async fn drain_one_spilled(&mut self) -> MergeResult<bool> {
        let Some(index) = self.spill_order.pop_front() else {
            debug!(
                rows = self.summary.rows_emitted,
                "spill logs drained, switching to live reads"
            );
            self.state = EngineState::Live;
            return Ok(true);
        };

        let spill = self
            .spill
            .as_mut()
            .ok_or(MergeError::SpillLifecycle("spill buffer already released"))?;
        let Some(row) = spill.drain_next(index)? else {
            return Err(MergeError::SpillCorrupt(format!(
                "capture order lists a row for source {index} but its log is exhausted"
            )));
        };

        if let Some(name) = self.ledger.name(index) {
            debug!(source = %name, "routing spilled row");
        }
        let (schema, output) = self.route(index, row)?;
        self.emit_row(&schema, output).await?;

        Ok(true)
    }

    /// Pulls the next available live row, routes it, and emits it; completes
    /// the run once every bound queue is drained.
    async fn process_one_live(&mut self) -> MergeResult<bool> {
        let Some((index, row)) = self.next_live_row().await else {
            if is_shutdown(&self.shutdown_rx) {
                return Ok(self.cancel());
            }
            info!(rows = self.summary.rows_emitted, "all sources exhausted");
            self.sink.signal_complete().await?;
            self.finish();
            return Ok(false);
        };

        debug!(source = index, "routing live row");
        let (schema, output) = self.route(index, row)?;
        self.emit_row(&schema, output).await?;

        Ok(true)
    }

    /// Waits for a row from any bound queue.
    ///
    /// Returns `None` when every bound queue is drained or shutdown was
    /// requested while waiting. Blocking here is intentional: live-phase
    /// backpressure is acceptable, only discovery must not block.
    async fn next_live_row(&mut self) -> Option<(usize, Row)> {
        loop {
            let num_queues = self.queues.len();
            let mut all_drained = true;
            for offset in 0..num_queues {
                let index = (self.live_cursor + offset) % num_queues;
                let Some(queue) = self.queues[index].clone() else {
                    continue;
                };
                if let Some(row) = queue.try_dequeue().await {
                    self.live_cursor = (index + 1) % num_queues;
                    return Some((index, row));
                }
                if !queue.is_drained().await {
                    all_drained = false;
                }
            }

            if all_drained || is_shutdown(&self.shutdown_rx) {
                return None;
            }

            tokio::select! {
                _ = self.registry.wait_for_activity() => {}
                _ = self.shutdown_rx.changed() => {}
            }
        }
    }

    /// Routes one source row into a union-shaped output row.
    ///
    /// Every union position is filled: positions the source does not map
    /// stay null. Values landing on a conflicted position are rendered as
    /// text unless null, which passes through unchanged.
    fn route(&self, source: usize, row: Row) -> MergeResult<(Arc<Schema>, Row)> {
        let schema = self
            .union_schema
            .clone()
            .ok_or_else(|| MergeError::UnknownOrigin(self.source_name(source)))?;
        let resolution = self
            .resolution
            .as_ref()
            .ok_or_else(|| MergeError::UnknownOrigin(self.source_name(source)))?;
        let Some(mapping) = resolution.mappings.get(source).and_then(Option::as_ref) else {
            return Err(MergeError::UnknownOrigin(self.source_name(source)));
        };
        if row.len() != mapping.len() {
            return Err(MergeError::UnknownOrigin(self.source_name(source)));
        }

        let mut output = Row::nulls(resolution.schema.len());
        for (position, value) in row.into_values().into_iter().enumerate() {
            let union_position = mapping[position];
            let routed = if resolution.convert_to_text.contains(&union_position) {
                match value.to_text() {
                    Some(text) => Cell::String(text),
                    None => Cell::Null,
                }
            } else {
                value
            };
            output.values_mut()[union_position] = routed;
        }

        Ok((schema, output))
    }

    async fn emit_row(&mut self, schema: &Arc<Schema>, row: Row) -> MergeResult<()> {
        self.sink.emit(schema, row).await?;
        self.summary.rows_emitted += 1;

        if self.config.feedback_interval > 0
            && self.summary.rows_emitted % self.config.feedback_interval == 0
        {
            info!(rows = self.summary.rows_emitted, "merge progress");
        }

        Ok(())
    }

    /// Stops producing rows on a shutdown request; already-emitted rows stay
    /// valid and no completion signal follows.
    fn cancel(&mut self) -> bool {
        if matches!(self.state, EngineState::Done | EngineState::Failed) {
            return false;
        }

        info!(
            rows = self.summary.rows_emitted,
            "merge cancelled, releasing resources"
        );
        self.summary.cancelled = true;
        self.finish();

        false
    }

    fn finish(&mut self) {
        self.state = EngineState::Done;
        if let Some(spill) = self.spill.as_mut() {
            self.summary.rows_spilled = spill.spilled_rows();
            spill.dispose();
        }
    }

    fn source_name(&self, source: usize) -> String {
        self.config
            .sources
            .get(source)
            .cloned()
            .or_else(|| self.ledger.name(source).map(str::to_string))
            .unwrap_or_else(|| format!("source-{source}"))
    }
}
