//! Disk-backed row buffering for the discovery phase.
//!
//! The engine cannot emit anything until every source's schema is known, but
//! a source's schema only becomes observable after that source has produced a
//! row or signaled completion. If the engine waited passively while another
//! source's bounded queue filled up, the blocked producer would deadlock
//! against the blocked engine. [`SpillBuffer`] relieves that backpressure:
//! rows dequeued during discovery are appended to a per-source on-disk log and
//! drained, in original order, before live reads resume.

mod codec;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MergeError, MergeResult};
use crate::types::Row;

/// Upper bound on a single spill frame; anything larger is treated as
/// corruption rather than an allocation request.
const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

/// One source's private spill log.
#[derive(Debug)]
struct SpillSlot {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    reader: Option<BufReader<File>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpillMode {
    Writing,
    Reading,
    Disposed,
}

/// Per-source disk-backed append-only row logs used during discovery.
///
/// The buffer opens one write handle per source at creation, switches all
/// logs from write to read exactly once when discovery completes, and deletes
/// its backing files when dropped, on every exit path. Within a source, rows
/// drain in exactly the order they were appended; no ordering is promised
/// across sources.
#[derive(Debug)]
pub struct SpillBuffer {
    dir: PathBuf,
    slots: Vec<SpillSlot>,
    mode: SpillMode,
    spilled_rows: u64,
}

impl SpillBuffer {
    /// Creates a spill buffer with one write-open log per source.
    ///
    /// Logs live in a fresh run-private directory under `base_dir`, or under
    /// the system temp directory when `base_dir` is `None`.
    pub fn create(base_dir: Option<&Path>, num_sources: usize) -> MergeResult<Self> {
        let base = base_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let dir = base.join(format!("stream-merge-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir)?;

        let mut slots = Vec::with_capacity(num_sources);
        for index in 0..num_sources {
            let path = dir.join(format!("source-{index}.spill"));
            let writer = BufWriter::new(File::create(&path)?);
            slots.push(SpillSlot {
                path,
                writer: Some(writer),
                reader: None,
            });
        }

        debug!(dir = %dir.display(), sources = num_sources, "spill logs created");

        Ok(Self {
            dir,
            slots,
            mode: SpillMode::Writing,
            spilled_rows: 0,
        })
    }

    /// Appends a row to the given source's log.
    ///
    /// Never blocks on other sources; each log has its own handle.
    pub fn append(&mut self, source: usize, row: &Row) -> MergeResult<()> {
        if self.mode != SpillMode::Writing {
            return Err(MergeError::SpillLifecycle("append after reads were opened"));
        }

        let slot = self
            .slots
            .get_mut(source)
            .ok_or(MergeError::SpillUnopened(source))?;
        let writer = slot
            .writer
            .as_mut()
            .ok_or(MergeError::SpillUnopened(source))?;

        let frame = codec::encode_record(source as u32, row)?;
        writer.write_u32::<LittleEndian>(frame.len() as u32)?;
        writer.write_all(&frame)?;
        self.spilled_rows += 1;

        Ok(())
    }

    /// Closes all write handles and opens every log for sequential reading.
    ///
    /// Called exactly once, when discovery completes.
    pub fn finish_writes(&mut self) -> MergeResult<()> {
        if self.mode != SpillMode::Writing {
            return Err(MergeError::SpillLifecycle("reads were already opened"));
        }

        for slot in &mut self.slots {
            if let Some(mut writer) = slot.writer.take() {
                writer.flush()?;
            }
            slot.reader = Some(BufReader::new(File::open(&slot.path)?));
        }
        self.mode = SpillMode::Reading;

        debug!(buffered_rows = self.spilled_rows, "spill logs opened for reading");

        Ok(())
    }

    /// Reads the next row from the given source's log, in append order.
    ///
    /// Returns `None` once that source's log is exhausted. A frame that names
    /// a different source than the one requested means the capture-order
    /// bookkeeping and the logs have desynchronized, which is fatal.
    pub fn drain_next(&mut self, source: usize) -> MergeResult<Option<Row>> {
        if self.mode != SpillMode::Reading {
            return Err(MergeError::SpillLifecycle("drain before reads were opened"));
        }

        let slot = self
            .slots
            .get_mut(source)
            .ok_or(MergeError::SpillUnopened(source))?;
        let reader = slot
            .reader
            .as_mut()
            .ok_or(MergeError::SpillUnopened(source))?;

        // A clean end-of-log is zero bytes before the next length prefix;
        // anything shorter than a whole frame afterwards is corruption.
        let mut len_bytes = [0u8; 4];
        if reader.read(&mut len_bytes[..1])? == 0 {
            return Ok(None);
        }
        reader
            .read_exact(&mut len_bytes[1..])
            .map_err(|_| MergeError::SpillCorrupt("truncated length prefix".to_string()))?;
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_FRAME_BYTES {
            return Err(MergeError::SpillCorrupt(format!(
                "frame length {len} exceeds maximum"
            )));
        }

        let mut frame = vec![0u8; len as usize];
        reader
            .read_exact(&mut frame)
            .map_err(|_| MergeError::SpillCorrupt("truncated frame".to_string()))?;

        let (found, row) = codec::decode_record(&frame)?;
        if found as usize != source {
            return Err(MergeError::SpillDesync {
                expected: source,
                found: found as usize,
            });
        }

        Ok(Some(row))
    }

    /// Returns the number of rows appended across all sources.
    pub fn spilled_rows(&self) -> u64 {
        self.spilled_rows
    }

    /// Returns whether any row was spilled.
    pub fn has_spilled_rows(&self) -> bool {
        self.spilled_rows > 0
    }

    /// Releases all file handles and deletes the backing logs.
    ///
    /// Idempotent; also runs on drop so the logs disappear on every exit
    /// path, including failures.
    pub fn dispose(&mut self) {
        if self.mode == SpillMode::Disposed {
            return;
        }
        self.mode = SpillMode::Disposed;

        for slot in &mut self.slots {
            slot.writer.take();
            slot.reader.take();
            if let Err(err) = fs::remove_file(&slot.path) {
                warn!(path = %slot.path.display(), %err, "failed to remove spill log");
            }
        }
        if let Err(err) = fs::remove_dir(&self.dir) {
            warn!(dir = %self.dir.display(), %err, "failed to remove spill directory");
        }
    }
}

impl Drop for SpillBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;

    fn row(text: &str) -> Row {
        Row::new(vec![Cell::String(text.to_string()), Cell::I64(1)])
    }

    #[test]
    fn test_spill_preserves_per_source_fifo_order() {
        let tmp = tempfile::tempdir().unwrap();
        let mut buffer = SpillBuffer::create(Some(tmp.path()), 2).unwrap();

        buffer.append(0, &row("a1")).unwrap();
        buffer.append(1, &row("b1")).unwrap();
        buffer.append(0, &row("a2")).unwrap();
        buffer.append(1, &row("b2")).unwrap();
        buffer.finish_writes().unwrap();

        assert_eq!(buffer.drain_next(0).unwrap(), Some(row("a1")));
        assert_eq!(buffer.drain_next(1).unwrap(), Some(row("b1")));
        assert_eq!(buffer.drain_next(1).unwrap(), Some(row("b2")));
        assert_eq!(buffer.drain_next(0).unwrap(), Some(row("a2")));
        assert_eq!(buffer.drain_next(0).unwrap(), None);
        assert_eq!(buffer.drain_next(1).unwrap(), None);
        assert_eq!(buffer.spilled_rows(), 4);
    }

    #[test]
    fn test_append_after_finish_writes_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut buffer = SpillBuffer::create(Some(tmp.path()), 1).unwrap();

        buffer.finish_writes().unwrap();
        let result = buffer.append(0, &row("late"));

        assert!(matches!(result, Err(MergeError::SpillLifecycle(_))));
    }

    #[test]
    fn test_drain_before_finish_writes_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut buffer = SpillBuffer::create(Some(tmp.path()), 1).unwrap();

        let result = buffer.drain_next(0);

        assert!(matches!(result, Err(MergeError::SpillLifecycle(_))));
    }

    #[test]
    fn test_unknown_source_index_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut buffer = SpillBuffer::create(Some(tmp.path()), 1).unwrap();

        let result = buffer.append(5, &row("nope"));

        assert!(matches!(result, Err(MergeError::SpillUnopened(5))));
    }

    #[test]
    fn test_dispose_removes_backing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = SpillBuffer::create(Some(tmp.path()), 2).unwrap();
        let dir = buffer.dir.clone();
        assert!(dir.exists());

        drop(buffer);

        assert!(!dir.exists());
    }

    #[test]
    fn test_empty_log_drains_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut buffer = SpillBuffer::create(Some(tmp.path()), 1).unwrap();

        buffer.finish_writes().unwrap();

        assert_eq!(buffer.drain_next(0).unwrap(), None);
        assert!(!buffer.has_spilled_rows());
    }
}
