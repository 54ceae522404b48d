use super::PendingBatchMeta;
use chrono::{DateTime, Utc};

/// A size-complete batch ready to be flushed as one immutable object.
///
/// Holds its lines rather than a rendered body so an unconfirmed flush can
/// hand the content back to the accumulator via
/// [`BatchAccumulator::reinstate`].
#[derive(Debug, Clone)]
pub struct SealedBatch {
    lines: Vec<String>,
    pub records: usize,
    pub first_created_at: DateTime<Utc>,
    pub last_created_at: DateTime<Utc>,
}

impl SealedBatch {
    /// Newline-delimited serialized records, trailing newline included.
    pub fn body(&self) -> String {
        let mut body = self.lines.join("\n");
        body.push('\n');
        body
    }
}

/// Groups serialized records into batches bounded by a byte budget.
///
/// A record that would push the current batch over the budget seals that
/// batch and becomes the first member of the next one; records are never
/// split. A batch that runs out of input before reaching the budget stays in
/// the accumulator and is merged with the next cycle's catch, so the engine
/// writes few large objects instead of many small ones.
pub struct BatchAccumulator {
    limit_bytes: usize,
    lines: Vec<String>,
    bytes: usize,
    records: usize,
    first_line_at: Option<DateTime<Utc>>,
    last_line_at: Option<DateTime<Utc>>,
    last_processed_at: Option<DateTime<Utc>>,
}

impl BatchAccumulator {
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            limit_bytes,
            lines: Vec::new(),
            bytes: 0,
            records: 0,
            first_line_at: None,
            last_line_at: None,
            last_processed_at: None,
        }
    }

    /// Seeds counters and the resume point from pending-batch metadata
    /// persisted by a previous process instance. The buffered line content
    /// itself does not survive a restart; only the size accounting and the
    /// last-processed cursor do.
    pub fn restore(&mut self, meta: &PendingBatchMeta) {
        self.bytes = meta.bytes;
        self.records = meta.records;
        self.last_processed_at = Some(meta.last_processed_at);
    }

    /// Appends one serialized record. Returns the previous batch, sealed,
    /// when this record would have pushed it over the budget.
    pub fn push(&mut self, line: String, created_at: DateTime<Utc>) -> Option<SealedBatch> {
        let line_bytes = line.len() + 1;

        let sealed = if self.records > 0 && self.bytes + line_bytes > self.limit_bytes {
            self.seal()
        } else {
            None
        };

        if self.first_line_at.is_none() {
            self.first_line_at = Some(created_at);
        }
        self.lines.push(line);
        self.bytes += line_bytes;
        self.records += 1;
        self.last_line_at = Some(created_at);
        self.last_processed_at = Some(created_at);

        sealed
    }

    /// Puts a sealed batch's content back at the front of the buffer after a
    /// flush that was never confirmed. Records in the batch may already sit
    /// behind the pending cursor, so dropping the content would lose them for
    /// good; re-buffering keeps them eligible for the next flush attempt.
    pub fn reinstate(&mut self, sealed: SealedBatch) {
        let SealedBatch {
            mut lines,
            records,
            first_created_at,
            last_created_at,
        } = sealed;

        let restored_bytes: usize = lines.iter().map(|l| l.len() + 1).sum();
        lines.append(&mut self.lines);
        self.lines = lines;
        self.bytes += restored_bytes;
        self.records += records;
        self.first_line_at = Some(first_created_at);
        if self.last_line_at.is_none() {
            self.last_line_at = Some(last_created_at);
        }
        if self.last_processed_at.is_none() {
            self.last_processed_at = Some(last_created_at);
        }
    }

    /// Marks a record as processed without buffering it (malformed body).
    /// Advancing past it here is what keeps a poison record from being
    /// re-fetched forever.
    pub fn note_processed(&mut self, created_at: DateTime<Utc>) {
        self.last_processed_at = Some(created_at);
    }

    /// Called once the input runs out. A batch at or over the budget flushes
    /// now (a single oversized record still ships); anything smaller stays
    /// deferred for the next cycle.
    pub fn seal_if_full(&mut self) -> Option<SealedBatch> {
        if self.bytes >= self.limit_bytes {
            self.seal()
        } else {
            None
        }
    }

    /// Metadata describing what is still buffered (or processed past the
    /// committed cursor), for watermark persistence. None once everything
    /// processed has been sealed.
    pub fn pending(&self) -> Option<PendingBatchMeta> {
        self.last_processed_at.map(|ts| PendingBatchMeta {
            bytes: self.bytes,
            records: self.records,
            last_processed_at: ts,
        })
    }

    pub fn buffered_records(&self) -> usize {
        self.records
    }

    fn seal(&mut self) -> Option<SealedBatch> {
        if self.lines.is_empty() {
            // Only ghost counters from a restored pending batch; the content
            // is gone, so there is nothing to ship.
            self.bytes = 0;
            self.records = 0;
            return None;
        }

        let lines = std::mem::take(&mut self.lines);
        let sealed = SealedBatch {
            records: lines.len(),
            first_created_at: self.first_line_at.expect("sealed batch has lines"),
            last_created_at: self.last_line_at.expect("sealed batch has lines"),
            lines,
        };

        self.bytes = 0;
        self.records = 0;
        self.first_line_at = None;
        self.last_line_at = None;
        self.last_processed_at = None;

        Some(sealed)
    }
}
