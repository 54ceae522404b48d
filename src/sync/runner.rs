use super::batch::{BatchAccumulator, SealedBatch};
use super::watermark::WatermarkStore;
use super::{batch_key, PendingBatchMeta, SyncedRecord};
use crate::config::SyncConfig;
use crate::queue::{LogRecord, QueueError, RecordBody, RecordQueue};
use crate::remote::{BucketAddress, ObjectStore, StoreError};
use crate::retrieve::{self, RetrieveError};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("remote store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What a call to [`SyncEngine::run_cycle`] did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Another cycle was already in flight; this tick was dropped.
    Skipped,
    Completed(CycleSummary),
}

#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub fetched: usize,
    pub flushed_batches: usize,
    pub flushed_records: usize,
    pub deferred: Option<PendingBatchMeta>,
}

struct CycleState {
    bucket: Option<BucketAddress>,
    watermark: Option<WatermarkStore>,
    accumulator: BatchAccumulator,
}

/// The synchronization engine: constructed once at startup and passed by
/// reference to every collaborator that needs to enqueue or retrieve.
///
/// At most one sync cycle runs at a time, enforced by an explicit state flag;
/// a cycle requested while one is in flight is dropped, not queued. Retrieval
/// is read-only and does not touch the cycle state.
pub struct SyncEngine {
    queue: Arc<dyn RecordQueue>,
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
    writer_id: String,
    state: Mutex<CycleState>,
    syncing: AtomicBool,
    last_key_millis: AtomicI64,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<dyn RecordQueue>,
        store: Arc<dyn ObjectStore>,
        config: SyncConfig,
        writer_id: String,
    ) -> Self {
        let accumulator = BatchAccumulator::new(config.batch_size_bytes());
        Self {
            queue,
            store,
            config,
            writer_id,
            state: Mutex::new(CycleState {
                bucket: None,
                watermark: None,
                accumulator,
            }),
            syncing: AtomicBool::new(false),
            last_key_millis: AtomicI64::new(0),
        }
    }

    pub fn interval(&self) -> std::time::Duration {
        self.config.interval
    }

    /// Appends a record to the local queue. Collaborators call this; the
    /// record ships on a later sync cycle.
    pub async fn enqueue(&self, record: &LogRecord) -> Result<(), SyncError> {
        self.queue.enqueue(record).await?;
        Ok(())
    }

    /// Reconstructs the full chronological record stream from the remote
    /// store. Safe to call while a sync cycle is running.
    pub async fn retrieve_ordered(&self) -> Result<Vec<SyncedRecord>, RetrieveError> {
        retrieve::retrieve_ordered(
            self.store.as_ref(),
            &self.config.bucket_alias,
            &self.config.key_prefix,
        )
        .await
    }

    /// Runs one sync cycle, or drops the request if one is already in
    /// flight.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, SyncError> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync cycle already in flight, dropping tick");
            return Ok(CycleOutcome::Skipped);
        }

        let result = self.cycle().await;
        self.syncing.store(false, Ordering::SeqCst);
        result.map(CycleOutcome::Completed)
    }

    async fn cycle(&self) -> Result<CycleSummary, SyncError> {
        let mut state = self.state.lock().await;

        if state.bucket.is_none() {
            let bucket = self
                .store
                .resolve_or_create_bucket(&self.config.bucket_alias)
                .await?;
            info!(alias = %self.config.bucket_alias, bucket = %bucket, "Resolved bucket");

            let mut watermark =
                WatermarkStore::new(self.store.clone(), bucket.clone(), &self.config.key_prefix);
            if let Some(loaded) = watermark.load().await? {
                info!(
                    cursor = ?loaded.last_synced_at,
                    pending = ?loaded.pending,
                    "Loaded sync watermark"
                );
                if let Some(pending) = &loaded.pending {
                    state.accumulator.restore(pending);
                }
            } else {
                info!(alias = %self.config.bucket_alias, "No sync watermark found, starting fresh");
            }

            state.bucket = Some(bucket);
            state.watermark = Some(watermark);
        }

        let CycleState {
            bucket,
            watermark,
            accumulator,
        } = &mut *state;
        let bucket = bucket.as_ref().expect("bucket resolved above");
        let watermark = watermark.as_mut().expect("watermark loaded above");

        // The accumulator's processed point is ahead of the persisted
        // watermark whenever content is buffered (or was reinstated after a
        // failed flush); preferring it keeps already-buffered records out of
        // the fetch window
        let cursor = accumulator
            .pending()
            .map(|p| p.last_processed_at)
            .or_else(|| watermark.effective_cursor());
        let records = self
            .queue
            .fetch_unsynced(&self.config.record_type, cursor, self.config.fetch_limit)
            .await?;

        let fetched = records.len();
        debug!(fetched = fetched, cursor = ?cursor, "Fetched unsynced records");

        let mut flushed_batches = 0usize;
        let mut flushed_records = 0usize;

        for record in records {
            let line = match project_record(&record) {
                Ok(line) => line,
                Err(e) => {
                    warn!(
                        record_id = %record.id,
                        error = %e,
                        "Skipping record with malformed body"
                    );
                    // Still counts as processed, or the poison record would
                    // be re-fetched every cycle
                    accumulator.note_processed(record.created_at);
                    continue;
                }
            };

            if let Some(sealed) = accumulator.push(line, record.created_at) {
                flushed_records += self.flush(bucket, watermark, accumulator, sealed).await?;
                flushed_batches += 1;
            }
        }

        if let Some(sealed) = accumulator.seal_if_full() {
            flushed_records += self.flush(bucket, watermark, accumulator, sealed).await?;
            flushed_batches += 1;
        }

        let deferred = accumulator.pending();
        watermark.track_pending(deferred.clone()).await?;

        if let Some(pending) = &deferred {
            debug!(
                records = pending.records,
                bytes = pending.bytes,
                last_processed = %pending.last_processed_at,
                "Deferring partial batch to next cycle"
            );
        }

        Ok(CycleSummary {
            fetched,
            flushed_batches,
            flushed_records,
            deferred,
        })
    }

    async fn flush(
        &self,
        bucket: &BucketAddress,
        watermark: &mut WatermarkStore,
        accumulator: &mut BatchAccumulator,
        sealed: SealedBatch,
    ) -> Result<usize, SyncError> {
        let key = batch_key(
            &self.config.key_prefix,
            self.next_key_millis(),
            &self.writer_id,
        );

        // overwrite=false: a retry after a failed write mints a new key, it
        // never replaces a possibly partially-written object
        if let Err(e) = self
            .store
            .put_object(bucket, &key, sealed.body().into_bytes(), false)
            .await
        {
            // Unconfirmed content goes back into the buffer; some of it may
            // sit behind the pending cursor and would never be fetched again
            warn!(key = %key, error = %e, "Flush not confirmed, re-buffering batch");
            accumulator.reinstate(sealed);
            return Err(e.into());
        }

        info!(
            key = %key,
            records = sealed.records,
            first = %sealed.first_created_at,
            last = %sealed.last_created_at,
            "Flushed batch"
        );

        watermark.advance(sealed.last_created_at).await?;
        Ok(sealed.records)
    }

    /// Millis for the next batch key, strictly increasing within this process
    /// so two flushes in the same millisecond cannot collide.
    fn next_key_millis(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_key_millis.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_key_millis.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

fn project_record(record: &LogRecord) -> Result<String, serde_json::Error> {
    let body: RecordBody = serde_json::from_str(&record.body)?;
    serde_json::to_string(&SyncedRecord {
        actor_id: body.actor_id,
        agent_id: body.agent_id,
        source_text: body.source_text,
        log_text: body.log_text,
        created_at: record.created_at,
    })
}

/// Timer-driven scheduler loop. The first cycle runs immediately so a long
/// interval cannot silently delay the first flush after a restart; missed
/// ticks are skipped, not queued. Cancellation clears the timer and lets any
/// in-flight cycle finish.
pub async fn run_scheduler(engine: Arc<SyncEngine>, cancel: CancellationToken) {
    let period = engine.interval();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Sync scheduler stopping");
                break;
            }
            _ = interval.tick() => {
                match engine.run_cycle().await {
                    Ok(CycleOutcome::Completed(summary)) => {
                        info!(
                            fetched = summary.fetched,
                            flushed_batches = summary.flushed_batches,
                            flushed_records = summary.flushed_records,
                            "Sync cycle complete, next sync in {:?}",
                            period
                        );
                    }
                    Ok(CycleOutcome::Skipped) => {
                        debug!("Sync tick dropped, previous cycle still running");
                    }
                    Err(SyncError::Store(e)) if e.is_transient() => {
                        warn!(error = %e, "Transient remote store failure, retrying next interval");
                    }
                    Err(e) => {
                        warn!(error = %e, "Sync cycle failed, will retry next interval");
                    }
                }
            }
        }
    }
}
