//! Ingestion side: consumes the broadcast stream, validates, de-duplicates
//! and persists position reports in transactional batches.

pub mod dedup;
pub mod message;

pub use dedup::{LastSeen, SeenReport, StagedLastSeen, DEFAULT_DUPLICATE_WINDOW_SECS};
pub use message::{is_valid, validate, RawDecoded, RawId, RawMessage, ValidMessage, ValidationFailure};

use crate::protocol::MAX_LINE_LENGTH;
use crate::storage::{Storage, StorageError, StorageTransaction};
use crate::voyage::Mmsi;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_SOURCE_ADDRESS: &str = "127.0.0.1:8765";
const STATS_LOG_EVERY_MESSAGES: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("broadcast stream closed by peer")]
    Disconnected,
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line framing error: {0}")]
    Lines(#[from] LinesCodecError),
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub source_address: String,
    pub batch_size: usize,
    pub reconnect_backoff: Duration,
    pub duplicate_window: Duration,
    pub max_line_length: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source_address: DEFAULT_SOURCE_ADDRESS.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            duplicate_window: Duration::from_secs(DEFAULT_DUPLICATE_WINDOW_SECS as u64),
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionStats {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub invalid_messages: u64,
    pub duplicate_messages: u64,
    /// Rows skipped because their `(mmsi, timestamp)` was already stored.
    pub conflicting_messages: u64,
    pub control_messages: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub vessels_created: u64,
    pub reconnects: u64,
}

/// Result of one committed flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub stored: usize,
    pub duplicates: usize,
    pub conflicts: usize,
    pub vessels_created: usize,
}

pub struct IngestionPipeline<S: Storage> {
    storage: S,
    config: IngestionConfig,
    buffer: Vec<ValidMessage>,
    last_seen: LastSeen,
    stats: IngestionStats,
}

impl<S: Storage> IngestionPipeline<S> {
    pub fn new(storage: S, config: IngestionConfig) -> Self {
        let window = chrono::Duration::from_std(config.duplicate_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_DUPLICATE_WINDOW_SECS));

        Self {
            buffer: Vec::with_capacity(config.batch_size.max(1)),
            storage,
            config,
            last_seen: LastSeen::new(window),
            stats: IngestionStats::default(),
        }
    }

    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn stats(&self) -> &IngestionStats {
        &self.stats
    }

    pub fn buffered(&self) -> &[ValidMessage] {
        &self.buffer
    }

    pub fn last_seen(&self) -> &LastSeen {
        &self.last_seen
    }

    /// Checks against committed state only; buffered messages are not consulted.
    pub fn is_duplicate(&self, message: &ValidMessage) -> bool {
        self.last_seen
            .is_duplicate(&message.mmsi, message.timestamp, &message.position())
    }

    /// Handles one received line. Control events are skipped; anything that
    /// does not parse counts as invalid.
    pub async fn accept_line(&mut self, line: &str) -> Result<Option<FlushOutcome>, StorageError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        match RawMessage::parse(line) {
            Ok(raw) if raw.is_control() => {
                self.stats.control_messages += 1;
                debug!("Skipping control event {:?}", raw.kind);
                Ok(None)
            }
            Ok(raw) => self.submit(raw).await,
            Err(e) => {
                self.stats.messages_received += 1;
                self.stats.invalid_messages += 1;
                warn!("Discarding unparseable line: {}", e);
                Ok(None)
            }
        }
    }

    /// Validates and buffers a decoded message, flushing once the batch is full.
    pub async fn submit(&mut self, raw: RawMessage) -> Result<Option<FlushOutcome>, StorageError> {
        self.stats.messages_received += 1;
        if self.stats.messages_received % STATS_LOG_EVERY_MESSAGES == 0 {
            self.log_stats();
        }

        match validate(&raw) {
            Ok(message) => self.buffer_and_maybe_flush(message).await,
            Err(failure) => {
                self.stats.invalid_messages += 1;
                warn!("Invalid message rejected: {}", failure);
                Ok(None)
            }
        }
    }

    pub async fn buffer_and_maybe_flush(
        &mut self,
        message: ValidMessage,
    ) -> Result<Option<FlushOutcome>, StorageError> {
        self.buffer.push(message);
        if self.buffer.len() >= self.config.batch_size.max(1) {
            return self.flush().await.map(Some);
        }
        Ok(None)
    }

    /// Writes the buffer in one transaction. The buffer is cleared whether or
    /// not the commit succeeds; a failed batch is dropped, not retried.
    pub async fn flush(&mut self) -> Result<FlushOutcome, StorageError> {
        if self.buffer.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let batch = std::mem::take(&mut self.buffer);
        self.stats.flushes += 1;

        match self.persist(&batch).await {
            Ok((outcome, updates)) => {
                self.last_seen.apply(updates);
                self.stats.messages_processed += outcome.stored as u64;
                self.stats.duplicate_messages += outcome.duplicates as u64;
                self.stats.conflicting_messages += outcome.conflicts as u64;
                self.stats.vessels_created += outcome.vessels_created as u64;
                debug!(
                    "Flushed {} positions ({} duplicates, {} key conflicts skipped)",
                    outcome.stored, outcome.duplicates, outcome.conflicts
                );
                Ok(outcome)
            }
            Err(e) => {
                self.stats.failed_flushes += 1;
                error!("Dropped batch of {} messages: {}", batch.len(), e);
                Err(e)
            }
        }
    }

    async fn persist(
        &self,
        batch: &[ValidMessage],
    ) -> Result<(FlushOutcome, HashMap<Mmsi, SeenReport>), StorageError> {
        let mut tx = self.storage.begin().await?;

        match self.write_batch(tx.as_mut(), batch).await {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn write_batch(
        &self,
        tx: &mut dyn StorageTransaction,
        batch: &[ValidMessage],
    ) -> Result<(FlushOutcome, HashMap<Mmsi, SeenReport>), StorageError> {
        let mut staged = self.last_seen.stage();
        let mut outcome = FlushOutcome::default();

        let ids: Vec<Mmsi> = batch
            .iter()
            .map(|m| m.mmsi.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let resolution = tx.resolve_vessels(&ids, Utc::now()).await?;
        outcome.vessels_created = resolution.created;

        for message in batch {
            let position = message.position();
            if staged.is_duplicate(&message.mmsi, message.timestamp, &position) {
                outcome.duplicates += 1;
                debug!("Duplicate position for {} at {}", message.mmsi, message.timestamp);
                continue;
            }

            if tx.insert_position(message.to_row()).await? {
                staged.record(message.mmsi.clone(), message.timestamp, position);
                outcome.stored += 1;
            } else {
                outcome.conflicts += 1;
                debug!(
                    "Position for {} at {} already stored, skipping",
                    message.mmsi, message.timestamp
                );
            }
        }

        Ok((outcome, staged.into_updates()))
    }

    /// Consumes newline-delimited JSON from `source` until it ends.
    ///
    /// Always returns an error: [`IngestError::Disconnected`] on a clean end of
    /// stream, otherwise the I/O failure. Flush failures are logged and do not
    /// stop consumption.
    pub async fn consume<R>(&mut self, source: R) -> IngestError
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(
            source,
            LinesCodec::new_with_max_length(self.config.max_line_length),
        );

        let mut resume_after_error = false;
        loop {
            match lines.next().await {
                Some(Ok(line)) => {
                    // Failed batch is already logged and counted
                    let _ = self.accept_line(&line).await;
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    self.stats.messages_received += 1;
                    self.stats.invalid_messages += 1;
                    warn!(
                        "Discarding line longer than {} bytes",
                        self.config.max_line_length
                    );
                    resume_after_error = true;
                }
                Some(Err(LinesCodecError::Io(e))) => return e.into(),
                // The framed stream yields one None after a decode error before reading on
                None if resume_after_error => resume_after_error = false,
                None => return IngestError::Disconnected,
            }
        }
    }

    /// Connects to the broadcast source and consumes it, reconnecting after a
    /// fixed backoff forever. Buffered messages survive reconnects.
    pub async fn run(mut self) {
        loop {
            match TcpStream::connect(&self.config.source_address).await {
                Ok(stream) => {
                    info!("Connected to broadcast source {}", self.config.source_address);
                    let reason = self.consume(stream).await;
                    warn!("Lost broadcast source: {}", reason);
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to {}: {}",
                        self.config.source_address, e
                    );
                }
            }

            self.stats.reconnects += 1;
            info!(
                "Reconnecting in {:?} ({} messages buffered)",
                self.config.reconnect_backoff,
                self.buffer.len()
            );
            tokio::time::sleep(self.config.reconnect_backoff).await;
        }
    }

    pub fn log_stats(&self) {
        let s = &self.stats;
        info!(
            "Ingestion stats: received={} processed={} invalid={} duplicate={} conflicts={} flushes={} failed_flushes={}",
            s.messages_received,
            s.messages_processed,
            s.invalid_messages,
            s.duplicate_messages,
            s.conflicting_messages,
            s.flushes,
            s.failed_flushes
        );
    }
}
