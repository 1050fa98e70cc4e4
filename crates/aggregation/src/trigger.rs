//! Delivery of change-stream batches to the aggregation consumer.
//!
//! The trigger polls the change stream, hands fixed-size batches to an
//! [`AggregationConsumer`] and applies the failure policy:
//! - a failed batch of more than one record is split in half and each half
//!   is delivered again, without using up a retry
//! - a failed single record (or an unsplittable batch) is retried up to
//!   `retry_attempts` times
//! - whatever still fails goes to the dead-letter queue
//!
//! The checkpoint moves past a batch once every record in it has either
//! been applied or dead-lettered.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use event_store::{ChangeRecord, ChangeStream, EventStore, SequenceNumber};
use tokio::sync::{RwLock, watch};

use crate::{AggregationConsumer, BatchSummary, Result};

/// Where a trigger starts reading when it has no checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartingPosition {
    /// The oldest retained change.
    #[default]
    TrimHorizon,
    /// Only changes written after the trigger starts.
    Latest,
}

/// Batching and failure policy of a [`StreamTrigger`].
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Maximum number of changes handed to the consumer at once.
    pub batch_size: usize,
    pub starting_position: StartingPosition,
    /// Split failing batches in half before retrying.
    pub bisect_on_error: bool,
    /// Retries of a failing unsplittable batch before it is dead-lettered.
    pub retry_attempts: u32,
    /// Pause between polls when the stream is drained. Never zero.
    pub poll_interval: Duration,
    /// Trim the stream up to the checkpoint once a batch is handled.
    pub trim_consumed: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            starting_position: StartingPosition::TrimHorizon,
            bisect_on_error: true,
            retry_attempts: 1,
            poll_interval: Duration::from_millis(500),
            trim_consumed: true,
        }
    }
}

/// A change that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub record: ChangeRecord,
    pub reason: String,
}

/// In-memory queue of dead-lettered changes.
///
/// Cloning yields a handle onto the same queue.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterQueue {
    letters: Arc<RwLock<Vec<DeadLetter>>>,
}

impl DeadLetterQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a dead letter.
    pub async fn push(&self, letter: DeadLetter) {
        self.letters.write().await.push(letter);
    }

    /// Number of dead letters held.
    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    /// Whether the queue holds no dead letters.
    pub async fn is_empty(&self) -> bool {
        self.letters.read().await.is_empty()
    }

    /// Returns a copy of every dead letter, oldest first.
    pub async fn records(&self) -> Vec<DeadLetter> {
        self.letters.read().await.clone()
    }

    /// Removes and returns every dead letter.
    pub async fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.letters.write().await)
    }
}

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Changes read from the stream.
    pub received: usize,
    pub counted: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub dead_lettered: usize,
}

impl PollSummary {
    fn absorb(&mut self, batch: BatchSummary) {
        self.counted += batch.counted;
        self.skipped += batch.skipped;
        self.duplicates += batch.duplicates;
    }
}

/// Polls a change stream and feeds it to an aggregation consumer.
pub struct StreamTrigger<C: ChangeStream, S: EventStore> {
    stream: C,
    consumer: AggregationConsumer<S>,
    config: TriggerConfig,
    checkpoint: Option<SequenceNumber>,
    dead_letters: DeadLetterQueue,
}

/// Shortest pause between polls.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl<C: ChangeStream, S: EventStore> StreamTrigger<C, S> {
    /// Creates a trigger with no checkpoint yet.
    ///
    /// A zero batch size or poll interval is raised to the smallest usable
    /// value.
    pub fn new(stream: C, consumer: AggregationConsumer<S>, config: TriggerConfig) -> Self {
        Self {
            stream,
            consumer,
            config: TriggerConfig {
                batch_size: config.batch_size.max(1),
                poll_interval: config.poll_interval.max(MIN_POLL_INTERVAL),
                ..config
            },
            checkpoint: None,
            dead_letters: DeadLetterQueue::new(),
        }
    }

    /// Routes dead letters into an existing queue.
    pub fn with_dead_letters(mut self, queue: DeadLetterQueue) -> Self {
        self.dead_letters = queue;
        self
    }

    /// Effective configuration after clamping.
    pub fn config(&self) -> &TriggerConfig {
        &self.config
    }

    /// The consumer batches are delivered to.
    pub fn consumer(&self) -> &AggregationConsumer<S> {
        &self.consumer
    }

    /// Last change handled, if the trigger has positioned itself yet.
    pub fn checkpoint(&self) -> Option<SequenceNumber> {
        self.checkpoint
    }

    /// Queue receiving changes that exhausted their retries.
    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    async fn position(&mut self) -> Result<SequenceNumber> {
        if let Some(checkpoint) = self.checkpoint {
            return Ok(checkpoint);
        }
        let start = match self.config.starting_position {
            StartingPosition::TrimHorizon => SequenceNumber::trim_horizon(),
            StartingPosition::Latest => self.stream.latest_sequence().await?,
        };
        tracing::info!(checkpoint = %start, "stream trigger positioned");
        self.checkpoint = Some(start);
        Ok(start)
    }

    /// Reads at most one batch from the stream and delivers it.
    ///
    /// Only a failure to read the stream is returned as an error; record
    /// failures are handled by the retry and dead-letter policy.
    #[tracing::instrument(skip(self), fields(checkpoint = tracing::field::Empty))]
    pub async fn poll_once(&mut self) -> Result<PollSummary> {
        let after = self.position().await?;
        tracing::Span::current().record("checkpoint", after.as_u64());

        let batch = self
            .stream
            .read_changes(after, self.config.batch_size)
            .await?;
        let Some(last) = batch.last().map(|record| record.sequence_number) else {
            return Ok(PollSummary::default());
        };

        let mut summary = PollSummary {
            received: batch.len(),
            ..PollSummary::default()
        };
        self.deliver(batch, &mut summary).await;

        self.checkpoint = Some(last);
        if self.config.trim_consumed {
            if let Err(err) = self.stream.trim_changes(last).await {
                tracing::warn!(error = %err, checkpoint = %last, "failed to trim change stream");
            }
        }
        tracing::debug!(
            received = summary.received,
            counted = summary.counted,
            dead_lettered = summary.dead_lettered,
            checkpoint = %last,
            "batch delivered"
        );
        Ok(summary)
    }

    async fn deliver(&self, batch: Vec<ChangeRecord>, summary: &mut PollSummary) {
        let mut pending = VecDeque::from([(batch, 0u32)]);

        while let Some((mut chunk, attempts)) = pending.pop_front() {
            let err = match self.consumer.process_batch(&chunk).await {
                Ok(batch_summary) => {
                    summary.absorb(batch_summary);
                    continue;
                }
                Err(err) => err,
            };

            if self.config.bisect_on_error && chunk.len() > 1 {
                let right = chunk.split_off(chunk.len() / 2);
                tracing::debug!(left = chunk.len(), right = right.len(), "bisecting failed batch");
                pending.push_front((right, attempts));
                pending.push_front((chunk, attempts));
            } else if attempts < self.config.retry_attempts {
                tracing::debug!(attempt = attempts + 1, size = chunk.len(), "retrying failed batch");
                pending.push_front((chunk, attempts + 1));
            } else {
                let reason = err.to_string();
                tracing::warn!(size = chunk.len(), %reason, "dead-lettering changes");
                metrics::counter!("trigger_dead_lettered_total").increment(chunk.len() as u64);
                summary.dead_lettered += chunk.len();
                for record in chunk {
                    self.dead_letters
                        .push(DeadLetter {
                            record,
                            reason: reason.clone(),
                        })
                        .await;
                }
            }
        }
    }

    /// Polls until `shutdown` flips to true or its sender is dropped.
    ///
    /// A full batch is followed by another poll straight away; otherwise
    /// the trigger waits `poll_interval`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            bisect_on_error = self.config.bisect_on_error,
            retry_attempts = self.config.retry_attempts,
            strategy = self.consumer.strategy_name(),
            "stream trigger started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    while !stopping(&shutdown) {
                        match self.poll_once().await {
                            Ok(summary) if summary.received == self.config.batch_size => {}
                            Ok(_) => break,
                            Err(err) => {
                                tracing::error!(error = %err, "failed to read change stream");
                                break;
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || stopping(&shutdown) {
                        break;
                    }
                }
            }
        }

        tracing::info!(checkpoint = ?self.checkpoint, "stream trigger stopped");
    }
}

fn stopping(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
