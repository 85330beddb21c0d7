// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch rotation service.
//!
//! The service task is the only owner of the live [`RecordBatch`]. Producers
//! talk to it through a cloneable [`BatchHandle`], so appending and the
//! full-batch check happen one command at a time and no two producers can ever
//! hold the same frozen batch. When a batch fills up it is rotated and moved
//! into a write task; the service keeps taking commands while the sink works.
//! At most [`MAX_IN_FLIGHT_WRITES`] writes run at once and a rotated batch that
//! finds no free slot is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::batch::{RecordBatch, RotationSignal};
use crate::constants::MAX_IN_FLIGHT_WRITES;
use crate::errors::{self, SinkError};
use crate::record::Record;
use crate::sink::Sink;

#[derive(Debug)]
pub enum BatchCommand {
    InsertBatch(Vec<Record>),
    Flush(oneshot::Sender<usize>),
    Stats(oneshot::Sender<BatchStats>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchStats {
    /// Records in the live batch.
    pub pending: usize,
    pub capacity: usize,
    pub rotations: u64,
    /// Rotated batches the sink never stored, including those dropped while
    /// every write slot was busy.
    pub sink_failures: u64,
    /// Records in batches the sink acknowledged.
    pub records_flushed: u64,
    pub writes_in_flight: usize,
}

#[derive(Clone, Debug)]
pub struct BatchHandle {
    tx: mpsc::UnboundedSender<BatchCommand>,
}

impl BatchHandle {
    pub fn insert_batch(
        &self,
        records: Vec<Record>,
    ) -> Result<(), mpsc::error::SendError<BatchCommand>> {
        self.tx.send(BatchCommand::InsertBatch(records))
    }

    /// Rotates the live batch if it holds anything, waits for every
    /// outstanding sink write, and returns how many records were handed to
    /// the sink by this call.
    pub async fn flush(&self) -> Result<usize, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatchCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    pub async fn stats(&self) -> Result<BatchStats, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(BatchCommand::Stats(response_tx))
            .map_err(|e| format!("Failed to send stats command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive stats response: {}", e))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<BatchCommand>> {
        self.tx.send(BatchCommand::Shutdown)
    }
}

struct WriteOutcome {
    sequence: u64,
    len: usize,
    result: Result<(), SinkError>,
}

pub struct BatchService {
    batch: RecordBatch,
    sink: Arc<dyn Sink>,
    sink_timeout: Duration,
    flush_on_shutdown: bool,
    stats: BatchStats,
    writes: JoinSet<WriteOutcome>,
    rx: mpsc::UnboundedReceiver<BatchCommand>,
}

impl BatchService {
    pub fn new(
        capacity: usize,
        sink: Arc<dyn Sink>,
        sink_timeout: Duration,
    ) -> Result<(Self, BatchHandle), errors::Creation> {
        let (tx, rx) = mpsc::unbounded_channel();
        let batch = RecordBatch::new(capacity)?;

        let service = Self {
            batch,
            sink,
            sink_timeout,
            flush_on_shutdown: false,
            stats: BatchStats {
                capacity,
                ..BatchStats::default()
            },
            writes: JoinSet::new(),
            rx,
        };

        let handle = BatchHandle { tx };

        Ok((service, handle))
    }

    /// Hand the partially filled batch to the sink when the service shuts down.
    /// Off by default: a partial batch is dropped on exit.
    #[must_use]
    pub fn with_flush_on_shutdown(mut self, flush_on_shutdown: bool) -> Self {
        self.flush_on_shutdown = flush_on_shutdown;
        self
    }

    pub async fn run(mut self) {
        debug!("Batch service started");

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        BatchCommand::InsertBatch(records) => {
                            for record in records {
                                self.append(record);
                            }
                        }

                        BatchCommand::Flush(response_tx) => {
                            let handed_off = if self.batch.is_empty() {
                                0
                            } else {
                                self.rotate()
                            };
                            self.wait_for_writes().await;
                            if response_tx.send(handed_off).is_err() {
                                error!("Failed to send flush response - receiver dropped");
                            }
                        }

                        BatchCommand::Stats(response_tx) => {
                            let stats = BatchStats {
                                pending: self.batch.len(),
                                writes_in_flight: self.writes.len(),
                                ..self.stats
                            };
                            if response_tx.send(stats).is_err() {
                                error!("Failed to send stats response - receiver dropped");
                            }
                        }

                        BatchCommand::Shutdown => {
                            debug!("Batch service shutting down");
                            break;
                        }
                    }
                }
                Some(joined) = self.writes.join_next(), if !self.writes.is_empty() => {
                    self.record_write(joined);
                }
            }
        }

        if !self.batch.is_empty() {
            if self.flush_on_shutdown {
                self.rotate();
            } else {
                info!(
                    "Dropping partial batch of {} records on shutdown",
                    self.batch.len()
                );
            }
        }
        self.wait_for_writes().await;

        debug!("Batch service stopped");
    }

    fn append(&mut self, record: Record) {
        let record = match self.batch.append(record) {
            Ok(RotationSignal::None) => return,
            Ok(RotationSignal::Full) => {
                self.rotate();
                return;
            }
            // Unreachable while every Full signal is rotated immediately, but a
            // record is never dropped because of it.
            Err(record) => record,
        };
        self.rotate();
        if let Ok(RotationSignal::Full) = self.batch.append(record) {
            self.rotate();
        }
    }

    /// Swaps in an empty batch and moves the frozen one into a sink write
    /// task. Returns the number of records handed to the sink, which is zero
    /// when the batch had to be dropped.
    fn rotate(&mut self) -> usize {
        let frozen = self.batch.rotate();
        let sequence = frozen.sequence();
        let len = frozen.len();
        self.stats.rotations += 1;
        info!("Rotating batch {sequence} with {len} records");

        if self.writes.len() >= MAX_IN_FLIGHT_WRITES {
            self.stats.sink_failures += 1;
            error!(
                "{} sink writes still in flight, dropping batch {sequence} of {len} records",
                self.writes.len()
            );
            return 0;
        }

        let sink = Arc::clone(&self.sink);
        let sink_timeout = self.sink_timeout;
        self.writes.spawn(async move {
            let result = match tokio::time::timeout(sink_timeout, sink.write(frozen)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(sink_timeout)),
            };
            WriteOutcome {
                sequence,
                len,
                result,
            }
        });
        len
    }

    async fn wait_for_writes(&mut self) {
        while let Some(joined) = self.writes.join_next().await {
            self.record_write(joined);
        }
    }

    fn record_write(&mut self, joined: Result<WriteOutcome, JoinError>) {
        match joined {
            Ok(WriteOutcome {
                sequence,
                len,
                result: Ok(()),
            }) => {
                self.stats.records_flushed += len as u64;
                debug!("Sink accepted batch {sequence}");
            }
            Ok(WriteOutcome {
                sequence,
                len,
                result: Err(e),
            }) => {
                self.stats.sink_failures += 1;
                error!("Failed to write batch {sequence} of {len} records, dropping it: {e}");
            }
            Err(e) => {
                self.stats.sink_failures += 1;
                error!("Sink write task failed: {e}");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::batch::tests::record;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<RecordBatch>>,
    }

    impl CollectingSink {
        fn lengths(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(RecordBatch::len).collect()
        }
    }

    #[async_trait]
    impl Sink for CollectingSink {
        async fn write(&self, batch: RecordBatch) -> Result<(), SinkError> {
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl Sink for FailingSink {
        async fn write(&self, _batch: RecordBatch) -> Result<(), SinkError> {
            Err(SinkError::Rejected("disk full".to_string()))
        }
    }

    struct StalledSink;

    #[async_trait]
    impl Sink for StalledSink {
        async fn write(&self, _batch: RecordBatch) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn start(
        capacity: usize,
        sink: Arc<dyn Sink>,
    ) -> (BatchHandle, tokio::task::JoinHandle<()>) {
        let (service, handle) = BatchService::new(capacity, sink, Duration::from_millis(200))
            .expect("batch service creation failed");
        (handle, tokio::spawn(service.run()))
    }

    #[tokio::test]
    async fn test_rotation_on_capacity() {
        let sink = Arc::new(CollectingSink::default());
        let (handle, task) = start(4, sink.clone());

        handle
            .insert_batch((0..4).map(record).collect())
            .expect("Failed to insert records");

        // nothing left to rotate; waits for the write
        assert_eq!(handle.flush().await.unwrap(), 0);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.rotations, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.records_flushed, 4);
        assert_eq!(sink.lengths(), vec![4]);

        handle.shutdown().expect("Failed to shutdown");
        task.await.expect("Service task failed");
    }

    #[tokio::test]
    async fn test_no_rotation_below_capacity() {
        let sink = Arc::new(CollectingSink::default());
        let (handle, task) = start(4, sink.clone());

        handle.insert_batch((0..3).map(record).collect()).unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.rotations, 0);
        assert_eq!(stats.pending, 3);
        assert!(sink.lengths().is_empty());

        handle.shutdown().unwrap();
        task.await.unwrap();
        // partial batch is dropped on shutdown
        assert!(sink.lengths().is_empty());
    }

    #[tokio::test]
    async fn test_every_record_handed_off_exactly_once() {
        let sink = Arc::new(CollectingSink::default());
        let (handle, task) = start(3, sink.clone());

        // split across commands so rotations fall in the middle of an insert
        handle.insert_batch((0..5).map(record).collect()).unwrap();
        handle.insert_batch((5..10).map(record).collect()).unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.rotations, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(handle.flush().await.unwrap(), 1);

        handle.shutdown().unwrap();
        task.await.unwrap();

        let mut batches = sink.batches.lock().unwrap();
        batches.sort_by_key(RecordBatch::sequence);
        let sequences: Vec<u64> = batches.iter().map(RecordBatch::sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        let all: Vec<Record> = batches
            .iter()
            .flat_map(|b| b.records().iter().cloned())
            .collect();
        assert_eq!(all, (0..10).map(record).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_flush_empty_batch_is_noop() {
        let sink = Arc::new(CollectingSink::default());
        let (handle, task) = start(3, sink.clone());

        assert_eq!(handle.flush().await.unwrap(), 0);
        assert_eq!(handle.stats().await.unwrap().rotations, 0);

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_on_shutdown() {
        let sink = Arc::new(CollectingSink::default());
        let (service, handle) =
            BatchService::new(10, sink.clone(), Duration::from_secs(1)).unwrap();
        let task = tokio::spawn(service.with_flush_on_shutdown(true).run());

        handle.insert_batch((0..2).map(record).collect()).unwrap();
        handle.shutdown().unwrap();
        task.await.unwrap();

        assert_eq!(sink.lengths(), vec![2]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_sink_failure_does_not_stop_rotation() {
        let (handle, task) = start(2, Arc::new(FailingSink));

        handle.insert_batch((0..5).map(record).collect()).unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.rotations, 2);
        assert_eq!(stats.pending, 1);

        assert_eq!(handle.flush().await.unwrap(), 1);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.rotations, 3);
        assert_eq!(stats.sink_failures, 3);
        assert_eq!(stats.records_flushed, 0);
        assert_eq!(stats.pending, 0);
        assert!(logs_contain("disk full"));

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_times_out() {
        let (handle, task) = start(1, Arc::new(StalledSink));

        handle.insert_batch(vec![record(0), record(1)]).unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.rotations, 2);
        assert_eq!(stats.writes_in_flight, 2);
        assert_eq!(stats.sink_failures, 0);

        handle.flush().await.unwrap();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.writes_in_flight, 0);
        assert_eq!(stats.sink_failures, 2);

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_stalled_sink_does_not_block_commands() {
        let (handle, task) = start(1, Arc::new(StalledSink));
        let started = tokio::time::Instant::now();

        for i in 0..50 {
            handle.insert_batch(vec![record(i)]).unwrap();
        }

        let stats = handle.stats().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(stats.rotations, 50);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.writes_in_flight, MAX_IN_FLIGHT_WRITES);
        assert_eq!(stats.sink_failures, 50 - MAX_IN_FLIGHT_WRITES as u64);
        assert!(logs_contain("sink writes still in flight"));

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_complete_while_batches_fill() {
        let sink = Arc::new(CollectingSink::default());
        let (handle, task) = start(2, sink.clone());

        handle.insert_batch((0..6).map(record).collect()).unwrap();
        assert_eq!(handle.flush().await.unwrap(), 0);

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.rotations, 3);
        assert_eq!(stats.records_flushed, 6);
        assert_eq!(stats.sink_failures, 0);
        assert_eq!(sink.lengths(), vec![2, 2, 2]);

        handle.shutdown().unwrap();
        task.await.unwrap();
    }

    #[test]
    fn test_zero_capacity_service_is_rejected() {
        let result = BatchService::new(0, Arc::new(CollectingSink::default()), Duration::ZERO);
        assert!(matches!(result, Err(errors::Creation::ZeroCapacity)));
    }
}
