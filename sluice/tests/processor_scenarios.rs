/*
 * Copyright 2024 Thaddeus Treloar
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

use std::{collections::VecDeque, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use sluice::{
    app::{ProcessorHost, SluiceConfigBuilder},
    checkpoint::{Checkpoint, CheckpointError, CheckpointStore, InMemoryCheckpointStore},
    codec::TransportDocument,
    message::{CloseReason, EventRecord, LeaseToken, PartitionAssignment, PartitionId},
    observe::{ErrorKind, ProcessorEvent, RecordingObserver},
    processor::{
        EventProcessor, PartitionProcessor, PartitionProcessorFactory, ProcessorState,
    },
    sink::{SinkWriter, WriteError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Write(Vec<String>),
    Commit(PartitionId, i64),
}

type Log = Arc<Mutex<Vec<Step>>>;

#[derive(Clone, Default)]
struct ScriptedWriter {
    log: Log,
    failures: Arc<Mutex<VecDeque<WriteError>>>,
    started: Arc<Notify>,
    permits: Option<Arc<Semaphore>>,
}

impl ScriptedWriter {
    fn fail_next(&self, err: WriteError) {
        self.failures.lock().push_back(err);
    }

    fn writes(&self) -> Vec<Vec<String>> {
        self.log
            .lock()
            .iter()
            .filter_map(|step| match step {
                Step::Write(payloads) => Some(payloads.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SinkWriter for ScriptedWriter {
    async fn write(&self, document: &TransportDocument) -> Result<(), WriteError> {
        tokio::task::yield_now().await;

        self.started.notify_one();

        if let Some(permits) = &self.permits {
            permits.acquire().await.expect("semaphore stays open").forget();
        }

        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }

        let payloads = document.decode().expect("documents are valid json");

        self.log.lock().push(Step::Write(payloads));

        Ok(())
    }
}

struct RecordingStore {
    log: Log,
    inner: InMemoryCheckpointStore,
}

impl CheckpointStore for RecordingStore {
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.log
            .lock()
            .push(Step::Commit(checkpoint.partition, checkpoint.sequence_number));

        self.inner.commit(checkpoint).await
    }
}

struct Harness {
    log: Log,
    writer: ScriptedWriter,
    observer: Arc<RecordingObserver>,
    gate: Arc<sluice::checkpoint::CheckpointGate<RecordingStore>>,
}

impl Harness {
    fn new() -> Self {
        let log = Log::default();

        Self {
            writer: ScriptedWriter {
                log: log.clone(),
                ..Default::default()
            },
            observer: Arc::new(RecordingObserver::new()),
            gate: Arc::new(sluice::checkpoint::CheckpointGate::new(RecordingStore {
                log: log.clone(),
                inner: InMemoryCheckpointStore::new(),
            })),
            log,
        }
    }

    fn store(&self) -> &InMemoryCheckpointStore {
        &self.gate.store().inner
    }

    fn processor(
        &self,
        partition: i32,
        checkpoint: i64,
    ) -> PartitionProcessor<ScriptedWriter, RecordingStore> {
        let lease = LeaseToken::generate();

        self.store().grant(PartitionId(partition), lease.clone());

        PartitionProcessor::new(
            assignment(partition, lease, checkpoint),
            self.writer.clone(),
            self.gate.clone(),
            self.observer.clone(),
        )
    }

    fn commits(&self, partition: PartitionId) -> Vec<i64> {
        self.log
            .lock()
            .iter()
            .filter_map(|step| match step {
                Step::Commit(p, sequence) if *p == partition => Some(*sequence),
                _ => None,
            })
            .collect()
    }
}

fn assignment(partition: i32, lease: LeaseToken, checkpoint: i64) -> PartitionAssignment {
    PartitionAssignment::new("orders", "orders-sql", partition, lease).with_checkpoint(checkpoint)
}

fn payload(partition: i32, sequence: i64) -> String {
    format!(r#"{{"partition":{},"sequence":{}}}"#, partition, sequence)
}

fn records(partition: i32, sequences: impl IntoIterator<Item = i64>) -> Vec<EventRecord> {
    sequences
        .into_iter()
        .map(|sequence| EventRecord::new(payload(partition, sequence), sequence, Utc::now()))
        .collect()
}

#[tokio::test]
async fn test_successful_batch_commits_last_sequence() {
    let harness = Harness::new();
    let mut processor = harness.processor(0, 100);

    let opened = processor.assignment().clone();

    processor.on_open(&opened).await;
    processor.on_batch(records(0, 101..=105)).await;

    assert_eq!(harness.commits(PartitionId(0)), vec![105]);
    assert_eq!(harness.store().committed(PartitionId(0)), Some(105));
    assert_eq!(processor.state(), ProcessorState::Idle);
    assert_eq!(
        harness.writer.writes(),
        vec![(101..=105).map(|s| payload(0, s)).collect::<Vec<_>>()]
    );
    assert!(harness.observer.errors().is_empty());
}

#[tokio::test]
async fn test_commit_never_precedes_write() {
    let harness = Harness::new();
    let mut processor = harness.processor(0, 100);

    let opened = processor.assignment().clone();

    processor.on_open(&opened).await;
    processor.on_batch(records(0, 101..=102)).await;
    processor.on_batch(vec![]).await;
    processor.on_batch(records(0, 103..=103)).await;

    assert_eq!(
        *harness.log.lock(),
        vec![
            Step::Write(vec![payload(0, 101), payload(0, 102)]),
            Step::Commit(PartitionId(0), 102),
            Step::Write(vec![payload(0, 103)]),
            Step::Commit(PartitionId(0), 103),
        ]
    );
    assert!(harness
        .observer
        .events()
        .contains(&ProcessorEvent::BatchSkipped {
            partition: PartitionId(0)
        }));
}

#[tokio::test]
async fn test_rejected_write_leaves_checkpoint_in_place() {
    let harness = Harness::new();
    let mut processor = harness.processor(0, 100);

    harness.writer.fail_next(WriteError::rejected("constraint violation"));

    let opened = processor.assignment().clone();

    processor.on_open(&opened).await;
    processor.on_batch(records(0, 101..=105)).await;

    assert!(harness.commits(PartitionId(0)).is_empty());
    assert_eq!(harness.gate.last_committed(PartitionId(0)), Some(100));
    assert_eq!(processor.state(), ProcessorState::Idle);

    let errors = harness.observer.errors();

    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        ProcessorEvent::BatchFailed {
            kind: ErrorKind::WriteRejected,
            ..
        }
    ));
}

#[tokio::test]
async fn test_connection_failure_does_not_stall_partition() {
    let harness = Harness::new();
    let mut processor = harness.processor(0, 100);

    harness.writer.fail_next(WriteError::connection("connection refused"));

    let opened = processor.assignment().clone();

    processor.on_open(&opened).await;
    processor.on_batch(records(0, 101..=105)).await;

    assert_eq!(processor.state(), ProcessorState::Idle);

    processor.on_batch(records(0, 106..=107)).await;

    assert_eq!(harness.commits(PartitionId(0)), vec![107]);
    assert_eq!(harness.writer.writes().len(), 1);
    assert_eq!(harness.observer.errors().len(), 1);
}

#[tokio::test]
async fn test_lease_lost_skips_final_checkpoint() {
    let harness = Harness::new();
    let mut processor = harness.processor(0, 100);

    let opened = processor.assignment().clone();

    processor.on_open(&opened).await;
    processor.on_batch(records(0, 101..=105)).await;
    processor.on_close(CloseReason::LeaseLost).await;

    assert_eq!(harness.commits(PartitionId(0)), vec![105]);
    assert_eq!(processor.state(), ProcessorState::Closed);
    assert!(!harness
        .observer
        .events()
        .iter()
        .any(|event| matches!(event, ProcessorEvent::FinalCheckpoint { .. })));
}

#[tokio::test]
async fn test_shutdown_flushes_exactly_once() {
    let harness = Harness::new();
    let mut processor = harness.processor(0, 100);

    let opened = processor.assignment().clone();

    processor.on_open(&opened).await;
    processor.on_batch(records(0, 101..=105)).await;
    processor.on_close(CloseReason::Shutdown).await;
    processor.on_close(CloseReason::Shutdown).await;

    assert_eq!(harness.commits(PartitionId(0)), vec![105, 105]);
    assert_eq!(harness.store().committed(PartitionId(0)), Some(105));
    assert_eq!(processor.state(), ProcessorState::Closed);
    assert!(harness
        .observer
        .events()
        .contains(&ProcessorEvent::FinalCheckpoint {
            partition: PartitionId(0),
            sequence: Some(105),
            outcome: Ok(()),
        }));
}

#[tokio::test]
async fn test_stale_lease_surfaces_checkpoint_failure() {
    let harness = Harness::new();
    let mut processor = harness.processor(0, 100);

    let opened = processor.assignment().clone();

    processor.on_open(&opened).await;

    harness.store().grant(PartitionId(0), LeaseToken::generate());

    processor.on_batch(records(0, 101..=105)).await;

    assert_eq!(harness.writer.writes().len(), 1);
    assert_eq!(harness.store().committed(PartitionId(0)), None);
    assert_eq!(harness.gate.last_committed(PartitionId(0)), Some(100));
    assert!(harness
        .observer
        .errors()
        .iter()
        .any(|event| matches!(event, ProcessorEvent::CheckpointFailed { sequence: 105, .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partitions_track_checkpoints_independently() {
    let log = Log::default();
    let writer = ScriptedWriter {
        log: log.clone(),
        ..Default::default()
    };
    let observer = Arc::new(RecordingObserver::new());

    let mut config = SluiceConfigBuilder::new();

    config
        .set("sink.connection.string", "postgres://localhost/orders")
        .set("sink.write.operation", "ingest_orders")
        .set("stream.id", "orders")
        .set("consumer.group", "orders-sql")
        .set("batch.max.size", "10");

    let factory = PartitionProcessorFactory::builder()
        .with_config(config.build().unwrap())
        .with_writer(writer.clone())
        .with_checkpoint_store(RecordingStore {
            log: log.clone(),
            inner: InMemoryCheckpointStore::new(),
        })
        .with_observer(observer.clone())
        .build()
        .unwrap();

    let host = ProcessorHost::new(factory);

    for (partition, checkpoint) in [(0, 100), (1, 500)] {
        let lease = LeaseToken::generate();

        host.factory()
            .gate()
            .store()
            .inner
            .grant(PartitionId(partition), lease.clone());

        host.assign(assignment(partition, lease, checkpoint));
    }

    for round in 0..5 {
        let p0_start = 101 + round * 3;
        let p1_start = 501 + round * 2;

        host.deliver(PartitionId(1), records(1, p1_start..p1_start + 2))
            .await
            .unwrap();
        host.deliver(PartitionId(0), records(0, p0_start..p0_start + 3))
            .await
            .unwrap();
    }

    host.shutdown().await;

    let gate = host.factory().gate();
    let store = &gate.store().inner;

    assert_eq!(store.committed(PartitionId(0)), Some(115));
    assert_eq!(store.committed(PartitionId(1)), Some(510));

    for (partition, expected) in [
        (PartitionId(0), vec![103, 106, 109, 112, 115, 115]),
        (PartitionId(1), vec![502, 504, 506, 508, 510, 510]),
    ] {
        let commits: Vec<_> = log
            .lock()
            .iter()
            .filter_map(|step| match step {
                Step::Commit(p, sequence) if *p == partition => Some(*sequence),
                _ => None,
            })
            .collect();

        assert_eq!(commits, expected);
    }

    assert!(observer.errors().is_empty());
    assert!(host.assigned_partitions().is_empty());
}

#[tokio::test]
async fn test_lease_lost_lets_in_flight_batch_finish() {
    let log = Log::default();
    let permits = Arc::new(Semaphore::new(0));
    let writer = ScriptedWriter {
        log: log.clone(),
        permits: Some(permits.clone()),
        ..Default::default()
    };
    let started = writer.started.clone();
    let observer = Arc::new(RecordingObserver::new());

    let mut config = SluiceConfigBuilder::new();

    config
        .set("sink.connection.string", "postgres://localhost/orders")
        .set("sink.write.operation", "ingest_orders")
        .set("stream.id", "orders")
        .set("consumer.group", "orders-sql");

    let factory = PartitionProcessorFactory::builder()
        .with_config(config.build().unwrap())
        .with_writer(writer.clone())
        .with_checkpoint_store(RecordingStore {
            log: log.clone(),
            inner: InMemoryCheckpointStore::new(),
        })
        .with_observer(observer.clone())
        .build()
        .unwrap();

    let host = ProcessorHost::new(factory);
    let lease = LeaseToken::generate();

    host.factory()
        .gate()
        .store()
        .inner
        .grant(PartitionId(0), lease.clone());
    host.assign(assignment(0, lease, 100));

    host.deliver(PartitionId(0), records(0, 101..=102))
        .await
        .unwrap();
    started.notified().await;
    host.deliver(PartitionId(0), records(0, 103..=104))
        .await
        .unwrap();

    let (revoked, _) = tokio::join!(
        host.revoke(PartitionId(0), CloseReason::LeaseLost),
        async { permits.add_permits(1) }
    );

    revoked.unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            Step::Write(vec![payload(0, 101), payload(0, 102)]),
            Step::Commit(PartitionId(0), 102),
        ]
    );

    let events = observer.events_for(PartitionId(0));

    assert!(!events
        .iter()
        .any(|event| matches!(event, ProcessorEvent::FinalCheckpoint { .. })));
    assert!(!events.iter().any(|event| matches!(
        event,
        ProcessorEvent::BatchWritten { range, .. } if range.first == 103
    )));
    assert_eq!(
        events.last(),
        Some(&ProcessorEvent::PartitionClosed {
            partition: PartitionId(0),
            reason: CloseReason::LeaseLost,
        })
    );
}
