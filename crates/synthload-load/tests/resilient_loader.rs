use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use rand_chacha::rand_core::SeedableRng;
use tokio_util::sync::CancellationToken;

use synthload_core::{FieldKind, SyntheticRecord};
use synthload_generate::{Batch, BatchGenerator, GenerateOptions, IdentitySynthesizer};
use synthload_load::pipeline::{self, FailurePolicy, PipelineError, PipelineOptions};
use synthload_load::{
    CsvSink, LoadError, LoaderOptions, MemorySink, ResilientLoader, Sink, SinkConnection,
    SinkError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Connect,
    Insert(usize),
    Commit,
    Close,
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Transient,
    Fatal,
    Hang,
}

#[derive(Default)]
struct State {
    faults: VecDeque<(Op, Kind)>,
    committed: Vec<SyntheticRecord>,
    connects: u32,
    rollbacks: u32,
    inserts: u64,
    insert_delay: Duration,
}

impl State {
    fn take_fault(&mut self, op: Op) -> Option<Kind> {
        match self.faults.front() {
            Some((expected, kind)) if *expected == op => {
                let kind = *kind;
                self.faults.pop_front();
                Some(kind)
            }
            _ => None,
        }
    }
}

/// Sink that fails on a scripted sequence of operations.
#[derive(Clone, Default)]
struct ScriptedSink {
    state: Arc<Mutex<State>>,
}

impl ScriptedSink {
    fn with_faults(faults: Vec<(Op, Kind)>) -> Self {
        let sink = Self::default();
        sink.state.lock().expect("state").faults = faults.into();
        sink
    }

    fn with_insert_delay(delay: Duration) -> Self {
        let sink = Self::default();
        sink.state.lock().expect("state").insert_delay = delay;
        sink
    }

    fn committed(&self) -> Vec<SyntheticRecord> {
        self.state.lock().expect("state").committed.clone()
    }

    fn connects(&self) -> u32 {
        self.state.lock().expect("state").connects
    }

    fn rollbacks(&self) -> u32 {
        self.state.lock().expect("state").rollbacks
    }

    fn inserts(&self) -> u64 {
        self.state.lock().expect("state").inserts
    }
}

async fn inject(kind: Option<Kind>) -> Result<(), SinkError> {
    match kind {
        None => Ok(()),
        Some(Kind::Transient) => Err(SinkError::ConnectionLost(
            "communication link failure".to_string(),
        )),
        Some(Kind::Fatal) => Err(SinkError::Database {
            code: Some("23505".to_string()),
            message: "duplicate key value violates unique constraint".to_string(),
        }),
        Some(Kind::Hang) => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    fn engine(&self) -> &'static str {
        "scripted"
    }

    async fn connect(&self) -> Result<Box<dyn SinkConnection>, SinkError> {
        let fault = {
            let mut state = self.state.lock().expect("state");
            state.connects += 1;
            state.take_fault(Op::Connect)
        };
        inject(fault).await?;
        Ok(Box::new(ScriptedConnection {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }))
    }
}

struct ScriptedConnection {
    state: Arc<Mutex<State>>,
    pending: Vec<SyntheticRecord>,
}

#[async_trait]
impl SinkConnection for ScriptedConnection {
    async fn begin(&mut self) -> Result<(), SinkError> {
        self.pending.clear();
        Ok(())
    }

    async fn insert(&mut self, record: &SyntheticRecord) -> Result<(), SinkError> {
        let (fault, delay) = {
            let mut state = self.state.lock().expect("state");
            state.inserts += 1;
            (state.take_fault(Op::Insert(self.pending.len())), state.insert_delay)
        };
        inject(fault).await?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.pending.push(record.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        let fault = self.state.lock().expect("state").take_fault(Op::Commit);
        inject(fault).await?;
        let rows = std::mem::take(&mut self.pending);
        self.state.lock().expect("state").committed.extend(rows);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        self.pending.clear();
        self.state.lock().expect("state").rollbacks += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.pending.clear();
        let fault = self.state.lock().expect("state").take_fault(Op::Close);
        inject(fault).await
    }
}

fn generate_options(batch_size: usize) -> GenerateOptions {
    GenerateOptions {
        email_domains: vec!["example.com".to_string(), "example.org".to_string()],
        batch_size,
        ..GenerateOptions::default()
    }
}

fn generator(seed: u64, batch_size: usize) -> BatchGenerator<IdentitySynthesizer<ChaCha8Rng>> {
    let opts = generate_options(batch_size);
    let synth = IdentitySynthesizer::with_rng(&opts, ChaCha8Rng::seed_from_u64(seed))
        .expect("synthesizer");
    BatchGenerator::new(synth, &opts).expect("generator")
}

fn one_batch(size: usize) -> Batch {
    let mut generator = generator(21, size);
    let mut batches = generator.batches(size as u64, size).expect("batches");
    batches.next().expect("batch").expect("generated")
}

fn fast_options() -> LoaderOptions {
    LoaderOptions {
        max_reconnects: 3,
        connect_timeout_ms: 200,
        statement_timeout_ms: 200,
        backoff_initial_ms: 1,
        backoff_max_ms: 5,
        backoff_multiplier: 2.0,
    }
}

fn assert_distinct(records: &[SyntheticRecord]) {
    for field in FieldKind::CHECK_ORDER {
        let values: HashSet<&str> = records.iter().map(|r| r.value(field)).collect();
        assert_eq!(values.len(), records.len(), "duplicate {field}");
    }
}

#[tokio::test]
async fn transient_failure_then_success_commits_exactly_once() {
    let sink = ScriptedSink::with_faults(vec![(Op::Insert(3), Kind::Transient)]);
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());
    let batch = one_batch(10);

    let loaded = loader.load(&batch).await.expect("batch loads");

    assert_eq!(loaded, 10);
    let committed = sink.committed();
    assert_eq!(committed, batch.records);
    assert_distinct(&committed);
    assert_eq!(sink.connects(), 2);
    assert_eq!(loader.stats().reconnects, 1);
    assert_eq!(loader.stats().batches_committed, 1);
}

#[tokio::test]
async fn transient_failure_on_commit_reissues_whole_batch() {
    let sink = ScriptedSink::with_faults(vec![(Op::Commit, Kind::Transient)]);
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());
    let batch = one_batch(5);

    assert_eq!(loader.load(&batch).await.expect("batch loads"), 5);
    assert_eq!(sink.committed().len(), 5);
    assert_eq!(sink.inserts(), 10);
}

#[tokio::test]
async fn fatal_failure_commits_nothing_and_does_not_retry() {
    let sink = ScriptedSink::with_faults(vec![(Op::Insert(0), Kind::Fatal)]);
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());
    let batch = one_batch(8);

    let result = loader.load(&batch).await;

    assert!(matches!(result, Err(LoadError::Fatal(SinkError::Database { .. }))));
    assert!(sink.committed().is_empty());
    assert_eq!(sink.connects(), 1);
    assert_eq!(sink.inserts(), 1);
    assert_eq!(sink.rollbacks(), 1);
    assert_eq!(loader.stats().reconnects, 0);
}

#[tokio::test]
async fn permanently_dead_sink_exhausts_reconnects() {
    let faults = vec![(Op::Connect, Kind::Transient); 4];
    let sink = ScriptedSink::with_faults(faults);
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());

    let result = loader.load(&one_batch(3)).await;

    assert!(matches!(
        result,
        Err(LoadError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(sink.connects(), 4);
    assert!(sink.committed().is_empty());
}

#[tokio::test]
async fn hung_statement_times_out_and_reconnects() {
    let sink = ScriptedSink::with_faults(vec![(Op::Insert(1), Kind::Hang)]);
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());

    assert_eq!(loader.load(&one_batch(4)).await.expect("batch loads"), 4);
    assert_eq!(sink.committed().len(), 4);
    assert_eq!(loader.stats().transient_failures, 1);
}

#[tokio::test]
async fn pipeline_loads_requested_count_in_order() {
    let sink = MemorySink::new();
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());
    let options = PipelineOptions {
        queue_depth: 2,
        ..PipelineOptions::default()
    };

    let summary = pipeline::run(
        generator(5, 1000),
        2500,
        &mut loader,
        &options,
        CancellationToken::new(),
    )
    .await
    .expect("run succeeds");

    assert_eq!(summary.total_loaded, 2500);
    assert_eq!(summary.batches_loaded, 3);
    assert_eq!(summary.generation.batches_emitted, 3);
    let committed = sink.committed();
    assert_eq!(committed.len(), 2500);
    assert_distinct(&committed);
}

#[tokio::test]
async fn pipeline_abort_keeps_last_confirmed_total() {
    let sink = ScriptedSink::with_faults(vec![(Op::Connect, Kind::Fatal)]);
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());

    let result = pipeline::run(
        generator(6, 100),
        300,
        &mut loader,
        &PipelineOptions::default(),
        CancellationToken::new(),
    )
    .await;

    match result {
        Err(PipelineError::Load {
            sequence, summary, ..
        }) => {
            assert_eq!(sequence, 0);
            assert_eq!(summary.total_loaded, 0);
        }
        other => panic!("expected load failure, got {other:?}"),
    }
    assert!(sink.committed().is_empty());
}

#[tokio::test]
async fn pipeline_skip_policy_tops_up_to_requested_count() {
    let sink = ScriptedSink::with_faults(vec![(Op::Insert(0), Kind::Fatal)]);
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());
    let options = PipelineOptions {
        on_batch_failure: FailurePolicy::Skip,
        ..PipelineOptions::default()
    };

    let summary = pipeline::run(
        generator(8, 100),
        250,
        &mut loader,
        &options,
        CancellationToken::new(),
    )
    .await
    .expect("run succeeds");

    assert_eq!(summary.total_loaded, 250);
    assert_eq!(summary.batches_skipped, 1);
    assert_eq!(summary.records_skipped, 100);
    let committed = sink.committed();
    assert_eq!(committed.len(), 250);
    assert_distinct(&committed);
}

#[tokio::test]
async fn pipeline_skip_policy_gives_up_after_limit() {
    let faults = vec![(Op::Insert(0), Kind::Fatal); 3];
    let sink = ScriptedSink::with_faults(faults);
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());
    let options = PipelineOptions {
        on_batch_failure: FailurePolicy::Skip,
        max_skipped_batches: 2,
        ..PipelineOptions::default()
    };

    let result = pipeline::run(
        generator(9, 10),
        50,
        &mut loader,
        &options,
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(
        result,
        Err(PipelineError::TooManySkipped { skipped: 3, .. })
    ));
}

#[tokio::test]
async fn cancelled_run_issues_no_loader_calls() {
    let sink = ScriptedSink::default();
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = pipeline::run(
        generator(10, 100),
        1000,
        &mut loader,
        &PipelineOptions::default(),
        cancel,
    )
    .await;

    match result {
        Err(PipelineError::Cancelled { summary }) => assert_eq!(summary.total_loaded, 0),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(sink.connects(), 0);
}

#[tokio::test]
async fn cancellation_waits_for_the_batch_in_flight() {
    let sink = ScriptedSink::with_insert_delay(Duration::from_millis(1));
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let watched = sink.clone();
    tokio::spawn(async move {
        while watched.inserts() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        trigger.cancel();
    });

    let result = pipeline::run(
        generator(12, 100),
        1_000,
        &mut loader,
        &PipelineOptions::default(),
        cancel,
    )
    .await;

    let summary = match result {
        Err(PipelineError::Cancelled { summary }) => summary,
        other => panic!("expected cancellation, got {other:?}"),
    };
    let committed = sink.committed();
    assert!(summary.total_loaded >= 100);
    assert!(summary.total_loaded < 1_000);
    assert_eq!(summary.total_loaded % 100, 0);
    assert_eq!(summary.total_loaded, committed.len() as u64);
    assert_eq!(summary.loader.batches_committed, summary.batches_loaded);
    assert_eq!(sink.rollbacks(), 0);
    assert_distinct(&committed);
}

#[tokio::test]
async fn csv_commit_completes_under_a_tight_statement_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("records.csv");
    let options = LoaderOptions {
        statement_timeout_ms: 1,
        ..fast_options()
    };
    let mut loader = ResilientLoader::new(Arc::new(CsvSink::new(&path)), options);

    assert_eq!(loader.load(&one_batch(500)).await.expect("batch loads"), 500);

    let content = std::fs::read_to_string(&path).expect("csv");
    assert_eq!(content.lines().count(), 501);
    assert_eq!(loader.stats().transient_failures, 0);
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("logs").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn failed_close_of_broken_connection_is_logged() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let sink = ScriptedSink::with_faults(vec![
        (Op::Insert(0), Kind::Transient),
        (Op::Close, Kind::Transient),
    ]);
    let mut loader = ResilientLoader::new(Arc::new(sink.clone()), fast_options());

    assert_eq!(loader.load(&one_batch(3)).await.expect("batch loads"), 3);

    let output = String::from_utf8(logs.0.lock().expect("logs").clone()).expect("utf8");
    assert!(output.contains("error while closing broken sink connection"));
    assert!(output.contains("communication link failure"));
}
