//! Driving loop: generate batches ahead of the loader and account for commits.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use synthload_generate::{
    Batch, BatchGenerator, CandidateSource, GenerationError, GenerationReport,
};

use crate::loader::{LoadError, LoaderStats, ResilientLoader};

/// What the run does when a batch cannot be loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run and surface the error.
    #[default]
    Abort,
    /// Drop the batch and generate replacement records.
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    /// Generated batches allowed to wait for the loader.
    pub queue_depth: usize,
    pub on_batch_failure: FailurePolicy,
    /// Skipped batches tolerated before the run aborts.
    pub max_skipped_batches: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            queue_depth: 1,
            on_batch_failure: FailurePolicy::Abort,
            max_skipped_batches: 3,
        }
    }
}

/// Progress of a run. `total_loaded` only counts committed records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub requested: u64,
    pub total_loaded: u64,
    pub batches_loaded: u64,
    pub batches_skipped: u64,
    pub records_skipped: u64,
    pub loader: LoaderStats,
    pub generation: GenerationReport,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("generation failed after {} records loaded: {source}", .summary.total_loaded)]
    Generation {
        source: GenerationError,
        summary: RunSummary,
    },
    #[error("batch {sequence} failed after {} records loaded: {source}", .summary.total_loaded)]
    Load {
        sequence: u64,
        source: LoadError,
        summary: RunSummary,
    },
    #[error("{skipped} batches skipped, more than allowed")]
    TooManySkipped { skipped: u64, summary: RunSummary },
    #[error("run cancelled after {} records loaded", .summary.total_loaded)]
    Cancelled { summary: RunSummary },
    #[error("batch producer stopped: {message}")]
    Producer { message: String, summary: RunSummary },
}

impl PipelineError {
    pub fn summary(&self) -> &RunSummary {
        match self {
            Self::Generation { summary, .. }
            | Self::Load { summary, .. }
            | Self::TooManySkipped { summary, .. }
            | Self::Cancelled { summary }
            | Self::Producer { summary, .. } => summary,
        }
    }
}

enum Stop {
    Generation(GenerationError),
    Load { sequence: u64, source: LoadError },
    TooManySkipped(u64),
    Cancelled,
    Producer(String),
}

/// Generate `requested` records and load them batch by batch.
///
/// Generation runs on a blocking task that owns the uniqueness registry and
/// stays at most `queue_depth` batches ahead. Batches are loaded in the
/// order generated. Cancelling `cancel` stops production and prevents
/// further loader calls; a batch already handed to the loader finishes
/// first.
pub async fn run<S>(
    generator: BatchGenerator<S>,
    requested: u64,
    loader: &mut ResilientLoader,
    options: &PipelineOptions,
    cancel: CancellationToken,
) -> Result<RunSummary, PipelineError>
where
    S: CandidateSource + Send + 'static,
{
    let batch_size = generator.batch_size();
    let (batch_tx, mut batch_rx) =
        mpsc::channel::<Result<Batch, GenerationError>>(options.queue_depth.max(1));
    let (topup_tx, topup_rx) = mpsc::unbounded_channel::<u64>();

    let producer_cancel = cancel.clone();
    let producer = tokio::task::spawn_blocking(move || {
        produce(generator, requested, batch_size, batch_tx, topup_rx, producer_cancel)
    });

    info!(
        event = "run_started",
        requested,
        batch_size,
        engine = loader.engine(),
        queue_depth = options.queue_depth
    );

    let mut summary = RunSummary {
        requested,
        ..RunSummary::default()
    };

    let stop = loop {
        if summary.total_loaded >= requested {
            break None;
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Some(Stop::Cancelled),
            next = batch_rx.recv() => next,
        };
        let batch = match next {
            Some(Ok(batch)) => batch,
            Some(Err(err)) => break Some(Stop::Generation(err)),
            None => break Some(Stop::Producer("channel closed early".to_string())),
        };
        if cancel.is_cancelled() {
            break Some(Stop::Cancelled);
        }

        match loader.load(&batch).await {
            Ok(loaded) => {
                summary.total_loaded += loaded;
                summary.batches_loaded += 1;
                info!(
                    event = "batch_loaded",
                    sequence = batch.sequence,
                    records = loaded,
                    total_loaded = summary.total_loaded,
                    requested
                );
            }
            Err(err) if options.on_batch_failure == FailurePolicy::Skip => {
                summary.batches_skipped += 1;
                summary.records_skipped += batch.len() as u64;
                warn!(
                    event = "batch_skipped",
                    sequence = batch.sequence,
                    records = batch.len(),
                    error = %err
                );
                if summary.batches_skipped > options.max_skipped_batches {
                    break Some(Stop::TooManySkipped(summary.batches_skipped));
                }
                if topup_tx.send(batch.len() as u64).is_err() {
                    break Some(Stop::Producer("top-up request rejected".to_string()));
                }
            }
            Err(err) => {
                break Some(Stop::Load {
                    sequence: batch.sequence,
                    source: err,
                });
            }
        }
    };

    drop(batch_rx);
    drop(topup_tx);
    loader.close().await;
    summary.loader = loader.stats();

    let stop = match producer.await {
        Ok(report) => {
            summary.generation = report;
            stop
        }
        Err(join_err) => stop.or(Some(Stop::Producer(join_err.to_string()))),
    };

    match stop {
        None => {
            info!(
                event = "run_finished",
                status = "success",
                total_loaded = summary.total_loaded,
                batches = summary.batches_loaded,
                reconnects = summary.loader.reconnects
            );
            Ok(summary)
        }
        Some(stop) => {
            let err = match stop {
                Stop::Generation(source) => PipelineError::Generation { source, summary },
                Stop::Load { sequence, source } => PipelineError::Load {
                    sequence,
                    source,
                    summary,
                },
                Stop::TooManySkipped(skipped) => PipelineError::TooManySkipped { skipped, summary },
                Stop::Cancelled => PipelineError::Cancelled { summary },
                Stop::Producer(message) => PipelineError::Producer { message, summary },
            };
            warn!(
                event = "run_finished",
                status = "failed",
                total_loaded = err.summary().total_loaded,
                error = %err
            );
            Err(err)
        }
    }
}

fn produce<S: CandidateSource>(
    mut generator: BatchGenerator<S>,
    requested: u64,
    batch_size: usize,
    batch_tx: mpsc::Sender<Result<Batch, GenerationError>>,
    mut topup_rx: mpsc::UnboundedReceiver<u64>,
    cancel: CancellationToken,
) -> GenerationReport {
    let mut batches = match generator.batches(requested, batch_size) {
        Ok(batches) => batches,
        Err(err) => {
            let _ = batch_tx.blocking_send(Err(err));
            return GenerationReport::default();
        }
    };

    loop {
        while let Ok(extra) = topup_rx.try_recv() {
            batches.extend(extra);
        }
        if cancel.is_cancelled() {
            break;
        }
        match batches.next() {
            Some(item) => {
                let failed = item.is_err();
                if batch_tx.blocking_send(item).is_err() || failed {
                    break;
                }
            }
            // Everything requested so far is out; wait for a top-up or for
            // the loader side to hang up.
            None => match topup_rx.blocking_recv() {
                Some(extra) => batches.extend(extra),
                None => break,
            },
        }
    }

    batches.report().clone()
}
