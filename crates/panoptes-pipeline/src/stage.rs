//! Generic worker-pool stage.
//!
//! A stage owns a pool of identical workers that pull items from one
//! queue, run them through a [`StageProcessor`], and push the results
//! into the next queue. Per-item failures are handled according to the
//! stage's [`ErrorPolicy`]; shutdown arrives either as queue closure
//! (graceful drain) or through the cancel signal (pipeline failure).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use panoptes_inference::ProcessingError;
use panoptes_models::{CameraId, ErrorPolicy, StageConfig};
use panoptes_queue::{PopError, StageQueue};

use crate::error::FailureReason;

/// One unit of stage work: borrow an input item, produce owned outputs.
///
/// Implementations are invoked concurrently by every worker in the
/// stage's pool, so they take `&self`. The input is borrowed, which lets
/// a retry policy re-invoke the processor without cloning the item.
#[async_trait]
pub trait StageProcessor: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    async fn process(&self, input: &Self::Input)
        -> Result<StageOutput<Self::Output>, ProcessingError>;
}

/// What a processor produced from one input item.
#[derive(Debug)]
pub enum StageOutput<T> {
    /// The common one-in, one-out case.
    Single(T),
    /// Zero or more outputs, for filtering or fan-out processors.
    Many(Vec<T>),
}

impl<T> StageOutput<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            StageOutput::Single(item) => vec![item],
            StageOutput::Many(items) => items,
        }
    }
}

/// A pool of workers between two queues.
///
/// [`spawn`](Stage::spawn) starts every worker plus a small supervisor
/// task and returns the supervisor's handle. The supervisor resolves
/// after all workers have exited and closes the output queue exactly
/// once, so closure cascades from stage to stage during a drain.
pub struct Stage<P: StageProcessor> {
    camera: CameraId,
    config: StageConfig,
    processor: Arc<P>,
}

impl<P: StageProcessor> Stage<P> {
    pub fn new(camera: CameraId, config: StageConfig, processor: P) -> Self {
        Self {
            camera,
            config,
            processor: Arc::new(processor),
        }
    }

    pub fn spawn(
        self,
        input: StageQueue<P::Input>,
        output: StageQueue<P::Output>,
        cancel: watch::Receiver<bool>,
        failures: mpsc::Sender<FailureReason>,
    ) -> JoinHandle<()> {
        info!(
            camera = %self.camera,
            stage = %self.config.name,
            workers = self.config.workers,
            device = %self.config.device,
            "stage started"
        );

        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|index| {
                let worker = Worker {
                    camera: self.camera.clone(),
                    stage: self.config.name.clone(),
                    index,
                    policy: self.config.error_policy.clone(),
                    processor: Arc::clone(&self.processor),
                    input: input.clone(),
                    output: output.clone(),
                    cancel: cancel.clone(),
                    failures: failures.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let camera = self.camera;
        let stage = self.config.name;
        tokio::spawn(async move {
            for handle in workers {
                if let Err(err) = handle.await {
                    error!(camera = %camera, stage = %stage, error = %err, "stage worker panicked");
                }
            }
            output.close();
            debug!(camera = %camera, stage = %stage, "stage drained; output queue closed");
        })
    }
}

struct Worker<P: StageProcessor> {
    camera: CameraId,
    stage: String,
    index: usize,
    policy: ErrorPolicy,
    processor: Arc<P>,
    input: StageQueue<P::Input>,
    output: StageQueue<P::Output>,
    cancel: watch::Receiver<bool>,
    failures: mpsc::Sender<FailureReason>,
}

impl<P: StageProcessor> Worker<P> {
    async fn run(mut self) {
        debug!(camera = %self.camera, stage = %self.stage, worker = self.index, "worker started");
        loop {
            // Cancellation wins over available work, so a failing
            // pipeline stops promptly instead of draining first.
            let item = tokio::select! {
                biased;
                changed = self.cancel.changed() => {
                    if changed.is_err() || *self.cancel.borrow() {
                        break;
                    }
                    continue;
                }
                popped = self.input.pop() => match popped {
                    Ok(item) => item,
                    Err(PopError::Closed) => break,
                    Err(PopError::Timeout) => continue,
                },
            };

            if !self.handle(item).await {
                break;
            }
        }
        debug!(camera = %self.camera, stage = %self.stage, worker = self.index, "worker stopped");
    }

    /// Process one item under the stage's error policy. Returns `false`
    /// when the worker should exit: the output queue closed mid-push or
    /// the item escalated to a pipeline failure.
    async fn handle(&self, item: P::Input) -> bool {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            let err = match self.processor.process(&item).await {
                Ok(produced) => {
                    metrics::counter!(
                        "panoptes_stage_processed_total",
                        "stage" => self.stage.clone(),
                        "camera" => self.camera.to_string()
                    )
                    .increment(1);
                    metrics::histogram!(
                        "panoptes_stage_latency_seconds",
                        "stage" => self.stage.clone(),
                        "camera" => self.camera.to_string()
                    )
                    .record(started.elapsed().as_secs_f64());
                    for produced in produced.into_items() {
                        if self.output.push(produced).await.is_err() {
                            // Output closed under us: teardown is underway.
                            return false;
                        }
                    }
                    return true;
                }
                Err(err) => err,
            };

            match &self.policy {
                ErrorPolicy::Skip => {
                    warn!(
                        camera = %self.camera,
                        stage = %self.stage,
                        error = %err,
                        "item failed; skipping"
                    );
                    self.count_drop();
                    return true;
                }
                ErrorPolicy::Retry {
                    max_attempts,
                    backoff,
                } => {
                    if !err.is_transient() {
                        error!(
                            camera = %self.camera,
                            stage = %self.stage,
                            error = %err,
                            "item failed permanently; dropping"
                        );
                        self.count_drop();
                        return true;
                    }
                    if attempt < *max_attempts {
                        let delay = backoff.delay_for_attempt(attempt);
                        attempt += 1;
                        debug!(
                            camera = %self.camera,
                            stage = %self.stage,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "item failed; retrying"
                        );
                        time::sleep(delay).await;
                        continue;
                    }
                    error!(
                        camera = %self.camera,
                        stage = %self.stage,
                        attempts = attempt + 1,
                        error = %err,
                        "retries exhausted; dropping item"
                    );
                    self.count_drop();
                    return true;
                }
                ErrorPolicy::FailPipeline => {
                    error!(
                        camera = %self.camera,
                        stage = %self.stage,
                        error = %err,
                        "item failed; failing pipeline"
                    );
                    let reason = FailureReason::new(
                        self.camera.clone(),
                        self.stage.clone(),
                        err.to_string(),
                    );
                    // The slot may already hold an earlier failure; the
                    // first one wins.
                    let _ = self.failures.try_send(reason);
                    return false;
                }
            }
        }
    }

    fn count_drop(&self) {
        metrics::counter!(
            "panoptes_stage_dropped_total",
            "stage" => self.stage.clone(),
            "camera" => self.camera.to_string()
        )
        .increment(1);
    }
}
