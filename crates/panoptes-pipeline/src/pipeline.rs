//! One camera's pipeline: source, detection, classification, sink.
//!
//! A pipeline owns the chain of bounded queues between its tasks and a
//! supervisor that watches all of them. Shutdown comes in two flavors:
//! a graceful drain (end of stream or [`Pipeline::stop`]) lets every
//! in-flight frame reach the sink, while a failure cancels the tasks
//! and abandons whatever is still queued.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use panoptes_ingest::FrameSource;
use panoptes_inference::{Classifier, Detector};
use panoptes_models::{
    CameraConfig, CameraId, Classification, Detection, Frame, PipelineState,
};
use panoptes_queue::StageQueue;

use crate::analytics::{ClassificationStage, DetectionStage};
use crate::config::PipelineConfig;
use crate::error::{FailureReason, PipelineError, PipelineResult};
use crate::events::EventChannel;
use crate::sink::{self, MetricsSink};
use crate::stage::Stage;

/// Origin recorded in failure reasons raised by the frame source.
const SOURCE_ORIGIN: &str = "source";

/// A single camera's analytics pipeline.
///
/// Built in the `Created` state; nothing runs until [`start`]. All
/// methods take `&self`, so a pipeline is shared behind an `Arc` between
/// the manager, its monitor task, and embedder code.
///
/// [`start`]: Pipeline::start
pub struct Pipeline {
    camera: CameraId,
    instance: String,
    config: PipelineConfig,
    source: StdMutex<Option<Box<dyn FrameSource>>>,
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn Classifier>,
    sink: Arc<MetricsSink>,
    events: EventChannel,
    state: Arc<watch::Sender<PipelineState>>,
    cancel: Arc<watch::Sender<bool>>,
    drain: watch::Sender<bool>,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
    failure: Arc<StdMutex<Option<FailureReason>>>,
}

impl Pipeline {
    /// Validate the configuration and assemble a pipeline around the
    /// given source and backends.
    pub fn new(
        camera: CameraConfig,
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn Classifier>,
        sink: Arc<MetricsSink>,
    ) -> PipelineResult<Self> {
        camera.validate()?;
        config.validate()?;
        let (state, _) = watch::channel(PipelineState::Created);
        let (cancel, _) = watch::channel(false);
        let (drain, _) = watch::channel(false);
        Ok(Self {
            camera: camera.id,
            instance: format!("pipeline-{}", Uuid::new_v4()),
            config,
            source: StdMutex::new(Some(source)),
            detector,
            classifier,
            sink,
            events: EventChannel::default(),
            state: Arc::new(state),
            cancel: Arc::new(cancel),
            drain,
            supervisor: StdMutex::new(None),
            failure: Arc::new(StdMutex::new(None)),
        })
    }

    /// Attach a shared event channel; the manager wires its own in.
    pub fn with_events(mut self, events: EventChannel) -> Self {
        self.events = events;
        self
    }

    /// Spawn the feeder, both analytics stages, and the sink consumer.
    ///
    /// Only legal once, from `Created`; any other state reports
    /// [`PipelineError::InvalidState`].
    pub fn start(&self) -> PipelineResult<()> {
        // Subscribed before the Running transition: any stop() that
        // observes Running must find a live drain receiver, or its
        // drain request would land on a closed channel and be lost.
        let feeder_cancel = self.cancel.subscribe();
        let feeder_drain = self.drain.subscribe();
        if !transition(&self.state, &self.events, &self.camera, PipelineState::Running) {
            return Err(PipelineError::invalid_state(
                PipelineState::Created,
                self.state(),
            ));
        }
        // The gate above passes exactly once, so the source is present.
        let source = match self.take_source() {
            Some(source) => source,
            None => {
                return Err(PipelineError::invalid_state(
                    PipelineState::Created,
                    self.state(),
                ))
            }
        };

        info!(
            camera = %self.camera,
            instance = %self.instance,
            detect_workers = self.config.detection.workers,
            classify_workers = self.config.classification.workers,
            "pipeline started"
        );
        self.sink.register(&self.camera);

        let frames: StageQueue<Frame> = StageQueue::bounded(
            format!("{}/detect", self.camera),
            self.config.detection.queue_capacity,
        );
        let detections: StageQueue<Detection> = StageQueue::bounded(
            format!("{}/classify", self.camera),
            self.config.classification.queue_capacity,
        );
        let classifications: StageQueue<Classification> = StageQueue::bounded(
            format!("{}/sink", self.camera),
            self.config.sink_queue_capacity,
        );

        // Capacity 1 is enough: the first failure wins and later ones
        // are redundant by then.
        let (failure_tx, failure_rx) = mpsc::channel(1);

        let feeder = self.spawn_feeder(
            source,
            frames.clone(),
            failure_tx.clone(),
            feeder_cancel,
            feeder_drain,
        );
        let detection = Stage::new(
            self.camera.clone(),
            self.config.detection.clone(),
            DetectionStage::new(Arc::clone(&self.detector), Arc::clone(&self.sink)),
        )
        .spawn(
            frames.clone(),
            detections.clone(),
            self.cancel.subscribe(),
            failure_tx.clone(),
        );
        let classification = Stage::new(
            self.camera.clone(),
            self.config.classification.clone(),
            ClassificationStage::new(Arc::clone(&self.classifier)),
        )
        .spawn(
            detections.clone(),
            classifications.clone(),
            self.cancel.subscribe(),
            failure_tx,
        );
        let consumer =
            sink::spawn_consumer(self.camera.clone(), classifications.clone(), Arc::clone(&self.sink));

        let close_all = move || {
            frames.close();
            detections.close();
            classifications.close();
        };
        let supervisor = self.spawn_supervisor(
            vec![feeder, detection, classification, consumer],
            failure_rx,
            close_all,
        );
        *self.lock_supervisor() = Some(supervisor);
        Ok(())
    }

    /// Gracefully drain and stop the pipeline, waiting until every
    /// in-flight frame has reached the sink.
    ///
    /// Idempotent for `Created`, `Running`, `Draining`, and `Stopped`.
    /// A `Failed` pipeline has nothing left to drain and reports
    /// [`PipelineError::InvalidState`].
    pub async fn stop(&self) -> PipelineResult<()> {
        loop {
            match self.state() {
                PipelineState::Created => {
                    let stopped = self.state.send_if_modified(|state| {
                        if *state == PipelineState::Created {
                            *state = PipelineState::Stopped;
                            true
                        } else {
                            false
                        }
                    });
                    if stopped {
                        info!(camera = %self.camera, "pipeline stopped before start");
                        self.events.state_changed(&self.camera, PipelineState::Stopped);
                        let _ = self.take_source();
                        return Ok(());
                    }
                    // Lost a race with start(); re-dispatch.
                }
                PipelineState::Running => {
                    if transition(&self.state, &self.events, &self.camera, PipelineState::Draining)
                    {
                        let _ = self.drain.send(true);
                        break;
                    }
                }
                PipelineState::Draining => break,
                PipelineState::Stopped => return Ok(()),
                PipelineState::Failed => {
                    return Err(PipelineError::invalid_state(
                        PipelineState::Running,
                        PipelineState::Failed,
                    ));
                }
            }
        }

        let handle = self.lock_supervisor().take();
        match handle {
            Some(handle) => {
                if let Err(err) = handle.await {
                    error!(camera = %self.camera, error = %err, "pipeline supervisor panicked");
                }
            }
            // A concurrent stop() holds the handle; watch the state.
            None => {
                self.wait_for_terminal().await;
            }
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// The failure that brought the pipeline down, if any.
    pub fn failure(&self) -> Option<FailureReason> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn camera(&self) -> &CameraId {
        &self.camera
    }

    /// Wait until the pipeline reaches `target`, or until a terminal
    /// state makes that impossible. Returns the state observed.
    pub async fn wait_for_state(&self, target: PipelineState) -> PipelineState {
        let mut rx = self.state.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current == target || current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    /// Wait until the pipeline is `Stopped` or `Failed`.
    pub async fn wait_for_terminal(&self) -> PipelineState {
        self.wait_for_state(PipelineState::Stopped).await
    }

    fn spawn_feeder(
        &self,
        mut source: Box<dyn FrameSource>,
        frames: StageQueue<Frame>,
        failures: mpsc::Sender<FailureReason>,
        mut cancel: watch::Receiver<bool>,
        mut drain: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let camera = self.camera.clone();
        tokio::spawn(async move {
            debug!(camera = %camera, "feeder started");
            loop {
                tokio::select! {
                    biased;
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                    changed = drain.changed() => {
                        if changed.is_err() || *drain.borrow() {
                            debug!(camera = %camera, "feeder draining");
                            break;
                        }
                    }
                    next = source.next_frame() => match next {
                        Ok(Some(frame)) => {
                            metrics::counter!(
                                "panoptes_frames_ingested_total",
                                "camera" => camera.to_string()
                            )
                            .increment(1);
                            if frames.push(frame).await.is_err() {
                                // Closed by a hard teardown.
                                break;
                            }
                        }
                        Ok(None) => {
                            info!(camera = %camera, "source ended");
                            break;
                        }
                        Err(err) => {
                            error!(camera = %camera, error = %err, "source failed");
                            let reason =
                                FailureReason::new(camera.clone(), SOURCE_ORIGIN, err.to_string());
                            let _ = failures.try_send(reason);
                            break;
                        }
                    }
                }
            }
            source.close().await;
            frames.close();
            debug!(camera = %camera, "feeder stopped");
        })
    }

    fn spawn_supervisor(
        &self,
        tasks: Vec<JoinHandle<()>>,
        mut failures: mpsc::Receiver<FailureReason>,
        close_all: impl Fn() + Send + 'static,
    ) -> JoinHandle<()> {
        let camera = self.camera.clone();
        let state = Arc::clone(&self.state);
        let cancel = Arc::clone(&self.cancel);
        let events = self.events.clone();
        let failure_slot = Arc::clone(&self.failure);
        tokio::spawn(async move {
            let all_done = join_all(tasks);
            tokio::pin!(all_done);

            let (failure, done) = tokio::select! {
                Some(reason) = failures.recv() => (Some(reason), false),
                results = &mut all_done => {
                    log_panics(&camera, results);
                    // A failure report can race the final task exits.
                    (failures.try_recv().ok(), true)
                }
            };

            match failure {
                Some(reason) => {
                    error!(
                        camera = %camera,
                        origin = %reason.origin,
                        "pipeline failing: {}",
                        reason.message
                    );
                    *failure_slot.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(reason.clone());
                    let _ = cancel.send(true);
                    close_all();
                    if !done {
                        log_panics(&camera, all_done.await);
                    }
                    if transition(&state, &events, &camera, PipelineState::Failed) {
                        events.pipeline_failed(&reason);
                    } else {
                        // stop() had already moved the pipeline into its
                        // drain; the lifecycle finishes as a stop.
                        warn!(
                            camera = %camera,
                            origin = %reason.origin,
                            "failure during drain; finishing as stopped"
                        );
                        transition(&state, &events, &camera, PipelineState::Stopped);
                    }
                }
                None => {
                    transition(&state, &events, &camera, PipelineState::Draining);
                    transition(&state, &events, &camera, PipelineState::Stopped);
                    info!(camera = %camera, "pipeline stopped");
                }
            }
        })
    }

    fn take_source(&self) -> Option<Box<dyn FrameSource>> {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn lock_supervisor(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Apply a lifecycle transition if it is legal from the current state,
/// logging and emitting an event when it takes effect.
fn transition(
    state: &watch::Sender<PipelineState>,
    events: &EventChannel,
    camera: &CameraId,
    to: PipelineState,
) -> bool {
    let changed = state.send_if_modified(|current| {
        if *current == to || !current.can_transition(to) {
            return false;
        }
        *current = to;
        true
    });
    if changed {
        info!(camera = %camera, state = %to, "pipeline state changed");
        events.state_changed(camera, to);
    }
    changed
}

fn log_panics(camera: &CameraId, results: Vec<Result<(), JoinError>>) {
    for result in results {
        if let Err(err) = result {
            error!(camera = %camera, error = %err, "pipeline task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::time::{sleep, timeout};

    use panoptes_ingest::{ConnectionError, ConnectionResult, SyntheticConfig, SyntheticSource};
    use panoptes_inference::{
        LabelMapClassifier, ProcessingError, ProcessingResult, SyntheticDetector,
    };
    use panoptes_models::{ErrorPolicy, FrameId, ObjectBox};

    fn camera_config() -> CameraConfig {
        CameraConfig::new("gate", "synthetic://gate")
    }

    fn synthetic_source(frames: Option<u64>) -> Box<dyn FrameSource> {
        let mut config = SyntheticConfig::default()
            .with_payload_len(32)
            .with_interval(Duration::ZERO);
        if let Some(frames) = frames {
            config = config.with_frames(frames);
        }
        Box::new(SyntheticSource::new(CameraId::new("gate"), config))
    }

    fn backends() -> (Arc<dyn Detector>, Arc<dyn Classifier>) {
        (
            Arc::new(SyntheticDetector::new(Default::default())),
            Arc::new(LabelMapClassifier::new(Default::default()).with_mapping("person", "human")),
        )
    }

    fn pipeline(frames: Option<u64>, sink: Arc<MetricsSink>) -> Pipeline {
        let (detector, classifier) = backends();
        Pipeline::new(
            camera_config(),
            PipelineConfig::default(),
            synthetic_source(frames),
            detector,
            classifier,
            sink,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_end_of_stream_drains_to_stopped_with_all_frames() {
        let sink = Arc::new(MetricsSink::new());
        let pipeline = pipeline(Some(10), Arc::clone(&sink));
        pipeline.start().unwrap();

        let state = timeout(Duration::from_secs(5), pipeline.wait_for_terminal())
            .await
            .unwrap();
        assert_eq!(state, PipelineState::Stopped);
        assert!(pipeline.failure().is_none());

        let snapshot = sink.snapshot();
        let metrics = snapshot.camera(&CameraId::new("gate")).unwrap();
        assert_eq!(metrics.frames_processed, 10);
        // Sequences 1..=10: a person on every non-multiple of 3 (seven)
        // and a vehicle on every multiple of 4 (two).
        assert_eq!(metrics.objects_detected, 9);
        assert_eq!(metrics.objects_classified, 9);
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let pipeline = pipeline(Some(3), Arc::new(MetricsSink::new()));
        pipeline.start().unwrap();

        match pipeline.start() {
            Err(PipelineError::InvalidState { expected, .. }) => {
                assert_eq!(expected, PipelineState::Created);
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }

        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_start_discards_source() {
        let pipeline = pipeline(None, Arc::new(MetricsSink::new()));
        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(pipeline.start().is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let pipeline = pipeline(None, Arc::new(MetricsSink::new()));
        pipeline.start().unwrap();
        pipeline.stop().await.unwrap();
        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_racing_start_never_loses_the_drain() {
        // start() is synchronous, so the stop task on the second worker
        // can observe Running while start() is still wiring tasks up.
        // Every such stop() must land its drain edge and come back.
        for _ in 0..50 {
            let pipeline = Arc::new(pipeline(None, Arc::new(MetricsSink::new())));
            let stopper = {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    while pipeline.state() != PipelineState::Running {
                        tokio::task::yield_now().await;
                    }
                    timeout(Duration::from_secs(5), pipeline.stop())
                        .await
                        .unwrap()
                        .unwrap();
                })
            };
            pipeline.start().unwrap();
            stopper.await.unwrap();
            assert_eq!(pipeline.state(), PipelineState::Stopped);
        }
    }

    struct CountingDetector {
        inner: SyntheticDetector,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Detector for CountingDetector {
        fn name(&self) -> &str {
            "counting-detector"
        }

        async fn detect(&self, frame: &Frame) -> ProcessingResult<Vec<ObjectBox>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.detect(frame).await
        }
    }

    #[tokio::test]
    async fn test_stop_drains_every_in_flight_frame() {
        let sink = Arc::new(MetricsSink::new());
        let detect_calls = Arc::new(AtomicU64::new(0));
        let detector = Arc::new(CountingDetector {
            inner: SyntheticDetector::new(Default::default()),
            calls: Arc::clone(&detect_calls),
        });
        let classifier = Arc::new(LabelMapClassifier::new(Default::default()));
        let pipeline = Pipeline::new(
            camera_config(),
            PipelineConfig::default(),
            synthetic_source(None),
            detector,
            classifier,
            Arc::clone(&sink),
        )
        .unwrap();

        pipeline.start().unwrap();
        sleep(Duration::from_millis(20)).await;
        timeout(Duration::from_secs(5), pipeline.stop())
            .await
            .unwrap()
            .unwrap();

        // Graceful drain: every frame that entered detection also
        // reached the sink.
        let frames = sink
            .snapshot()
            .camera(&CameraId::new("gate"))
            .unwrap()
            .frames_processed;
        assert!(frames > 0);
        assert_eq!(frames, detect_calls.load(Ordering::SeqCst));
    }

    struct CountingSource {
        inner: SyntheticSource,
        produced: Arc<AtomicU64>,
    }

    #[async_trait]
    impl FrameSource for CountingSource {
        async fn next_frame(&mut self) -> ConnectionResult<Option<Frame>> {
            let frame = self.inner.next_frame().await?;
            if frame.is_some() {
                self.produced.fetch_add(1, Ordering::SeqCst);
            }
            Ok(frame)
        }

        fn camera(&self) -> &CameraId {
            self.inner.camera()
        }
    }

    struct GatedDetector {
        inner: SyntheticDetector,
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl Detector for GatedDetector {
        fn name(&self) -> &str {
            "gated-detector"
        }

        async fn detect(&self, frame: &Frame) -> ProcessingResult<Vec<ObjectBox>> {
            self.gate.acquire().await.unwrap().forget();
            self.inner.detect(frame).await
        }
    }

    #[tokio::test]
    async fn test_backpressure_stalls_the_feeder_without_loss() {
        let sink = Arc::new(MetricsSink::new());
        let produced = Arc::new(AtomicU64::new(0));
        let gate = Arc::new(tokio::sync::Semaphore::new(0));

        let config = PipelineConfig::default()
            .with_detection(panoptes_models::StageConfig::new("detect").with_queue_capacity(2))
            .with_classification(
                panoptes_models::StageConfig::new("classify").with_queue_capacity(2),
            )
            .with_sink_queue_capacity(2);
        let source = Box::new(CountingSource {
            inner: SyntheticSource::new(
                CameraId::new("gate"),
                SyntheticConfig::default()
                    .with_frames(20)
                    .with_payload_len(16)
                    .with_interval(Duration::ZERO),
            ),
            produced: Arc::clone(&produced),
        });
        let detector = Arc::new(GatedDetector {
            inner: SyntheticDetector::new(Default::default()),
            gate: Arc::clone(&gate),
        });
        let (_, classifier) = backends();
        let pipeline = Pipeline::new(
            camera_config(),
            config,
            source,
            detector,
            classifier,
            Arc::clone(&sink),
        )
        .unwrap();

        pipeline.start().unwrap();
        sleep(Duration::from_millis(50)).await;

        // The detector is gated shut, so the source can only run ahead
        // by the detect queue (2), the item inside the worker (1), and
        // the frame stuck in the feeder's blocked push (1).
        assert_eq!(produced.load(Ordering::SeqCst), 4);

        gate.add_permits(1000);
        let state = timeout(Duration::from_secs(5), pipeline.wait_for_terminal())
            .await
            .unwrap();
        assert_eq!(state, PipelineState::Stopped);

        // Unblocking released every frame; none were dropped while the
        // feeder was stalled.
        assert_eq!(
            sink.snapshot()
                .camera(&CameraId::new("gate"))
                .unwrap()
                .frames_processed,
            20
        );
    }

    struct FailingDetector;

    #[async_trait]
    impl Detector for FailingDetector {
        fn name(&self) -> &str {
            "failing-detector"
        }

        async fn detect(&self, frame: &Frame) -> ProcessingResult<Vec<ObjectBox>> {
            if frame.id.sequence >= 3 {
                Err(ProcessingError::permanent(
                    "failing-detector",
                    frame.id.clone(),
                    "model corrupted",
                ))
            } else {
                Ok(vec![])
            }
        }
    }

    #[tokio::test]
    async fn test_fail_pipeline_policy_reaches_failed_state() {
        let sink = Arc::new(MetricsSink::new());
        let config = PipelineConfig::default().with_detection(
            panoptes_models::StageConfig::new("detect")
                .with_error_policy(ErrorPolicy::FailPipeline),
        );
        let (_, classifier) = backends();
        let pipeline = Pipeline::new(
            camera_config(),
            config,
            synthetic_source(None),
            Arc::new(FailingDetector),
            classifier,
            sink,
        )
        .unwrap();

        pipeline.start().unwrap();
        let state = timeout(Duration::from_secs(5), pipeline.wait_for_terminal())
            .await
            .unwrap();
        assert_eq!(state, PipelineState::Failed);

        let failure = pipeline.failure().unwrap();
        assert_eq!(failure.origin, "detect");
        assert!(failure.message.contains("model corrupted"));

        // A failed pipeline cannot be drained.
        assert!(matches!(
            pipeline.stop().await,
            Err(PipelineError::InvalidState { .. })
        ));
    }

    struct DyingSource {
        camera: CameraId,
        sequence: u64,
    }

    #[async_trait]
    impl FrameSource for DyingSource {
        async fn next_frame(&mut self) -> ConnectionResult<Option<Frame>> {
            if self.sequence >= 2 {
                return Err(ConnectionError::fatal("rtsp://gate", 3, "stream gone"));
            }
            self.sequence += 1;
            Ok(Some(Frame::new(
                FrameId::new(self.camera.clone(), self.sequence),
                vec![0u8; 16],
                Utc::now(),
            )))
        }

        fn camera(&self) -> &CameraId {
            &self.camera
        }
    }

    #[tokio::test]
    async fn test_source_failure_fails_pipeline() {
        let sink = Arc::new(MetricsSink::new());
        let (detector, classifier) = backends();
        let pipeline = Pipeline::new(
            camera_config(),
            PipelineConfig::default(),
            Box::new(DyingSource {
                camera: CameraId::new("gate"),
                sequence: 0,
            }),
            detector,
            classifier,
            sink,
        )
        .unwrap();

        pipeline.start().unwrap();
        let state = timeout(Duration::from_secs(5), pipeline.wait_for_terminal())
            .await
            .unwrap();
        assert_eq!(state, PipelineState::Failed);
        assert_eq!(pipeline.failure().unwrap().origin, "source");
    }

    struct FlakyDetector;

    #[async_trait]
    impl Detector for FlakyDetector {
        fn name(&self) -> &str {
            "flaky-detector"
        }

        async fn detect(&self, frame: &Frame) -> ProcessingResult<Vec<ObjectBox>> {
            if frame.id.sequence % 2 == 0 {
                Err(ProcessingError::transient(
                    "flaky-detector",
                    frame.id.clone(),
                    "device busy",
                ))
            } else {
                Ok(vec![])
            }
        }
    }

    #[tokio::test]
    async fn test_skip_policy_survives_item_failures() {
        let sink = Arc::new(MetricsSink::new());
        let (_, classifier) = backends();
        let pipeline = Pipeline::new(
            camera_config(),
            PipelineConfig::default(),
            synthetic_source(Some(10)),
            Arc::new(FlakyDetector),
            classifier,
            Arc::clone(&sink),
        )
        .unwrap();

        pipeline.start().unwrap();
        let state = timeout(Duration::from_secs(5), pipeline.wait_for_terminal())
            .await
            .unwrap();
        assert_eq!(state, PipelineState::Stopped);
        assert!(pipeline.failure().is_none());

        // Even sequences were skipped; the five odd ones drained through.
        let metrics = sink.snapshot();
        assert_eq!(
            metrics.camera(&CameraId::new("gate")).unwrap().frames_processed,
            5
        );
    }

    #[tokio::test]
    async fn test_events_trace_the_lifecycle() {
        let events = EventChannel::new(16);
        let mut rx = events.subscribe();
        let sink = Arc::new(MetricsSink::new());
        let (detector, classifier) = backends();
        let pipeline = Pipeline::new(
            camera_config(),
            PipelineConfig::default(),
            synthetic_source(Some(3)),
            detector,
            classifier,
            sink,
        )
        .unwrap()
        .with_events(events);

        pipeline.start().unwrap();
        timeout(Duration::from_secs(5), pipeline.wait_for_terminal())
            .await
            .unwrap();

        let mut states = Vec::new();
        while states.last() != Some(&PipelineState::Stopped) {
            match timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
                Ok(crate::events::PipelineEvent::StateChanged { state, .. }) => states.push(state),
                Ok(_) => {}
                Err(err) => panic!("event stream ended early: {err}"),
            }
        }
        assert_eq!(
            states,
            vec![
                PipelineState::Running,
                PipelineState::Draining,
                PipelineState::Stopped,
            ]
        );
    }
}
