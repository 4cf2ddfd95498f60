use crate::{
    camera::CameraError,
    config::PipelineConfig,
    detection_client::{DetectionClientError, ObjectDetection},
    services::{ImageAnalyzer, ReadStatus, ServiceError, TextReader},
    signal::SharedSignal,
    speech::{speak_logged, SpeechSynthesizer},
    telemetry::Metrics,
};
use sightline_proto::Detection;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    time::{sleep, timeout, Duration},
};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Vision service error: {0}")]
    Service(#[from] ServiceError),
    #[error("Detection error: {0}")]
    Detection(#[from] DetectionClientError),
}

/// A camera-like source of frames. `capture` returning `None` means the
/// source is exhausted.
pub trait FrameSource: Send {
    type Frame: Send;

    fn capture(&mut self) -> Result<Option<Self::Frame>, CameraError>;
    fn encode(&self, frame: &Self::Frame) -> Result<Vec<u8>, CameraError>;
    fn release(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Frame { bytes: Vec<u8>, index: u64 },
    Stop,
}

pub fn narration(detection: &Detection) -> String {
    format!(
        "{} detected {:.1} cm away",
        detection.label, detection.distance_cm
    )
}

/// Consumer side: analyzes and narrates sampled frames one at a time.
pub struct AnalysisWorker {
    analyzer: Arc<dyn ImageAnalyzer>,
    reader: Arc<dyn TextReader>,
    detector: Option<Box<dyn ObjectDetection>>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    signal: SharedSignal,
    metrics: Arc<Metrics>,
    settings: PipelineConfig,
}

impl AnalysisWorker {
    pub fn new(
        analyzer: Arc<dyn ImageAnalyzer>,
        reader: Arc<dyn TextReader>,
        detector: Option<Box<dyn ObjectDetection>>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        signal: SharedSignal,
        metrics: Arc<Metrics>,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            analyzer,
            reader,
            detector,
            synthesizer,
            signal,
            metrics,
            settings,
        }
    }

    /// Drains the queue until `Stop` (or until every sender is gone).
    /// Returns the number of frames processed.
    pub async fn run(mut self, mut queue: mpsc::UnboundedReceiver<WorkItem>) -> u64 {
        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms);
        let dequeue_timeout = Duration::from_millis(self.settings.dequeue_timeout_ms);
        let mut processed = 0;

        loop {
            self.signal.wait_until_clear(poll_interval).await;

            let item = match timeout(dequeue_timeout, queue.recv()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(item)) => item,
            };

            let (bytes, index) = match item {
                WorkItem::Stop => break,
                WorkItem::Frame { bytes, index } => (bytes, index),
            };

            let started = Instant::now();
            if let Err(e) = self.process(&bytes, index).await {
                tracing::error!("Processing error on frame {}: {}", index, e);
            }
            self.metrics
                .record_analysis_duration(started.elapsed().as_millis() as u64);
            processed += 1;
        }

        tracing::info!("Analysis worker stopped after {} frames", processed);
        processed
    }

    async fn process(&mut self, bytes: &[u8], index: u64) -> Result<(), PipelineError> {
        tracing::debug!("Analyzing frame {} ({} bytes)", index, bytes.len());
        let analysis = self.analyzer.analyze(bytes).await?;

        for caption in &analysis.captions {
            tracing::info!("Caption: {} ({:.2})", caption.text, caption.confidence);
        }

        if analysis.has_tag("text") {
            for line in self.read_text(bytes).await? {
                speak_logged(self.synthesizer.as_ref(), &line).await;
                tracing::info!("Text: {}", line);
            }
        }

        if !analysis.objects.is_empty() {
            tracing::info!("Azure Objects:");
            for object in &analysis.objects {
                tracing::info!(" - {} ({:.2})", object.name, object.confidence);
            }
        }

        let result = match self.detector.as_mut() {
            Some(detector) => detector.detect(bytes).await?,
            None => return Ok(()),
        };

        for detection in &result.detection_results {
            let alert = narration(detection);
            speak_logged(self.synthesizer.as_ref(), &alert).await;
            tracing::info!("{} (Confidence: {:.2})", alert, detection.confidence);
            self.metrics.record_detection_narrated(&detection.label);
        }

        Ok(())
    }

    /// Submits an OCR job and polls until it reaches a terminal status.
    async fn read_text(&self, bytes: &[u8]) -> Result<Vec<String>, ServiceError> {
        let operation = self.reader.submit(bytes).await?;
        let poll_interval = Duration::from_millis(self.settings.ocr_poll_interval_ms);

        for _ in 0..self.settings.ocr_max_polls {
            let result = self.reader.get_result(&operation).await?;
            if !result.status.is_terminal() {
                sleep(poll_interval).await;
                continue;
            }
            if result.status == ReadStatus::Failed {
                tracing::warn!("Read operation {} failed", operation.id);
                return Ok(Vec::new());
            }
            return Ok(result.lines);
        }

        Err(ServiceError::ReadTimeout(
            operation.id,
            self.settings.ocr_max_polls,
        ))
    }
}

/// Producer side: captures frames, samples every Nth one and feeds the worker.
pub struct CapturePipeline<S: FrameSource> {
    source: S,
    signal: SharedSignal,
    metrics: Arc<Metrics>,
    settings: PipelineConfig,
}

impl<S: FrameSource> CapturePipeline<S> {
    pub fn new(source: S, signal: SharedSignal, metrics: Arc<Metrics>, settings: PipelineConfig) -> Self {
        Self {
            source,
            signal,
            metrics,
            settings,
        }
    }

    /// Runs until shutdown or until the source is exhausted, then enqueues
    /// `Stop`, waits for the worker and releases the source.
    pub async fn run(mut self, worker: AnalysisWorker, mut shutdown_rx: broadcast::Receiver<()>) -> u64 {
        let (queue, receiver) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(worker.run(receiver));

        let poll_interval = Duration::from_millis(self.settings.poll_interval_ms);
        let sampling_interval = self.settings.sampling_interval.max(1);
        let mut frame_count: u64 = 0;

        loop {
            tokio::select! {
                _ = self.signal.wait_until_clear(poll_interval) => {}
                _ = shutdown_rx.recv() => break,
            }

            let frame = match self.source.capture() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("Frame source exhausted after {} frames", frame_count);
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to capture frame: {}", e);
                    break;
                }
            };
            self.metrics.record_frame_captured();

            if frame_count % sampling_interval == 0 {
                match self.source.encode(&frame) {
                    Ok(bytes) => {
                        self.metrics.record_frame_sampled();
                        let _ = queue.send(WorkItem::Frame {
                            bytes,
                            index: frame_count,
                        });
                    }
                    Err(e) => tracing::warn!("Failed to encode frame {}: {}", frame_count, e),
                }
            }
            frame_count += 1;

            tokio::task::yield_now().await;
        }

        let _ = queue.send(WorkItem::Stop);
        let processed = match consumer.await {
            Ok(processed) => processed,
            Err(e) => {
                tracing::error!("Analysis worker failed: {}", e);
                0
            }
        };
        self.source.release();
        processed
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::{Caption, DetectedObject, ImageAnalysis, ReadOperation, ReadResult, Tag};
    use crate::speech::{SpeechError, SynthesisOutcome};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sightline_proto::{BoundingBox, DetectionResult};
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Yields `total` frames whose payload is the frame index.
    pub(crate) struct CountingSource {
        next: u64,
        total: u64,
        released: Arc<AtomicBool>,
        captured: Arc<AtomicU64>,
    }

    impl CountingSource {
        pub(crate) fn new(total: u64) -> Self {
            Self {
                next: 0,
                total,
                released: Arc::default(),
                captured: Arc::default(),
            }
        }
    }

    impl FrameSource for CountingSource {
        type Frame = u64;

        fn capture(&mut self) -> Result<Option<u64>, CameraError> {
            if self.next >= self.total {
                return Ok(None);
            }
            self.next += 1;
            self.captured.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.next - 1))
        }

        fn encode(&self, frame: &u64) -> Result<Vec<u8>, CameraError> {
            Ok(frame.to_le_bytes().to_vec())
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn frame_index(bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(buf)
    }

    #[derive(Default)]
    pub(crate) struct RecordingAnalyzer {
        seen: Mutex<Vec<u64>>,
        tags: Vec<&'static str>,
        fail_on: Option<u64>,
    }

    #[async_trait]
    impl ImageAnalyzer for RecordingAnalyzer {
        async fn analyze(&self, image: &[u8]) -> Result<ImageAnalysis, ServiceError> {
            let index = frame_index(image);
            self.seen.lock().push(index);
            if self.fail_on == Some(index) {
                return Err(ServiceError::Config("analysis unavailable".to_string()));
            }
            Ok(ImageAnalysis {
                captions: vec![Caption {
                    text: "a hallway".to_string(),
                    confidence: 0.5,
                }],
                tags: self
                    .tags
                    .iter()
                    .map(|name| Tag {
                        name: name.to_string(),
                        confidence: 0.9,
                    })
                    .collect(),
                objects: vec![DetectedObject {
                    name: "door".to_string(),
                    confidence: 0.7,
                }],
            })
        }
    }

    /// Reports `Running` once, then succeeds with fixed lines (or fails).
    #[derive(Default)]
    struct ScriptedReader {
        polls: Mutex<u32>,
        lines: Vec<&'static str>,
        fails: bool,
    }

    #[async_trait]
    impl TextReader for ScriptedReader {
        async fn submit(&self, _image: &[u8]) -> Result<ReadOperation, ServiceError> {
            Ok(ReadOperation {
                id: "op-1".to_string(),
            })
        }

        async fn get_result(&self, _operation: &ReadOperation) -> Result<ReadResult, ServiceError> {
            let mut polls = self.polls.lock();
            *polls += 1;
            let status = match (*polls, self.fails) {
                (1, _) => ReadStatus::Running,
                (_, true) => ReadStatus::Failed,
                (_, false) => ReadStatus::Succeeded,
            };
            Ok(ReadResult {
                status,
                lines: self.lines.iter().map(|l| l.to_string()).collect(),
            })
        }
    }

    struct FixedDetection {
        calls: Arc<Mutex<Vec<u64>>>,
    }

    #[async_trait]
    impl ObjectDetection for FixedDetection {
        async fn detect(&mut self, frame: &[u8]) -> Result<DetectionResult, DetectionClientError> {
            self.calls.lock().push(frame_index(frame));
            Ok(DetectionResult::new(
                vec![Detection {
                    label: "chair".to_string(),
                    confidence: 0.8,
                    distance_cm: 123.45,
                    bbox: Some(BoundingBox::new(0, 0, 20, 20)),
                }],
                String::new(),
            ))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSynthesizer {
        pub spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynthesizer {
        async fn speak(&self, text: &str) -> Result<SynthesisOutcome, SpeechError> {
            self.spoken.lock().push(text.to_string());
            Ok(SynthesisOutcome::Completed)
        }
    }

    pub(crate) fn settings() -> PipelineConfig {
        PipelineConfig {
            sampling_interval: 20,
            poll_interval_ms: 5,
            dequeue_timeout_ms: 20,
            ocr_poll_interval_ms: 1,
            ocr_max_polls: 5,
        }
    }

    pub(crate) fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    pub(crate) fn worker(
        analyzer: Arc<RecordingAnalyzer>,
        detector: Option<Box<dyn ObjectDetection>>,
        synthesizer: Arc<RecordingSynthesizer>,
        signal: SharedSignal,
    ) -> AnalysisWorker {
        AnalysisWorker::new(
            analyzer,
            Arc::new(ScriptedReader {
                lines: vec!["EXIT"],
                ..Default::default()
            }),
            detector,
            synthesizer,
            signal,
            metrics(),
            settings(),
        )
    }

    fn frame(index: u64) -> WorkItem {
        WorkItem::Frame {
            bytes: index.to_le_bytes().to_vec(),
            index,
        }
    }

    #[test]
    fn test_narration_format() {
        let detection = Detection {
            label: "person".to_string(),
            confidence: 0.9,
            distance_cm: 8.957480315,
            bbox: None,
        };
        assert_eq!(narration(&detection), "person detected 9.0 cm away");
    }

    #[tokio::test]
    async fn test_worker_processes_in_order_until_stop() {
        let analyzer = Arc::new(RecordingAnalyzer::default());
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let worker = worker(analyzer.clone(), None, synthesizer, SharedSignal::new());

        let (queue, receiver) = mpsc::unbounded_channel();
        for index in 0..5 {
            queue.send(frame(index)).unwrap();
        }
        queue.send(WorkItem::Stop).unwrap();
        queue.send(frame(99)).unwrap();

        let processed = worker.run(receiver).await;

        assert_eq!(processed, 5);
        assert_eq!(*analyzer.seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_worker_narrates_text_and_detections() {
        let analyzer = Arc::new(RecordingAnalyzer {
            tags: vec!["indoor", "text"],
            ..Default::default()
        });
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let detector = FixedDetection {
            calls: calls.clone(),
        };
        let worker = worker(
            analyzer,
            Some(Box::new(detector)),
            synthesizer.clone(),
            SharedSignal::new(),
        );

        let (queue, receiver) = mpsc::unbounded_channel();
        queue.send(frame(0)).unwrap();
        queue.send(WorkItem::Stop).unwrap();
        worker.run(receiver).await;

        assert_eq!(
            *synthesizer.spoken.lock(),
            vec!["EXIT".to_string(), "chair detected 123.5 cm away".to_string()]
        );
        assert_eq!(*calls.lock(), vec![0]);
    }

    #[tokio::test]
    async fn test_read_text_stops_at_terminal_status() {
        let reader = Arc::new(ScriptedReader {
            lines: vec!["EXIT"],
            ..Default::default()
        });
        let mut worker = worker(
            Arc::new(RecordingAnalyzer::default()),
            None,
            Arc::new(RecordingSynthesizer::default()),
            SharedSignal::new(),
        );
        worker.reader = reader.clone();

        assert_eq!(worker.read_text(b"img").await.unwrap(), vec!["EXIT"]);
        assert_eq!(*reader.polls.lock(), 2);

        let failing = Arc::new(ScriptedReader {
            lines: vec!["EXIT"],
            fails: true,
            ..Default::default()
        });
        worker.reader = failing.clone();

        assert!(worker.read_text(b"img").await.unwrap().is_empty());
        assert_eq!(*failing.polls.lock(), 2);
    }

    #[tokio::test]
    async fn test_failed_frame_is_skipped() {
        let analyzer = Arc::new(RecordingAnalyzer {
            fail_on: Some(1),
            ..Default::default()
        });
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let detector = FixedDetection {
            calls: calls.clone(),
        };
        let worker = worker(
            analyzer.clone(),
            Some(Box::new(detector)),
            synthesizer,
            SharedSignal::new(),
        );

        let (queue, receiver) = mpsc::unbounded_channel();
        for index in 0..3 {
            queue.send(frame(index)).unwrap();
        }
        queue.send(WorkItem::Stop).unwrap();

        assert_eq!(worker.run(receiver).await, 3);
        assert_eq!(*analyzer.seen.lock(), vec![0, 1, 2]);
        assert_eq!(*calls.lock(), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_worker_waits_while_paused() {
        let signal = SharedSignal::new();
        signal.set();
        let analyzer = Arc::new(RecordingAnalyzer::default());
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let worker = worker(analyzer.clone(), None, synthesizer, signal.clone());

        let (queue, receiver) = mpsc::unbounded_channel();
        queue.send(frame(0)).unwrap();
        let handle = tokio::spawn(worker.run(receiver));

        sleep(Duration::from_millis(50)).await;
        assert!(analyzer.seen.lock().is_empty());

        signal.clear();
        queue.send(WorkItem::Stop).unwrap();
        assert_eq!(handle.await.unwrap(), 1);
        assert_eq!(*analyzer.seen.lock(), vec![0]);
    }

    #[tokio::test]
    async fn test_pipeline_samples_every_nth_frame() {
        let released = Arc::new(AtomicBool::new(false));
        let source = CountingSource {
            next: 0,
            total: 45,
            released: released.clone(),
            captured: Arc::default(),
        };
        let analyzer = Arc::new(RecordingAnalyzer::default());
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let signal = SharedSignal::new();
        let worker = worker(analyzer.clone(), None, synthesizer, signal.clone());

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let pipeline = CapturePipeline::new(source, signal, metrics(), settings());
        let processed = pipeline.run(worker, shutdown_rx).await;

        assert_eq!(processed, 3);
        assert_eq!(*analyzer.seen.lock(), vec![0, 20, 40]);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pipeline_stops_on_shutdown() {
        let released = Arc::new(AtomicBool::new(false));
        let source = CountingSource {
            next: 0,
            total: u64::MAX,
            released: released.clone(),
            captured: Arc::default(),
        };
        let analyzer = Arc::new(RecordingAnalyzer::default());
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let signal = SharedSignal::new();
        let worker = worker(analyzer, None, synthesizer, signal.clone());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let pipeline = CapturePipeline::new(source, signal, metrics(), settings());
        let handle = tokio::spawn(pipeline.run(worker, shutdown_rx));

        sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();

        timeout(Duration::from_secs(2), handle)
            .await
            .expect("pipeline stopped after shutdown")
            .unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pipeline_holds_capture_while_paused() {
        let captured = Arc::new(AtomicU64::new(0));
        let source = CountingSource {
            next: 0,
            total: u64::MAX,
            released: Arc::default(),
            captured: captured.clone(),
        };
        let analyzer = Arc::new(RecordingAnalyzer::default());
        let synthesizer = Arc::new(RecordingSynthesizer::default());
        let signal = SharedSignal::new();
        signal.set();
        let worker = worker(analyzer, None, synthesizer, signal.clone());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let pipeline = CapturePipeline::new(source, signal.clone(), metrics(), settings());
        let handle = tokio::spawn(pipeline.run(worker, shutdown_rx));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(captured.load(Ordering::SeqCst), 0);

        signal.clear();
        sleep(Duration::from_millis(50)).await;
        assert!(captured.load(Ordering::SeqCst) > 0);

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("pipeline stopped after shutdown")
            .unwrap();
    }
}
