use crate::camera::FrameFeed;
use crate::config::{DetectorConfig, MediaConfig};
use crate::cv_utils::{CvImage, CvUtilsError};
use crate::detector::{Detection, Detector};
use crate::labels::ClassCatalog;
use crate::planner::plan;
use crate::results::{DetectionCounts, DetectionResult, ResultStatus, ResultStore};
use crate::telemetry::Metrics;
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Camera device is not open")]
    CameraUnavailable,
    #[error("No frame has been captured yet")]
    NoFrame,
}

#[derive(Error, Debug)]
pub enum ImageDetectError {
    #[error("Failed to decode image: {0}")]
    Decode(String),
}

/// Runs the capture → infer → plan → persist pipeline. The gate serializes
/// every run so camera reads, inference and last-result writes from
/// concurrent callers (HTTP and the serial trigger loop) never interleave.
pub struct CaptureOrchestrator {
    frames: Arc<dyn FrameFeed>,
    detector: Arc<dyn Detector>,
    catalog: Arc<ClassCatalog>,
    store: Arc<ResultStore>,
    media: MediaConfig,
    default_confidence: f32,
    default_iou: f32,
    gate: Mutex<()>,
    metrics: Arc<Metrics>,
}

impl CaptureOrchestrator {
    pub fn new(
        frames: Arc<dyn FrameFeed>,
        detector: Arc<dyn Detector>,
        catalog: Arc<ClassCatalog>,
        store: Arc<ResultStore>,
        media: MediaConfig,
        detector_config: &DetectorConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        for dir in [&media.uploads_dir, &media.outputs_dir] {
            if let Err(e) = fs::create_dir_all(dir) {
                tracing::warn!("Failed to create media directory {:?}: {}", dir, e);
            }
        }

        Self {
            frames,
            detector,
            catalog,
            store,
            media,
            default_confidence: detector_config.confidence,
            default_iou: detector_config.iou,
            gate: Mutex::new(()),
            metrics,
        }
    }

    /// One serialized pipeline run. At most one execution is in flight at any
    /// time; a concurrent caller blocks on the gate until the first finishes.
    #[instrument(skip(self))]
    pub async fn capture_and_detect(
        &self,
        confidence: Option<f32>,
        iou: Option<f32>,
    ) -> Result<DetectionResult, CaptureError> {
        let _permit = self.gate.lock().await;

        if !self.frames.is_open() {
            return Err(CaptureError::CameraUnavailable);
        }
        let frame = self.frames.latest_frame().ok_or(CaptureError::NoFrame)?;

        let (confidence, iou) = self.resolve_thresholds(confidence, iou);
        let detections = self.run_detector(&frame.jpeg, confidence, iou).await;
        let (input_image, output_image) = self.save_media(&frame.jpeg, &detections);

        let result = self.build_result(&detections, input_image, output_image);
        self.store.publish(result.clone());
        self.metrics.record_capture();

        Ok(result)
    }

    pub async fn capture_with_defaults(&self) -> Result<DetectionResult, CaptureError> {
        self.capture_and_detect(None, None).await
    }

    /// Detection on a caller-supplied image. Bypasses the camera and the
    /// last-result slot, so it does not take the gate.
    #[instrument(skip(self, image))]
    pub async fn detect_image(
        &self,
        image: &[u8],
        confidence: Option<f32>,
        iou: Option<f32>,
    ) -> Result<DetectionResult, ImageDetectError> {
        CvImage::from_bytes(image).map_err(|e| ImageDetectError::Decode(e.to_string()))?;

        let (confidence, iou) = self.resolve_thresholds(confidence, iou);
        let detections = self.run_detector(image, confidence, iou).await;
        let (input_image, output_image) = self.save_media(image, &detections);

        Ok(self.build_result(&detections, input_image, output_image))
    }

    fn resolve_thresholds(&self, confidence: Option<f32>, iou: Option<f32>) -> (f32, f32) {
        (
            confidence.unwrap_or(self.default_confidence).clamp(0.0, 1.0),
            iou.unwrap_or(self.default_iou).clamp(0.0, 1.0),
        )
    }

    async fn run_detector(&self, image: &[u8], confidence: f32, iou: f32) -> Vec<Detection> {
        let started = Instant::now();
        let detections = match self.detector.detect(image, confidence, iou).await {
            Ok(detections) => detections,
            Err(e) => {
                // a single bad inference never aborts the pipeline
                tracing::warn!("Detector failed, treating as zero detections: {}", e);
                Vec::new()
            }
        };
        self.metrics
            .record_inference_duration(started.elapsed().as_millis() as u64);
        detections
    }

    fn build_result(
        &self,
        detections: &[Detection],
        input_image: Option<String>,
        output_image: Option<String>,
    ) -> DetectionResult {
        let counts = DetectionCounts::from_detections(detections, self.catalog.len());
        let total_vehicles = counts.total();
        let plan = plan(total_vehicles);
        let status = ResultStatus::from_duration(plan.duration_seconds);
        self.metrics.record_vehicle_total(total_vehicles);

        DetectionResult {
            input_image,
            output_image,
            counts,
            total_vehicles,
            plan,
            status,
        }
    }

    fn save_media(&self, jpeg: &[u8], detections: &[Detection]) -> (Option<String>, Option<String>) {
        let stamp = format!("{:08x}", rand::random::<u32>());

        let input_path = self.media.uploads_dir.join(format!("capture_{}.jpg", stamp));
        let input_image = match fs::write(&input_path, jpeg) {
            Ok(()) => Some(input_path.display().to_string()),
            Err(e) => {
                tracing::warn!("Failed to save captured image {:?}: {}", input_path, e);
                None
            }
        };

        let output_image = match self.annotated_jpeg(jpeg, detections) {
            Ok(bytes) => {
                let output_path = self
                    .media
                    .outputs_dir
                    .join(format!("capture_{}_detect.jpg", stamp));
                match fs::write(&output_path, bytes) {
                    Ok(()) => Some(output_path.display().to_string()),
                    Err(e) => {
                        tracing::warn!("Failed to save annotated image {:?}: {}", output_path, e);
                        None
                    }
                }
            }
            Err(e) => {
                tracing::debug!("Skipping annotated image: {}", e);
                None
            }
        };

        (input_image, output_image)
    }

    fn annotated_jpeg(
        &self,
        jpeg: &[u8],
        detections: &[Detection],
    ) -> Result<Vec<u8>, CvUtilsError> {
        let mut image = CvImage::from_bytes(jpeg)?;
        image.annotate(detections, &self.catalog)?;
        image.to_jpg()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Frame;
    use crate::config::ResultsConfig;
    use crate::detector::DetectorError;
    use crate::planner::CommandCode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubFeed {
        open: bool,
        frame: Option<Frame>,
    }

    impl FrameFeed for StubFeed {
        fn is_open(&self) -> bool {
            self.open
        }

        fn latest_frame(&self) -> Option<Frame> {
            self.frame.clone()
        }
    }

    struct StubDetector {
        batches: Vec<Vec<Detection>>,
        fail: bool,
        delay_ms: u64,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl StubDetector {
        fn with_batches(batches: Vec<Vec<Detection>>) -> Self {
            Self {
                batches,
                fail: false,
                delay_ms: 0,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            let mut stub = Self::with_batches(vec![]);
            stub.fail = true;
            stub
        }
    }

    #[async_trait]
    impl Detector for StubDetector {
        async fn detect(
            &self,
            _image: &[u8],
            _confidence: f32,
            _iou: f32,
        ) -> Result<Vec<Detection>, DetectorError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(DetectorError::Inference("boom".into()));
            }
            Ok(self
                .batches
                .get(call % self.batches.len().max(1))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn detection(class_id: u32) -> Detection {
        Detection {
            class_id,
            confidence: 0.9,
            x1: 1.0,
            y1: 1.0,
            x2: 5.0,
            y2: 5.0,
        }
    }

    fn frame() -> Frame {
        Frame {
            jpeg: vec![0u8; 16],
            width: 4,
            height: 4,
            captured_at_ms: 1,
        }
    }

    fn fixture(
        feed: StubFeed,
        detector: Arc<StubDetector>,
    ) -> (Arc<CaptureOrchestrator>, Arc<ResultStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResultStore::new(&ResultsConfig {
            last_result_path: dir.path().join("last_result.json"),
        }));
        let media = MediaConfig {
            uploads_dir: dir.path().join("uploads"),
            outputs_dir: dir.path().join("outputs"),
        };
        let detector_config = DetectorConfig {
            model_path: dir.path().join("model.onnx"),
            labels_path: None,
            confidence: 0.5,
            iou: 0.5,
            num_instances: 1,
        };
        let orchestrator = Arc::new(CaptureOrchestrator::new(
            Arc::new(feed),
            detector,
            Arc::new(ClassCatalog::load(None)),
            store.clone(),
            media,
            &detector_config,
            Arc::new(Metrics::new()),
        ));
        (orchestrator, store, dir)
    }

    #[tokio::test]
    async fn test_closed_camera_fails_fast() {
        let detector = Arc::new(StubDetector::with_batches(vec![vec![detection(0)]]));
        let (orchestrator, store, _dir) = fixture(
            StubFeed {
                open: false,
                frame: Some(frame()),
            },
            detector.clone(),
        );

        let result = orchestrator.capture_and_detect(None, None).await;
        assert!(matches!(result, Err(CaptureError::CameraUnavailable)));
        assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
        assert!(store.latest().is_none());
    }

    #[tokio::test]
    async fn test_no_frame_yet() {
        let detector = Arc::new(StubDetector::with_batches(vec![]));
        let (orchestrator, _store, _dir) = fixture(
            StubFeed {
                open: true,
                frame: None,
            },
            detector,
        );

        let result = orchestrator.capture_and_detect(None, None).await;
        assert!(matches!(result, Err(CaptureError::NoFrame)));
    }

    #[tokio::test]
    async fn test_detector_failure_yields_zero_counts() {
        let detector = Arc::new(StubDetector::failing());
        let (orchestrator, store, _dir) = fixture(
            StubFeed {
                open: true,
                frame: Some(frame()),
            },
            detector,
        );

        let result = orchestrator.capture_and_detect(None, None).await.unwrap();
        assert_eq!(result.counts.total(), 0);
        assert_eq!(result.total_vehicles, 0);
        assert_eq!(result.plan.command, CommandCode::M0);
        assert_eq!(result.plan.duration_seconds, 30);
        assert_eq!(store.latest().unwrap(), result);
    }

    #[tokio::test]
    async fn test_out_of_range_classes_are_dropped() {
        let detector = Arc::new(StubDetector::with_batches(vec![vec![
            detection(2),
            detection(2),
            detection(2),
            detection(9),
        ]]));
        let (orchestrator, store, _dir) = fixture(
            StubFeed {
                open: true,
                frame: Some(frame()),
            },
            detector,
        );

        let result = orchestrator.capture_and_detect(None, None).await.unwrap();
        assert_eq!(result.counts.0, vec![0, 0, 3, 0, 0, 0]);
        assert_eq!(result.total_vehicles, 3);
        assert_eq!(result.plan.command, CommandCode::M1);
        assert_eq!(store.latest().unwrap().total_vehicles, 3);
    }

    #[tokio::test]
    async fn test_concurrent_captures_are_serialized() {
        let mut slow = StubDetector::with_batches(vec![
            vec![detection(0), detection(1)],
            (0..7).map(|_| detection(2)).collect(),
        ]);
        slow.delay_ms = 30;
        let detector = Arc::new(slow);

        let (orchestrator, store, _dir) = fixture(
            StubFeed {
                open: true,
                frame: Some(frame()),
            },
            detector.clone(),
        );

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.capture_and_detect(None, None).await }
        });
        let second = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.capture_and_detect(None, None).await }
        });

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        // the gate admits one pipeline at a time
        assert_eq!(detector.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 2);

        for result in [&first, &second] {
            assert_eq!(result.counts.total(), result.total_vehicles);
            let expected = plan(result.total_vehicles);
            assert_eq!(result.plan.command, expected.command);
            assert_eq!(result.plan.duration_seconds, expected.duration_seconds);
        }

        // the slot holds exactly the later of the two runs
        let totals = [first.total_vehicles, second.total_vehicles];
        assert!(totals.contains(&2) && totals.contains(&7));
        assert!(totals.contains(&store.latest().unwrap().total_vehicles));
    }

    #[tokio::test]
    async fn test_detect_image_rejects_garbage() {
        let detector = Arc::new(StubDetector::with_batches(vec![]));
        let (orchestrator, _store, _dir) = fixture(
            StubFeed {
                open: true,
                frame: None,
            },
            detector,
        );

        let result = orchestrator.detect_image(&[0u8; 16], None, None).await;
        assert!(matches!(result, Err(ImageDetectError::Decode(_))));
    }

    #[tokio::test]
    async fn test_detect_image_does_not_touch_last_result() {
        use opencv::core::{Mat, Scalar, CV_8UC3};

        let mat =
            Mat::new_rows_cols_with_default(8, 8, CV_8UC3, Scalar::all(0.0)).unwrap();
        let jpeg = crate::cv_utils::encode_mat_to_jpg(&mat).unwrap();

        let detector = Arc::new(StubDetector::with_batches(vec![vec![detection(1)]]));
        let (orchestrator, store, _dir) = fixture(
            StubFeed {
                open: true,
                frame: None,
            },
            detector,
        );

        let result = orchestrator.detect_image(&jpeg, None, None).await.unwrap();
        assert_eq!(result.total_vehicles, 1);
        assert_eq!(result.plan.command, CommandCode::M1);
        assert!(result.input_image.is_some());
        assert!(store.latest().is_none());
    }
}
