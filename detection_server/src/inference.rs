use crate::{
    detector::{Detector, DetectorError, RawDetection},
    distance::DistanceEstimator,
};
use sightline_proto::{BoundingBox, Detection, DetectionResult};
use std::{sync::Arc, time::Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),
}

#[derive(Debug, Clone, Copy)]
struct Timings {
    preprocess_ms: f64,
    inference_ms: f64,
    postprocess_ms: f64,
}

/// Turns one encoded frame into a `DetectionResult`.
pub struct InferenceService<D: Detector> {
    detector: Arc<D>,
    distance: DistanceEstimator,
}

impl<D: Detector> Clone for InferenceService<D> {
    fn clone(&self) -> Self {
        Self {
            detector: self.detector.clone(),
            distance: self.distance,
        }
    }
}

impl<D: Detector> InferenceService<D> {
    pub fn new(detector: D, distance: DistanceEstimator) -> Self {
        Self {
            detector: Arc::new(detector),
            distance,
        }
    }

    pub async fn process_frame(&self, payload: &[u8]) -> Result<DetectionResult, ProcessError> {
        let started = Instant::now();
        let image = image::load_from_memory(payload)?;
        let (width, height) = (image.width(), image.height());
        let preprocess_ms = elapsed_ms(started);

        let started = Instant::now();
        let raw = self.detector.detect(&image).await?;
        let inference_ms = elapsed_ms(started);

        let started = Instant::now();
        let detections: Vec<Detection> = raw.iter().map(|d| self.to_detection(d)).collect();
        let postprocess_ms = elapsed_ms(started);

        let timings = Timings {
            preprocess_ms,
            inference_ms,
            postprocess_ms,
        };
        let inference_output = summarize(detections.len(), height, width, timings);

        tracing::debug!("Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: label={}, confidence={:.3}, distance_cm={:.1}",
                i,
                detection.label,
                detection.confidence,
                detection.distance_cm
            );
        }

        Ok(DetectionResult::new(detections, inference_output))
    }

    fn to_detection(&self, raw: &RawDetection) -> Detection {
        let bbox = BoundingBox::new(raw.x1 as i32, raw.y1 as i32, raw.x2 as i32, raw.y2 as i32);
        Detection {
            label: raw.class_label.clone(),
            confidence: raw.confidence,
            distance_cm: self.distance.estimate_cm(bbox.width()),
            bbox: Some(bbox),
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn summarize(count: usize, height: u32, width: u32, timings: Timings) -> String {
    let detection_info = if count > 0 {
        format!("({} detections)", count)
    } else {
        "(no detections)".to_string()
    };

    format!(
        "0: {}x{} {}, {:.1}ms\nSpeed: {:.1}ms preprocess, {:.1}ms inference, {:.1}ms postprocess per image at shape ({}, {})",
        height,
        width,
        detection_info,
        timings.inference_ms,
        timings.preprocess_ms,
        timings.inference_ms,
        timings.postprocess_ms,
        height,
        width
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    #[derive(Clone)]
    pub(crate) struct MockDetector {
        pub detections: Vec<RawDetection>,
    }

    impl MockDetector {
        pub(crate) fn person(width: f32) -> Self {
            Self {
                detections: vec![RawDetection {
                    class_label: "person".to_string(),
                    confidence: 0.9,
                    x1: 10.0,
                    y1: 10.0,
                    x2: 10.0 + width,
                    y2: 60.0,
                }],
            }
        }
    }

    #[async_trait]
    impl Detector for MockDetector {
        async fn detect(&self, _image: &DynamicImage) -> Result<Vec<RawDetection>, DetectorError> {
            Ok(self.detections.clone())
        }
    }

    pub(crate) fn jpeg_frame(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([40, 90, 160]));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, ImageFormat::Jpeg).unwrap();
        cursor.into_inner()
    }

    #[tokio::test]
    async fn test_process_frame() -> Result<(), Box<dyn std::error::Error>> {
        let service = InferenceService::new(MockDetector::person(100.0), DistanceEstimator::default());

        let result = service.process_frame(&jpeg_frame(640, 480)).await?;

        assert_eq!(result.detection_results.len(), 1);
        let detection = &result.detection_results[0];
        assert_eq!(detection.label, "person");
        assert_eq!(detection.confidence, 0.9);
        assert_eq!(detection.bbox, Some(BoundingBox::new(10, 10, 110, 60)));
        assert!((detection.distance_cm - 8.957480315).abs() < 1e-9);
        assert!(result
            .inference_output
            .starts_with("0: 480x640 (1 detections), "));
        assert!(result.inference_output.ends_with("at shape (480, 640)"));

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_frame_summary() -> Result<(), Box<dyn std::error::Error>> {
        let service = InferenceService::new(
            MockDetector { detections: vec![] },
            DistanceEstimator::default(),
        );

        let result = service.process_frame(&jpeg_frame(32, 16)).await?;

        assert!(result.detection_results.is_empty());
        assert!(result.inference_output.contains("16x32 (no detections)"));
        Ok(())
    }

    #[tokio::test]
    async fn test_undecodable_frame() {
        let service = InferenceService::new(MockDetector::person(100.0), DistanceEstimator::default());

        let err = service.process_frame(b"not an image").await.unwrap_err();
        assert!(matches!(err, ProcessError::Decode(_)));
    }
}
