use crate::{
    config::{ModelConfig, Validatable},
    detector::{Detector, DetectorError, RawDetection},
    labels::ClassLabels,
};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{s, Array, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const INPUT_SIZE: u32 = 640;
const IOU_THRESHOLD: f32 = 0.7;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    class_id: usize,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

fn intersection(box1: &Candidate, box2: &Candidate) -> f32 {
    let width = box1.x2.min(box2.x2) - box1.x1.max(box2.x1);
    let height = box1.y2.min(box2.y2) - box1.y1.max(box2.y1);
    width.max(0.) * height.max(0.)
}

fn union(box1: &Candidate, box2: &Candidate) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn transform_image(image: &DynamicImage) -> Array<f32, Ix4> {
    let img = image.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let side = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, side, side));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Greedy non-maximum suppression, highest confidence first.
fn suppress_overlaps(mut boxes: Vec<Candidate>) -> Vec<Candidate> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while let Some(best) = boxes.first().copied() {
        result.push(best);
        boxes.retain(|other| intersection(&best, other) / union(&best, other) < IOU_THRESHOLD);
    }

    result
}

/// YOLOv8 detector backed by a pool of ONNX Runtime sessions.
#[derive(Clone)]
pub struct OrtDetector {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    min_probability: f32,
    labels: Arc<ClassLabels>,
}

impl OrtDetector {
    pub fn new(
        model_config: &ModelConfig,
        labels: ClassLabels,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions with {} class labels",
            num_instances,
            labels.len()
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            min_probability: model_config.min_probability,
            labels: Arc::new(labels),
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling frame with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Input(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(format!("failed to extract tensor: {}", e)))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectorError::Inference(format!("invalid tensor shape: {}", e)))
    }

    fn collect_candidates(
        &self,
        outputs: ndarray::ArrayD<f32>,
        img_width: u32,
        img_height: u32,
    ) -> Result<Vec<Candidate>, DetectorError> {
        // [1, 4 + classes, anchors] -> one row per anchor
        let outputs = outputs
            .into_dimensionality::<Ix3>()
            .map_err(|e| DetectorError::Inference(format!("unexpected output rank: {}", e)))?;
        let output = outputs.t();
        let output = output.slice(s![.., .., 0]);

        let scale_x = img_width as f32 / INPUT_SIZE as f32;
        let scale_y = img_height as f32 / INPUT_SIZE as f32;
        let mut boxes = Vec::new();

        for row in output.axis_iter(Axis(0)) {
            let row: Vec<f32> = row.iter().copied().collect();
            let Some((class_id, prob)) = row
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
            else {
                continue;
            };

            if prob < self.min_probability {
                continue;
            }

            let xc = row[0] * scale_x;
            let yc = row[1] * scale_y;
            let w = row[2] * scale_x;
            let h = row[3] * scale_y;

            boxes.push(Candidate {
                class_id,
                confidence: prob,
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            });
        }

        Ok(boxes)
    }
}

#[async_trait]
impl Detector for OrtDetector {
    async fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, DetectorError> {
        let (img_width, img_height) = image.dimensions();
        let input = transform_image(image);

        let outputs = self.run_inference(&input)?;
        let candidates = self.collect_candidates(outputs, img_width, img_height)?;

        let detections = suppress_overlaps(candidates)
            .into_iter()
            .map(|bbox| RawDetection {
                class_label: self.labels.label(bbox.class_id),
                confidence: bbox.confidence,
                x1: bbox.x1,
                y1: bbox.y1,
                x2: bbox.x2,
                y2: bbox.y2,
            })
            .collect();

        Ok(detections)
    }
}
