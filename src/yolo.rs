use crate::config::DetectorConfig;
use crate::detector::{Detection, Detector, DetectorError};
use async_trait::async_trait;
use image::{imageops::FilterType, GenericImageView};
use ndarray::{s, Array, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const INPUT_SIZE: u32 = 640;

fn intersection(box1: &Detection, box2: &Detection) -> f32 {
    (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.0)
        * (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.0)
}

fn union(box1: &Detection, box2: &Detection) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn transform_image(image_data: &[u8]) -> Result<(Array<f32, Ix4>, u32, u32), DetectorError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| DetectorError::ImageDecode(e.to_string()))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| DetectorError::ImageDecode(e.to_string()))?;

    let (img_width, img_height) = original_img.dimensions();
    let img = original_img.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let size = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok((input, img_width, img_height))
}

/// Decodes a YOLOv8-style `[1, 4 + num_classes, anchors]` output tensor into
/// thresholded detections in original-image pixels, then applies greedy NMS.
fn decode_predictions(
    outputs: &ndarray::ArrayD<f32>,
    confidence: f32,
    iou: f32,
    img_width: u32,
    img_height: u32,
) -> Result<Vec<Detection>, DetectorError> {
    if outputs.ndim() != 3 || outputs.shape()[1] <= 4 {
        return Err(DetectorError::ModelOutput(format!(
            "expected [1, 4 + classes, anchors] tensor, got {:?}",
            outputs.shape()
        )));
    }

    let view = outputs.slice(s![0, .., ..]);
    let mut boxes = Vec::new();

    for anchor in view.axis_iter(Axis(1)) {
        let Some((class_id, prob)) = anchor
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        else {
            continue;
        };

        if prob < confidence {
            continue;
        }

        let xc = anchor[0] / INPUT_SIZE as f32 * (img_width as f32);
        let yc = anchor[1] / INPUT_SIZE as f32 * (img_height as f32);
        let w = anchor[2] / INPUT_SIZE as f32 * (img_width as f32);
        let h = anchor[3] / INPUT_SIZE as f32 * (img_height as f32);

        boxes.push(Detection {
            class_id: class_id as u32,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        });
    }

    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        result.push(boxes[0]);
        boxes = boxes
            .iter()
            .filter(|box1| intersection(&boxes[0], box1) / union(&boxes[0], box1) < iou)
            .copied()
            .collect();
    }

    Ok(result)
}

pub struct OrtDetector {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
}

impl OrtDetector {
    pub fn new(detector_config: &DetectorConfig) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init().commit()?;
        let num_instances = detector_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&detector_config.model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions for {:?}",
            num_instances,
            detector_config.model_path
        );

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
        })
    }

    fn run_inference(
        &self,
        input: &Array<f32, Ix4>,
    ) -> Result<ndarray::ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling inference with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| DetectorError::Inference(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session
            .run(input_tensor)
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::ModelOutput(format!("failed to extract tensor: {}", e)))?;

        let ix = shape.to_ixdyn();
        let array = ndarray::ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| DetectorError::ModelOutput(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }
}

#[async_trait]
impl Detector for OrtDetector {
    async fn detect(
        &self,
        image: &[u8],
        confidence: f32,
        iou: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (input, img_width, img_height) = transform_image(image)?;
        let outputs = self.run_inference(&input)?;
        decode_predictions(&outputs, confidence, iou, img_width, img_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    #[test]
    fn test_transform_image() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 100, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();

        let (input_array, img_width, img_height) =
            transform_image(cursor.get_ref()).expect("transform failed");

        assert_eq!(input_array.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 100);
        assert_eq!(img_height, 100);
    }

    #[test]
    fn test_transform_image_rejects_garbage() {
        let result = transform_image(&[0u8; 32]);
        assert!(matches!(result, Err(DetectorError::ImageDecode(_))));
    }

    // Two classes, three anchors: a confident box, an overlapping weaker
    // duplicate of the same object, and one below the threshold.
    fn synthetic_output() -> ndarray::ArrayD<f32> {
        let mut array = ndarray::ArrayD::zeros(ndarray::IxDyn(&[1, 6, 3]));

        // anchor 0: class 1, centered 320,320, 160x160, p=0.9
        for (row, value) in [320.0, 320.0, 160.0, 160.0, 0.05, 0.9].iter().enumerate() {
            array[[0, row, 0]] = *value;
        }
        // anchor 1: same object shifted slightly, p=0.6
        for (row, value) in [330.0, 330.0, 160.0, 160.0, 0.05, 0.6].iter().enumerate() {
            array[[0, row, 1]] = *value;
        }
        // anchor 2: class 0 elsewhere, below the confidence threshold
        for (row, value) in [100.0, 100.0, 40.0, 40.0, 0.3, 0.01].iter().enumerate() {
            array[[0, row, 2]] = *value;
        }

        array
    }

    #[test]
    fn test_decode_thresholds_and_nms() {
        let outputs = synthetic_output();
        let detections = decode_predictions(&outputs, 0.5, 0.5, 640, 640).unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
        assert!((detections[0].x1 - 240.0).abs() < 1e-3);
        assert!((detections[0].y2 - 400.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_keeps_non_overlapping_boxes() {
        let outputs = synthetic_output();
        // Low confidence bar keeps anchor 2; high IoU bar keeps the duplicate.
        let detections = decode_predictions(&outputs, 0.005, 0.99, 640, 640).unwrap();
        assert_eq!(detections.len(), 3);
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let outputs = ndarray::ArrayD::zeros(ndarray::IxDyn(&[1, 4]));
        assert!(matches!(
            decode_predictions(&outputs, 0.5, 0.5, 640, 640),
            Err(DetectorError::ModelOutput(_))
        ));
    }
}
