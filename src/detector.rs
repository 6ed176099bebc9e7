use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{s, Array, ArrayD, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::config::ModelConfig;

/// Side length of the square model input tensor.
pub const INPUT_SIZE: u32 = 640;

/// IoU above which two boxes are considered duplicates during NMS.
const IOU_THRESHOLD: f32 = 0.45;

/// One detected object, in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("model output has unexpected shape: {0}")]
    OutputShape(String),
}

pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage, threshold: f32)
        -> Result<Vec<Detection>, DetectorError>;
}

/// Runs a pretrained YOLOv5-style ONNX model through ort.
///
/// Holds a small pool of sessions dispatched round-robin, so a request
/// arriving while another is mid-inference does not queue on one mutex.
pub struct OrtDetector {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
}

impl OrtDetector {
    pub fn new(model_config: &ModelConfig) -> Result<Self, DetectorError> {
        ort::init().commit();

        // Config validation rejects zero, but an empty pool must stay
        // unrepresentable: dispatch does `counter % sessions.len()`.
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", sessions.len());

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index].lock();

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())?;
        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session.run(input_tensor)?;

        let (shape, data) = outputs["output0"].try_extract_tensor::<f32>()?;

        let ix = shape.to_ixdyn();
        let array = ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| DetectorError::OutputShape(e.to_string()))?;

        Ok(array)
    }
}

impl Detector for OrtDetector {
    fn detect(
        &self,
        image: &DynamicImage,
        threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (input, img_width, img_height) = prepare_input(image);
        let outputs = self.run_inference(&input)?;
        let boxes = decode_predictions(&outputs, img_width, img_height, threshold)?;
        Ok(non_max_suppression(boxes))
    }
}

/// Resizes to the model input and normalizes RGB bytes into a `[0,1]`
/// NCHW tensor. Returns the tensor plus the original dimensions so
/// boxes can be scaled back after inference.
fn prepare_input(image: &DynamicImage) -> (Array<f32, Ix4>, u32, u32) {
    let (img_width, img_height) = image.dimensions();
    let img = image.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

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

    (input, img_width, img_height)
}

/// Decodes raw YOLOv5 output rows `[xc, yc, w, h, objectness, class
/// scores...]` into detections above `threshold`, scaled to the
/// original image dimensions.
fn decode_predictions(
    output: &ArrayD<f32>,
    img_width: u32,
    img_height: u32,
    threshold: f32,
) -> Result<Vec<Detection>, DetectorError> {
    let view = output
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| DetectorError::OutputShape(e.to_string()))?;

    if view.shape()[2] < 6 {
        return Err(DetectorError::OutputShape(format!(
            "expected rows of at least 6 values, got {}",
            view.shape()[2]
        )));
    }

    let mut boxes = Vec::new();
    for row in view.slice(s![0, .., ..]).rows() {
        let objectness = row[4];
        let (class_id, class_score) = row
            .iter()
            .skip(5)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
            .unwrap_or((0, 0.));

        let confidence = objectness * class_score;
        if confidence < threshold {
            continue;
        }

        let xc = row[0] / INPUT_SIZE as f32 * (img_width as f32);
        let yc = row[1] / INPUT_SIZE as f32 * (img_height as f32);
        let w = row[2] / INPUT_SIZE as f32 * (img_width as f32);
        let h = row[3] / INPUT_SIZE as f32 * (img_height as f32);

        boxes.push(Detection {
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
            confidence,
            class_id,
        });
    }

    Ok(boxes)
}

fn intersection(box1: &Detection, box2: &Detection) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn union(box1: &Detection, box2: &Detection) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

/// Greedy NMS: keep the highest-confidence box, drop everything that
/// overlaps it above `IOU_THRESHOLD`, repeat.
fn non_max_suppression(mut boxes: Vec<Detection>) -> Vec<Detection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result = Vec::new();
    while !boxes.is_empty() {
        result.push(boxes[0]);
        boxes = boxes
            .iter()
            .filter(|candidate| {
                intersection(&boxes[0], candidate) / union(&boxes[0], candidate) < IOU_THRESHOLD
            })
            .cloned()
            .collect();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use ndarray::Array3;

    fn make_row(xc: f32, yc: f32, w: f32, h: f32, obj: f32, class_id: usize) -> Vec<f32> {
        let mut row = vec![xc, yc, w, h, obj];
        let mut scores = vec![0.0; 80];
        scores[class_id] = 0.9;
        row.extend(scores);
        row
    }

    #[test]
    fn prepare_input_resizes_and_keeps_dimensions() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 50, Rgb([255, 0, 0]));
        let dynamic = DynamicImage::ImageRgb8(img);

        let (input, img_width, img_height) = prepare_input(&dynamic);

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 100);
        assert_eq!(img_height, 50);
        // Red image: channel 0 saturated, channels 1 and 2 empty.
        assert_eq!(input[[0, 0, 0, 0]], 1.0);
        assert_eq!(input[[0, 1, 0, 0]], 0.0);
        assert_eq!(input[[0, 2, 0, 0]], 0.0);
    }

    #[test]
    fn decode_filters_below_threshold_and_scales_boxes() {
        let rows = vec![
            make_row(320., 320., 64., 64., 0.9, 2),
            make_row(100., 100., 32., 32., 0.1, 5),
        ];
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let output = Array3::from_shape_vec((1, 2, 85), flat).unwrap().into_dyn();

        let boxes = decode_predictions(&output, 1280, 640, 0.5).unwrap();

        assert_eq!(boxes.len(), 1);
        let det = &boxes[0];
        assert_eq!(det.class_id, 2);
        assert!((det.confidence - 0.81).abs() < 1e-5);
        // xc 320/640 of a 1280-wide image is 640, box width 128.
        assert!((det.x1 - 576.).abs() < 1e-3);
        assert!((det.x2 - 704.).abs() < 1e-3);
        assert!((det.y1 - 288.).abs() < 1e-3);
        assert!((det.y2 - 352.).abs() < 1e-3);
    }

    #[test]
    fn decode_rejects_malformed_output() {
        let output = Array3::<f32>::zeros((1, 4, 5)).into_dyn();
        assert!(decode_predictions(&output, 100, 100, 0.25).is_err());
    }

    #[test]
    fn nms_drops_overlapping_lower_confidence_boxes() {
        let boxes = vec![
            Detection {
                x1: 0.,
                y1: 0.,
                x2: 100.,
                y2: 100.,
                confidence: 0.8,
                class_id: 0,
            },
            Detection {
                x1: 5.,
                y1: 5.,
                x2: 105.,
                y2: 105.,
                confidence: 0.9,
                class_id: 0,
            },
            Detection {
                x1: 300.,
                y1: 300.,
                x2: 400.,
                y2: 400.,
                confidence: 0.7,
                class_id: 1,
            },
        ];

        let kept = non_max_suppression(boxes);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
    }

    #[test]
    fn disjoint_boxes_have_zero_intersection() {
        let a = Detection {
            x1: 0.,
            y1: 0.,
            x2: 10.,
            y2: 10.,
            confidence: 0.5,
            class_id: 0,
        };
        let b = Detection {
            x1: 20.,
            y1: 20.,
            x2: 30.,
            y2: 30.,
            confidence: 0.5,
            class_id: 0,
        };

        assert_eq!(intersection(&a, &b), 0.);
        assert_eq!(union(&a, &b), 200.);
    }
}
