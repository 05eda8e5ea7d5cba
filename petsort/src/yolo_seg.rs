//! YOLOv8-seg instance segmentation on ONNX Runtime.
//!
//! Expected model outputs:
//! - `output0`: `[1, 4 + num_classes + num_coeffs, num_anchors]`, boxes as cxcywh
//!   in letterboxed input pixels followed by class scores and mask coefficients
//! - `output1`: `[1, num_coeffs, mask_h, mask_w]` mask prototypes

use anyhow::{anyhow, Result};
use image::RgbImage;
use ndarray::{s, Array, Array2, ArrayD, Axis};
use ort::{session::Session, value::Value};
use std::sync::Mutex;
use std::time::Instant;

use crate::color_utils::symbols;
use crate::config::PipelineConfig;
use crate::detection::{
    load_label_file, parse_names_metadata, BoundingBox, InstanceSegmenter, SegmentationResult,
    SegmentedInstance, COCO_CLASSES,
};
use crate::onnx_session::{create_onnx_session, declared_input_size, ModelInfo, SessionConfig};

const DEFAULT_INPUT_SIZE: u32 = 640;
const MAX_DETECTIONS: usize = 300;
const LETTERBOX_GRAY: u8 = 114;

/// How a source image was placed into the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub size: u32,
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub new_width: u32,
    pub new_height: u32,
}

impl Letterbox {
    pub fn new(orig_width: u32, orig_height: u32, size: u32) -> Self {
        let max_dim = orig_width.max(orig_height).max(1);
        let scale = size as f32 / max_dim as f32;
        let new_width = ((orig_width as f32 * scale) as u32).clamp(1, size);
        let new_height = ((orig_height as f32 * scale) as u32).clamp(1, size);
        Self {
            size,
            scale,
            pad_x: (size - new_width) / 2,
            pad_y: (size - new_height) / 2,
            new_width,
            new_height,
        }
    }

    /// Map a box from model-input pixels back to source pixels, clamped to the image
    pub fn to_source(&self, b: &BoundingBox, orig_width: u32, orig_height: u32) -> BoundingBox {
        let w = orig_width as f32;
        let h = orig_height as f32;
        let px = self.pad_x as f32;
        let py = self.pad_y as f32;
        BoundingBox::new(
            ((b.x1 - px) / self.scale).clamp(0.0, w),
            ((b.y1 - py) / self.scale).clamp(0.0, h),
            ((b.x2 - px) / self.scale).clamp(0.0, w),
            ((b.y2 - py) / self.scale).clamp(0.0, h),
        )
    }
}

/// Letterbox an image into a `[1, 3, size, size]` tensor scaled to `[0, 1]`
pub fn preprocess_letterbox(
    img: &RgbImage,
    target_size: u32,
) -> Result<(Array<f32, ndarray::IxDyn>, Letterbox)> {
    let (orig_width, orig_height) = img.dimensions();
    let letterbox = Letterbox::new(orig_width, orig_height, target_size);

    let resized = image::imageops::resize(
        img,
        letterbox.new_width,
        letterbox.new_height,
        image::imageops::FilterType::Triangle,
    );

    let mut canvas =
        RgbImage::from_pixel(target_size, target_size, image::Rgb([LETTERBOX_GRAY; 3]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        letterbox.pad_x as i64,
        letterbox.pad_y as i64,
    );

    let size = target_size as usize;
    let mut input_data = Vec::with_capacity(3 * size * size);
    for c in 0..3 {
        for pixel in canvas.pixels() {
            input_data.push(pixel[c] as f32 / 255.0);
        }
    }

    let input = Array::from_shape_vec(ndarray::IxDyn(&[1, 3, size, size]), input_data)?;
    Ok((input, letterbox))
}

#[derive(Debug, Clone)]
struct Candidate {
    bbox: BoundingBox,
    confidence: f32,
    class_id: usize,
    coeffs: Vec<f32>,
}

/// Class-aware greedy NMS. Output is sorted by descending confidence.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
            if keep.len() == MAX_DETECTIONS {
                break;
            }
        }
    }
    keep
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decode raw YOLOv8-seg outputs into instances in source-image coordinates.
///
/// Masks are returned at prototype resolution with the letterbox padding
/// removed, so resizing them to the source size aligns with the image.
pub fn decode_outputs(
    predictions: &ArrayD<f32>,
    prototypes: &ArrayD<f32>,
    letterbox: &Letterbox,
    orig_size: (u32, u32),
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Result<Vec<SegmentedInstance>> {
    let p_shape = predictions.shape();
    let m_shape = prototypes.shape();
    if p_shape.len() != 3 {
        return Err(anyhow!("Expected 3D prediction output, got {}D", p_shape.len()));
    }
    if m_shape.len() != 4 {
        return Err(anyhow!("Expected 4D prototype output, got {}D", m_shape.len()));
    }

    let num_coeffs = m_shape[1];
    let (mask_h, mask_w) = (m_shape[2], m_shape[3]);
    let channels = p_shape[1];
    if channels <= 4 + num_coeffs {
        return Err(anyhow!(
            "Prediction output has {channels} channels, too few for 4 box values and {num_coeffs} mask coefficients"
        ));
    }
    let num_classes = channels - 4 - num_coeffs;
    let num_anchors = p_shape[2];

    let mut candidates = Vec::new();
    for i in 0..num_anchors {
        let (best_class, best_score) = (0..num_classes)
            .map(|c| (c, predictions[[0, 4 + c, i]]))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });

        if best_score <= confidence_threshold {
            continue;
        }

        let cx = predictions[[0, 0, i]];
        let cy = predictions[[0, 1, i]];
        let w = predictions[[0, 2, i]];
        let h = predictions[[0, 3, i]];
        let coeffs = (0..num_coeffs)
            .map(|k| predictions[[0, 4 + num_classes + k, i]])
            .collect();

        candidates.push(Candidate {
            bbox: BoundingBox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0),
            confidence: best_score,
            class_id: best_class,
            coeffs,
        });
    }

    let kept = nms(candidates, iou_threshold);
    log::debug!("Decoded {} instance(s) after NMS", kept.len());

    // Prototype-grid region covered by the actual image (excluding letterbox padding)
    let size = letterbox.size as f32;
    let to_grid_x = |v: f32| ((v / size) * mask_w as f32).round() as usize;
    let to_grid_y = |v: f32| ((v / size) * mask_h as f32).round() as usize;
    let gx0 = to_grid_x(letterbox.pad_x as f32).min(mask_w - 1);
    let gy0 = to_grid_y(letterbox.pad_y as f32).min(mask_h - 1);
    let gx1 = to_grid_x((letterbox.pad_x + letterbox.new_width) as f32).clamp(gx0 + 1, mask_w);
    let gy1 = to_grid_y((letterbox.pad_y + letterbox.new_height) as f32).clamp(gy0 + 1, mask_h);

    let protos = prototypes.index_axis(Axis(0), 0);
    let (orig_width, orig_height) = orig_size;

    let instances = kept
        .into_iter()
        .map(|candidate| {
            let bx1 = candidate.bbox.x1 / size * mask_w as f32;
            let by1 = candidate.bbox.y1 / size * mask_h as f32;
            let bx2 = candidate.bbox.x2 / size * mask_w as f32;
            let by2 = candidate.bbox.y2 / size * mask_h as f32;

            let full = Array2::from_shape_fn((mask_h, mask_w), |(y, x)| {
                let (fx, fy) = (x as f32, y as f32);
                if fx < bx1 || fx >= bx2 || fy < by1 || fy >= by2 {
                    return 0.0;
                }
                let logit: f32 = candidate
                    .coeffs
                    .iter()
                    .enumerate()
                    .map(|(k, c)| c * protos[[k, y, x]])
                    .sum();
                sigmoid(logit)
            });

            SegmentedInstance {
                class_id: candidate.class_id,
                confidence: candidate.confidence,
                bbox: letterbox.to_source(&candidate.bbox, orig_width, orig_height),
                mask: full.slice(s![gy0..gy1, gx0..gx1]).to_owned(),
            }
        })
        .collect();

    Ok(instances)
}

/// YOLOv8-seg detector backed by an ONNX Runtime session
pub struct YoloSegmenter {
    session: Mutex<Session>,
    input_name: String,
    input_size: u32,
    class_names: Vec<String>,
    pub model_info: ModelInfo,
}

impl YoloSegmenter {
    pub fn load(config: &PipelineConfig, device: &str) -> Result<Self> {
        let (session, model_info) = create_onnx_session(
            &config.detector_model_path,
            &SessionConfig { device },
        )?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow!("Detector model declares no inputs"))?;
        if session.outputs.len() < 2 {
            return Err(anyhow!(
                "Detector model has {} output(s); a segmentation model needs boxes and mask prototypes",
                session.outputs.len()
            ));
        }
        let input_size = declared_input_size(&session).unwrap_or_else(|| {
            log::debug!("Detector input size is dynamic, using {DEFAULT_INPUT_SIZE}");
            DEFAULT_INPUT_SIZE
        });

        let class_names = match &config.detector_labels_path {
            Some(path) => load_label_file(path)?,
            None => Self::class_names_from_metadata(&session).unwrap_or_else(|| {
                log::info!("Detector carries no label metadata, using COCO class names");
                COCO_CLASSES.iter().map(|s| s.to_string()).collect()
            }),
        };

        log::info!(
            "{}Detector loaded: {} ({} classes, input {}x{}, md5 {})",
            symbols::model_loaded(),
            model_info.model_path,
            class_names.len(),
            input_size,
            input_size,
            model_info.model_checksum
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            input_size,
            class_names,
            model_info,
        })
    }

    fn class_names_from_metadata(session: &Session) -> Option<Vec<String>> {
        let metadata = session.metadata().ok()?;
        let raw = metadata.custom("names").ok().flatten()?;
        match parse_names_metadata(&raw) {
            Ok(names) => Some(names),
            Err(e) => {
                log::warn!("{}Ignoring detector label metadata: {e}", symbols::warning());
                None
            }
        }
    }
}

impl InstanceSegmenter for YoloSegmenter {
    fn segment(&self, image: &RgbImage, confidence: f32, iou: f32) -> Result<SegmentationResult> {
        let (orig_width, orig_height) = image.dimensions();
        let (input_tensor, letterbox) = preprocess_letterbox(image, self.input_size)?;

        let input_value = Value::from_array(input_tensor)
            .map_err(|e| anyhow!("Failed to create input value: {}", e))?;

        let inference_start = Instant::now();
        let (predictions, prototypes) = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow!("Detector session lock poisoned"))?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => &input_value])
                .map_err(|e| anyhow!("Failed to run detector inference: {}", e))?;
            let predictions = outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| anyhow!("Failed to extract prediction array: {}", e))?
                .to_owned();
            let prototypes = outputs[1]
                .try_extract_array::<f32>()
                .map_err(|e| anyhow!("Failed to extract prototype array: {}", e))?
                .to_owned();
            (predictions, prototypes)
        };
        log::debug!(
            "Detector inference completed in {:.1} ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        let instances = decode_outputs(
            &predictions,
            &prototypes,
            &letterbox,
            (orig_width, orig_height),
            confidence,
            iou,
        )?;

        Ok(SegmentationResult { instances })
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }
}
