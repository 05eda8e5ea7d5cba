//! Image classifier seam shared by the material and brand adapters.
//!
//! `Classifier` is the only interface the pipeline depends on, so swapping
//! architectures means adding an implementation here. `OnnxClassifier` runs
//! an EfficientNet-style ONNX model on ImageNet-normalized input.

use anyhow::{anyhow, Result};
use image::RgbImage;
use ndarray::Array;
use ort::{session::Session, value::Value};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

use crate::color_utils::symbols;
use crate::onnx_session::{create_onnx_session, declared_class_count, ModelInfo, SessionConfig};

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassScore {
    pub label: String,
    pub probability: f32,
}

pub trait Classifier: Send + Sync {
    /// Class labels, index-aligned with the model outputs
    fn labels(&self) -> &[String];

    /// Per-class probabilities (summing to 1) in label order
    fn classify(&self, image: &RgbImage) -> Result<Vec<ClassScore>>;
}

/// Arg-max entry. Ties resolve to the lowest index.
pub fn top_class(scores: &[ClassScore]) -> Option<(usize, &ClassScore)> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, &ClassScore)>, (i, score)| match best {
            Some((_, b)) if b.probability >= score.probability => best,
            _ => Some((i, score)),
        })
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Square resize (no letterbox) to `target_size`, NCHW, ImageNet-normalized
pub fn preprocess_image(img: &RgbImage, target_size: u32) -> Result<Array<f32, ndarray::IxDyn>> {
    let resized = image::imageops::resize(
        img,
        target_size,
        target_size,
        image::imageops::FilterType::Triangle,
    );

    let mut input_data = Vec::with_capacity((3 * target_size * target_size) as usize);
    for c in 0..3 {
        for pixel in resized.pixels() {
            let value = pixel[c] as f32 / 255.0;
            input_data.push((value - MEAN[c]) / STD[c]);
        }
    }

    let input = Array::from_shape_vec(
        ndarray::IxDyn(&[1, 3, target_size as usize, target_size as usize]),
        input_data,
    )?;
    Ok(input)
}

pub struct OnnxClassifier {
    name: String,
    session: Mutex<Session>,
    input_name: String,
    input_size: u32,
    labels: Vec<String>,
    pub model_info: ModelInfo,
}

impl OnnxClassifier {
    /// Load a classifier whose output classes are `labels`, in order.
    /// Fails if the model declares a different number of classes.
    pub fn load(
        name: &str,
        model_path: &Path,
        labels: Vec<String>,
        input_size: u32,
        device: &str,
    ) -> Result<Self> {
        let (session, model_info) = create_onnx_session(model_path, &SessionConfig { device })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow!("{name} model declares no inputs"))?;

        match declared_class_count(&session) {
            Some(n) if n != labels.len() => {
                return Err(anyhow!(
                    "{name} model declares {n} classes but {} labels were configured",
                    labels.len()
                ));
            }
            Some(_) => {}
            None => log::debug!("{name} model has a dynamic class axis, not validated"),
        }

        log::info!(
            "{}{name} classifier loaded: {} ({} classes, md5 {})",
            symbols::model_loaded(),
            model_info.model_path,
            labels.len(),
            model_info.model_checksum
        );

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            input_size,
            labels,
            model_info,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&self, image: &RgbImage) -> Result<Vec<ClassScore>> {
        let input_tensor = preprocess_image(image, self.input_size)?;
        let input_value = Value::from_array(input_tensor)
            .map_err(|e| anyhow!("Failed to create input value: {}", e))?;

        let logits: Vec<f32> = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow!("{} session lock poisoned", self.name))?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => &input_value])
                .map_err(|e| anyhow!("Failed to run {} inference: {}", self.name, e))?;
            let output = outputs[0]
                .try_extract_array::<f32>()
                .map_err(|e| anyhow!("Failed to extract {} output: {}", self.name, e))?;
            output.iter().copied().collect()
        };

        if logits.len() != self.labels.len() {
            return Err(anyhow!(
                "{} produced {} scores for {} labels",
                self.name,
                logits.len(),
                self.labels.len()
            ));
        }

        Ok(softmax(&logits)
            .into_iter()
            .zip(&self.labels)
            .map(|(probability, label)| ClassScore {
                label: label.clone(),
                probability,
            })
            .collect())
    }
}
