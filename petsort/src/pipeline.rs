//! Per-request orchestration: detect once, then crop, classify and measure each
//! bottle in detection order.
//!
//! All loaded models live in a `ModelContext` built once at startup and shared
//! read-only between requests.

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::brand::{load_brand_classifier, BrandClassifier};
use crate::classifier::{Classifier, OnnxClassifier};
use crate::color::{classify_color, ColorLabel};
use crate::color_utils::symbols;
use crate::config::PipelineConfig;
use crate::cropper::{crop_object, PixelBox};
use crate::detection::{resolve_class_id, InstanceSegmenter};
use crate::image_input::{decode_image, PredictError};
use crate::material::{material_labels, Material, MaterialClassifier};
use crate::onnx_session::determine_optimal_device;
use crate::size::estimate_size;
use crate::yolo_seg::YoloSegmenter;

/// Round a probability to two decimals for the response.
///
/// Works on the exact binary value with ties to even, so `0.125` becomes
/// `0.12` while `0.375` becomes `0.38`.
pub fn round2(value: f32) -> f64 {
    let value = value as f64;
    format!("{value:.2}").parse().unwrap_or(value)
}

/// One classified bottle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectRecord {
    pub object_id: usize,
    pub bbox: PixelBox,
    pub material: Material,
    pub material_conf: f64,
    pub color: ColorLabel,
    pub size: String,
    pub weight_est: String,
    pub brand: String,
    pub brand_conf: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Success,
    NoBottleDetected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResponse {
    pub status: PredictionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    pub objects: Vec<ObjectRecord>,
}

impl PredictionResponse {
    pub fn no_bottle_detected() -> Self {
        Self {
            status: PredictionStatus::NoBottleDetected,
            count: None,
            objects: Vec::new(),
        }
    }

    pub fn success(objects: Vec<ObjectRecord>) -> Self {
        Self {
            status: PredictionStatus::Success,
            count: Some(objects.len()),
            objects,
        }
    }
}

/// Models and settings shared by every request
pub struct ModelContext {
    config: PipelineConfig,
    segmenter: Arc<dyn InstanceSegmenter>,
    target_class_id: usize,
    material: MaterialClassifier,
    brand: BrandClassifier,
}

impl ModelContext {
    /// Load every model named in `config`. Detector and material model
    /// failures are fatal; a missing brand model only degrades brand output.
    pub fn load(config: PipelineConfig) -> Result<Self> {
        let device_selection = determine_optimal_device(&config.device);
        log::info!(
            "{}Using device {} ({})",
            symbols::system_setup(),
            device_selection.device,
            device_selection.reason
        );
        let device = device_selection.device.as_str();

        let segmenter = YoloSegmenter::load(&config, device)
            .map_err(|e| anyhow!("Failed to load detector: {e:#}"))?;

        let material_model = OnnxClassifier::load(
            "Material",
            &config.material_model_path,
            material_labels(config.pet_class_index)?,
            config.classifier_input_size,
            device,
        )
        .map_err(|e| anyhow!("Failed to load material classifier: {e:#}"))?;

        let brand = load_brand_classifier(&config, device);

        Self::from_parts(config, Arc::new(segmenter), Arc::new(material_model), brand)
    }

    /// Assemble a context from already-loaded components
    pub fn from_parts(
        config: PipelineConfig,
        segmenter: Arc<dyn InstanceSegmenter>,
        material_model: Arc<dyn Classifier>,
        brand: BrandClassifier,
    ) -> Result<Self> {
        let target_class_id = resolve_class_id(segmenter.class_names(), &config.target_class)?;
        log::info!(
            "Target class '{}' resolved to id {target_class_id}",
            config.target_class
        );

        let material = MaterialClassifier::new(
            material_model,
            config.pet_class_index,
            config.pet_threshold,
        )?;

        Ok(Self {
            config,
            segmenter,
            target_class_id,
            material,
            brand,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn target_class_id(&self) -> usize {
        self.target_class_id
    }

    pub fn brand_available(&self) -> bool {
        self.brand.is_available()
    }

    /// Decode `bytes` and run the pipeline. Returns the image dimensions with
    /// the response.
    pub fn predict_bytes(
        &self,
        bytes: &[u8],
    ) -> Result<((u32, u32), PredictionResponse), PredictError> {
        let image = decode_image(bytes)?;
        let response = self.predict(&image)?;
        Ok((image.dimensions(), response))
    }

    /// Run the full pipeline on one decoded image
    pub fn predict(&self, image: &RgbImage) -> Result<PredictionResponse> {
        let start = Instant::now();
        let (width, height) = image.dimensions();
        log::debug!("{}Processing {width}x{height} image", symbols::detection_start());

        let detections = self.segmenter.segment(
            image,
            self.config.detection_confidence,
            self.config.detection_iou,
        )?;
        if detections.is_empty() {
            log::info!("No objects detected");
            return Ok(PredictionResponse::no_bottle_detected());
        }

        let mut candidates = detections.of_class(self.target_class_id).peekable();
        if candidates.peek().is_none() {
            log::info!(
                "{} object(s) detected, none of class '{}'",
                detections.instances.len(),
                self.config.target_class
            );
            return Ok(PredictionResponse::no_bottle_detected());
        }

        let mut objects = Vec::new();
        for (index, instance) in candidates.enumerate() {
            let Some(crop) =
                crop_object(image, &instance.mask, &instance.bbox, self.config.crop_padding)
            else {
                log::debug!(
                    "Dropping detection {index}: empty crop for box {:?}",
                    instance.bbox
                );
                continue;
            };

            let material = self.material.classify_material(&crop.image)?;
            let color = classify_color(&crop.image);
            let size = estimate_size(crop.bbox.height(), height, &self.config.size_thresholds);
            let brand = self.brand.classify_brand(&crop.image)?;

            let is_pet = material.label == Material::Pet;
            let record = ObjectRecord {
                object_id: objects.len() + 1,
                bbox: crop.bbox,
                material: material.label,
                material_conf: round2(material.confidence),
                color: if is_pet { color.label } else { ColorLabel::MixedOther },
                size: size.label.to_string(),
                weight_est: size.weight_est.to_string(),
                brand: brand.label,
                brand_conf: if is_pet { round2(brand.confidence) } else { 0.0 },
            };

            log::debug!(
                "Object {}: {} ({:.2}), color {} [{}], size {}, brand {} ({:.2})",
                record.object_id,
                record.material,
                material.confidence,
                record.color,
                color.description,
                record.size,
                record.brand,
                brand.confidence
            );
            objects.push(record);
        }

        log::info!(
            "{}Classified {} bottle(s) in {:.1} ms",
            symbols::completed_successfully(),
            objects.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(PredictionResponse::success(objects))
    }
}
