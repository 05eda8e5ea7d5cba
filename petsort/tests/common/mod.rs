#![allow(dead_code)]

use anyhow::{anyhow, Result};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array2;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use petsort::brand::{BrandClassifier, DEFAULT_BRAND_THRESHOLD};
use petsort::classifier::{ClassScore, Classifier};
use petsort::config::PipelineConfig;
use petsort::detection::{
    BoundingBox, InstanceSegmenter, SegmentationResult, SegmentedInstance, COCO_CLASSES,
};
use petsort::material::material_labels;
use petsort::pipeline::ModelContext;

pub const BOTTLE: usize = 39;
pub const PERSON: usize = 0;

/// Detector that returns the same instances for every image
pub struct StubSegmenter {
    pub instances: Vec<SegmentedInstance>,
    pub calls: AtomicUsize,
    class_names: Vec<String>,
}

impl StubSegmenter {
    pub fn new(instances: Vec<SegmentedInstance>) -> Self {
        Self {
            instances,
            calls: AtomicUsize::new(0),
            class_names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl InstanceSegmenter for StubSegmenter {
    fn segment(&self, _image: &RgbImage, _confidence: f32, _iou: f32) -> Result<SegmentationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SegmentationResult {
            instances: self.instances.clone(),
        })
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

/// Classifier that returns fixed probabilities, or fails when `fail` is set
pub struct FixedClassifier {
    pub labels: Vec<String>,
    pub probs: Vec<f32>,
    pub fail: bool,
}

impl FixedClassifier {
    pub fn new(labels: Vec<String>, probs: Vec<f32>) -> Self {
        Self {
            labels,
            probs,
            fail: false,
        }
    }
}

impl Classifier for FixedClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&self, _image: &RgbImage) -> Result<Vec<ClassScore>> {
        if self.fail {
            return Err(anyhow!("stub classifier failure"));
        }
        Ok(self
            .labels
            .iter()
            .zip(&self.probs)
            .map(|(label, probability)| ClassScore {
                label: label.clone(),
                probability: *probability,
            })
            .collect())
    }
}

/// Instance with a mask covering the whole `width` x `height` image
pub fn instance(class_id: usize, bbox: BoundingBox, width: usize, height: usize) -> SegmentedInstance {
    SegmentedInstance {
        class_id,
        confidence: 0.9,
        bbox,
        mask: Array2::from_elem((height, width), 1.0),
    }
}

pub fn material_model(pet_probability: f32) -> Arc<dyn Classifier> {
    Arc::new(FixedClassifier::new(
        material_labels(1).unwrap(),
        vec![1.0 - pet_probability, pet_probability],
    ))
}

pub fn brand_model(probs: Vec<f32>) -> BrandClassifier {
    let labels = vec!["BrandX".to_string(), "BrandY".to_string()];
    BrandClassifier::new(
        Arc::new(FixedClassifier::new(labels, probs)),
        DEFAULT_BRAND_THRESHOLD,
    )
}

pub fn context(
    segmenter: Arc<StubSegmenter>,
    material: Arc<dyn Classifier>,
    brand: BrandClassifier,
) -> ModelContext {
    ModelContext::from_parts(PipelineConfig::default(), segmenter, material, brand).unwrap()
}

pub fn gray_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([200, 200, 200]))
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}
