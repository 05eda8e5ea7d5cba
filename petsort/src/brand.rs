//! Brand classification with a confidence-gated generic fallback.
//!
//! The brand model is optional: if it or its label file fails to load, the
//! adapter answers every request with `UNAVAILABLE_LABEL` instead of failing.

use anyhow::Result;
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;

use crate::classifier::{top_class, Classifier, OnnxClassifier};
use crate::color_utils::symbols;
use crate::config::PipelineConfig;
use crate::detection::load_label_file;

pub const DEFAULT_BRAND_THRESHOLD: f32 = 0.65;
pub const UNAVAILABLE_LABEL: &str = "Unknown (No Model)";

/// Label reported instead of the arg-max class when it is not confident enough
pub fn fallback_label(confidence: f32) -> String {
    format!("Generic/Other (Low Conf: {confidence:.2})")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrandPrediction {
    pub label: String,
    pub confidence: f32,
}

pub struct BrandClassifier {
    classifier: Option<Arc<dyn Classifier>>,
    threshold: f32,
}

impl BrandClassifier {
    pub fn new(classifier: Arc<dyn Classifier>, threshold: f32) -> Self {
        Self {
            classifier: Some(classifier),
            threshold,
        }
    }

    /// Degraded adapter used when no brand model could be loaded
    pub fn unavailable(threshold: f32) -> Self {
        Self {
            classifier: None,
            threshold,
        }
    }

    pub fn is_available(&self) -> bool {
        self.classifier
            .as_ref()
            .is_some_and(|c| !c.labels().is_empty())
    }

    pub fn classify_brand(&self, crop: &RgbImage) -> Result<BrandPrediction> {
        let classifier = match &self.classifier {
            Some(c) if !c.labels().is_empty() => c,
            _ => {
                return Ok(BrandPrediction {
                    label: UNAVAILABLE_LABEL.to_string(),
                    confidence: 0.0,
                })
            }
        };

        let scores = classifier.classify(crop)?;
        let Some((_, best)) = top_class(&scores) else {
            return Ok(BrandPrediction {
                label: UNAVAILABLE_LABEL.to_string(),
                confidence: 0.0,
            });
        };

        let label = if best.probability < self.threshold {
            fallback_label(best.probability)
        } else {
            best.label.clone()
        };

        Ok(BrandPrediction {
            label,
            confidence: best.probability,
        })
    }
}

/// Load the brand labels and model; any failure degrades to `unavailable`
pub fn load_brand_classifier(config: &PipelineConfig, device: &str) -> BrandClassifier {
    let load = || -> Result<OnnxClassifier> {
        let labels = load_label_file(&config.brand_labels_path)?;
        log::info!("Brand classes: {}", labels.join(", "));
        OnnxClassifier::load(
            "Brand",
            &config.brand_model_path,
            labels,
            config.classifier_input_size,
            device,
        )
    };

    match load() {
        Ok(classifier) => BrandClassifier::new(Arc::new(classifier), config.brand_threshold),
        Err(e) => {
            log::error!(
                "{}Brand classification unavailable: {e:#}",
                symbols::degraded()
            );
            BrandClassifier::unavailable(config.brand_threshold)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassScore;

    struct FixedClassifier {
        labels: Vec<String>,
        probs: Vec<f32>,
    }

    impl Classifier for FixedClassifier {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn classify(&self, _image: &RgbImage) -> Result<Vec<ClassScore>> {
            Ok(self
                .labels
                .iter()
                .zip(&self.probs)
                .map(|(l, p)| ClassScore {
                    label: l.clone(),
                    probability: *p,
                })
                .collect())
        }
    }

    fn adapter(probs: Vec<f32>) -> BrandClassifier {
        let labels = vec!["BrandX".to_string(), "BrandY".to_string(), "BrandZ".to_string()];
        BrandClassifier::new(
            Arc::new(FixedClassifier { labels, probs }),
            DEFAULT_BRAND_THRESHOLD,
        )
    }

    #[test]
    fn test_confident_prediction_uses_class_name() {
        let prediction = adapter(vec![0.1, 0.8, 0.1])
            .classify_brand(&RgbImage::new(2, 2))
            .unwrap();
        assert_eq!(prediction.label, "BrandY");
        assert!((prediction.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_low_confidence_falls_back_to_generic() {
        let prediction = adapter(vec![0.5, 0.3, 0.2])
            .classify_brand(&RgbImage::new(2, 2))
            .unwrap();
        assert_eq!(prediction.label, "Generic/Other (Low Conf: 0.50)");
        assert!((prediction.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_boundary_is_confident() {
        let prediction = adapter(vec![0.65, 0.25, 0.10])
            .classify_brand(&RgbImage::new(2, 2))
            .unwrap();
        assert_eq!(prediction.label, "BrandX");
    }

    #[test]
    fn test_unavailable_adapter_degrades() {
        let brand = BrandClassifier::unavailable(DEFAULT_BRAND_THRESHOLD);
        assert!(!brand.is_available());
        let prediction = brand.classify_brand(&RgbImage::new(2, 2)).unwrap();
        assert_eq!(prediction.label, UNAVAILABLE_LABEL);
        assert_eq!(prediction.confidence, 0.0);
    }

    #[test]
    fn test_empty_label_set_degrades() {
        let brand = BrandClassifier::new(
            Arc::new(FixedClassifier {
                labels: vec![],
                probs: vec![],
            }),
            DEFAULT_BRAND_THRESHOLD,
        );
        assert!(!brand.is_available());
        let prediction = brand.classify_brand(&RgbImage::new(2, 2)).unwrap();
        assert_eq!(prediction.label, UNAVAILABLE_LABEL);
    }

    #[test]
    fn test_missing_files_degrade_instead_of_failing() {
        let config = PipelineConfig {
            brand_labels_path: "/nonexistent/brand_classes.txt".into(),
            brand_model_path: "/nonexistent/brands.onnx".into(),
            ..Default::default()
        };
        let brand = load_brand_classifier(&config, "cpu");
        assert!(!brand.is_available());
    }
}
