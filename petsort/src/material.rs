//! PET vs non-PET material classification

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;

use crate::classifier::Classifier;

pub const DEFAULT_PET_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Material {
    #[serde(rename = "PET")]
    Pet,
    #[serde(rename = "NON-PET")]
    NonPet,
}

impl Material {
    pub fn as_str(&self) -> &'static str {
        match self {
            Material::Pet => "PET",
            Material::NonPet => "NON-PET",
        }
    }
}

impl std::fmt::Display for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaterialPrediction {
    pub label: Material,
    /// Probability of the PET class, whichever label was chosen
    pub confidence: f32,
}

/// Labels for a two-class material model with PET at `pet_index`
pub fn material_labels(pet_index: usize) -> Result<Vec<String>> {
    if pet_index > 1 {
        return Err(anyhow!(
            "PET class index {pet_index} is out of range for a two-class material model"
        ));
    }
    let mut labels = vec![Material::NonPet.to_string(); 2];
    labels[pet_index] = Material::Pet.to_string();
    Ok(labels)
}

pub struct MaterialClassifier {
    classifier: Arc<dyn Classifier>,
    pet_index: usize,
    threshold: f32,
}

impl MaterialClassifier {
    /// `pet_index` comes from how the model was trained. It is checked
    /// against the classifier's class count here, at startup.
    pub fn new(classifier: Arc<dyn Classifier>, pet_index: usize, threshold: f32) -> Result<Self> {
        let class_count = classifier.labels().len();
        if class_count != 2 {
            return Err(anyhow!(
                "Material classifier must have exactly 2 classes, found {class_count}"
            ));
        }
        if pet_index >= class_count {
            return Err(anyhow!(
                "PET class index {pet_index} is out of range for {class_count} classes"
            ));
        }
        Ok(Self {
            classifier,
            pet_index,
            threshold,
        })
    }

    pub fn classify_material(&self, crop: &RgbImage) -> Result<MaterialPrediction> {
        let scores = self.classifier.classify(crop)?;
        let confidence = scores
            .get(self.pet_index)
            .map(|s| s.probability)
            .ok_or_else(|| anyhow!("Material classifier returned {} scores", scores.len()))?;

        let label = if confidence >= self.threshold {
            Material::Pet
        } else {
            Material::NonPet
        };
        Ok(MaterialPrediction { label, confidence })
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

    fn adapter(pet_prob: f32) -> MaterialClassifier {
        let classifier = FixedClassifier {
            labels: material_labels(1).unwrap(),
            probs: vec![1.0 - pet_prob, pet_prob],
        };
        MaterialClassifier::new(Arc::new(classifier), 1, DEFAULT_PET_THRESHOLD).unwrap()
    }

    #[test]
    fn test_material_labels_place_pet_at_index() {
        assert_eq!(material_labels(1).unwrap(), vec!["NON-PET", "PET"]);
        assert_eq!(material_labels(0).unwrap(), vec!["PET", "NON-PET"]);
        assert!(material_labels(2).is_err());
    }

    #[test]
    fn test_confidence_is_pet_probability() {
        let crop = RgbImage::new(4, 4);
        let pet = adapter(0.9).classify_material(&crop).unwrap();
        assert_eq!(pet.label, Material::Pet);
        assert!((pet.confidence - 0.9).abs() < 1e-6);

        let non_pet = adapter(0.2).classify_material(&crop).unwrap();
        assert_eq!(non_pet.label, Material::NonPet);
        assert!((non_pet.confidence - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let crop = RgbImage::new(4, 4);
        let at = adapter(0.5).classify_material(&crop).unwrap();
        assert_eq!(at.label, Material::Pet);
    }

    #[test]
    fn test_class_count_mismatch_rejected() {
        let classifier = FixedClassifier {
            labels: vec!["a".into(), "b".into(), "c".into()],
            probs: vec![0.3, 0.3, 0.4],
        };
        assert!(MaterialClassifier::new(Arc::new(classifier), 1, 0.5).is_err());
    }

    #[test]
    fn test_serializes_with_wire_labels() {
        assert_eq!(serde_json::to_string(&Material::NonPet).unwrap(), "\"NON-PET\"");
    }
}
