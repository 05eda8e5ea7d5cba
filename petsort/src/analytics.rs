//! Summary analytics over classified bottles, per image and per batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::cropper::PixelBox;
use crate::material::Material;
use crate::pipeline::{ObjectRecord, PredictionResponse};

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Midpoint in grams of a weight range such as `"18-25g"`; a single number is
/// its own midpoint. Anything without digits counts as 0.
pub fn parse_weight_midpoint(weight: &str) -> u32 {
    let digits_at = |s: &str| -> Option<(f64, usize)> {
        let len = s.bytes().take_while(u8::is_ascii_digit).count();
        s[..len].parse::<f64>().ok().map(|v| (v, len))
    };

    let Some(start) = weight.find(|c: char| c.is_ascii_digit()) else {
        return 0;
    };
    let Some((first, len)) = digits_at(&weight[start..]) else {
        return 0;
    };

    let mut rest = &weight[start + len..];
    if let Some(stripped) = rest.strip_prefix('-') {
        rest = stripped;
    }
    let second = digits_at(rest).map_or(first, |(v, _)| v);

    ((first + second) / 2.0).round() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityGrade {
    A,
    B,
    C,
}

impl QualityGrade {
    pub fn from_purity(purity: f64) -> Self {
        if purity > 0.8 {
            QualityGrade::A
        } else if purity > 0.6 {
            QualityGrade::B
        } else {
            QualityGrade::C
        }
    }
}

fn purity_ratio(pet: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        pet as f64 / total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageAnalytics {
    pub total_bottles: usize,
    pub pet_bottles: usize,
    pub non_pet_bottles: usize,
    pub pet_purity_percent: f64,
    pub total_weight_kg: f64,
    pub quality_grade: QualityGrade,
}

impl ImageAnalytics {
    pub fn from_records(records: &[ObjectRecord]) -> Self {
        let total = records.len();
        let pet = records
            .iter()
            .filter(|r| r.material == Material::Pet)
            .count();
        let grams: u32 = records
            .iter()
            .map(|r| parse_weight_midpoint(&r.weight_est))
            .sum();
        let purity = purity_ratio(pet, total);

        Self {
            total_bottles: total,
            pet_bottles: pet,
            non_pet_bottles: total - pet,
            pet_purity_percent: round2(purity * 100.0),
            total_weight_kg: round2(grams as f64 / 1000.0),
            quality_grade: QualityGrade::from_purity(purity),
        }
    }
}

/// Bounding box as fractions of the image width and height
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl NormalizedBox {
    pub fn from_pixels(bbox: &PixelBox, (width, height): (u32, u32)) -> Self {
        let (width, height) = (width.max(1) as f64, height.max(1) as f64);
        Self {
            x: bbox.x1 as f64 / width,
            y: bbox.y1 as f64 / height,
            w: bbox.width() as f64 / width,
            h: bbox.height() as f64 / height,
        }
    }
}

/// Per-bottle extras carried in batch reports next to the raw records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BottleSummary {
    pub object_id: usize,
    pub color_description: &'static str,
    pub bbox_norm: NormalizedBox,
}

impl BottleSummary {
    pub fn from_record(record: &ObjectRecord, dimensions: (u32, u32)) -> Self {
        Self {
            object_id: record.object_id,
            color_description: record.color.category_description(),
            bbox_norm: NormalizedBox::from_pixels(&record.bbox, dimensions),
        }
    }
}

/// Result for one image of a batch
#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub image_id: String,
    pub filename: String,
    #[serde(flatten)]
    pub outcome: ImageOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ImageOutcome {
    Processed {
        width: u32,
        height: u32,
        timestamp: DateTime<Utc>,
        result: PredictionResponse,
        bottles: Vec<BottleSummary>,
        image_analytics: ImageAnalytics,
    },
    Failed {
        error: String,
    },
}

impl ImageReport {
    /// `index` is 0-based; image ids are 1-based
    pub fn processed(
        index: usize,
        filename: impl Into<String>,
        (width, height): (u32, u32),
        result: PredictionResponse,
    ) -> Self {
        let image_analytics = ImageAnalytics::from_records(&result.objects);
        let bottles = result
            .objects
            .iter()
            .map(|record| BottleSummary::from_record(record, (width, height)))
            .collect();
        Self {
            image_id: format!("img_{}", index + 1),
            filename: filename.into(),
            outcome: ImageOutcome::Processed {
                width,
                height,
                timestamp: Utc::now(),
                result,
                bottles,
                image_analytics,
            },
        }
    }

    pub fn failed(index: usize, filename: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            image_id: format!("img_{}", index + 1),
            filename: filename.into(),
            outcome: ImageOutcome::Failed {
                error: error.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchAnalytics {
    pub total_bottles: usize,
    pub pet_bottles: usize,
    pub non_pet_bottles: usize,
    pub pet_purity_percent: f64,
    pub total_weight_kg: f64,
    pub quality_grade: QualityGrade,
    pub color_distribution: BTreeMap<String, usize>,
    pub brand_distribution: BTreeMap<String, usize>,
    pub size_distribution: BTreeMap<String, usize>,
}

impl BatchAnalytics {
    /// Aggregate over every successfully processed image; failed images are skipped
    pub fn from_images(images: &[ImageReport]) -> Self {
        let mut total = 0;
        let mut pet = 0;
        let mut weight_kg = 0.0;
        let mut color_distribution = BTreeMap::new();
        let mut brand_distribution = BTreeMap::new();
        let mut size_distribution = BTreeMap::new();

        for image in images {
            let ImageOutcome::Processed {
                result,
                image_analytics,
                ..
            } = &image.outcome
            else {
                continue;
            };

            total += image_analytics.total_bottles;
            pet += image_analytics.pet_bottles;
            weight_kg += image_analytics.total_weight_kg;

            for record in &result.objects {
                *color_distribution
                    .entry(record.color.to_string())
                    .or_insert(0) += 1;
                *brand_distribution.entry(record.brand.clone()).or_insert(0) += 1;
                *size_distribution.entry(record.size.clone()).or_insert(0) += 1;
            }
        }

        let purity = purity_ratio(pet, total);
        Self {
            total_bottles: total,
            pet_bottles: pet,
            non_pet_bottles: total - pet,
            pet_purity_percent: round2(purity * 100.0),
            total_weight_kg: round2(weight_kg),
            quality_grade: QualityGrade::from_purity(purity),
            color_distribution,
            brand_distribution,
            size_distribution,
        }
    }
}

/// Everything returned for a multi-image request
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub total_images: usize,
    pub batch_analytics: BatchAnalytics,
    pub images: Vec<ImageReport>,
}

impl BatchReport {
    pub fn new(images: Vec<ImageReport>) -> Self {
        let created_at = Utc::now();
        Self {
            batch_id: format!("batch_{}", created_at.format("%Y%m%d%H%M%S%3f")),
            created_at,
            total_images: images.len(),
            batch_analytics: BatchAnalytics::from_images(&images),
            images,
        }
    }
}
