//! Detection and segmentation data types shared by the detector and the pipeline.
//!
//! The detector itself is behind the `InstanceSegmenter` trait; `yolo_seg`
//! provides the ONNX implementation and tests provide stubs.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ndarray::Array2;
use serde::Serialize;
use std::path::Path;

/// Axis-aligned box in source-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// One detected object with its segmentation mask.
///
/// `mask` is row-major `[height, width]` with values in `[0, 1]`. It may be at
/// a lower resolution than the source image; consumers resize it.
#[derive(Debug, Clone)]
pub struct SegmentedInstance {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub mask: Array2<f32>,
}

/// Everything the detector returned for one image, in detection order
#[derive(Debug, Clone, Default)]
pub struct SegmentationResult {
    pub instances: Vec<SegmentedInstance>,
}

impl SegmentationResult {
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances of one class, keeping detection order
    pub fn of_class(&self, class_id: usize) -> impl Iterator<Item = &SegmentedInstance> {
        self.instances
            .iter()
            .filter(move |instance| instance.class_id == class_id)
    }
}

/// Object detector + instance segmenter.
///
/// Implementations must be safe to call from several requests at once;
/// runtimes that need exclusive access serialize internally.
pub trait InstanceSegmenter: Send + Sync {
    fn segment(&self, image: &RgbImage, confidence: f32, iou: f32) -> Result<SegmentationResult>;

    /// Class names indexed by class id
    fn class_names(&self) -> &[String];
}

/// Look up a class id by exact name in a detector label table
pub fn resolve_class_id(class_names: &[String], target: &str) -> Result<usize> {
    class_names
        .iter()
        .position(|name| name == target)
        .ok_or_else(|| {
            anyhow!(
                "Target class '{target}' is not in the detector's label table ({} classes)",
                class_names.len()
            )
        })
}

/// Read a label file: one name per line, blank lines ignored
pub fn load_label_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read label file {}", path.display()))?;
    let labels: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return Err(anyhow!("Label file {} is empty", path.display()));
    }
    Ok(labels)
}

/// Parse the `names` metadata entry written by ultralytics ONNX exports,
/// e.g. `{0: 'person', 1: 'bicycle'}`
pub fn parse_names_metadata(raw: &str) -> Result<Vec<String>> {
    let body = raw
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| anyhow!("names metadata is not a mapping: {raw}"))?;

    let mut entries: Vec<(usize, String)> = Vec::new();
    for part in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (idx, name) = part
            .split_once(':')
            .ok_or_else(|| anyhow!("Malformed names entry: '{part}'"))?;
        let idx: usize = idx
            .trim()
            .parse()
            .map_err(|_| anyhow!("Malformed class index in names entry: '{part}'"))?;
        let name = name.trim().trim_matches(|c| c == '\'' || c == '"');
        entries.push((idx, name.to_string()));
    }

    entries.sort_by_key(|(idx, _)| *idx);
    for (expected, (idx, _)) in entries.iter().enumerate() {
        if *idx != expected {
            return Err(anyhow!("names metadata is missing class index {expected}"));
        }
    }
    if entries.is_empty() {
        return Err(anyhow!("names metadata is empty"));
    }

    Ok(entries.into_iter().map(|(_, name)| name).collect())
}

/// COCO-80 names in YOLO order, used when a model carries no label table
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_resolve_class_id() {
        let names: Vec<String> = COCO_CLASSES.iter().map(|s| s.to_string()).collect();
        assert_eq!(resolve_class_id(&names, "bottle").unwrap(), 39);
        assert!(resolve_class_id(&names, "jerrycan").is_err());
    }

    #[test]
    fn test_parse_names_metadata() {
        let names = parse_names_metadata("{0: 'person', 1: 'bicycle', 2: \"traffic light\"}")
            .unwrap();
        assert_eq!(names, vec!["person", "bicycle", "traffic light"]);
    }

    #[test]
    fn test_parse_names_metadata_rejects_gaps() {
        assert!(parse_names_metadata("{0: 'person', 2: 'car'}").is_err());
        assert!(parse_names_metadata("person, car").is_err());
    }

    #[test]
    fn test_load_label_file_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "bottle\n\n  can \n").unwrap();
        assert_eq!(load_label_file(&path).unwrap(), vec!["bottle", "can"]);
    }

    #[test]
    fn test_of_class_keeps_order() {
        let mask = Array2::<f32>::zeros((2, 2));
        let instance = |class_id, confidence| SegmentedInstance {
            class_id,
            confidence,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            mask: mask.clone(),
        };
        let result = SegmentationResult {
            instances: vec![instance(39, 0.4), instance(0, 0.9), instance(39, 0.8)],
        };
        let kept: Vec<f32> = result.of_class(39).map(|i| i.confidence).collect();
        assert_eq!(kept, vec![0.4, 0.8]);
    }
}
