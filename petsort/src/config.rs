//! Configuration layer separating CLI arguments from the pipeline's runtime settings.
//!
//! - `GlobalArgs` / `ServeCommand` / `PredictCommand`: clap argument structs
//! - `PipelineOverrides`: optional per-flag overrides shared by both commands
//! - `PipelineConfig`: every tunable constant of the pipeline, with defaults
//!
//! Precedence, lowest first: built-in defaults, a TOML file passed with
//! `--config`, then individual CLI flags.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser};
use clap_verbosity_flag::Verbosity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::brand::DEFAULT_BRAND_THRESHOLD;
use crate::cropper::DEFAULT_PADDING;
use crate::material::DEFAULT_PET_THRESHOLD;

/// Parse probability value (must be between 0.0 and 1.0)
pub fn parse_probability(s: &str) -> Result<f32, String> {
    let val = s
        .parse::<f32>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(0.0..=1.0).contains(&val) {
        return Err(format!("Must be between 0.0 and 1.0, got {val}"));
    }
    Ok(val)
}

/// Parse an inference device name
pub fn parse_device(s: &str) -> Result<String, String> {
    match s.to_lowercase().as_str() {
        d @ ("auto" | "cpu" | "coreml") => Ok(d.to_string()),
        other => Err(format!(
            "Unknown device '{other}', expected one of: auto, cpu, coreml"
        )),
    }
}

/// Arguments that apply to every subcommand
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Verbosity level (-q/--quiet, -v/-vv/-vvv for info/debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity,

    /// TOML file with pipeline settings (thresholds, model paths, ...)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Device to use for inference (auto, cpu, coreml)
    #[arg(long, global = true, value_parser = parse_device)]
    pub device: Option<String>,

    /// Disable colored output (also respects NO_COLOR and PETSORT_NO_COLOR env vars)
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Per-flag overrides of `PipelineConfig`. Unset flags keep the file/default value.
#[derive(Args, Debug, Clone, Default)]
pub struct PipelineOverrides {
    /// PET probability at or above which an object is labelled PET
    #[arg(long, value_parser = parse_probability)]
    pub pet_threshold: Option<f32>,

    /// Brand confidence below which the generic fallback label is used
    #[arg(long, value_parser = parse_probability)]
    pub brand_threshold: Option<f32>,

    /// Pixels added around each bounding box before cropping
    #[arg(long)]
    pub crop_padding: Option<u32>,

    /// Detector confidence threshold
    #[arg(long, value_parser = parse_probability)]
    pub confidence: Option<f32>,

    /// Detector NMS IoU threshold
    #[arg(long, value_parser = parse_probability)]
    pub iou_threshold: Option<f32>,

    /// Square edge length fed to the material and brand classifiers
    #[arg(long)]
    pub classifier_size: Option<u32>,

    /// Output index of the PET class in the material classifier
    #[arg(long)]
    pub pet_class_index: Option<usize>,

    /// Detector class name to process (e.g. "bottle")
    #[arg(long)]
    pub target_class: Option<String>,

    /// Path to the YOLOv8-seg ONNX model
    #[arg(long)]
    pub detector_model: Option<PathBuf>,

    /// Optional label file for the detector (one class name per line)
    #[arg(long)]
    pub detector_labels: Option<PathBuf>,

    /// Path to the PET vs non-PET ONNX classifier
    #[arg(long)]
    pub material_model: Option<PathBuf>,

    /// Path to the brand ONNX classifier
    #[arg(long)]
    pub brand_model: Option<PathBuf>,

    /// Brand label file (one brand per line, index-aligned with the model)
    #[arg(long)]
    pub brand_labels: Option<PathBuf>,
}

/// CLI command for the HTTP service
#[derive(Parser, Debug, Clone)]
pub struct ServeCommand {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub bind: String,

    /// Maximum accepted upload size in megabytes
    #[arg(long, default_value = "20")]
    pub max_upload_mb: usize,

    #[command(flatten)]
    pub pipeline: PipelineOverrides,
}

/// CLI command for offline prediction over local files
#[derive(Parser, Debug, Clone)]
pub struct PredictCommand {
    /// Path(s) to input images or directories. Supports glob patterns like *.jpg
    #[arg(value_name = "IMAGES_OR_DIRS", required = true)]
    pub sources: Vec<String>,

    /// Write the JSON report to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Warn and skip unsupported or missing inputs instead of failing
    #[arg(long)]
    pub permissive: bool,

    #[command(flatten)]
    pub pipeline: PipelineOverrides,
}

/// Height-ratio boundaries of the size heuristic. Comparisons are strict `<`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SizeThresholds {
    pub small: f32,
    pub medium: f32,
    pub large: f32,
}

impl Default for SizeThresholds {
    fn default() -> Self {
        Self {
            small: 0.35,
            medium: 0.55,
            large: 0.75,
        }
    }
}

/// Runtime configuration of the inference pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub pet_threshold: f32,
    pub brand_threshold: f32,
    pub crop_padding: u32,
    pub size_thresholds: SizeThresholds,
    pub detection_confidence: f32,
    pub detection_iou: f32,
    pub classifier_input_size: u32,
    /// Index of "PET" in the material classifier output. Fixed by how the
    /// model was trained; it cannot be read from the model itself.
    pub pet_class_index: usize,
    pub target_class: String,
    pub detector_model_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector_labels_path: Option<PathBuf>,
    pub material_model_path: PathBuf,
    pub brand_model_path: PathBuf,
    pub brand_labels_path: PathBuf,
    pub device: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pet_threshold: DEFAULT_PET_THRESHOLD,
            brand_threshold: DEFAULT_BRAND_THRESHOLD,
            crop_padding: DEFAULT_PADDING,
            size_thresholds: SizeThresholds::default(),
            detection_confidence: 0.25,
            detection_iou: 0.5,
            classifier_input_size: 224,
            pet_class_index: 1,
            target_class: "bottle".to_string(),
            detector_model_path: PathBuf::from("models/yolov8n-seg.onnx"),
            detector_labels_path: None,
            material_model_path: PathBuf::from("models/efficientnet_pet_vs_nonpet.onnx"),
            brand_model_path: PathBuf::from("models/efficientnet_brands.onnx"),
            brand_labels_path: PathBuf::from("models/brand_classes.txt"),
            device: "auto".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow!("Invalid pipeline configuration: {e}"))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Build the effective configuration from defaults, an optional file and CLI flags
    pub fn resolve(global: &GlobalArgs, overrides: &PipelineOverrides) -> Result<Self> {
        let mut config = match &global.config {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        if let Some(device) = &global.device {
            config.device = device.clone();
        }
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, o: &PipelineOverrides) {
        if let Some(v) = o.pet_threshold {
            self.pet_threshold = v;
        }
        if let Some(v) = o.brand_threshold {
            self.brand_threshold = v;
        }
        if let Some(v) = o.crop_padding {
            self.crop_padding = v;
        }
        if let Some(v) = o.confidence {
            self.detection_confidence = v;
        }
        if let Some(v) = o.iou_threshold {
            self.detection_iou = v;
        }
        if let Some(v) = o.classifier_size {
            self.classifier_input_size = v;
        }
        if let Some(v) = o.pet_class_index {
            self.pet_class_index = v;
        }
        if let Some(v) = &o.target_class {
            self.target_class = v.clone();
        }
        if let Some(v) = &o.detector_model {
            self.detector_model_path = v.clone();
        }
        if let Some(v) = &o.detector_labels {
            self.detector_labels_path = Some(v.clone());
        }
        if let Some(v) = &o.material_model {
            self.material_model_path = v.clone();
        }
        if let Some(v) = &o.brand_model {
            self.brand_model_path = v.clone();
        }
        if let Some(v) = &o.brand_labels {
            self.brand_labels_path = v.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("pet_threshold", self.pet_threshold),
            ("brand_threshold", self.brand_threshold),
            ("detection_confidence", self.detection_confidence),
            ("detection_iou", self.detection_iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{name} must be between 0.0 and 1.0, got {value}"));
            }
        }

        let s = &self.size_thresholds;
        if !(0.0 < s.small && s.small < s.medium && s.medium < s.large) {
            return Err(anyhow!(
                "size_thresholds must be positive and strictly increasing, got {} / {} / {}",
                s.small,
                s.medium,
                s.large
            ));
        }

        if self.classifier_input_size == 0 {
            return Err(anyhow!("classifier_input_size must be greater than zero"));
        }
        if self.target_class.trim().is_empty() {
            return Err(anyhow!("target_class must not be empty"));
        }
        parse_device(&self.device).map_err(|e| anyhow!(e))?;

        Ok(())
    }
}

/// Settings of the HTTP layer
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn from_args(cmd: &ServeCommand) -> Self {
        Self {
            bind_addr: cmd.bind.clone(),
            max_upload_bytes: cmd.max_upload_mb.saturating_mul(1024 * 1024),
        }
    }
}
