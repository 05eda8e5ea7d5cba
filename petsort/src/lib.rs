//! Bottle detection and classification.
//!
//! A YOLOv8-seg detector finds bottles; each one is cropped along its mask and
//! labelled with material (PET or not), brand, color and an estimated size.

pub mod analytics;
pub mod brand;
pub mod classifier;
pub mod color;
pub mod color_utils;
pub mod config;
pub mod cropper;
pub mod detection;
pub mod image_input;
pub mod material;
pub mod onnx_session;
pub mod pipeline;
pub mod progress;
pub mod server;
pub mod size;
pub mod yolo_seg;
