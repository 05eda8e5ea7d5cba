//! Getting images into the pipeline: decoding uploaded bytes for the server,
//! and collecting image files from paths, directories and globs for the CLI.

use anyhow::{anyhow, Result};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;

/// Request-level failure of a prediction
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    /// Missing, empty or undecodable image bytes
    #[error("Invalid Image")]
    InvalidImage,
    #[error("Inference failed: {0:#}")]
    Inference(#[from] anyhow::Error),
}

/// Decode an uploaded image (any format enabled in the `image` crate) to RGB8,
/// upright according to its EXIF orientation tag
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PredictError> {
    if bytes.is_empty() {
        return Err(PredictError::InvalidImage);
    }
    let reject = |e: &dyn std::fmt::Display| {
        log::debug!("Rejecting upload of {} bytes: {e}", bytes.len());
        PredictError::InvalidImage
    };

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| reject(&e))?
        .into_decoder()
        .map_err(|e| reject(&e))?;
    let orientation = decoder.orientation().unwrap_or_else(|e| {
        log::debug!("Ignoring unreadable orientation: {e}");
        Orientation::NoTransforms
    });
    let mut img = DynamicImage::from_decoder(decoder).map_err(|e| reject(&e))?;
    img.apply_orientation(orientation);
    Ok(img.to_rgb8())
}

/// How strictly `collect_images_from_sources` treats bad inputs
#[derive(Debug, Clone)]
pub struct ImageInputConfig {
    /// Fail on missing or unsupported files instead of warning
    pub strict_mode: bool,
    /// Fail when a glob pattern matches no images
    pub require_glob_matches: bool,
}

impl ImageInputConfig {
    pub fn strict() -> Self {
        Self {
            strict_mode: true,
            require_glob_matches: true,
        }
    }

    pub fn permissive() -> Self {
        Self {
            strict_mode: false,
            require_glob_matches: false,
        }
    }
}

/// Supports: jpg, jpeg, png, webp, bmp, tiff, tif
pub fn is_supported_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| {
            matches!(
                ext.as_str(),
                "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tiff" | "tif"
            )
        })
}

/// Image files directly inside `dir_path`, sorted
pub fn find_images_in_directory(dir_path: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();
        if path.is_file() && is_supported_image_file(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn looks_like_glob(source: &str) -> bool {
    source.contains(['*', '?', '['])
}

fn reject_or_warn(config: &ImageInputConfig, message: String) -> Result<()> {
    if config.strict_mode {
        Err(anyhow!(message))
    } else {
        log::warn!("{}{message}", symbols::warning());
        Ok(())
    }
}

/// Expand files, directories and glob patterns into a sorted, de-duplicated
/// list of image files
pub fn collect_images_from_sources(
    sources: &[String],
    config: &ImageInputConfig,
) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for source in sources {
        let path = Path::new(source);

        if path.is_file() {
            if is_supported_image_file(path) {
                images.push(path.to_path_buf());
            } else {
                reject_or_warn(
                    config,
                    format!("File is not a supported image format: {}", path.display()),
                )?;
            }
        } else if path.is_dir() {
            images.extend(find_images_in_directory(path)?);
        } else if !looks_like_glob(source) {
            reject_or_warn(config, format!("File does not exist: {source}"))?;
        } else {
            let paths = match glob::glob(source) {
                Ok(paths) => paths,
                Err(e) => {
                    reject_or_warn(config, format!("Invalid glob pattern {source}: {e}"))?;
                    continue;
                }
            };

            let before = images.len();
            for entry in paths {
                match entry {
                    Ok(p) if p.is_file() && is_supported_image_file(&p) => images.push(p),
                    Ok(_) => {}
                    Err(e) => log::warn!(
                        "{}Error reading path in glob {source}: {e}",
                        symbols::warning()
                    ),
                }
            }
            if images.len() == before && config.require_glob_matches {
                return Err(anyhow!("No image files found matching pattern: {source}"));
            }
        }
    }

    images.sort();
    images.dedup();

    if images.is_empty() && config.strict_mode {
        return Err(anyhow!("No image files found in the specified sources"));
    }

    Ok(images)
}
