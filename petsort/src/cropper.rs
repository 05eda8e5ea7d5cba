//! Mask-guided cropping of a single detected object.

use image::RgbImage;
use ndarray::Array2;
use serde::Serialize;

use crate::detection::BoundingBox;

pub const DEFAULT_PADDING: u32 = 8;

/// Integer box actually used for a crop, after padding and clamping.
/// Always within `[0, W) x [0, H)` with `x1 < x2` and `y1 < y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "[u32; 4]")]
pub struct PixelBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

impl From<PixelBox> for [u32; 4] {
    fn from(b: PixelBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One object isolated from its background
#[derive(Debug, Clone)]
pub struct Crop {
    pub image: RgbImage,
    pub bbox: PixelBox,
}

/// Nearest-neighbour resize of a mask to `(width, height)`.
/// Source index is `floor(dst * src_len / dst_len)`.
pub fn resize_mask_nearest(mask: &Array2<f32>, width: u32, height: u32) -> Array2<f32> {
    let (src_h, src_w) = mask.dim();
    let (dst_w, dst_h) = (width as usize, height as usize);
    if src_h == 0 || src_w == 0 {
        return Array2::zeros((dst_h, dst_w));
    }
    if (src_h, src_w) == (dst_h, dst_w) {
        return mask.clone();
    }

    Array2::from_shape_fn((dst_h, dst_w), |(y, x)| {
        let sy = (y * src_h / dst_h).min(src_h - 1);
        let sx = (x * src_w / dst_w).min(src_w - 1);
        mask[[sy, sx]]
    })
}

/// Pad `bbox` by `padding` pixels and clamp to the image. Coordinates are
/// truncated to integers first. Returns `None` for an empty region.
pub fn padded_box(bbox: &BoundingBox, padding: u32, width: u32, height: u32) -> Option<PixelBox> {
    let pad = padding as i64;
    let x1 = (bbox.x1 as i64 - pad).max(0);
    let y1 = (bbox.y1 as i64 - pad).max(0);
    let x2 = (bbox.x2 as i64 + pad).min(width as i64);
    let y2 = (bbox.y2 as i64 + pad).min(height as i64);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(PixelBox {
        x1: x1 as u32,
        y1: y1 as u32,
        x2: x2 as u32,
        y2: y2 as u32,
    })
}

/// Crop one object: padded box, with every pixel outside the mask set to black.
///
/// The mask is resized to the image first if needed and binarized at 0.5.
/// Returns `None` when the clamped region has zero area; callers skip the object.
pub fn crop_object(
    image: &RgbImage,
    mask: &Array2<f32>,
    bbox: &BoundingBox,
    padding: u32,
) -> Option<Crop> {
    let (width, height) = image.dimensions();
    let region = padded_box(bbox, padding, width, height)?;
    let full_mask = resize_mask_nearest(mask, width, height);

    let crop = RgbImage::from_fn(region.width(), region.height(), |x, y| {
        let (ix, iy) = (region.x1 + x, region.y1 + y);
        if full_mask[[iy as usize, ix as usize]] > 0.5 {
            *image.get_pixel(ix, iy)
        } else {
            image::Rgb([0, 0, 0])
        }
    });

    Some(Crop {
        image: crop,
        bbox: region,
    })
}
