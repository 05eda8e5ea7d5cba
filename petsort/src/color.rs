//! Rule-based bottle color from HSV statistics of a crop.
//!
//! HSV follows the 8-bit OpenCV convention: hue in `[0, 180)`, saturation and
//! value in `[0, 255]`. All thresholds below are on that scale.

use image::RgbImage;
use once_cell::sync::Lazy;
use serde::Serialize;

const CENTER_START: f64 = 0.3;
const CENTER_END: f64 = 0.7;
const HUE_SATURATION_FLOOR: u8 = 20;
const MIN_HUE_PIXELS: usize = 10;

const CLEAR_MAX_SATURATION: f64 = 35.0;
const GREEN_HUE: std::ops::Range<f64> = 30.0..95.0;
const BLUE_HUE: std::ops::Range<f64> = 95.0..145.0;
const BROWN_MAX_VALUE: f64 = 160.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColorLabel {
    Clear,
    Green,
    Blue,
    Brown,
    #[serde(rename = "Mixed/Other")]
    MixedOther,
    Unknown,
}

impl ColorLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorLabel::Clear => "Clear",
            ColorLabel::Green => "Green",
            ColorLabel::Blue => "Blue",
            ColorLabel::Brown => "Brown",
            ColorLabel::MixedOther => "Mixed/Other",
            ColorLabel::Unknown => "Unknown",
        }
    }

    /// Recycling category shown next to a bottle in batch reports
    pub fn category_description(&self) -> &'static str {
        match self {
            ColorLabel::Clear => "High Value PET",
            ColorLabel::Green => "Soft Drink Bottle",
            ColorLabel::Blue => "Water/Cooler Bottle",
            ColorLabel::Brown => "Beer/Pharmaceutical",
            ColorLabel::MixedOther => "Mixed Material Type",
            ColorLabel::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ColorLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorReading {
    pub label: ColorLabel,
    pub description: String,
}

/// Mean HSV statistics over the sample window of a crop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HsvStats {
    pub saturation: f64,
    pub value: f64,
    /// Mean hue of sufficiently saturated pixels, 0 if there are too few
    pub hue: f64,
}

const HSV_SHIFT: u32 = 12;
const HSV_ROUND: i32 = 1 << (HSV_SHIFT - 1);

// Fixed-point reciprocals used by OpenCV's 8-bit RGB2HSV, indexed by v and by
// v - min respectively. Entry 0 is 0.
static SDIV_TABLE: Lazy<[i32; 256]> =
    Lazy::new(|| reciprocal_table(|i| (255 << HSV_SHIFT) as f64 / i as f64));
static HDIV_TABLE: Lazy<[i32; 256]> =
    Lazy::new(|| reciprocal_table(|i| (180 << HSV_SHIFT) as f64 / (6.0 * i as f64)));

fn reciprocal_table(f: impl Fn(usize) -> f64) -> [i32; 256] {
    let mut table = [0; 256];
    for (i, entry) in table.iter_mut().enumerate().skip(1) {
        *entry = f(i).round_ties_even() as i32;
    }
    table
}

/// 8-bit RGB to OpenCV-style HSV, bit-exact with `cv2.cvtColor(.., COLOR_RGB2HSV)`.
///
/// The signed hue is rounded before negative values wrap by 180, so a red
/// with `b` slightly above `g` lands on 0, not 179.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let v = r.max(g).max(b);
    let diff = (v - r.min(g).min(b)) as usize;
    let (r, g, b, d) = (r as i32, g as i32, b as i32, diff as i32);

    let s = (d * SDIV_TABLE[v as usize] + HSV_ROUND) >> HSV_SHIFT;

    let h = if v as i32 == r {
        g - b
    } else if v as i32 == g {
        b - r + 2 * d
    } else {
        r - g + 4 * d
    };
    let mut h = (h * HDIV_TABLE[diff] + HSV_ROUND) >> HSV_SHIFT;
    if h < 0 {
        h += 180;
    }

    (h as u8, s as u8, v)
}

/// HSV statistics over the central 40% x 40% of `crop`, or the whole crop
/// when that window is empty. `None` for an empty crop.
pub fn hsv_stats(crop: &RgbImage) -> Option<HsvStats> {
    let (w, h) = crop.dimensions();
    if w == 0 || h == 0 {
        return None;
    }

    let window = |len: u32| {
        let start = (len as f64 * CENTER_START) as u32;
        let end = (len as f64 * CENTER_END) as u32;
        start..end
    };
    let (mut rows, mut cols) = (window(h), window(w));
    if rows.is_empty() || cols.is_empty() {
        rows = 0..h;
        cols = 0..w;
    }

    let mut sat_sum = 0.0;
    let mut val_sum = 0.0;
    let mut hue_sum = 0.0;
    let mut hue_count = 0usize;
    let mut count = 0usize;

    for y in rows {
        for x in cols.clone() {
            let p = crop.get_pixel(x, y);
            let (hue, sat, val) = rgb_to_hsv(p[0], p[1], p[2]);
            sat_sum += sat as f64;
            val_sum += val as f64;
            count += 1;
            if sat > HUE_SATURATION_FLOOR {
                hue_sum += hue as f64;
                hue_count += 1;
            }
        }
    }

    Some(HsvStats {
        saturation: sat_sum / count as f64,
        value: val_sum / count as f64,
        hue: if hue_count > MIN_HUE_PIXELS {
            hue_sum / hue_count as f64
        } else {
            0.0
        },
    })
}

/// Classify the color of a crop. First matching rule wins.
pub fn classify_color(crop: &RgbImage) -> ColorReading {
    let Some(stats) = hsv_stats(crop) else {
        return ColorReading {
            label: ColorLabel::Unknown,
            description: "Empty".to_string(),
        };
    };

    let (label, description) = if stats.saturation < CLEAR_MAX_SATURATION {
        (ColorLabel::Clear, "High Value PET".to_string())
    } else if GREEN_HUE.contains(&stats.hue) {
        (ColorLabel::Green, "Soft Drink".to_string())
    } else if BLUE_HUE.contains(&stats.hue) {
        (ColorLabel::Blue, "Water/Cooler".to_string())
    } else if stats.value < BROWN_MAX_VALUE {
        (ColorLabel::Brown, "Beer/Pharma".to_string())
    } else {
        (ColorLabel::MixedOther, format!("H:{}", stats.hue as i64))
    };

    ColorReading { label, description }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(r: u8, g: u8, b: u8) -> RgbImage {
        RgbImage::from_pixel(20, 20, Rgb([r, g, b]))
    }

    #[test]
    fn test_rgb_to_hsv_matches_opencv() {
        assert_eq!(rgb_to_hsv(0, 200, 0), (60, 255, 200));
        assert_eq!(rgb_to_hsv(0, 0, 200), (120, 255, 200));
        assert_eq!(rgb_to_hsv(255, 0, 0), (0, 255, 255));
        assert_eq!(rgb_to_hsv(255, 0, 255), (150, 255, 255));
        assert_eq!(rgb_to_hsv(128, 128, 128), (0, 0, 128));
        assert_eq!(rgb_to_hsv(0, 0, 0), (0, 0, 0));
        assert_eq!(rgb_to_hsv(180, 200, 180), (60, 25, 200));
    }

    #[test]
    fn test_near_red_hue_rounds_to_zero() {
        // signed hue just below 0 rounds to 0 before wrapping
        assert_eq!(rgb_to_hsv(255, 0, 1), (0, 255, 255));
        assert_eq!(rgb_to_hsv(200, 0, 1).0, 0);
        assert_eq!(rgb_to_hsv(255, 0, 5).0, 179);
    }

    #[test]
    fn test_mixed_red_green_crop_is_green() {
        let crop = RgbImage::from_fn(20, 20, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([200, 0, 1])
            } else {
                Rgb([0, 200, 0])
            }
        });
        let stats = hsv_stats(&crop).unwrap();
        assert_eq!(stats.hue, 30.0);
        assert_eq!(classify_color(&crop).label, ColorLabel::Green);
    }

    #[test]
    fn test_empty_crop_is_unknown() {
        let reading = classify_color(&RgbImage::new(0, 0));
        assert_eq!(reading.label, ColorLabel::Unknown);
        assert_eq!(reading.description, "Empty");
    }

    #[test]
    fn test_basic_colors() {
        assert_eq!(classify_color(&solid(0, 0, 0)).label, ColorLabel::Clear);
        assert_eq!(classify_color(&solid(0, 200, 0)).label, ColorLabel::Green);
        assert_eq!(classify_color(&solid(0, 0, 200)).label, ColorLabel::Blue);
        assert_eq!(classify_color(&solid(150, 20, 20)).label, ColorLabel::Brown);
    }

    #[test]
    fn test_bright_red_is_mixed_with_hue_description() {
        let reading = classify_color(&solid(250, 20, 20));
        assert_eq!(reading.label, ColorLabel::MixedOther);
        assert_eq!(reading.description, "H:0");
    }

    #[test]
    fn test_low_saturation_wins_over_hue_band() {
        // saturation 25 (< 35) but hue 60 sits in the green band
        let crop = solid(180, 200, 180);
        let stats = hsv_stats(&crop).unwrap();
        assert!(stats.saturation < 35.0);
        assert!((stats.hue - 60.0).abs() < 1e-9);
        assert_eq!(classify_color(&crop).label, ColorLabel::Clear);
    }

    #[test]
    fn test_only_center_window_is_sampled() {
        let crop = RgbImage::from_fn(20, 20, |x, y| {
            if (7..13).contains(&x) && (7..13).contains(&y) {
                Rgb([0, 200, 0])
            } else {
                Rgb([250, 20, 20])
            }
        });
        // window is rows/cols 6..14; a thin red border remains inside it
        let stats = hsv_stats(&crop).unwrap();
        assert!(stats.hue > 30.0);
        assert_eq!(classify_color(&crop).label, ColorLabel::Green);
    }

    #[test]
    fn test_hue_needs_more_than_ten_saturated_pixels() {
        // n green pixels laid out row-major inside the 8x8 window at (6, 6)
        let crop = |n: u32| {
            let mut img = RgbImage::new(20, 20);
            for i in 0..n {
                img.put_pixel(6 + i % 8, 6 + i / 8, Rgb([0, 200, 0]));
            }
            img
        };
        assert_eq!(hsv_stats(&crop(10)).unwrap().hue, 0.0);
        assert!((hsv_stats(&crop(11)).unwrap().hue - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_tiny_crop_falls_back_to_whole_image() {
        // 1x1: window 0..0 is empty
        let stats = hsv_stats(&RgbImage::from_pixel(1, 1, Rgb([0, 200, 0]))).unwrap();
        assert_eq!(stats.saturation, 255.0);
        assert_eq!(stats.value, 200.0);
    }

    #[test]
    fn test_label_serializes_with_slash() {
        assert_eq!(
            serde_json::to_string(&ColorLabel::MixedOther).unwrap(),
            "\"Mixed/Other\""
        );
    }
}
