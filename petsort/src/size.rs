//! Bottle size estimate from how much of the frame height an object fills.

use serde::Serialize;

use crate::config::SizeThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeEstimate {
    pub label: &'static str,
    pub weight_est: &'static str,
}

const SMALL: SizeEstimate = SizeEstimate {
    label: "200ml",
    weight_est: "10-12g",
};
const MEDIUM: SizeEstimate = SizeEstimate {
    label: "500ml",
    weight_est: "18-25g",
};
const LARGE: SizeEstimate = SizeEstimate {
    label: "1L",
    weight_est: "35-45g",
};
const EXTRA_LARGE: SizeEstimate = SizeEstimate {
    label: "2L",
    weight_est: "55-70g",
};

/// Size class for an object `bbox_height` pixels tall in an image
/// `image_height` pixels tall. Boundaries are strict `<`, so a ratio equal to
/// a threshold falls into the larger class.
pub fn estimate_size(bbox_height: u32, image_height: u32, thresholds: &SizeThresholds) -> SizeEstimate {
    if image_height == 0 {
        return SMALL;
    }
    let ratio = bbox_height as f32 / image_height as f32;

    if ratio < thresholds.small {
        SMALL
    } else if ratio < thresholds.medium {
        MEDIUM
    } else if ratio < thresholds.large {
        LARGE
    } else {
        EXTRA_LARGE
    }
}
