mod common;

use common::*;
use image::{Rgb, RgbImage};
use petsort::brand::{BrandClassifier, UNAVAILABLE_LABEL};
use petsort::color::ColorLabel;
use petsort::config::PipelineConfig;
use petsort::cropper::PixelBox;
use petsort::detection::BoundingBox;
use petsort::material::Material;
use petsort::pipeline::{ModelContext, PredictionStatus};
use std::sync::atomic::Ordering;
use std::sync::Arc;

// 200x100 image; padded box y 20..80 gives a height ratio of 0.6
fn single_bottle() -> Arc<StubSegmenter> {
    Arc::new(StubSegmenter::new(vec![instance(
        BOTTLE,
        BoundingBox::new(20.0, 28.0, 60.0, 72.0),
        200,
        100,
    )]))
}

#[test]
fn test_pet_bottle_end_to_end() {
    let segmenter = single_bottle();
    let ctx = context(segmenter.clone(), material_model(0.9), brand_model(vec![0.8, 0.2]));

    let response = ctx.predict(&gray_image(200, 100)).unwrap();
    assert_eq!(response.status, PredictionStatus::Success);
    assert_eq!(response.count, Some(1));
    assert_eq!(segmenter.calls.load(Ordering::SeqCst), 1);

    let json = serde_json::to_value(&response.objects[0]).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "object_id": 1,
            "bbox": [12, 20, 68, 80],
            "material": "PET",
            "material_conf": 0.9,
            "color": "Clear",
            "size": "1L",
            "weight_est": "35-45g",
            "brand": "BrandX",
            "brand_conf": 0.8
        })
    );
}

#[test]
fn test_non_pet_forces_color_and_zeroes_brand_confidence() {
    let green = RgbImage::from_pixel(200, 100, Rgb([0, 200, 0]));
    let ctx = context(single_bottle(), material_model(0.2), brand_model(vec![0.8, 0.2]));

    let response = ctx.predict(&green).unwrap();
    let record = &response.objects[0];
    assert_eq!(record.material, Material::NonPet);
    assert_eq!(record.material_conf, 0.2);
    assert_eq!(record.color, ColorLabel::MixedOther);
    assert_eq!(record.brand, "BrandX");
    assert_eq!(record.brand_conf, 0.0);
}

#[test]
fn test_pet_keeps_heuristic_color() {
    let green = RgbImage::from_pixel(200, 100, Rgb([0, 200, 0]));
    let ctx = context(single_bottle(), material_model(0.9), brand_model(vec![0.8, 0.2]));
    let response = ctx.predict(&green).unwrap();
    assert_eq!(response.objects[0].color, ColorLabel::Green);
}

#[test]
fn test_low_brand_confidence_reports_generic() {
    let ctx = context(single_bottle(), material_model(0.9), brand_model(vec![0.4, 0.6]));
    let record = &ctx.predict(&gray_image(200, 100)).unwrap().objects[0];
    assert_eq!(record.brand, "Generic/Other (Low Conf: 0.60)");
    assert_eq!(record.brand_conf, 0.6);
}

#[test]
fn test_confidences_rounded_to_two_decimals() {
    let ctx = context(single_bottle(), material_model(0.876), brand_model(vec![0.7349, 0.2651]));
    let record = &ctx.predict(&gray_image(200, 100)).unwrap().objects[0];
    assert_eq!(record.material_conf, 0.88);
    assert_eq!(record.brand_conf, 0.73);
}

#[test]
fn test_failed_crops_are_dropped_without_gaps() {
    let segmenter = Arc::new(StubSegmenter::new(vec![
        instance(BOTTLE, BoundingBox::new(10.0, 10.0, 40.0, 90.0), 200, 100),
        // entirely outside the image, nothing left after clamping
        instance(BOTTLE, BoundingBox::new(400.0, 10.0, 450.0, 90.0), 200, 100),
        instance(PERSON, BoundingBox::new(50.0, 10.0, 80.0, 90.0), 200, 100),
        instance(BOTTLE, BoundingBox::new(120.0, 40.0, 150.0, 60.0), 200, 100),
    ]));
    let ctx = context(segmenter, material_model(0.9), brand_model(vec![0.8, 0.2]));

    let response = ctx.predict(&gray_image(200, 100)).unwrap();
    assert_eq!(response.count, Some(2));
    let ids: Vec<_> = response.objects.iter().map(|o| o.object_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(response.objects[0].bbox, PixelBox { x1: 2, y1: 2, x2: 48, y2: 98 });
    assert_eq!(response.objects[1].bbox, PixelBox { x1: 112, y1: 32, x2: 158, y2: 68 });
    assert_eq!(response.objects[0].size, "2L");
    assert_eq!(response.objects[1].size, "500ml");
}

#[test]
fn test_all_crops_failing_is_success_with_zero_count() {
    let segmenter = Arc::new(StubSegmenter::new(vec![instance(
        BOTTLE,
        BoundingBox::new(400.0, 10.0, 450.0, 90.0),
        200,
        100,
    )]));
    let ctx = context(segmenter, material_model(0.9), brand_model(vec![0.8, 0.2]));

    let response = ctx.predict(&gray_image(200, 100)).unwrap();
    assert_eq!(response.status, PredictionStatus::Success);
    assert_eq!(response.count, Some(0));
    assert!(response.objects.is_empty());
}

#[test]
fn test_no_detections_short_circuits() {
    let ctx = context(
        Arc::new(StubSegmenter::new(vec![])),
        material_model(0.9),
        brand_model(vec![0.8, 0.2]),
    );
    let response = ctx.predict(&gray_image(64, 64)).unwrap();
    assert_eq!(response.status, PredictionStatus::NoBottleDetected);
    assert_eq!(response.count, None);
    assert!(response.objects.is_empty());
}

#[test]
fn test_only_other_classes_is_no_bottle() {
    let segmenter = Arc::new(StubSegmenter::new(vec![instance(
        PERSON,
        BoundingBox::new(10.0, 10.0, 40.0, 40.0),
        64,
        64,
    )]));
    let ctx = context(segmenter, material_model(0.9), brand_model(vec![0.8, 0.2]));
    let response = ctx.predict(&gray_image(64, 64)).unwrap();
    assert_eq!(response.status, PredictionStatus::NoBottleDetected);
}

#[test]
fn test_missing_brand_model_degrades() {
    let ctx = context(
        single_bottle(),
        material_model(0.9),
        BrandClassifier::unavailable(0.65),
    );
    assert!(!ctx.brand_available());
    let record = &ctx.predict(&gray_image(200, 100)).unwrap().objects[0];
    assert_eq!(record.brand, UNAVAILABLE_LABEL);
    assert_eq!(record.brand_conf, 0.0);
}

#[test]
fn test_inference_failure_fails_the_request() {
    let mut failing = FixedClassifier::new(
        petsort::material::material_labels(1).unwrap(),
        vec![0.1, 0.9],
    );
    failing.fail = true;
    let ctx = context(single_bottle(), Arc::new(failing), brand_model(vec![0.8, 0.2]));
    assert!(ctx.predict(&gray_image(200, 100)).is_err());
}

#[test]
fn test_unknown_target_class_fails_startup() {
    let config = PipelineConfig {
        target_class: "flask".to_string(),
        ..Default::default()
    };
    let result = ModelContext::from_parts(
        config,
        single_bottle(),
        material_model(0.9),
        brand_model(vec![0.8, 0.2]),
    );
    assert!(result.is_err());
}

#[test]
fn test_material_class_count_mismatch_fails_startup() {
    let three_way = Arc::new(FixedClassifier::new(
        vec!["a".into(), "b".into(), "c".into()],
        vec![0.2, 0.3, 0.5],
    ));
    let result = ModelContext::from_parts(
        PipelineConfig::default(),
        single_bottle(),
        three_way,
        brand_model(vec![0.8, 0.2]),
    );
    assert!(result.is_err());
}

#[test]
fn test_predict_bytes_rejects_garbage() {
    let ctx = context(single_bottle(), material_model(0.9), brand_model(vec![0.8, 0.2]));
    assert!(matches!(
        ctx.predict_bytes(b"not an image"),
        Err(petsort::image_input::PredictError::InvalidImage)
    ));

    let ((width, height), response) = ctx.predict_bytes(&png_bytes(&gray_image(200, 100))).unwrap();
    assert_eq!((width, height), (200, 100));
    assert_eq!(response.count, Some(1));
}
