//! Deterministic stand-in for the ONNX engine, plus image helpers.
//!
//! Every distinct non-zero red value in an image counts as one face, in
//! ascending order; its descriptor is `[red / 255, 0]`. A pixel with a full
//! blue channel makes the engine fail.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lineup_core::{Descriptor, DetectionMode, EngineError, FaceEngine};
use std::io::Cursor;
use std::time::Duration;

#[derive(Default)]
pub struct FakeEngine {
    pub delay: Option<Duration>,
}

impl FaceEngine for FakeEngine {
    fn detect_and_describe(
        &mut self,
        image: &RgbImage,
        _mode: DetectionMode,
    ) -> Result<Vec<Descriptor>, EngineError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if image.pixels().any(|p| p.0[2] == 255) {
            return Err(EngineError::Detector(
                lineup_core::detector::DetectorError::InferenceFailed("simulated crash".into()),
            ));
        }
        let mut reds: Vec<u8> = image.pixels().map(|p| p.0[0]).filter(|&r| r > 0).collect();
        reds.sort_unstable();
        reds.dedup();
        Ok(reds.into_iter().map(descriptor_for).collect())
    }
}

pub fn descriptor_for(red: u8) -> Descriptor {
    Descriptor::new(vec![red as f32 / 255.0, 0.0])
}

fn encode(image: RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encoding");
    bytes
}

/// PNG holding one "face" per red value. An empty slice gives an all-black image.
pub fn png(faces: &[u8]) -> Vec<u8> {
    let width = faces.len().max(1) as u32;
    let mut image = RgbImage::new(width, 1);
    for (x, &red) in faces.iter().enumerate() {
        image.put_pixel(x as u32, 0, Rgb([red, 0, 0]));
    }
    encode(image)
}

/// PNG that makes the fake engine fail.
pub fn broken_png() -> Vec<u8> {
    encode(RgbImage::from_pixel(2, 2, Rgb([0, 0, 255])))
}
