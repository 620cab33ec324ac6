#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actix_web::web;
use captioner::config::AppConfig;
use captioner::model::{CaptionModel, FeatureVector, MockProvider, ModelState, ProviderError, SearchMethod};
use captioner::state::AppState;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use shared::ModelMode;

pub const BOUNDARY: &str = "caption-test-boundary";

pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub data: Vec<u8>,
}

impl<'a> Part<'a> {
    pub fn file(name: &'a str, filename: &'a str, content_type: &'a str, data: Vec<u8>) -> Self {
        Self {
            name,
            filename: Some(filename),
            content_type: Some(content_type),
            data,
        }
    }

    pub fn text(name: &'a str, value: &str) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        }
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = part.filename {
            disposition.push_str(&format!("; filename=\"{}\"", filename));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).expect("encode test image");
    buf.into_inner()
}

pub fn rgb_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, 128])
    }))
}

pub fn rgba_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([40, 80, 120, 255])))
}

/// Mock provider that counts how often the models are touched.
#[derive(Clone, Default)]
pub struct CountingProvider {
    inner: MockProvider,
    calls: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CaptionModel for CountingProvider {
    fn extract_features(&self, image_path: &Path) -> Result<FeatureVector, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.extract_features(image_path)
    }

    fn generate_caption(&self, features: &FeatureVector, method: SearchMethod) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.generate_caption(features, method)
    }

    fn confidence(&self, features: &FeatureVector, caption_words: &[&str]) -> Result<f64, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.confidence(features, caption_words)
    }
}

/// Mock provider that stalls on images of one width.
pub struct SlowProvider {
    pub slow_width: u32,
    pub delay: Duration,
}

impl CaptionModel for SlowProvider {
    fn extract_features(&self, image_path: &Path) -> Result<FeatureVector, ProviderError> {
        let (width, _) = image::image_dimensions(image_path)?;
        if width == self.slow_width {
            std::thread::sleep(self.delay);
        }
        MockProvider::new().extract_features(image_path)
    }

    fn generate_caption(&self, features: &FeatureVector, method: SearchMethod) -> Result<String, ProviderError> {
        MockProvider::new().generate_caption(features, method)
    }

    fn confidence(&self, features: &FeatureVector, caption_words: &[&str]) -> Result<f64, ProviderError> {
        MockProvider::new().confidence(features, caption_words)
    }
}

pub struct FailingProvider;

impl CaptionModel for FailingProvider {
    fn extract_features(&self, _image_path: &Path) -> Result<FeatureVector, ProviderError> {
        Err(ProviderError::Inference("feature extractor unavailable".to_string()))
    }

    fn generate_caption(&self, _features: &FeatureVector, _method: SearchMethod) -> Result<String, ProviderError> {
        Err(ProviderError::Inference("unreachable".to_string()))
    }

    fn confidence(&self, _features: &FeatureVector, _caption_words: &[&str]) -> Result<f64, ProviderError> {
        Ok(0.0)
    }
}

pub fn state(config: AppConfig, model: impl CaptionModel + 'static) -> web::Data<AppState> {
    web::Data::new(AppState::new(config, ModelState::new(ModelMode::Mock, Box::new(model))))
}
