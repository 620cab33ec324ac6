pub mod decode;
pub mod mock;
#[cfg(feature = "torch")]
pub mod torch;

use std::path::Path;

use ndarray::Array1;
use shared::{DecodingMethod, ModelMode};

use crate::config::AppConfig;
pub use mock::MockProvider;

pub const DEFAULT_BEAM_WIDTH: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Model loading error: {0}")]
    Load(String),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Model inference error: {0}")]
    Inference(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Array1<f32>);

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn mean(&self) -> f32 {
        self.0.mean().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &f32> {
        self.0.iter()
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(Array1::from_vec(values))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
    Beam { width: usize },
    Greedy,
}

impl SearchMethod {
    pub fn method(&self) -> DecodingMethod {
        match self {
            SearchMethod::Beam { .. } => DecodingMethod::BeamSearch,
            SearchMethod::Greedy => DecodingMethod::GreedySearch,
        }
    }
}

impl Default for SearchMethod {
    fn default() -> Self {
        SearchMethod::Beam {
            width: DEFAULT_BEAM_WIDTH,
        }
    }
}

/// Feature extraction plus caption generation, as seen by the request handlers.
pub trait CaptionModel: Send + Sync {
    /// `image_path` points at a 3-channel JPEG written by the normalizer.
    fn extract_features(&self, image_path: &Path) -> Result<FeatureVector, ProviderError>;

    fn generate_caption(
        &self,
        features: &FeatureVector,
        method: SearchMethod,
    ) -> Result<String, ProviderError>;

    fn confidence(&self, features: &FeatureVector, caption_words: &[&str]) -> Result<f64, ProviderError>;
}

/// Models chosen at startup. Never mutated afterwards.
pub struct ModelState {
    mode: ModelMode,
    model: Box<dyn CaptionModel>,
}

impl ModelState {
    pub fn new(mode: ModelMode, model: Box<dyn CaptionModel>) -> Self {
        Self { mode, model }
    }

    /// Picks the production models when their artifacts exist and load, and
    /// the mock otherwise. Never fails.
    pub fn load(config: &AppConfig) -> Self {
        log::info!("Loading models...");

        if config.model_path.exists() && config.tokenizer_path.exists() {
            return match load_production(config) {
                Ok(model) => {
                    log::info!("Production models loaded from {}", config.model_path.display());
                    Self::new(ModelMode::Production, model)
                }
                Err(e) => {
                    log::error!("Failed to load production models: {}", e);
                    log::warn!("Falling back to mock caption models");
                    Self::new(ModelMode::Fallback, Box::new(MockProvider::new()))
                }
            };
        }

        log::info!(
            "Model artifacts not found ({} / {}), using mock models",
            config.model_path.display(),
            config.tokenizer_path.display()
        );
        Self::new(ModelMode::Mock, Box::new(MockProvider::new()))
    }

    pub fn mode(&self) -> ModelMode {
        self.mode
    }

    pub fn model(&self) -> &dyn CaptionModel {
        self.model.as_ref()
    }
}

#[cfg(feature = "torch")]
fn load_production(config: &AppConfig) -> Result<Box<dyn CaptionModel>, ProviderError> {
    let vocabulary = decode::Vocabulary::from_file(&config.tokenizer_path)?;
    let provider = torch::TorchProvider::load(&config.encoder_path, &config.model_path, vocabulary)?;
    Ok(Box::new(provider))
}

#[cfg(not(feature = "torch"))]
fn load_production(config: &AppConfig) -> Result<Box<dyn CaptionModel>, ProviderError> {
    decode::Vocabulary::from_file(&config.tokenizer_path)?;
    Err(ProviderError::Load(
        "this build has no LibTorch support; rebuild with the `torch` feature".to_string(),
    ))
}
