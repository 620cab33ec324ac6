use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use sha2::{Digest, Sha256};

use super::{CaptionModel, FeatureVector, ProviderError, SearchMethod};

pub const FEATURE_SIZE: usize = 2048;

const MODIFIER_PROBABILITY: f64 = 0.3;
const MODIFIERS: [&str; 4] = ["bright", "colorful", "peaceful", "modern"];

const BASE_CONFIDENCE: f64 = 0.72;
const MIN_CONFIDENCE: f64 = 0.60;
const MAX_CONFIDENCE: f64 = 0.94;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Nature,
    Animals,
    People,
    Urban,
    Indoor,
    Objects,
}

impl Category {
    /// Bins the mean feature activation.
    pub fn from_mean(mean: f32) -> Self {
        match mean {
            m if m < 0.30 => Category::Nature,
            m if m < 0.45 => Category::Animals,
            m if m < 0.60 => Category::People,
            m if m < 0.75 => Category::Urban,
            m if m < 0.85 => Category::Indoor,
            _ => Category::Objects,
        }
    }

    pub fn captions(&self) -> &'static [&'static str] {
        match self {
            Category::Nature => &[
                "a beautiful landscape with mountains in the background",
                "trees and grass in a natural outdoor setting",
                "a scenic view of nature with clear blue sky",
            ],
            Category::People => &[
                "a group of people gathered together in a social setting",
                "people enjoying time together in a friendly environment",
                "individuals engaged in conversation",
            ],
            Category::Urban => &[
                "a busy city street with buildings and infrastructure",
                "modern architecture in an urban environment",
                "tall buildings in a cityscape",
            ],
            Category::Indoor => &[
                "an indoor space with furniture and decorations",
                "a well-lit interior room with various objects",
                "comfortable indoor environment",
            ],
            Category::Objects => &[
                "various objects arranged in an organized manner",
                "everyday items placed on a surface",
                "a collection of useful objects",
            ],
            Category::Animals => &[
                "a domestic animal in a comfortable environment",
                "a pet showing natural behavior",
                "an animal in its habitat",
            ],
        }
    }

    pub fn enhanced_captions(&self) -> &'static [&'static str] {
        match self {
            Category::Nature => &[
                "breathtaking natural landscape with majestic mountains and lush greenery",
                "serene outdoor scenery with pristine beauty and peaceful atmosphere",
            ],
            Category::People => &[
                "vibrant gathering of people enjoying meaningful social connections",
                "diverse group engaged in lively conversation and interaction",
            ],
            Category::Urban => &[
                "dynamic urban environment with impressive architectural design",
                "bustling metropolitan area with modern buildings and street life",
            ],
            Category::Indoor => &[
                "elegantly designed indoor space with comfortable furnishings",
                "well-appointed interior room with harmonious design elements",
            ],
            Category::Objects => &[
                "carefully arranged collection of practical items and objects",
                "assorted objects organized in a functional manner",
            ],
            Category::Animals => &[
                "adorable animal displaying natural charm and characteristics",
                "beloved pet in a nurturing and appropriate environment",
            ],
        }
    }
}

/// Stand-in for the real model pair. Features depend only on the image size.
#[derive(Debug, Default, Clone)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        log::info!("Mock feature extractor and caption generator initialized");
        Self
    }

    pub fn features_for_dimensions(&self, width: u32, height: u32) -> Result<FeatureVector, ProviderError> {
        let normal = Normal::new(0.5f32, 0.15).map_err(|e| ProviderError::Inference(e.to_string()))?;
        let mut rng = StdRng::seed_from_u64(dimension_seed(width, height));
        let values = (0..FEATURE_SIZE)
            .map(|_| normal.sample(&mut rng).clamp(0.0, 1.0))
            .collect::<Vec<f32>>();
        Ok(FeatureVector::from(values))
    }
}

fn dimension_seed(width: u32, height: u32) -> u64 {
    let digest = Sha256::digest(format!("{}x{}", width, height).as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix) % 10_000
}

impl CaptionModel for MockProvider {
    fn extract_features(&self, image_path: &Path) -> Result<FeatureVector, ProviderError> {
        let (width, height) = image::image_dimensions(image_path)?;
        self.features_for_dimensions(width, height)
    }

    fn generate_caption(
        &self,
        features: &FeatureVector,
        method: SearchMethod,
    ) -> Result<String, ProviderError> {
        let category = Category::from_mean(features.mean());
        let mut rng = rand::rng();

        let caption = match method {
            SearchMethod::Greedy => {
                let base = category.captions().choose(&mut rng).copied().unwrap_or_default();
                if rng.random_bool(MODIFIER_PROBABILITY) {
                    let modifier = MODIFIERS.choose(&mut rng).copied().unwrap_or_default();
                    format!("{} {}", modifier, base)
                } else {
                    base.to_string()
                }
            }
            // Beam width does not change the mock's search space.
            SearchMethod::Beam { .. } => {
                let candidates: Vec<&str> = category
                    .captions()
                    .iter()
                    .chain(category.enhanced_captions())
                    .copied()
                    .collect();
                candidates.choose(&mut rng).copied().unwrap_or_default().to_string()
            }
        };
        Ok(caption)
    }

    fn confidence(&self, _features: &FeatureVector, caption_words: &[&str]) -> Result<f64, ProviderError> {
        let word_bonus = if (8..=15).contains(&caption_words.len()) { 0.15 } else { 0.05 };
        let jitter = rand::rng().random_range(-0.03..0.05);
        Ok((BASE_CONFIDENCE + word_bonus + jitter).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE))
    }
}
