use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use tch::{CModule, Device, Kind, Tensor};

use super::decode::{self, StepScorer, Vocabulary};
use super::{CaptionModel, FeatureVector, ProviderError, SearchMethod};

const INPUT_SIZE: u32 = 299;

impl From<tch::TchError> for ProviderError {
    fn from(err: tch::TchError) -> Self {
        ProviderError::Inference(err.to_string())
    }
}

/// TorchScript feature extractor and caption decoder.
///
/// The decoder takes `(features [1, F], sequence [1, max_length] i64)` and
/// returns next-word probabilities `[1, vocab]`. LibTorch modules are not
/// `Sync`, so each sits behind its own lock.
pub struct TorchProvider {
    encoder: Mutex<CModule>,
    decoder: Mutex<CModule>,
    vocabulary: Vocabulary,
    device: Device,
}

impl TorchProvider {
    pub fn load(encoder_path: &Path, decoder_path: &Path, vocabulary: Vocabulary) -> Result<Self, ProviderError> {
        let device = Device::cuda_if_available();
        log::info!("Loading TorchScript models on {:?}", device);

        let encoder = CModule::load_on_device(encoder_path, device)
            .map_err(|e| ProviderError::Load(format!("{}: {}", encoder_path.display(), e)))?;
        let decoder = CModule::load_on_device(decoder_path, device)
            .map_err(|e| ProviderError::Load(format!("{}: {}", decoder_path.display(), e)))?;

        Ok(Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            vocabulary,
            device,
        })
    }

    fn preprocess(&self, image_path: &Path) -> Result<Tensor, ProviderError> {
        let rgb = image::open(image_path)?.to_rgb8();
        let resized = image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let side = INPUT_SIZE as i64;
        let tensor = Tensor::from_slice(resized.as_raw().as_slice())
            .view([side, side, 3])
            .permute([2, 0, 1])
            .to_kind(Kind::Float)
            / 127.5
            - 1.0;
        Ok(tensor.unsqueeze(0).to_device(self.device))
    }
}

fn to_vec(tensor: &Tensor) -> Vec<f32> {
    let flat = tensor.to_kind(Kind::Float).to_device(Device::Cpu).view([-1]);
    let num_elements = flat.size()[0] as usize;
    let mut values = vec![0.0f32; num_elements];
    flat.copy_data(values.as_mut_slice(), num_elements);
    values
}

fn lock(module: &Mutex<CModule>) -> Result<std::sync::MutexGuard<'_, CModule>, ProviderError> {
    module
        .lock()
        .map_err(|_| ProviderError::Inference("model lock poisoned".to_string()))
}

impl StepScorer for TorchProvider {
    fn next_word_log_probs(&self, features: &FeatureVector, prefix: &[u32]) -> Result<Vec<f32>, ProviderError> {
        let max_length = self.vocabulary.max_length();
        let mut padded = vec![0i64; max_length];
        for (slot, &token) in padded.iter_mut().zip(prefix.iter().take(max_length)) {
            *slot = token as i64;
        }

        let values: Vec<f32> = features.iter().copied().collect();
        let features = Tensor::from_slice(values.as_slice()).view([1, -1]).to_device(self.device);
        let sequence = Tensor::from_slice(padded.as_slice()).view([1, -1]).to_device(self.device);

        let probs = tch::no_grad(|| lock(&self.decoder)?.forward_ts(&[features, sequence]).map_err(ProviderError::from))?;
        Ok(to_vec(&probs).into_iter().map(|p| p.max(f32::MIN_POSITIVE).ln()).collect())
    }
}

impl CaptionModel for TorchProvider {
    fn extract_features(&self, image_path: &Path) -> Result<FeatureVector, ProviderError> {
        let input = self.preprocess(image_path)?;
        let output = tch::no_grad(|| lock(&self.encoder)?.forward_ts(&[input]).map_err(ProviderError::from))?;
        Ok(FeatureVector::from(to_vec(&output)))
    }

    fn generate_caption(&self, features: &FeatureVector, method: SearchMethod) -> Result<String, ProviderError> {
        decode::generate(self, &self.vocabulary, features, method)
    }

    fn confidence(&self, features: &FeatureVector, caption_words: &[&str]) -> Result<f64, ProviderError> {
        let mean = decode::mean_log_prob(self, &self.vocabulary, features, caption_words)?;
        Ok(mean.map_or(0.0, |m| f64::from(m).exp()))
    }
}
