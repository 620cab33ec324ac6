use std::panic::{self, AssertUnwindSafe};

use shared::{BatchItem, BatchResponse, BatchSummary, CaptionResponse, DecodingMethod};

use crate::config::AppConfig;
use crate::error::CaptionError;
use crate::model::{SearchMethod, DEFAULT_BEAM_WIDTH};
use crate::normalize::normalize;
use crate::state::AppState;

/// One uploaded multipart file. `size` is the byte count seen on the wire;
/// `data` may stop short of it once the upload exceeds the size limit.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
    pub size: usize,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, data: Vec<u8>) -> Self {
        let size = data.len();
        Self {
            filename: filename.into(),
            content_type,
            data,
            size,
        }
    }

    fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CaptionParams {
    pub method: Option<String>,
    pub beam_width: Option<String>,
}

struct Description {
    caption: String,
    confidence: f64,
    word_count: usize,
    dimensions: [u32; 2],
}

/// Batch outcome for a single file. Failures never leave their own slot.
#[derive(Debug)]
pub enum ItemOutcome {
    Captioned {
        filename: String,
        caption: String,
        dimensions: [u32; 2],
    },
    Failed {
        filename: String,
        error: String,
    },
}

impl ItemOutcome {
    pub fn failed(filename: &str, error: CaptionError) -> Self {
        log::warn!("Batch item {} failed: {}", filename, error);
        ItemOutcome::Failed {
            filename: filename.to_string(),
            error: error.to_string(),
        }
    }
}

impl From<ItemOutcome> for BatchItem {
    fn from(outcome: ItemOutcome) -> Self {
        match outcome {
            ItemOutcome::Captioned {
                filename,
                caption,
                dimensions,
            } => BatchItem {
                filename,
                success: true,
                caption: Some(caption),
                image_dimensions: Some(dimensions),
                error: None,
            },
            ItemOutcome::Failed { filename, error } => BatchItem {
                filename,
                success: false,
                caption: None,
                image_dimensions: None,
                error: Some(error),
            },
        }
    }
}

/// Checks content type, method and size, in that order.
pub fn validate_upload(
    config: &AppConfig,
    upload: &UploadedFile,
    params: &CaptionParams,
) -> Result<SearchMethod, CaptionError> {
    if !upload.is_image() {
        return Err(CaptionError::UnsupportedType);
    }
    let method = parse_method(params)?;
    check_size(config, upload)?;
    Ok(method)
}

fn parse_method(params: &CaptionParams) -> Result<SearchMethod, CaptionError> {
    let raw = params.method.as_deref().unwrap_or("beam_search").trim();
    let method = raw
        .parse::<DecodingMethod>()
        .map_err(|_| CaptionError::InvalidMethod(raw.to_string()))?;

    match method {
        DecodingMethod::GreedySearch => Ok(SearchMethod::Greedy),
        DecodingMethod::BeamSearch => {
            let width = match params.beam_width.as_deref().map(str::trim) {
                None | Some("") => DEFAULT_BEAM_WIDTH,
                Some(raw) => raw
                    .parse::<usize>()
                    .ok()
                    .filter(|&w| w > 0)
                    .ok_or_else(|| CaptionError::InvalidBeamWidth(raw.to_string()))?,
            };
            Ok(SearchMethod::Beam { width })
        }
    }
}

fn check_size(config: &AppConfig, upload: &UploadedFile) -> Result<(), CaptionError> {
    if upload.size > config.max_file_size {
        return Err(CaptionError::FileTooLarge {
            size: upload.size,
            limit: config.max_file_size,
        });
    }
    Ok(())
}

pub fn check_batch_size(config: &AppConfig, count: usize) -> Result<(), CaptionError> {
    if count == 0 {
        return Err(CaptionError::MissingFile("files"));
    }
    if count > config.max_batch_size {
        return Err(CaptionError::BatchTooLarge(config.max_batch_size));
    }
    Ok(())
}

/// Normalizes, extracts and captions one image. The transient JPEG lives
/// only for the duration of this call.
fn describe(state: &AppState, data: &[u8], method: SearchMethod) -> Result<Description, CaptionError> {
    let image = normalize(data, &state.config.allowed_extensions)?;
    let transient = image.materialize()?;
    let model = state.models.model();

    let features = model.extract_features(transient.path())?;
    let caption = model.generate_caption(&features, method)?;
    if caption.trim().is_empty() {
        return Err(CaptionError::Processing("model produced an empty caption".to_string()));
    }

    let words: Vec<&str> = caption.split_whitespace().collect();
    let confidence = state.config.clamp_confidence(model.confidence(&features, &words)?);
    let word_count = words.len();

    Ok(Description {
        caption: title_case(&caption),
        confidence,
        word_count,
        dimensions: image.dimensions(),
    })
}

/// Runs a validated single upload through the models.
pub fn caption_upload(
    state: &AppState,
    upload: &UploadedFile,
    method: SearchMethod,
) -> Result<CaptionResponse, CaptionError> {
    let description = describe(state, &upload.data, method).inspect_err(|e| {
        log::error!("Error processing {}: {}", upload.filename, e);
    })?;

    Ok(CaptionResponse {
        success: true,
        caption: description.caption,
        confidence_score: round3(description.confidence),
        method_used: method.method(),
        word_count: description.word_count,
        image_dimensions: description.dimensions,
        filename: upload.filename.clone(),
        model_mode: state.models.mode(),
    })
}

/// Captions every upload with beam search. Callers check the batch size first.
pub fn caption_batch(state: &AppState, uploads: &[UploadedFile]) -> BatchResponse {
    let outcomes = uploads.iter().map(|upload| caption_item(state, upload)).collect();
    summarize(state, outcomes)
}

/// Builds the batch response from per-item outcomes, keeping their order.
pub fn summarize(state: &AppState, outcomes: Vec<ItemOutcome>) -> BatchResponse {
    let successful = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, ItemOutcome::Captioned { .. }))
        .count();
    let summary = BatchSummary {
        total_processed: outcomes.len(),
        successful,
        failed: outcomes.len() - successful,
        model_mode: state.models.mode(),
    };
    log::info!(
        "Batch finished: {} processed, {} failed",
        summary.total_processed,
        summary.failed
    );

    BatchResponse {
        success: true,
        results: outcomes.into_iter().map(BatchItem::from).collect(),
        summary,
    }
}

/// Captions one batch entry. Errors and panics become a `Failed` outcome.
pub fn caption_item(state: &AppState, upload: &UploadedFile) -> ItemOutcome {
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
        if !upload.is_image() {
            return Err(CaptionError::InvalidFileType);
        }
        check_size(&state.config, upload)?;
        describe(state, &upload.data, SearchMethod::default())
    }));
    let result = attempt.unwrap_or_else(|_| Err(CaptionError::Processing("caption model panicked".to_string())));

    match result {
        Ok(description) => ItemOutcome::Captioned {
            filename: upload.filename.clone(),
            caption: description.caption,
            dimensions: description.dimensions,
        },
        Err(e) => ItemOutcome::failed(&upload.filename, e),
    }
}

/// Upper-cases the first letter of every run of letters and lower-cases the rest.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_is_letter = false;
    for ch in text.chars() {
        if previous_is_letter {
            out.extend(ch.to_lowercase());
        } else {
            out.extend(ch.to_uppercase());
        }
        previous_is_letter = ch.is_alphabetic();
    }
    out
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
