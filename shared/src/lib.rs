use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Which model implementation the service ended up running at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelMode {
    Production,
    Mock,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DecodingMethod {
    BeamSearch,
    GreedySearch,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptionResponse {
    pub success: bool,
    pub caption: String,
    pub confidence_score: f64,
    pub method_used: DecodingMethod,
    pub word_count: usize,
    pub image_dimensions: [u32; 2],
    pub filename: String,
    pub model_mode: ModelMode,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BatchItem {
    pub filename: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_dimensions: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BatchSummary {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub model_mode: ModelMode,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchResponse {
    pub success: bool,
    pub results: Vec<BatchItem>,
    pub summary: BatchSummary,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub models_loaded: bool,
    pub model_mode: ModelMode,
    pub api_version: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub success: bool,
    pub detail: String,
}
