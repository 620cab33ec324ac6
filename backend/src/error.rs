use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::model::ProviderError;
use crate::normalize::NormalizeError;

#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("File must be an image")]
    UnsupportedType,
    #[error("Invalid file type")]
    InvalidFileType,
    #[error("Invalid method {0:?}; expected beam_search or greedy_search")]
    InvalidMethod(String),
    #[error("Invalid beam_width {0:?}; expected a positive integer")]
    InvalidBeamWidth(String),
    #[error("File too large ({size} bytes, limit is {limit} bytes)")]
    FileTooLarge { size: usize, limit: usize },
    #[error("Max {0} files allowed")]
    BatchTooLarge(usize),
    #[error("No file uploaded in field '{0}'")]
    MissingFile(&'static str),
    #[error("Invalid multipart payload: {0}")]
    Multipart(String),
    #[error("Processing failed: {0}")]
    Image(#[from] NormalizeError),
    #[error("Processing failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("Processing failed: {0}")]
    Processing(String),
}

impl ResponseError for CaptionError {
    fn status_code(&self) -> StatusCode {
        match self {
            CaptionError::UnsupportedType
            | CaptionError::InvalidFileType
            | CaptionError::InvalidMethod(_)
            | CaptionError::InvalidBeamWidth(_)
            | CaptionError::BatchTooLarge(_)
            | CaptionError::MissingFile(_)
            | CaptionError::Multipart(_) => StatusCode::BAD_REQUEST,
            CaptionError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            CaptionError::Image(_) | CaptionError::Provider(_) | CaptionError::Processing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            success: false,
            detail: self.to_string(),
        })
    }
}
