use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use shared::{ErrorResponse, PredictionResponse};

use crate::analyzer::{InvokeError, ParseError, ParsedResult};
use crate::storage::{StagingError, UploadError};

pub const GENERIC_ERROR: &str = "Error processing image.";

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("No image file provided")]
    MissingUpload,
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),
    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),
    #[error("Analyzer failed: {0}")]
    Invoke(#[from] InvokeError),
    #[error("Analyzer output rejected: {0}")]
    Parse(#[from] ParseError),
}

impl From<UploadError> for PredictError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Missing(_) => PredictError::MissingUpload,
            UploadError::Malformed(e) => PredictError::MalformedUpload(e.to_string()),
            UploadError::Staging(e) => PredictError::Staging(e),
        }
    }
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::MissingUpload | PredictError::MalformedUpload(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            PredictError::MissingUpload => "No image file provided.",
            PredictError::MalformedUpload(_) => "Malformed upload.",
            _ => GENERIC_ERROR,
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: error.to_string(),
        })
    }
}

/// Builds the public response. Only the artifact's file name is exposed, under `prefix`.
pub fn assemble(parsed: &ParsedResult, prefix: &str) -> PredictionResponse {
    let heatmap_url = parsed
        .artifact_path
        .as_deref()
        .and_then(|path| path.file_name())
        .map(|name| format!("{}/{}", prefix, name.to_string_lossy()));

    PredictionResponse {
        result: parsed.label.clone(),
        heatmap_url,
    }
}
