use thiserror::Error;

/// Failures that cross the pipeline boundary. Everything else (a single
/// block failing to translate, a slide without text) degrades into the
/// result instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to decode input image: {0}")]
    ImageDecode(String),

    #[error("every OCR backend failed to run ({})", attempts.join("; "))]
    OcrBackendUnavailable { attempts: Vec<String> },

    #[error("pipeline failed: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    /// Short machine-readable name, used in logs and error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::ImageDecode(_) => "image_decode",
            PipelineError::OcrBackendUnavailable { .. } => "ocr_backend_unavailable",
            PipelineError::Internal(_) => "internal",
        }
    }
}
