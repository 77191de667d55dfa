use std::fmt;

/// Which of the session inputs was absent when an analysis was triggered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingInput {
    Image,
    Question,
}

impl fmt::Display for MissingInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingInput::Image => f.write_str("receipt image"),
            MissingInput::Question => f.write_str("question"),
        }
    }
}

/// Failures raised by the model service or by the call to it.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("api error ({status}): {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("response blocked: {0}")]
    Blocked(String),
    #[error("the model returned no candidates")]
    EmptyResponse,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Coarse classification of [`AnalyzerError`], for callers deciding whether a retry with
/// different inputs could succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Credential,
    Input,
    Busy,
    Remote,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("no API key has been entered")]
    MissingCredential,
    #[error("no {0} has been provided")]
    MissingInput(MissingInput),
    #[error("an analysis is already in progress")]
    AnalysisInProgress,
    #[error("unsupported image format: {0}")]
    UnsupportedImageFormat(String),
    #[error("failed to decode image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("analysis worker stopped: {0}")]
    Interrupted(String),
}

impl AnalyzerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalyzerError::MissingCredential => ErrorKind::Credential,
            AnalyzerError::MissingInput(_)
            | AnalyzerError::UnsupportedImageFormat(_)
            | AnalyzerError::InvalidImage(_) => ErrorKind::Input,
            AnalyzerError::AnalysisInProgress => ErrorKind::Busy,
            AnalyzerError::Remote(_) | AnalyzerError::Interrupted(_) => ErrorKind::Remote,
        }
    }

    /// Message shown in the result region when the analysis fails.
    pub fn display_message(&self) -> String {
        format!("Error processing request: {self}")
    }
}
