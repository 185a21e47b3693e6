use thiserror::Error;

/// Failures inside a single image's evaluation.
///
/// None of these escape a cell scan: the scanner logs them and the affected
/// image simply contributes no contrast finding.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to load image {url}: {reason}")]
    ImageLoad { url: String, reason: String },

    #[error("image {url} has no opaque pixels to cluster")]
    ClusteringDegenerate { url: String },

    #[error("contrast scoring failed: {0}")]
    ScoringService(String),

    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ScanError {
    pub fn image_load(url: impl ToString, reason: impl ToString) -> Self {
        Self::ImageLoad {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
