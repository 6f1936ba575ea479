use thiserror::Error;

/// The uploaded bytes could not be turned into a pixel grid.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image buffer is empty")]
    Empty,

    #[error("unrecognized image format")]
    UnsupportedFormat,

    #[error("malformed image data: {0}")]
    Malformed(#[source] image::ImageError),
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The OCR models could not be fetched or loaded. Only raised while
    /// building an engine, never by `recognize`.
    #[error("recognition engine unavailable: {0}")]
    Unavailable(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl RecognitionError {
    /// True for the startup-time failures that leave the feature disabled.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RecognitionError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("registry lock poisoned")]
    Poisoned,
}

/// The `flow` query parameter named no known scan flow.
#[derive(Debug, Error)]
#[error("unknown scan flow {0:?}, expected \"live\" or \"record\"")]
pub struct UnknownFlow(pub String);

/// Anything that can go wrong during one scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl ScanError {
    /// Client errors are the caller's fault (bad upload); everything else is
    /// a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ScanError::Decode(_))
    }
}
