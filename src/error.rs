// src/error.rs
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Band `{0}` not found in raster stack")]
    MissingBand(String),

    #[error("Band `{0}` already exists in raster stack")]
    DuplicateBand(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Region contains no pixels")]
    EmptyRegion,

    #[error("No raster stacks to composite")]
    EmptyCollection,

    #[error("Invalid band-math expression: {0}")]
    InvalidExpression(String),

    #[error("CRS mismatch: {0} vs {1}")]
    CrsMismatch(String, String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("GDAL error: {0}")]
    #[cfg(feature = "gdal")]
    Gdal(String),
}

impl Error {
    pub(crate) fn invalid_parameter(
        name: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "gdal")]
impl From<gdal::errors::GdalError> for Error {
    fn from(e: gdal::errors::GdalError) -> Self {
        Error::Gdal(e.to_string())
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
