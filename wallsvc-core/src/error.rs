use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong between receiving image data and the
/// platform accepting it as the wallpaper.
#[derive(Debug, Error)]
pub enum WallpaperError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("wallpaper platform call failed: {0}")]
    Platform(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("a wallpaper operation is already in progress")]
    Busy,

    #[error("executor has been shut down")]
    Shutdown,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WallpaperError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Flattens a backend error chain into a `Platform` error.
    pub fn platform(err: anyhow::Error) -> Self {
        Self::Platform(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, WallpaperError>;
