use std::path::{Path, PathBuf};

use crate::error::{Result, WallpaperError};

/// Image data handed to the applier. Consumed once, never retained.
#[derive(Debug, Clone)]
pub enum WallpaperRequest {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl WallpaperRequest {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(bytes.into())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self::Path(path.as_ref().to_path_buf())
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Bytes(bytes) => validate_bytes(bytes),
            Self::Path(path) => validate_path(path),
        }
    }
}

pub(crate) fn validate_bytes(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(WallpaperError::invalid("image data is empty"));
    }
    Ok(())
}

pub(crate) fn validate_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(WallpaperError::invalid("image path is empty"));
    }
    if !path.is_file() {
        return Err(WallpaperError::invalid(format!(
            "image file does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}
