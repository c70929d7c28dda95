use log::{debug, error, info};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use image::RgbaImage;

use crate::error::{Result, WallpaperError};
use crate::platform::WallpaperPlatform;
use crate::request::{validate_bytes, validate_path, WallpaperRequest};

/// A decoded image ready to be handed to the platform.
pub struct Bitmap {
    pixels: RgbaImage,
}

impl Bitmap {
    pub fn decode(image_bytes: &[u8]) -> Result<Self> {
        let pixels = image::load_from_memory(image_bytes)?.into_rgba8();
        #[cfg(test)]
        test_support::LIVE_BITMAPS.with(|live| live.set(live.get() + 1));
        Ok(Self { pixels })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Row-major RGBA8 pixel data.
    pub fn rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Releases the pixel buffer.
    pub fn recycle(self) {
        debug!("Bitmap {}x{} recycled", self.width(), self.height());
    }
}

#[cfg(test)]
impl Drop for Bitmap {
    fn drop(&mut self) {
        test_support::LIVE_BITMAPS.with(|live| live.set(live.get() - 1));
    }
}

/// Turns image bytes or files into a wallpaper change on the platform.
#[derive(Clone)]
pub struct WallpaperApplier {
    platform: Arc<dyn WallpaperPlatform>,
}

impl WallpaperApplier {
    pub fn new(platform: Arc<dyn WallpaperPlatform>) -> Self {
        Self { platform }
    }

    /// Decode `image_bytes` and set them as the wallpaper. Never panics;
    /// every failure is logged and reported as `false`.
    pub fn apply_bytes(&self, image_bytes: &[u8]) -> bool {
        match self.try_apply_bytes(image_bytes) {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to set wallpaper: {}", e);
                false
            }
        }
    }

    /// Like [`apply_bytes`](Self::apply_bytes) but keeps the error. Returns
    /// the decoded dimensions on success.
    pub fn try_apply_bytes(&self, image_bytes: &[u8]) -> Result<(u32, u32)> {
        validate_bytes(image_bytes)?;
        info!("Processing {} bytes for wallpaper", image_bytes.len());

        let bitmap = Bitmap::decode(image_bytes)?;
        let dimensions = (bitmap.width(), bitmap.height());
        info!("Successfully created bitmap: {}x{}", dimensions.0, dimensions.1);

        let submitted = self.platform.set_bitmap(&bitmap);
        bitmap.recycle();
        submitted.map_err(WallpaperError::platform)?;

        info!("Wallpaper set successfully");
        Ok(dimensions)
    }

    pub fn apply_path(&self, image_path: &Path) -> bool {
        match self.try_apply_path(image_path) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to set wallpaper from {}: {}", image_path.display(), e);
                false
            }
        }
    }

    /// Streams the file to the platform without decoding it first.
    pub fn try_apply_path(&self, image_path: &Path) -> Result<()> {
        validate_path(image_path)?;
        info!("Setting wallpaper from path: {}", image_path.display());

        let mut reader = BufReader::new(File::open(image_path)?);
        self.platform
            .set_stream(&mut reader)
            .map_err(WallpaperError::platform)?;

        info!("Wallpaper set successfully");
        Ok(())
    }

    pub fn apply(&self, request: WallpaperRequest) -> Result<()> {
        match request {
            WallpaperRequest::Bytes(bytes) => self.try_apply_bytes(&bytes).map(|_| ()),
            WallpaperRequest::Path(path) => self.try_apply_path(&path),
        }
    }
}
