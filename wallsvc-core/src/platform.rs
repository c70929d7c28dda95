// Platform seam for the OS wallpaper API
use anyhow::Result;
use std::io::Read;
use std::sync::Arc;

use crate::applier::Bitmap;

/// Backend that actually changes the wallpaper.
///
/// Implementations are called from worker threads, never from the UI
/// context, so they are free to block.
pub trait WallpaperPlatform: Send + Sync {
    /// Apply an already decoded bitmap. The bitmap is only borrowed and is
    /// released by the caller as soon as this returns.
    fn set_bitmap(&self, bitmap: &Bitmap) -> Result<()>;

    /// Apply encoded image data read from `stream`.
    fn set_stream(&self, stream: &mut dyn Read) -> Result<()>;
}

/// Fallback for targets without a wallpaper backend.
pub struct UnsupportedPlatform;

impl WallpaperPlatform for UnsupportedPlatform {
    fn set_bitmap(&self, _bitmap: &Bitmap) -> Result<()> {
        Err(anyhow::anyhow!("Wallpaper setting not supported on this platform"))
    }

    fn set_stream(&self, _stream: &mut dyn Read) -> Result<()> {
        Err(anyhow::anyhow!("Wallpaper setting not supported on this platform"))
    }
}

/// The platform used when the caller does not supply one.
pub fn default_platform() -> Arc<dyn WallpaperPlatform> {
    #[cfg(all(not(target_os = "android"), not(target_arch = "wasm32")))]
    {
        match crate::config::Conf::new() {
            Ok(conf) => return Arc::new(crate::desktop::DesktopWallpaperPlatform::new(&conf)),
            Err(e) => {
                log::error!("Failed to prepare wallpaper staging directory: {:#}", e);
            }
        }
    }

    Arc::new(UnsupportedPlatform)
}
