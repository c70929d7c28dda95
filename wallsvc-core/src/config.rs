use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
#[cfg(not(any(target_os = "android", target_os = "ios")))]
use directories::ProjectDirs;

use crate::notification::NotificationChannel;

/// Filesystem locations used by the wallpaper backends.
pub struct Conf {
    pub cache_dir: PathBuf,
    pub staging_dir: PathBuf,
}

impl Conf {
    pub fn new() -> Result<Self> {
        let cache_dir = {
            #[cfg(target_os = "android")]
            {
                PathBuf::from("/data/data/pe.nikescar.bingtray/cache")
            }

            #[cfg(target_os = "ios")]
            {
                PathBuf::from("/tmp/bingtray")
            }

            #[cfg(not(any(target_os = "android", target_os = "ios")))]
            {
                let proj_dirs = ProjectDirs::from("com", "bingtray", "bingtray")
                    .context("Failed to get project directories")?;
                proj_dirs.cache_dir().to_path_buf()
            }
        };

        Self::with_cache_dir(cache_dir)
    }

    pub fn with_cache_dir(cache_dir: impl AsRef<Path>) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        let staging_dir = cache_dir.join("wallpaper");

        fs::create_dir_all(&staging_dir)
            .with_context(|| format!("Failed to create {}", staging_dir.display()))?;

        Ok(Conf {
            cache_dir,
            staging_dir,
        })
    }
}

/// Timing and presentation settings for the foreground wallpaper service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Hard limit for a single operation before the service forces itself down.
    pub timeout: Duration,
    /// How long the success notification stays up before the service stops.
    pub success_grace: Duration,
    /// How long the failure notification stays up before the service stops.
    pub failure_grace: Duration,
    pub notification_id: i32,
    pub title: String,
    pub channel: NotificationChannel,
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SUCCESS_GRACE: Duration = Duration::from_millis(3000);
pub const DEFAULT_FAILURE_GRACE: Duration = Duration::from_millis(2500);
pub const NOTIFICATION_ID: i32 = 1001;

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            success_grace: DEFAULT_SUCCESS_GRACE,
            failure_grace: DEFAULT_FAILURE_GRACE,
            notification_id: NOTIFICATION_ID,
            title: "Bingtray".to_string(),
            channel: NotificationChannel::wallpaper_service(),
        }
    }
}

impl ServiceConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace_periods(mut self, success: Duration, failure: Duration) -> Self {
        self.success_grace = success;
        self.failure_grace = failure;
        self
    }
}
