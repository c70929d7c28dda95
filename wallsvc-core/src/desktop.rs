use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::applier::Bitmap;
use crate::config::Conf;
use crate::platform::WallpaperPlatform;

const STAGED_PREFIX: &str = "wallpaper-";

/// Applies wallpapers on desktop systems by staging the image in the cache
/// directory and pointing the desktop at it.
pub struct DesktopWallpaperPlatform {
    staging_dir: PathBuf,
}

impl DesktopWallpaperPlatform {
    pub fn new(conf: &Conf) -> Self {
        Self {
            staging_dir: conf.staging_dir.clone(),
        }
    }

    // Desktops cache by path, so every apply gets a fresh file name.
    fn staged_path(&self, extension: &str) -> PathBuf {
        self.staging_dir.join(format!(
            "{}{}.{}",
            STAGED_PREFIX,
            Utc::now().timestamp_millis(),
            extension
        ))
    }

    fn apply_staged(&self, staged: &Path) -> Result<()> {
        let file_loc = staged.to_string_lossy();
        match wallpaper::set_from_path(&file_loc) {
            Ok(()) => info!("Wallpaper set successfully to: {}", file_loc),
            Err(e) => {
                warn!("wallpaper backend failed ({}), trying desktop fallback", e);
                if !set_wallpaper_fallback(staged)? {
                    bail!("no wallpaper backend accepted {}", file_loc);
                }
            }
        }
        self.remove_stale(staged);
        Ok(())
    }

    fn remove_stale(&self, keep: &Path) {
        let entries = match fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping staging cleanup: {}", e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let staged = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(STAGED_PREFIX));
            if staged && path != keep {
                if let Err(e) = fs::remove_file(&path) {
                    debug!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl WallpaperPlatform for DesktopWallpaperPlatform {
    fn set_bitmap(&self, bitmap: &Bitmap) -> Result<()> {
        let staged = self.staged_path("png");
        bitmap
            .rgba()
            .save_with_format(&staged, image::ImageFormat::Png)
            .with_context(|| format!("Failed to stage bitmap at {}", staged.display()))?;
        self.apply_staged(&staged)
    }

    fn set_stream(&self, stream: &mut dyn Read) -> Result<()> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data).context("Failed to read image stream")?;

        let extension = image::guess_format(&data)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("jpg");
        let staged = self.staged_path(extension);
        fs::write(&staged, &data)
            .with_context(|| format!("Failed to stage image at {}", staged.display()))?;
        self.apply_staged(&staged)
    }
}

fn run(program: &str, args: &[&str]) -> Result<bool> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| anyhow!("failed to run {}: {}", program, e))?;
    Ok(output.status.success())
}

/// Desktop specific command used when the `wallpaper` crate gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    Gnome,
    Mate,
    Xfce,
    Lxde,
    Fluxbox,
    IceWm,
    Blackbox,
}

impl Fallback {
    fn detect() -> Option<Self> {
        let session = std::env::var("DESKTOP_SESSION").ok();
        Self::from_session(session.as_deref()).or_else(|| {
            std::env::var("GNOME_DESKTOP_SESSION_ID")
                .is_ok()
                .then_some(Self::Gnome)
        })
    }

    fn from_session(session: Option<&str>) -> Option<Self> {
        let session = session?.to_lowercase();
        let fallback = match session.as_str() {
            "gnome" | "unity" | "cinnamon" => Self::Gnome,
            "mate" => Self::Mate,
            "lxde" => Self::Lxde,
            "fluxbox" | "jwm" | "openbox" | "afterstep" => Self::Fluxbox,
            "icewm" => Self::IceWm,
            "blackbox" => Self::Blackbox,
            s if s.contains("xfce") || s.starts_with("xubuntu") => Self::Xfce,
            s if s.starts_with("lubuntu") => Self::Lxde,
            s if s.starts_with("ubuntu") && !s.starts_with("ubuntustudio") => Self::Gnome,
            _ => return None,
        };
        Some(fallback)
    }

    fn apply(self, file_loc: &str) -> Result<bool> {
        match self {
            Self::Gnome => {
                let uri = format!("file://{}", file_loc);
                run("gsettings", &["set", "org.gnome.desktop.background", "picture-uri", &uri])
            }
            Self::Mate => run("gsettings", &["set", "org.mate.background", "picture-filename", file_loc]),
            Self::Xfce => {
                let list_output = Command::new("xfconf-query")
                    .args(["-c", "xfce4-desktop", "-l"])
                    .output()?;

                if list_output.status.success() {
                    let paths = String::from_utf8_lossy(&list_output.stdout);
                    for path in paths.lines().filter(|line| line.contains("workspace0/last-image")) {
                        run("xfconf-query", &["-c", "xfce4-desktop", "-p", path.trim(), "-s", file_loc])?;
                    }
                }

                run("xfconf-query", &["-c", "xfce4-desktop", "-p", "/backdrop/screen0/monitor0/image-path", "-s", file_loc])?;
                run("xfdesktop", &["--reload"])
            }
            Self::Lxde => run("pcmanfm", &["--set-wallpaper", file_loc, "--wallpaper-mode=scaled"]),
            Self::Fluxbox => run("fbsetbg", &[file_loc]),
            Self::IceWm => run("icewmbg", &[file_loc]),
            Self::Blackbox => run("bsetbg", &["-full", file_loc]),
        }
    }
}

fn set_wallpaper_fallback(file_path: &Path) -> Result<bool> {
    match Fallback::detect() {
        Some(fallback) => {
            debug!("Falling back to {:?} wallpaper command", fallback);
            fallback.apply(&file_path.to_string_lossy())
        }
        None => {
            warn!("No wallpaper fallback for this desktop session");
            Ok(false)
        }
    }
}
