use anyhow::Result;
use log::{error, info};

/// Canonical component name of the wallpaper service.
pub const WALLPAPER_SERVICE: &str = "pe.nikescar.bingtray.BingtrayWallpaperService";
/// Older name some manifests still reference.
pub const WALLPAPER_SERVICE_ALIAS: &str = "pe.nikescar.bingtray.WallpaperService";

pub const EXTRA_IMAGE_DATA: &str = "image_data";

/// First platform level that requires services to be started in the foreground.
pub const API_LEVEL_O: u32 = 26;

/// A request to start a service component, optionally carrying image data.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub component: String,
    pub image_data: Option<Vec<u8>>,
}

impl StartRequest {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            image_data: None,
        }
    }

    pub fn wallpaper(image_data: Vec<u8>) -> Self {
        Self::new(WALLPAPER_SERVICE).with_image_data(image_data)
    }

    pub fn with_image_data(mut self, image_data: Vec<u8>) -> Self {
        self.image_data = Some(image_data);
        self
    }
}

/// Whatever can start services on behalf of the caller: the OS on a device,
/// a [`ServiceManager`](crate::manager::ServiceManager) when headless.
pub trait ServiceContext: Send + Sync {
    fn api_level(&self) -> u32;
    fn start_foreground_service(&self, request: StartRequest) -> Result<()>;
    fn start_service(&self, request: StartRequest) -> Result<()>;
}

/// Asks `context` to run the wallpaper service on `image_bytes`.
///
/// The return value only says whether the start request was accepted, not
/// whether the wallpaper ended up being set.
pub fn start_wallpaper_service(context: &dyn ServiceContext, image_bytes: &[u8]) -> bool {
    if image_bytes.is_empty() {
        error!("Invalid parameters for startWallpaperService");
        return false;
    }

    let request = StartRequest::wallpaper(image_bytes.to_vec());
    let started = if context.api_level() >= API_LEVEL_O {
        context.start_foreground_service(request)
    } else {
        context.start_service(request)
    };

    match started {
        Ok(()) => {
            info!("WallpaperService started with {} bytes", image_bytes.len());
            true
        }
        Err(e) => {
            error!("Failed to start WallpaperService: {:#}", e);
            false
        }
    }
}
