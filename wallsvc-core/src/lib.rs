//! Applies images as the device wallpaper, directly or through a managed
//! foreground service with a notification and a safety timeout.
//!
//! The pieces, bottom up:
//!
//! * [`WallpaperApplier`] decodes image bytes (or streams a file) into a
//!   [`WallpaperPlatform`].
//! * [`BackgroundExecutor`] runs file-based applies on a worker thread and
//!   reports back on the [`MainHandler`].
//! * [`WallpaperService`] is the foreground operation with its state machine.
//! * [`start_wallpaper_service`] packages bytes into a [`StartRequest`] for a
//!   [`ServiceContext`], such as the headless [`ServiceManager`].

pub mod applier;
pub mod config;
#[cfg(all(not(target_os = "android"), not(target_arch = "wasm32")))]
pub mod desktop;
pub mod error;
pub mod executor;
pub mod ffi;
pub mod handler;
pub mod launcher;
pub mod manager;
pub mod notification;
pub mod platform;
pub mod request;
pub mod service;

pub use applier::{Bitmap, WallpaperApplier};
pub use config::{Conf, ServiceConfig};
#[cfg(all(not(target_os = "android"), not(target_arch = "wasm32")))]
pub use desktop::DesktopWallpaperPlatform;
pub use error::WallpaperError;
pub use executor::{BackgroundExecutor, SetterCallback};
pub use handler::{Callback, MainHandler};
pub use launcher::{start_wallpaper_service, ServiceContext, StartRequest};
pub use manager::{ServiceManager, ServiceRegistry};
pub use notification::{
    LogNotificationSink, Notification, NotificationChannel, NotificationEvent,
    NotificationHistory, NotificationSink,
};
pub use platform::{default_platform, UnsupportedPlatform, WallpaperPlatform};
pub use request::WallpaperRequest;
pub use service::{ManagedService, OperationState, ServiceHost, StartMode, WallpaperService};
