//! C ABI for callers outside Rust.
//!
//! 1. `wallsvc_context_new()` creates a context handle.
//! 2. `wallsvc_apply_wallpaper()` / `wallsvc_start_service()` take the handle
//!    plus a byte buffer and its length.
//! 3. `wallsvc_context_free()` releases the handle.
//!
//! Every call returns `false` on null pointers, empty buffers or failure;
//! `wallsvc_last_error()` gives the message for the current thread. The
//! signatures are frozen for a given `WALLSVC_ABI_VERSION`.

use log::error;
use std::cell::RefCell;
use std::ffi::{c_char, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::applier::WallpaperApplier;
use crate::config::ServiceConfig;
use crate::handler::MainHandler;
use crate::launcher::start_wallpaper_service;
use crate::manager::{ServiceManager, ServiceRegistry};
use crate::notification::LogNotificationSink;
use crate::platform::{default_platform, WallpaperPlatform};

pub const WALLSVC_ABI_VERSION: u32 = 1;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into();
    error!("FFI error: {}", msg);
    LAST_ERROR.with(|e| *e.borrow_mut() = CString::new(msg).ok());
}

fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// Everything a foreign caller needs: a runtime for the main handler, the
/// applier and a service host.
pub struct WallsvcContext {
    runtime: tokio::runtime::Runtime,
    applier: WallpaperApplier,
    manager: ServiceManager,
}

impl WallsvcContext {
    pub fn new(platform: Arc<dyn WallpaperPlatform>, api_level: u32) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("wallsvc")
            .enable_all()
            .build()?;

        let applier = WallpaperApplier::new(platform);
        let handler = MainHandler::spawn_on(runtime.handle());
        let manager = ServiceManager::new(
            handler,
            ServiceRegistry::wallpaper(applier.clone(), ServiceConfig::default()),
            Arc::new(LogNotificationSink),
            api_level,
        );

        Ok(Self {
            runtime,
            applier,
            manager,
        })
    }

    pub fn applier(&self) -> &WallpaperApplier {
        &self.applier
    }

    pub fn manager(&self) -> &ServiceManager {
        &self.manager
    }

    /// Blocks until the service host has no live instance.
    pub fn wait_until_idle(&self) {
        self.runtime.block_on(self.manager.wait_until_idle());
    }
}

/// Borrows `len` bytes at `data`, rejecting null and empty buffers.
///
/// # Safety
/// `data` must point to `len` readable bytes for the duration of the call.
unsafe fn byte_slice<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    if data.is_null() || len == 0 {
        return None;
    }
    Some(std::slice::from_raw_parts(data, len))
}

fn guarded(name: &str, f: impl FnOnce() -> bool) -> bool {
    clear_last_error();
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(ok) => ok,
        Err(_) => {
            set_last_error(format!("{} panicked", name));
            false
        }
    }
}

#[no_mangle]
pub extern "C" fn wallsvc_abi_version() -> u32 {
    WALLSVC_ABI_VERSION
}

/// Creates a context using the default wallpaper backend for this target.
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn wallsvc_context_new(api_level: u32) -> *mut WallsvcContext {
    clear_last_error();
    let created = catch_unwind(|| WallsvcContext::new(default_platform(), api_level));
    match created {
        Ok(Ok(context)) => Box::into_raw(Box::new(context)),
        Ok(Err(e)) => {
            set_last_error(format!("context initialization failed: {}", e));
            std::ptr::null_mut()
        }
        Err(_) => {
            set_last_error("context initialization panicked");
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `ctx` must come from `wallsvc_context_new` and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn wallsvc_context_free(ctx: *mut WallsvcContext) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx));
    }
}

/// Decodes and applies the image synchronously.
///
/// # Safety
/// `ctx` must be a live context and `data` must point to `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn wallsvc_apply_wallpaper(
    ctx: *const WallsvcContext,
    data: *const u8,
    len: usize,
) -> bool {
    guarded("wallsvc_apply_wallpaper", || {
        let Some(context) = ctx.as_ref() else {
            set_last_error("context is null");
            return false;
        };
        let Some(bytes) = byte_slice(data, len) else {
            set_last_error("image data is null or empty");
            return false;
        };
        match context.applier.try_apply_bytes(bytes) {
            Ok(_) => true,
            Err(e) => {
                set_last_error(e.to_string());
                false
            }
        }
    })
}

/// Hands the image to the foreground wallpaper service. Returns whether the
/// start request was accepted.
///
/// # Safety
/// `ctx` must be a live context and `data` must point to `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn wallsvc_start_service(
    ctx: *const WallsvcContext,
    data: *const u8,
    len: usize,
) -> bool {
    guarded("wallsvc_start_service", || {
        let Some(context) = ctx.as_ref() else {
            set_last_error("context is null");
            return false;
        };
        let Some(bytes) = byte_slice(data, len) else {
            set_last_error("image data is null or empty");
            return false;
        };
        if !start_wallpaper_service(&context.manager, bytes) {
            set_last_error("wallpaper service did not accept the request");
            return false;
        }
        true
    })
}

/// Last error message on this thread, or null. Valid until the next call
/// on the same thread.
#[no_mangle]
pub extern "C" fn wallsvc_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(std::ptr::null())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::test_support::{jpeg_bytes, Call, RecordingPlatform};
    use std::ffi::CStr;

    fn last_error() -> String {
        let ptr = wallsvc_last_error();
        assert!(!ptr.is_null());
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    fn context(platform: &Arc<RecordingPlatform>) -> WallsvcContext {
        WallsvcContext::new(Arc::clone(platform) as Arc<dyn WallpaperPlatform>, 34).unwrap()
    }

    #[test]
    fn version_is_stable() {
        assert_eq!(wallsvc_abi_version(), 1);
    }

    #[test]
    fn null_context_is_rejected() {
        let bytes = [1u8, 2, 3];
        let ok = unsafe { wallsvc_apply_wallpaper(std::ptr::null(), bytes.as_ptr(), bytes.len()) };
        assert!(!ok);
        assert_eq!(last_error(), "context is null");
    }

    #[test]
    fn null_or_empty_buffer_is_rejected() {
        let platform = Arc::new(RecordingPlatform::default());
        let ctx = context(&platform);

        assert!(!unsafe { wallsvc_apply_wallpaper(&ctx, std::ptr::null(), 10) });
        let bytes = [0u8; 4];
        assert!(!unsafe { wallsvc_start_service(&ctx, bytes.as_ptr(), 0) });
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn apply_reaches_platform() {
        let platform = Arc::new(RecordingPlatform::default());
        let ctx = context(&platform);
        let bytes = jpeg_bytes(10, 10);

        assert!(unsafe { wallsvc_apply_wallpaper(&ctx, bytes.as_ptr(), bytes.len()) });
        assert!(wallsvc_last_error().is_null());
        assert_eq!(platform.calls(), vec![Call::Bitmap(10, 10)]);
    }

    #[test]
    fn decode_error_is_exposed() {
        let platform = Arc::new(RecordingPlatform::default());
        let ctx = context(&platform);
        let bytes = b"nope";

        assert!(!unsafe { wallsvc_apply_wallpaper(&ctx, bytes.as_ptr(), bytes.len()) });
        assert!(last_error().starts_with("failed to decode image"));
    }

    #[test]
    fn service_start_is_accepted_and_runs() {
        let platform = Arc::new(RecordingPlatform::default());
        let ctx = context(&platform);
        let bytes = jpeg_bytes(6, 6);

        assert!(unsafe { wallsvc_start_service(&ctx, bytes.as_ptr(), bytes.len()) });
        ctx.wait_until_idle();
        assert_eq!(platform.calls(), vec![Call::Bitmap(6, 6)]);
    }
}
