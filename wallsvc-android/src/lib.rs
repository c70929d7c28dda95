//! Android glue for the wallpaper service: a `WallpaperManager` backed
//! platform, a `Context` backed service launcher and the JNI entry points
//! the Java side calls.
//!
//! On other targets only the pure helpers are compiled.

pub mod android_service;
pub mod android_wallpaper;

#[cfg(target_os = "android")]
pub use android_service::AndroidServiceContext;
#[cfg(target_os = "android")]
pub use android_wallpaper::AndroidWallpaperPlatform;

/// Tag every log line from this library carries in logcat.
pub const LOG_TAG: &str = "WallpaperService";

/// Rejects missing and empty payloads before anything touches the JVM.
pub fn accept_payload(bytes: Option<Vec<u8>>) -> Option<Vec<u8>> {
    match bytes {
        Some(bytes) if !bytes.is_empty() => Some(bytes),
        _ => {
            log::error!("Invalid parameters: image data is null or empty");
            None
        }
    }
}

#[cfg(target_os = "android")]
pub(crate) fn clear_exception(env: &mut jni::JNIEnv) {
    if env.exception_check().unwrap_or(false) {
        let _ = env.exception_describe();
        let _ = env.exception_clear();
    }
}

#[cfg(target_os = "android")]
fn init_logging() {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag(LOG_TAG),
    );
}

#[cfg(target_os = "android")]
mod exports {
    use jni::objects::{JByteArray, JClass, JObject};
    use jni::sys::{jboolean, jint, JNI_FALSE, JNI_TRUE, JNI_VERSION_1_6};
    use jni::JNIEnv;
    use log::error;
    use std::ffi::c_void;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::Arc;
    use wallsvc_core::{start_wallpaper_service, WallpaperApplier};

    use crate::{accept_payload, init_logging, AndroidServiceContext, AndroidWallpaperPlatform};

    fn read_payload(env: &JNIEnv, image_bytes: &JByteArray) -> Option<Vec<u8>> {
        if image_bytes.is_null() {
            return accept_payload(None);
        }
        match env.convert_byte_array(image_bytes) {
            Ok(bytes) => accept_payload(Some(bytes)),
            Err(e) => {
                error!("Failed to read image bytes: {}", e);
                None
            }
        }
    }

    fn guarded(name: &str, f: impl FnOnce() -> bool) -> jboolean {
        init_logging();
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(true) => JNI_TRUE,
            Ok(false) => JNI_FALSE,
            Err(_) => {
                error!("{} panicked", name);
                JNI_FALSE
            }
        }
    }

    #[no_mangle]
    pub extern "system" fn JNI_OnLoad(_vm: *mut jni::sys::JavaVM, _reserved: *mut c_void) -> jint {
        init_logging();
        JNI_VERSION_1_6
    }

    /// `AndroidServiceWallpaper.setWallpaperFromBytesNative(Context, byte[])`:
    /// decodes and applies on the calling thread.
    #[no_mangle]
    pub extern "system" fn Java_pe_nikescar_bingtray_AndroidServiceWallpaper_setWallpaperFromBytesNative<
        'local,
    >(
        mut env: JNIEnv<'local>,
        _class: JClass<'local>,
        context: JObject<'local>,
        image_bytes: JByteArray<'local>,
    ) -> jboolean {
        guarded("setWallpaperFromBytesNative", || {
            let Some(bytes) = read_payload(&env, &image_bytes) else {
                return false;
            };
            let platform = match AndroidWallpaperPlatform::new(&mut env, &context) {
                Ok(platform) => platform,
                Err(e) => {
                    error!("Failed to set up WallpaperManager: {:#}", e);
                    return false;
                }
            };
            WallpaperApplier::new(Arc::new(platform)).apply_bytes(&bytes)
        })
    }

    /// `BingtrayWallpaperService.startWallpaperServiceNative(Context, byte[])`:
    /// hands the image to the foreground service and returns whether the
    /// start was accepted.
    #[no_mangle]
    pub extern "system" fn Java_pe_nikescar_bingtray_BingtrayWallpaperService_startWallpaperServiceNative<
        'local,
    >(
        mut env: JNIEnv<'local>,
        _class: JClass<'local>,
        context: JObject<'local>,
        image_bytes: JByteArray<'local>,
    ) -> jboolean {
        guarded("startWallpaperServiceNative", || {
            let Some(bytes) = read_payload(&env, &image_bytes) else {
                return false;
            };
            match AndroidServiceContext::new(&mut env, &context) {
                Ok(service_context) => start_wallpaper_service(&service_context, &bytes),
                Err(e) => {
                    error!("Failed to set up service context: {:#}", e);
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_empty_payload_is_rejected() {
        assert_eq!(accept_payload(None), None);
        assert_eq!(accept_payload(Some(Vec::new())), None);
    }

    #[test]
    fn payload_passes_through_untouched() {
        assert_eq!(accept_payload(Some(vec![0xff, 0xd8])), Some(vec![0xff, 0xd8]));
    }
}
