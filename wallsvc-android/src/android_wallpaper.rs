use wallsvc_core::Bitmap;

#[cfg(target_os = "android")]
pub use self::device::AndroidWallpaperPlatform;

/// Packs RGBA pixels into the `0xAARRGGBB` ints `Bitmap.createBitmap` expects.
pub fn argb_pixels(bitmap: &Bitmap) -> Vec<i32> {
    bitmap
        .rgba()
        .pixels()
        .map(|pixel| {
            let [r, g, b, a] = pixel.0;
            i32::from_be_bytes([a, r, g, b])
        })
        .collect()
}

#[cfg(target_os = "android")]
mod device {
    use anyhow::{bail, Context, Result};
    use jni::objects::{GlobalRef, JObject, JValue};
    use jni::{JNIEnv, JavaVM};
    use log::info;
    use std::io::Read;
    use wallsvc_core::{Bitmap, WallpaperPlatform};

    use super::argb_pixels;
    use crate::clear_exception;

    /// Local references a single platform call may create.
    const LOCAL_FRAME: i32 = 16;

    /// Sets the wallpaper through `android.app.WallpaperManager`.
    pub struct AndroidWallpaperPlatform {
        vm: JavaVM,
        context: GlobalRef,
    }

    impl AndroidWallpaperPlatform {
        pub fn new(env: &mut JNIEnv, context: &JObject) -> Result<Self> {
            let vm = env.get_java_vm().context("Failed to get JavaVM")?;
            let context = env
                .new_global_ref(context)
                .context("Failed to pin Android context")?;
            Ok(Self { vm, context })
        }

        fn with_env<T>(&self, f: impl FnOnce(&mut JNIEnv) -> Result<T>) -> Result<T> {
            let mut env = self
                .vm
                .attach_current_thread()
                .context("Failed to attach current thread")?;
            let result = env.with_local_frame(LOCAL_FRAME, |env| f(env));
            if result.is_err() {
                clear_exception(&mut env);
            }
            result
        }

        fn wallpaper_manager<'l>(&self, env: &mut JNIEnv<'l>) -> Result<JObject<'l>> {
            let manager = env
                .call_static_method(
                    "android/app/WallpaperManager",
                    "getInstance",
                    "(Landroid/content/Context;)Landroid/app/WallpaperManager;",
                    &[JValue::Object(self.context.as_obj())],
                )
                .context("Failed to get WallpaperManager instance")?
                .l()?;
            if manager.is_null() {
                bail!("WallpaperManager is not available");
            }
            Ok(manager)
        }
    }

    impl WallpaperPlatform for AndroidWallpaperPlatform {
        fn set_bitmap(&self, bitmap: &Bitmap) -> Result<()> {
            let width = i32::try_from(bitmap.width())?;
            let height = i32::try_from(bitmap.height())?;
            let pixels = argb_pixels(bitmap);

            self.with_env(|env| {
                let manager = self.wallpaper_manager(env)?;

                let array = env
                    .new_int_array(i32::try_from(pixels.len())?)
                    .context("Failed to allocate pixel array")?;
                env.set_int_array_region(&array, 0, &pixels)?;
                let array = JObject::from(array);

                let argb_8888 = env
                    .get_static_field(
                        "android/graphics/Bitmap$Config",
                        "ARGB_8888",
                        "Landroid/graphics/Bitmap$Config;",
                    )
                    .context("Failed to look up Bitmap.Config.ARGB_8888")?
                    .l()?;

                let android_bitmap = env
                    .call_static_method(
                        "android/graphics/Bitmap",
                        "createBitmap",
                        "([IIILandroid/graphics/Bitmap$Config;)Landroid/graphics/Bitmap;",
                        &[
                            JValue::Object(&array),
                            JValue::Int(width),
                            JValue::Int(height),
                            JValue::Object(&argb_8888),
                        ],
                    )
                    .context("Failed to create Android bitmap")?
                    .l()?;
                if android_bitmap.is_null() {
                    bail!("Bitmap.createBitmap returned null");
                }
                info!("Created {}x{} Android bitmap", width, height);

                let set = env.call_method(
                    &manager,
                    "setBitmap",
                    "(Landroid/graphics/Bitmap;)V",
                    &[JValue::Object(&android_bitmap)],
                );
                if set.is_err() {
                    clear_exception(env);
                }
                let _ = env.call_method(&android_bitmap, "recycle", "()V", &[]);
                set.context("WallpaperManager.setBitmap failed")?;
                Ok(())
            })
        }

        fn set_stream(&self, stream: &mut dyn Read) -> Result<()> {
            let mut bytes = Vec::new();
            stream.read_to_end(&mut bytes)?;

            self.with_env(|env| {
                let manager = self.wallpaper_manager(env)?;
                let array = JObject::from(
                    env.byte_array_from_slice(&bytes)
                        .context("Failed to create Java byte array")?,
                );
                let input = env
                    .new_object(
                        "java/io/ByteArrayInputStream",
                        "([B)V",
                        &[JValue::Object(&array)],
                    )
                    .context("Failed to create ByteArrayInputStream")?;

                let set = env.call_method(
                    &manager,
                    "setStream",
                    "(Ljava/io/InputStream;)V",
                    &[JValue::Object(&input)],
                );
                if set.is_err() {
                    clear_exception(env);
                }
                let _ = env.call_method(&input, "close", "()V", &[]);
                set.context("WallpaperManager.setStream failed")?;
                info!("Streamed {} bytes to WallpaperManager", bytes.len());
                Ok(())
            })
        }
    }
}
