#[cfg(target_os = "android")]
pub use self::device::AndroidServiceContext;

/// Name of the `Context` method that starts a service at `api_level`.
pub fn start_method(api_level: u32, foreground: bool) -> &'static str {
    if foreground && api_level >= wallsvc_core::launcher::API_LEVEL_O {
        "startForegroundService"
    } else {
        "startService"
    }
}

#[cfg(target_os = "android")]
mod device {
    use anyhow::{bail, Context, Result};
    use jni::objects::{GlobalRef, JClass, JObject, JValue};
    use jni::{JNIEnv, JavaVM};
    use log::{debug, info};
    use wallsvc_core::launcher::{ServiceContext, StartRequest, EXTRA_IMAGE_DATA};

    use super::start_method;
    use crate::clear_exception;

    /// Starts services through a real `android.content.Context`.
    pub struct AndroidServiceContext {
        vm: JavaVM,
        context: GlobalRef,
        api_level: u32,
    }

    impl AndroidServiceContext {
        pub fn new(env: &mut JNIEnv, context: &JObject) -> Result<Self> {
            let vm = env.get_java_vm().context("Failed to get JavaVM")?;
            let sdk_int = env
                .get_static_field("android/os/Build$VERSION", "SDK_INT", "I")
                .context("Failed to read Build.VERSION.SDK_INT")?
                .i()?;
            let context = env
                .new_global_ref(context)
                .context("Failed to pin Android context")?;
            debug!("Android SDK level {}", sdk_int);

            Ok(Self {
                vm,
                context,
                api_level: u32::try_from(sdk_int).unwrap_or(0),
            })
        }

        /// Loads `name` through the app's class loader, which also works from
        /// natively attached threads.
        fn load_class<'l>(&self, env: &mut JNIEnv<'l>, name: &str) -> Result<JClass<'l>> {
            let loader = env
                .call_method(
                    self.context.as_obj(),
                    "getClassLoader",
                    "()Ljava/lang/ClassLoader;",
                    &[],
                )
                .context("Failed to get class loader")?
                .l()?;
            let class_name = JObject::from(env.new_string(name)?);
            let class = env
                .call_method(
                    &loader,
                    "loadClass",
                    "(Ljava/lang/String;)Ljava/lang/Class;",
                    &[JValue::Object(&class_name)],
                )
                .with_context(|| format!("Failed to load {}", name))?
                .l()?;
            Ok(JClass::from(class))
        }

        fn start(&self, request: StartRequest, foreground: bool) -> Result<()> {
            let method = start_method(self.api_level, foreground);
            let mut env = self
                .vm
                .attach_current_thread()
                .context("Failed to attach current thread")?;

            let result = env.with_local_frame(16, |env| -> Result<()> {
                let class = self.load_class(env, &request.component)?;
                let intent = env
                    .new_object(
                        "android/content/Intent",
                        "(Landroid/content/Context;Ljava/lang/Class;)V",
                        &[JValue::Object(self.context.as_obj()), JValue::Object(&class)],
                    )
                    .context("Failed to create Intent")?;

                if let Some(data) = &request.image_data {
                    let key = JObject::from(env.new_string(EXTRA_IMAGE_DATA)?);
                    let bytes = JObject::from(env.byte_array_from_slice(data)?);
                    env.call_method(
                        &intent,
                        "putExtra",
                        "(Ljava/lang/String;[B)Landroid/content/Intent;",
                        &[JValue::Object(&key), JValue::Object(&bytes)],
                    )
                    .context("Failed to attach image data")?;
                }

                let component = env
                    .call_method(
                        self.context.as_obj(),
                        method,
                        "(Landroid/content/Intent;)Landroid/content/ComponentName;",
                        &[JValue::Object(&intent)],
                    )
                    .with_context(|| format!("Context.{} failed", method))?
                    .l()?;
                if component.is_null() {
                    bail!("Unable to start service {}: not found", request.component);
                }
                Ok(())
            });

            if result.is_err() {
                clear_exception(&mut env);
            }
            result?;
            info!("{} accepted {}", method, request.component);
            Ok(())
        }
    }

    impl ServiceContext for AndroidServiceContext {
        fn api_level(&self) -> u32 {
            self.api_level
        }

        fn start_foreground_service(&self, request: StartRequest) -> Result<()> {
            self.start(request, true)
        }

        fn start_service(&self, request: StartRequest) -> Result<()> {
            self.start(request, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreground_start_needs_oreo() {
        assert_eq!(start_method(26, true), "startForegroundService");
        assert_eq!(start_method(34, true), "startForegroundService");
        assert_eq!(start_method(25, true), "startService");
    }

    #[test]
    fn plain_start_is_always_start_service() {
        assert_eq!(start_method(34, false), "startService");
        assert_eq!(start_method(21, false), "startService");
    }
}
