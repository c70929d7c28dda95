pub use crate::app::{DryRunPlatform, ReportEntry, ServiceReport, WallsvcCliApp};

mod app {
    use anyhow::{Context, Result};
    use log::info;
    use serde::Serialize;
    use std::io::Read;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::sync::mpsc;
    use wallsvc_core::*;

    /// Logs what would be applied without touching the desktop.
    pub struct DryRunPlatform;

    impl WallpaperPlatform for DryRunPlatform {
        fn set_bitmap(&self, bitmap: &Bitmap) -> anyhow::Result<()> {
            info!("[dry-run] would set {}x{} bitmap", bitmap.width(), bitmap.height());
            Ok(())
        }

        fn set_stream(&self, stream: &mut dyn Read) -> anyhow::Result<()> {
            let bytes = std::io::copy(stream, &mut std::io::sink())?;
            info!("[dry-run] would stream {} bytes", bytes);
            Ok(())
        }
    }

    #[derive(Debug, Serialize)]
    pub struct ReportEntry {
        pub at_ms: u128,
        #[serde(flatten)]
        pub event: NotificationEvent,
    }

    #[derive(Debug, Serialize)]
    pub struct ServiceReport {
        pub accepted: bool,
        pub elapsed_ms: u128,
        pub notifications: Vec<ReportEntry>,
    }

    impl ServiceReport {
        pub fn texts(&self) -> Vec<&str> {
            self.notifications
                .iter()
                .filter_map(|entry| match &entry.event {
                    NotificationEvent::Posted { notification, .. } => Some(notification.text.as_str()),
                    NotificationEvent::Cancelled { .. } => None,
                })
                .collect()
        }
    }

    enum Progress {
        Started,
        Finished(bool, Option<String>),
    }

    struct PrintingCallback(mpsc::UnboundedSender<Progress>);

    impl SetterCallback for PrintingCallback {
        fn on_pre_execute(&self) {
            let _ = self.0.send(Progress::Started);
        }

        fn on_post_execute(&self, success: bool, error: Option<&str>) {
            let _ = self.0.send(Progress::Finished(success, error.map(str::to_string)));
        }
    }

    pub struct WallsvcCliApp {
        platform: Arc<dyn WallpaperPlatform>,
    }

    impl WallsvcCliApp {
        pub fn new(dry_run: bool) -> Self {
            let platform: Arc<dyn WallpaperPlatform> = if dry_run {
                Arc::new(DryRunPlatform)
            } else {
                default_platform()
            };
            Self::with_platform(platform)
        }

        pub fn with_platform(platform: Arc<dyn WallpaperPlatform>) -> Self {
            Self { platform }
        }

        fn applier(&self) -> WallpaperApplier {
            WallpaperApplier::new(Arc::clone(&self.platform))
        }

        /// Decodes `path` and applies it on the calling thread.
        pub fn apply_file(&self, path: &Path) -> Result<()> {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let (width, height) = self.applier().try_apply_bytes(&bytes)?;
            println!("Set wallpaper: {} ({}x{})", path.display(), width, height);
            Ok(())
        }

        /// Applies each file in turn on the background worker. Returns how
        /// many succeeded.
        pub async fn set_files(&self, files: &[PathBuf]) -> Result<usize> {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let executor = BackgroundExecutor::new(
                self.applier(),
                MainHandler::spawn(),
                Some(Arc::new(PrintingCallback(tx))),
            )?;

            for file in files {
                executor.execute(std::slice::from_ref(file))?;
            }
            executor.shutdown();

            let mut finished = 0;
            let mut succeeded = 0;
            while finished < files.len() {
                match rx.recv().await {
                    Some(Progress::Started) => println!("Setting wallpaper..."),
                    Some(Progress::Finished(true, _)) => {
                        println!("{}", files[finished].display());
                        finished += 1;
                        succeeded += 1;
                    }
                    Some(Progress::Finished(false, error)) => {
                        eprintln!(
                            "{}: {}",
                            files[finished].display(),
                            error.unwrap_or_else(|| "Failed to set wallpaper".to_string())
                        );
                        finished += 1;
                    }
                    None => break,
                }
            }
            Ok(succeeded)
        }

        /// Runs the foreground wallpaper service headlessly on `path` and
        /// collects every notification it posted.
        pub async fn run_service(
            &self,
            path: &Path,
            config: ServiceConfig,
            api_level: u32,
        ) -> Result<ServiceReport> {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;

            let history = Arc::new(NotificationHistory::echoing());
            let manager = ServiceManager::new(
                MainHandler::spawn(),
                ServiceRegistry::wallpaper(self.applier(), config),
                history.clone(),
                api_level,
            );

            let started = Instant::now();
            let accepted = start_wallpaper_service(&manager, &bytes);
            if accepted {
                manager.wait_until_idle().await;
            }

            let notifications = history
                .events()
                .into_iter()
                .map(|(at, event)| ReportEntry {
                    at_ms: at.saturating_duration_since(started).as_millis(),
                    event,
                })
                .collect();

            Ok(ServiceReport {
                accepted,
                elapsed_ms: started.elapsed().as_millis(),
                notifications,
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::Cursor;
        use std::time::Duration;
        use wallsvc_core::notification::{MSG_SETTING, MSG_SUCCESS};

        fn write_png(dir: &Path, name: &str) -> PathBuf {
            let img = image::RgbImage::from_pixel(12, 7, image::Rgb([200, 10, 10]));
            let mut out = Cursor::new(Vec::new());
            image::DynamicImage::ImageRgb8(img)
                .write_to(&mut out, image::ImageFormat::Png)
                .unwrap();
            let path = dir.join(name);
            std::fs::write(&path, out.into_inner()).unwrap();
            path
        }

        #[test]
        fn apply_file_reports_missing_file() {
            let app = WallsvcCliApp::with_platform(Arc::new(DryRunPlatform));
            let err = app.apply_file(Path::new("/no/such/file.png")).unwrap_err();
            assert!(err.to_string().contains("Failed to read"));
        }

        #[test]
        fn apply_file_decodes_image() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_png(dir.path(), "a.png");
            let app = WallsvcCliApp::with_platform(Arc::new(DryRunPlatform));
            app.apply_file(&path).unwrap();
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn set_files_counts_successes() {
            let dir = tempfile::tempdir().unwrap();
            let good = write_png(dir.path(), "good.png");
            let missing = dir.path().join("missing.png");
            let app = WallsvcCliApp::with_platform(Arc::new(DryRunPlatform));

            let succeeded = app.set_files(&[good.clone(), missing, good]).await.unwrap();
            assert_eq!(succeeded, 2);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn service_report_lists_notifications() {
            let dir = tempfile::tempdir().unwrap();
            let path = write_png(dir.path(), "svc.png");
            let app = WallsvcCliApp::with_platform(Arc::new(DryRunPlatform));
            let config = ServiceConfig::default()
                .with_grace_periods(Duration::from_millis(20), Duration::from_millis(20));

            let report = app.run_service(&path, config, 34).await.unwrap();
            assert!(report.accepted);
            assert_eq!(report.texts(), vec![MSG_SETTING, MSG_SUCCESS]);

            let json = serde_json::to_value(&report).unwrap();
            assert_eq!(json["notifications"][0]["event"], "posted");
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn empty_file_is_not_accepted() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("empty.png");
            std::fs::write(&path, b"").unwrap();
            let app = WallsvcCliApp::with_platform(Arc::new(DryRunPlatform));

            let report = app
                .run_service(&path, ServiceConfig::default(), 34)
                .await
                .unwrap();
            assert!(!report.accepted);
            assert!(report.notifications.is_empty());
        }
    }
}
