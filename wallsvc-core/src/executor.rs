use log::{error, info};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::applier::WallpaperApplier;
use crate::error::{Result, WallpaperError};
use crate::handler::MainHandler;

/// Progress callbacks, always delivered on the main handler.
pub trait SetterCallback: Send + Sync {
    fn on_pre_execute(&self);
    fn on_post_execute(&self, success: bool, error: Option<&str>);
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Applies wallpapers from files on one dedicated worker thread, so
/// operations submitted to the same executor never overlap.
pub struct BackgroundExecutor {
    applier: WallpaperApplier,
    handler: MainHandler,
    callback: Option<Arc<dyn SetterCallback>>,
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundExecutor {
    pub fn new(
        applier: WallpaperApplier,
        handler: MainHandler,
        callback: Option<Arc<dyn SetterCallback>>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = std::thread::Builder::new()
            .name("wallpaper-setter".to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })?;

        Ok(Self {
            applier,
            handler,
            callback,
            jobs: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Sets the wallpaper from the first of `paths`.
    pub fn execute(&self, paths: &[PathBuf]) -> Result<()> {
        let jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
        let Some(sender) = jobs.as_ref() else {
            return Err(WallpaperError::Shutdown);
        };

        // The worker holds the apply back until the pre callback has run.
        let (pre_done, pre_ran) = mpsc::channel::<()>();
        let callback = self.callback.clone();
        self.handler.post(move || {
            info!("Starting wallpaper setting operation...");
            if let Some(callback) = callback {
                callback.on_pre_execute();
            }
            let _ = pre_done.send(());
        });

        let applier = self.applier.clone();
        let handler = self.handler.clone();
        let callback = self.callback.clone();
        let path = paths.first().cloned();
        let job: Job = Box::new(move || {
            // Err means the looper dropped the closure; nothing left to wait for.
            let _ = pre_ran.recv();
            let result = match path {
                Some(path) => applier.try_apply_path(&path),
                None => Err(WallpaperError::invalid("No image path provided")),
            };

            handler.post(move || {
                let error = result.err().map(|e| e.to_string());
                match &error {
                    None => info!("Wallpaper setting completed: Wallpaper set successfully"),
                    Some(e) => error!("Wallpaper setting completed: {}", e),
                }
                if let Some(callback) = callback {
                    callback.on_post_execute(error.is_none(), error.as_deref());
                }
            });
        });

        sender.send(job).map_err(|_| WallpaperError::Shutdown)
    }

    /// Stops accepting work. Queued and running jobs still complete.
    pub fn shutdown(&self) {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    /// Shuts down and waits for the worker to drain its queue.
    pub fn join(&self) {
        self.shutdown();
        let worker = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("wallpaper-setter worker panicked");
            }
        }
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::test_support::{Call, RecordingPlatform};
    use crate::platform::WallpaperPlatform;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc as async_mpsc;
    use tokio::time::{timeout, Duration};

    #[derive(Debug, PartialEq)]
    enum Event {
        Pre,
        Post(bool, Option<String>),
    }

    struct ChannelCallback(async_mpsc::UnboundedSender<Event>);

    impl SetterCallback for ChannelCallback {
        fn on_pre_execute(&self) {
            let _ = self.0.send(Event::Pre);
        }

        fn on_post_execute(&self, success: bool, error: Option<&str>) {
            let _ = self.0.send(Event::Post(success, error.map(str::to_string)));
        }
    }

    fn executor(
        platform: Arc<RecordingPlatform>,
    ) -> (BackgroundExecutor, async_mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = async_mpsc::unbounded_channel();
        let executor = BackgroundExecutor::new(
            WallpaperApplier::new(platform as Arc<dyn WallpaperPlatform>),
            MainHandler::spawn(),
            Some(Arc::new(ChannelCallback(tx))),
        )
        .unwrap();
        (executor, rx)
    }

    async fn next(rx: &mut async_mpsc::UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pre_is_delivered_before_post() {
        let platform = Arc::new(RecordingPlatform::default());
        let (executor, mut rx) = executor(Arc::clone(&platform));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"image").unwrap();

        executor.execute(&[file.path().to_path_buf()]).unwrap();

        assert_eq!(next(&mut rx).await, Event::Pre);
        assert_eq!(next(&mut rx).await, Event::Post(true, None));
        assert_eq!(platform.calls().len(), 1);
    }

    /// Remembers whether the pre callback had run when the platform was called.
    struct OrderingPlatform {
        pre_ran: Arc<AtomicBool>,
        seen_at_apply: Mutex<Option<bool>>,
    }

    impl WallpaperPlatform for OrderingPlatform {
        fn set_bitmap(&self, _bitmap: &crate::applier::Bitmap) -> anyhow::Result<()> {
            Ok(())
        }

        fn set_stream(&self, _stream: &mut dyn std::io::Read) -> anyhow::Result<()> {
            *self.seen_at_apply.lock().unwrap() = Some(self.pre_ran.load(Ordering::SeqCst));
            Ok(())
        }
    }

    struct FlagCallback {
        pre_ran: Arc<AtomicBool>,
        done: async_mpsc::UnboundedSender<bool>,
    }

    impl SetterCallback for FlagCallback {
        fn on_pre_execute(&self) {
            self.pre_ran.store(true, Ordering::SeqCst);
        }

        fn on_post_execute(&self, success: bool, _error: Option<&str>) {
            let _ = self.done.send(success);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn apply_waits_for_pre_callback_on_busy_handler() {
        let pre_ran = Arc::new(AtomicBool::new(false));
        let platform = Arc::new(OrderingPlatform {
            pre_ran: Arc::clone(&pre_ran),
            seen_at_apply: Mutex::new(None),
        });
        let (done, mut done_rx) = async_mpsc::unbounded_channel();
        let handler = MainHandler::spawn();
        let executor = BackgroundExecutor::new(
            WallpaperApplier::new(Arc::clone(&platform) as Arc<dyn WallpaperPlatform>),
            handler.clone(),
            Some(Arc::new(FlagCallback { pre_ran, done })),
        )
        .unwrap();

        handler.post(|| std::thread::sleep(Duration::from_millis(300)));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"image").unwrap();
        executor.execute(&[file.path().to_path_buf()]).unwrap();

        let success = timeout(Duration::from_secs(5), done_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(success);
        assert_eq!(*platform.seen_at_apply.lock().unwrap(), Some(true));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_file_reports_failure_message() {
        let platform = Arc::new(RecordingPlatform::default());
        let (executor, mut rx) = executor(Arc::clone(&platform));

        executor.execute(&[PathBuf::from("/no/such/wallpaper.png")]).unwrap();

        assert_eq!(next(&mut rx).await, Event::Pre);
        match next(&mut rx).await {
            Event::Post(false, Some(msg)) => assert!(msg.contains("does not exist")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_path_list_is_invalid() {
        let platform = Arc::new(RecordingPlatform::default());
        let (executor, mut rx) = executor(platform);

        executor.execute(&[]).unwrap();

        assert_eq!(next(&mut rx).await, Event::Pre);
        assert!(matches!(next(&mut rx).await, Event::Post(false, Some(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn jobs_complete_in_submission_order() {
        let platform = Arc::new(RecordingPlatform::default());
        let (executor, mut rx) = executor(Arc::clone(&platform));
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| {
                let path = dir.path().join(format!("{}.jpg", i));
                std::fs::write(&path, [i as u8]).unwrap();
                path
            })
            .collect();

        for path in &paths {
            executor.execute(std::slice::from_ref(path)).unwrap();
        }
        tokio::task::block_in_place(|| executor.join());

        let mut posts = 0;
        while posts < 3 {
            if let Event::Post(ok, _) = next(&mut rx).await {
                assert!(ok);
                posts += 1;
            }
        }
        assert_eq!(
            platform.calls(),
            vec![Call::Stream(vec![0]), Call::Stream(vec![1]), Call::Stream(vec![2])]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_rejects_new_work() {
        let platform = Arc::new(RecordingPlatform::default());
        let (executor, _rx) = executor(platform);

        executor.shutdown();
        let err = executor.execute(&[PathBuf::from("/tmp/x.jpg")]).unwrap_err();
        assert!(matches!(err, WallpaperError::Shutdown));
    }
}
