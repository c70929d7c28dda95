// Foreground wallpaper service: one operation per instance, guarded by a timeout
use log::{debug, error, info, warn};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::applier::WallpaperApplier;
use crate::config::ServiceConfig;
use crate::error::{Result, WallpaperError};
use crate::handler::{Callback, MainHandler};
use crate::launcher::StartRequest;
use crate::notification::{
    Notification, NotificationChannel, MSG_FAILURE, MSG_NO_DATA, MSG_SETTING, MSG_SUCCESS,
    MSG_TIMED_OUT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationState {
    Idle,
    Starting,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Stopped,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Stopped
        )
    }
}

/// What the host should do if the process is killed while the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    NotSticky,
    Sticky,
}

/// Hooks the hosting environment gives a service instance.
pub trait ServiceHost: Send + Sync {
    fn create_notification_channel(&self, channel: &NotificationChannel);
    fn start_foreground(&self, id: i32, notification: &Notification);
    fn notify(&self, id: i32, notification: &Notification);
    fn stop_self(&self);
}

/// A unit of background work whose lifecycle is driven by a host.
///
/// All lifecycle callbacks are invoked on the host's main handler.
pub trait ManagedService: Send + Sync {
    fn on_create(&self);
    fn on_start_command(&self, request: Option<StartRequest>) -> StartMode;
    fn on_destroy(&self);
    fn state(&self) -> OperationState;

    /// Whether a new request would interrupt work in progress.
    fn is_busy(&self) -> bool {
        matches!(
            self.state(),
            OperationState::Idle | OperationState::Starting | OperationState::Running
        )
    }
}

pub struct WallpaperService {
    inner: Arc<Inner>,
}

struct Inner {
    handler: MainHandler,
    host: Arc<dyn ServiceHost>,
    applier: WallpaperApplier,
    config: ServiceConfig,
    state: Mutex<OperationState>,
    timeout: Mutex<Option<Callback>>,
    pending_stop: Mutex<Option<Callback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WallpaperService {
    pub fn new(
        handler: MainHandler,
        host: Arc<dyn ServiceHost>,
        applier: WallpaperApplier,
        config: ServiceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                host,
                applier,
                config,
                state: Mutex::new(OperationState::Idle),
                timeout: Mutex::new(None),
                pending_stop: Mutex::new(None),
            }),
        }
    }
}

impl ManagedService for WallpaperService {
    fn on_create(&self) {
        info!("WallpaperService created");
        self.inner
            .host
            .create_notification_channel(&self.inner.config.channel);
    }

    fn on_start_command(&self, request: Option<StartRequest>) -> StartMode {
        let inner = &self.inner;
        if !inner.transition(&[OperationState::Idle], OperationState::Starting) {
            warn!("Ignoring start command, service is {:?}", inner.state());
            return StartMode::NotSticky;
        }
        info!("WallpaperService started");

        inner
            .host
            .start_foreground(inner.config.notification_id, &inner.notification(MSG_SETTING));
        inner.arm_timeout();

        let image_data = request
            .and_then(|request| request.image_data)
            .filter(|data| !data.is_empty());

        match image_data {
            Some(image_data) => {
                info!("Received image data: {} bytes", image_data.len());
                inner.set_state(OperationState::Running);

                let worker = Arc::clone(inner);
                inner.handler.run_on_worker(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        worker.applier.try_apply_bytes(&image_data)
                    }))
                    .unwrap_or_else(|_| {
                        Err(WallpaperError::Platform(
                            "wallpaper platform call panicked".to_string(),
                        ))
                    });
                    let handler = worker.handler.clone();
                    handler.post(move || worker.on_apply_finished(result));
                });
            }
            None => {
                error!("No image data provided");
                inner.notify(MSG_NO_DATA);
                inner.cancel_timeout();
                let host = Arc::clone(&inner.host);
                inner.handler.post(move || host.stop_self());
            }
        }

        StartMode::NotSticky
    }

    fn on_destroy(&self) {
        self.inner.cancel_timeout();
        if let Some(stop) = lock(&self.inner.pending_stop).take() {
            stop.cancel();
        }
        self.inner.set_state(OperationState::Stopped);
        info!("WallpaperService destroyed");
    }

    fn state(&self) -> OperationState {
        self.inner.state()
    }
}

impl Inner {
    fn state(&self) -> OperationState {
        *lock(&self.state)
    }

    fn set_state(&self, next: OperationState) {
        let mut state = lock(&self.state);
        debug!("WallpaperService {:?} -> {:?}", *state, next);
        *state = next;
    }

    /// Moves to `next` only from one of `from`.
    fn transition(&self, from: &[OperationState], next: OperationState) -> bool {
        let mut state = lock(&self.state);
        if !from.contains(&*state) {
            return false;
        }
        debug!("WallpaperService {:?} -> {:?}", *state, next);
        *state = next;
        true
    }

    fn notification(&self, text: &str) -> Notification {
        Notification::new(&self.config.channel.id, &self.config.title, text)
    }

    fn notify(&self, text: &str) {
        self.host
            .notify(self.config.notification_id, &self.notification(text));
    }

    fn arm_timeout(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let callback = self
            .handler
            .post_delayed(self.config.timeout, move || inner.on_timeout());
        if let Some(previous) = lock(&self.timeout).replace(callback) {
            previous.cancel();
        }
    }

    fn cancel_timeout(&self) {
        if let Some(timeout) = lock(&self.timeout).take() {
            self.handler.remove_callbacks(&timeout);
        }
    }

    fn on_timeout(&self) {
        if !self.transition(
            &[OperationState::Starting, OperationState::Running],
            OperationState::TimedOut,
        ) {
            return;
        }
        lock(&self.timeout).take();
        warn!(
            "{}, stopping wallpaper service",
            WallpaperError::Timeout(self.config.timeout)
        );
        self.notify(MSG_TIMED_OUT);
        self.host.stop_self();
    }

    fn on_apply_finished(&self, result: Result<(u32, u32)>) {
        let (next, grace) = match &result {
            Ok(_) => (OperationState::Succeeded, self.config.success_grace),
            Err(_) => (OperationState::Failed, self.config.failure_grace),
        };
        if !self.transition(&[OperationState::Running], next) {
            debug!("Discarding wallpaper result, service is {:?}", self.state());
            return;
        }
        self.cancel_timeout();
        self.schedule_stop(next, grace);

        match result {
            Ok((width, height)) => {
                info!("Wallpaper set successfully via foreground service ({}x{})", width, height);
                self.notify(MSG_SUCCESS);
            }
            Err(e) => {
                error!("Failed to set wallpaper in service: {}", e);
                self.notify(MSG_FAILURE);
            }
        }
    }

    fn schedule_stop(&self, reason: OperationState, grace: Duration) {
        let host = Arc::clone(&self.host);
        let stop = self.handler.post_delayed(grace, move || {
            info!("Stopping wallpaper service after {:?} operation", reason);
            host.stop_self();
        });
        *lock(&self.pending_stop) = Some(stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::test_support::{jpeg_bytes, RecordingPlatform};
    use crate::platform::WallpaperPlatform;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq)]
    enum HostEvent {
        Channel(String),
        Foreground(String),
        Notify(String),
        Stop,
    }

    struct FakeHost(mpsc::UnboundedSender<HostEvent>);

    impl ServiceHost for FakeHost {
        fn create_notification_channel(&self, channel: &NotificationChannel) {
            let _ = self.0.send(HostEvent::Channel(channel.id.clone()));
        }

        fn start_foreground(&self, _id: i32, notification: &Notification) {
            let _ = self.0.send(HostEvent::Foreground(notification.text.clone()));
        }

        fn notify(&self, _id: i32, notification: &Notification) {
            let _ = self.0.send(HostEvent::Notify(notification.text.clone()));
        }

        fn stop_self(&self) {
            let _ = self.0.send(HostEvent::Stop);
        }
    }

    fn service(
        platform: Arc<RecordingPlatform>,
        config: ServiceConfig,
    ) -> (WallpaperService, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = WallpaperService::new(
            MainHandler::spawn(),
            Arc::new(FakeHost(tx)),
            WallpaperApplier::new(platform as Arc<dyn WallpaperPlatform>),
            config,
        );
        (service, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
        timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    fn fast_config() -> ServiceConfig {
        ServiceConfig::default()
            .with_timeout(Duration::from_secs(5))
            .with_grace_periods(Duration::from_millis(50), Duration::from_millis(50))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_request_stops_without_running() {
        let platform = Arc::new(RecordingPlatform::default());
        let (service, mut rx) = service(Arc::clone(&platform), fast_config());

        service.on_create();
        service.on_start_command(None);

        assert_eq!(next(&mut rx).await, HostEvent::Channel("WallpaperServiceChannel".into()));
        assert_eq!(next(&mut rx).await, HostEvent::Foreground(MSG_SETTING.into()));
        assert_eq!(next(&mut rx).await, HostEvent::Notify(MSG_NO_DATA.into()));
        assert_eq!(next(&mut rx).await, HostEvent::Stop);
        assert_eq!(service.state(), OperationState::Starting);
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_payload_is_treated_as_missing() {
        let platform = Arc::new(RecordingPlatform::default());
        let (service, mut rx) = service(Arc::clone(&platform), fast_config());

        let request = StartRequest::wallpaper(Vec::new());
        service.on_start_command(Some(request));

        assert_eq!(next(&mut rx).await, HostEvent::Foreground(MSG_SETTING.into()));
        assert_eq!(next(&mut rx).await, HostEvent::Notify(MSG_NO_DATA.into()));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn success_then_stop_after_grace() {
        let platform = Arc::new(RecordingPlatform::default());
        let (service, mut rx) = service(Arc::clone(&platform), fast_config());

        service.on_start_command(Some(StartRequest::wallpaper(jpeg_bytes(8, 8))));

        assert_eq!(next(&mut rx).await, HostEvent::Foreground(MSG_SETTING.into()));
        assert_eq!(next(&mut rx).await, HostEvent::Notify(MSG_SUCCESS.into()));
        assert_eq!(service.state(), OperationState::Succeeded);
        assert_eq!(next(&mut rx).await, HostEvent::Stop);
        assert_eq!(platform.calls().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn decode_failure_is_reported() {
        let platform = Arc::new(RecordingPlatform::default());
        let (service, mut rx) = service(Arc::clone(&platform), fast_config());

        service.on_start_command(Some(StartRequest::wallpaper(b"garbage".to_vec())));

        assert_eq!(next(&mut rx).await, HostEvent::Foreground(MSG_SETTING.into()));
        assert_eq!(next(&mut rx).await, HostEvent::Notify(MSG_FAILURE.into()));
        assert_eq!(service.state(), OperationState::Failed);
        assert_eq!(next(&mut rx).await, HostEvent::Stop);
        assert!(platform.calls().is_empty());
    }

    struct PanickingPlatform;

    impl WallpaperPlatform for PanickingPlatform {
        fn set_bitmap(&self, _bitmap: &crate::applier::Bitmap) -> anyhow::Result<()> {
            panic!("native wallpaper call crashed");
        }

        fn set_stream(&self, _stream: &mut dyn std::io::Read) -> anyhow::Result<()> {
            panic!("native wallpaper call crashed");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_platform_is_a_failure_not_a_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = WallpaperService::new(
            MainHandler::spawn(),
            Arc::new(FakeHost(tx)),
            WallpaperApplier::new(Arc::new(PanickingPlatform)),
            ServiceConfig::default()
                .with_timeout(Duration::from_secs(2))
                .with_grace_periods(Duration::from_millis(50), Duration::from_millis(50)),
        );

        service.on_start_command(Some(StartRequest::wallpaper(jpeg_bytes(4, 4))));

        assert_eq!(next(&mut rx).await, HostEvent::Foreground(MSG_SETTING.into()));
        let started = std::time::Instant::now();
        assert_eq!(next(&mut rx).await, HostEvent::Notify(MSG_FAILURE.into()));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(service.state(), OperationState::Failed);
        assert_eq!(next(&mut rx).await, HostEvent::Stop);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_start_is_ignored() {
        let platform = Arc::new(RecordingPlatform::default());
        let (service, mut rx) = service(Arc::clone(&platform), fast_config());

        service.on_start_command(None);
        assert_eq!(
            service.on_start_command(Some(StartRequest::wallpaper(jpeg_bytes(2, 2)))),
            StartMode::NotSticky
        );

        assert_eq!(next(&mut rx).await, HostEvent::Foreground(MSG_SETTING.into()));
        assert_eq!(next(&mut rx).await, HostEvent::Notify(MSG_NO_DATA.into()));
        assert_eq!(next(&mut rx).await, HostEvent::Stop);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn destroy_cancels_pending_stop() {
        let platform = Arc::new(RecordingPlatform::default());
        let config = fast_config()
            .with_grace_periods(Duration::from_millis(200), Duration::from_millis(200));
        let (service, mut rx) = service(platform, config);

        service.on_start_command(Some(StartRequest::wallpaper(jpeg_bytes(2, 2))));
        assert_eq!(next(&mut rx).await, HostEvent::Foreground(MSG_SETTING.into()));
        assert_eq!(next(&mut rx).await, HostEvent::Notify(MSG_SUCCESS.into()));

        service.on_destroy();
        assert_eq!(service.state(), OperationState::Stopped);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());
    }
}
