//! Headless service host.
//!
//! [`ServiceManager`] plays the part the OS plays on a device: it resolves
//! component names, creates service instances, runs their lifecycle on the
//! main handler and routes their notifications to a [`NotificationSink`].
//! At most one service instance is alive at a time.

use anyhow::{bail, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;

use crate::applier::WallpaperApplier;
use crate::config::ServiceConfig;
use crate::error::WallpaperError;
use crate::handler::MainHandler;
use crate::launcher::{
    ServiceContext, StartRequest, API_LEVEL_O, WALLPAPER_SERVICE, WALLPAPER_SERVICE_ALIAS,
};
use crate::notification::{Notification, NotificationChannel, NotificationSink};
use crate::service::{ManagedService, OperationState, ServiceHost, WallpaperService};

/// What a factory gets to build a service instance with.
pub struct ServiceEnv {
    pub handler: MainHandler,
    pub host: Arc<dyn ServiceHost>,
}

pub type ServiceFactory = Arc<dyn Fn(ServiceEnv) -> Arc<dyn ManagedService> + Send + Sync>;

/// Component names known to the host. Aliases resolve to a registered name.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    factories: HashMap<String, ServiceFactory>,
    aliases: HashMap<String, String>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the wallpaper service under its canonical and legacy names.
    pub fn wallpaper(applier: WallpaperApplier, config: ServiceConfig) -> Self {
        let mut registry = Self::new();
        registry.register(WALLPAPER_SERVICE, wallpaper_service_factory(applier, config));
        registry.register_alias(WALLPAPER_SERVICE_ALIAS, WALLPAPER_SERVICE);
        registry
    }

    pub fn register(&mut self, name: &str, factory: ServiceFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn register_alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(alias.to_string(), target.to_string());
    }

    pub fn resolve(&self, name: &str) -> Option<(&str, &ServiceFactory)> {
        let canonical = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.factories
            .get_key_value(canonical)
            .map(|(name, factory)| (name.as_str(), factory))
    }
}

pub fn wallpaper_service_factory(applier: WallpaperApplier, config: ServiceConfig) -> ServiceFactory {
    Arc::new(move |env: ServiceEnv| {
        Arc::new(WallpaperService::new(
            env.handler,
            env.host,
            applier.clone(),
            config.clone(),
        )) as Arc<dyn ManagedService>
    })
}

#[derive(Clone)]
pub struct ServiceManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    handler: MainHandler,
    registry: ServiceRegistry,
    sink: Arc<dyn NotificationSink>,
    api_level: u32,
    active: Mutex<Option<ActiveService>>,
    next_id: AtomicU64,
    idle: watch::Sender<bool>,
}

struct ActiveService {
    id: u64,
    name: String,
    service: Arc<dyn ManagedService>,
    host: Arc<InstanceHost>,
}

impl ActiveService {
    fn destroy(&self, sink: &dyn NotificationSink) {
        self.service.on_destroy();
        let foreground = self
            .host
            .foreground_id
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(id) = foreground {
            sink.cancel(id);
        }
        info!("Service {} #{} destroyed", self.name, self.id);
    }
}

/// The hooks handed to one service instance.
struct InstanceHost {
    id: u64,
    manager: Weak<ManagerInner>,
    sink: Arc<dyn NotificationSink>,
    foreground_id: Mutex<Option<i32>>,
}

impl ServiceHost for InstanceHost {
    fn create_notification_channel(&self, channel: &NotificationChannel) {
        self.sink.create_channel(channel);
    }

    fn start_foreground(&self, id: i32, notification: &Notification) {
        *self.foreground_id.lock().unwrap_or_else(|p| p.into_inner()) = Some(id);
        self.sink.notify(id, notification);
    }

    fn notify(&self, id: i32, notification: &Notification) {
        self.sink.notify(id, notification);
    }

    fn stop_self(&self) {
        let Some(manager) = self.manager.upgrade() else {
            debug!("Service #{} outlived its manager", self.id);
            return;
        };
        let id = self.id;
        let target = Arc::clone(&manager);
        manager.handler.post(move || target.stop_instance(id));
    }
}

fn lock(active: &Mutex<Option<ActiveService>>) -> MutexGuard<'_, Option<ActiveService>> {
    active.lock().unwrap_or_else(|p| p.into_inner())
}

impl ManagerInner {
    fn stop_instance(&self, id: u64) {
        let stopped = {
            let mut active = lock(&self.active);
            match active.take() {
                Some(current) if current.id == id => Some(current),
                other => {
                    *active = other;
                    None
                }
            }
        };

        let Some(stopped) = stopped else {
            debug!("Stop for service #{} ignored, no longer active", id);
            return;
        };
        stopped.destroy(&*self.sink);

        if lock(&self.active).is_none() {
            self.idle.send_replace(true);
        }
    }
}

impl ServiceManager {
    pub fn new(
        handler: MainHandler,
        registry: ServiceRegistry,
        sink: Arc<dyn NotificationSink>,
        api_level: u32,
    ) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(ManagerInner {
                handler,
                registry,
                sink,
                api_level,
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
                idle,
            }),
        }
    }

    pub fn handler(&self) -> &MainHandler {
        &self.inner.handler
    }

    /// State of the live service instance, if any.
    pub fn active_state(&self) -> Option<OperationState> {
        lock(&self.inner.active)
            .as_ref()
            .map(|active| active.service.state())
    }

    pub fn is_idle(&self) -> bool {
        *self.inner.idle.borrow()
    }

    /// Resolves once no service instance is alive.
    pub async fn wait_until_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    fn dispatch(&self, request: StartRequest, foreground: bool) -> Result<()> {
        let inner = &self.inner;
        let Some((name, factory)) = inner.registry.resolve(&request.component) else {
            bail!("Unable to start service {}: not found", request.component);
        };
        if !foreground && inner.api_level >= API_LEVEL_O {
            bail!("Not allowed to start service {} from the background", name);
        }

        let mut active = lock(&inner.active);
        let lingering = match active.take() {
            Some(current) if current.service.is_busy() => {
                warn!("Service {} #{} is still busy, rejecting start", current.name, current.id);
                *active = Some(current);
                return Err(WallpaperError::Busy.into());
            }
            other => other,
        };

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let host = Arc::new(InstanceHost {
            id,
            manager: Arc::downgrade(inner),
            sink: Arc::clone(&inner.sink),
            foreground_id: Mutex::new(None),
        });
        let service = factory(ServiceEnv {
            handler: inner.handler.clone(),
            host: Arc::clone(&host) as Arc<dyn ServiceHost>,
        });
        *active = Some(ActiveService {
            id,
            name: name.to_string(),
            service: Arc::clone(&service),
            host,
        });
        inner.idle.send_replace(false);
        drop(active);

        if let Some(lingering) = lingering {
            info!("Replacing service {} #{} that was winding down", lingering.name, lingering.id);
            let sink = Arc::clone(&inner.sink);
            inner.handler.post(move || lingering.destroy(&*sink));
        }

        info!("Starting service {} #{} (foreground: {})", name, id, foreground);
        inner.handler.post(move || {
            service.on_create();
            service.on_start_command(Some(request));
        });
        Ok(())
    }
}

impl ServiceContext for ServiceManager {
    fn api_level(&self) -> u32 {
        self.inner.api_level
    }

    fn start_foreground_service(&self, request: StartRequest) -> Result<()> {
        self.dispatch(request, true)
    }

    fn start_service(&self, request: StartRequest) -> Result<()> {
        self.dispatch(request, false)
    }
}
