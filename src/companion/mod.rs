//! The companion window showing the ComfyUI web interface.
//!
//! At most one window exists at a time. Surfaces report load results and
//! user closes asynchronously as [`SurfaceEvent`] messages, which the owner
//! feeds back through [`Companion::on_surface_event`].

mod browser;

pub use browser::BrowserFactory;

use crate::error::LauncherResult;
use crate::model::{LaunchConfig, LauncherEvent};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

pub type WindowId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Loaded { window: WindowId },
    LoadFailed { window: WindowId, reason: String },
    /// The user closed the window.
    Closed { window: WindowId },
    RetryDue { window: WindowId },
}

/// Geometry and options a surface is created with.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceSpec {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub remember_position: bool,
    pub always_on_top: bool,
    pub browser_path: Option<String>,
}

impl SurfaceSpec {
    pub fn from_config(cfg: &LaunchConfig) -> Self {
        let b = &cfg.browser_settings;
        Self {
            url: cfg.web_ui_url(),
            width: b.width,
            height: b.height,
            remember_position: b.remember_position,
            always_on_top: b.always_on_top,
            browser_path: b.browser_path.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}

/// A live window. Navigation results arrive later as [`SurfaceEvent`]s.
pub trait Surface: Send {
    fn navigate(&mut self, url: &str);
    fn focus(&mut self);
    fn close(&mut self);
}

pub trait SurfaceFactory: Send {
    fn create(
        &mut self,
        window: WindowId,
        spec: &SurfaceSpec,
        events: UnboundedSender<SurfaceEvent>,
    ) -> LauncherResult<Box<dyn Surface>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryTimings {
    pub first_retry: Duration,
    pub reload: Duration,
}

impl Default for RetryTimings {
    fn default() -> Self {
        Self {
            first_retry: Duration::from_secs(2),
            reload: Duration::from_secs(3),
        }
    }
}

struct CompanionWindow {
    id: WindowId,
    url: String,
    surface: Box<dyn Surface>,
    failures: u32,
}

pub struct Companion {
    factory: Box<dyn SurfaceFactory>,
    window: Option<CompanionWindow>,
    next_id: WindowId,
    timings: RetryTimings,
    events_tx: UnboundedSender<SurfaceEvent>,
    notify: UnboundedSender<LauncherEvent>,
}

impl Companion {
    pub fn new(
        factory: Box<dyn SurfaceFactory>,
        events_tx: UnboundedSender<SurfaceEvent>,
        notify: UnboundedSender<LauncherEvent>,
    ) -> Self {
        Self {
            factory,
            window: None,
            next_id: 1,
            timings: RetryTimings::default(),
            events_tx,
            notify,
        }
    }

    pub fn with_timings(mut self, timings: RetryTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    /// Show the web interface, reusing the live window if there is one.
    pub fn open(&mut self, cfg: &LaunchConfig) -> LauncherResult<WindowId> {
        if let Some(w) = self.window.as_mut() {
            tracing::debug!(window = w.id, "companion already open, focusing");
            w.surface.focus();
            return Ok(w.id);
        }

        let spec = SurfaceSpec::from_config(cfg);
        let id = self.next_id;
        let mut surface = self
            .factory
            .create(id, &spec, self.events_tx.clone())?;
        self.next_id += 1;

        tracing::info!(window = id, url = %spec.url, "opening companion window");
        surface.navigate(&spec.url);
        self.window = Some(CompanionWindow {
            id,
            url: spec.url,
            surface,
            failures: 0,
        });
        Ok(id)
    }

    /// Destroy the tracked window. Returns `false` if none was open.
    pub fn close(&mut self) -> bool {
        let Some(mut w) = self.window.take() else {
            return false;
        };
        tracing::info!(window = w.id, "closing companion window");
        w.surface.close();
        self.emit(LauncherEvent::BrowserClosed);
        true
    }

    pub fn on_surface_event(&mut self, ev: SurfaceEvent) {
        match ev {
            SurfaceEvent::Loaded { window } => {
                if self.current(window).is_some() {
                    tracing::info!(window, "companion loaded");
                }
            }
            SurfaceEvent::LoadFailed { window, reason } => {
                let timings = self.timings;
                let Some(w) = self.current(window) else {
                    return;
                };
                w.failures += 1;
                let delay = if w.failures == 1 {
                    timings.first_retry
                } else {
                    timings.reload
                };
                tracing::warn!(window, failures = w.failures, %reason, ?delay, "companion load failed, retrying");
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(SurfaceEvent::RetryDue { window });
                });
            }
            SurfaceEvent::RetryDue { window } => {
                if let Some(w) = self.current(window) {
                    tracing::debug!(window, url = %w.url, "reloading companion");
                    let url = w.url.clone();
                    w.surface.navigate(&url);
                }
            }
            SurfaceEvent::Closed { window } => {
                if self.current(window).is_some() {
                    tracing::info!(window, "companion closed by user");
                    self.window = None;
                    self.emit(LauncherEvent::BrowserClosed);
                }
            }
        }
    }

    fn current(&mut self, window: WindowId) -> Option<&mut CompanionWindow> {
        self.window.as_mut().filter(|w| w.id == window)
    }

    fn emit(&self, ev: LauncherEvent) {
        let _ = self.notify.send(ev);
    }
}
