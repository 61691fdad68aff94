use super::{Surface, SurfaceEvent, SurfaceFactory, SurfaceSpec, WindowId};
use crate::error::{LauncherError, LauncherResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Chromium-family executables that support `--app`, in preference order.
const BROWSER_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "microsoft-edge",
    "microsoft-edge-stable",
    "msedge",
    "chrome",
    "brave-browser",
];

const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Opens the web interface as an application-mode browser window.
pub struct BrowserFactory {
    profile_dir: PathBuf,
    client: reqwest::Client,
}

impl Default for BrowserFactory {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        Self::with_profile_dir(base.join("comfy-launcher").join("companion-profile"))
    }
}

impl BrowserFactory {
    pub fn with_profile_dir(profile_dir: PathBuf) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            profile_dir,
            client,
        }
    }

    fn locate(spec: &SurfaceSpec) -> LauncherResult<PathBuf> {
        if let Some(path) = &spec.browser_path {
            return which::which(path).map_err(|e| {
                LauncherError::Environment(format!("Browser {path} not usable: {e}"))
            });
        }
        BROWSER_CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| {
                LauncherError::Environment(
                    "No Chromium-based browser found; set browser_settings.browser_path".into(),
                )
            })
    }
}

impl SurfaceFactory for BrowserFactory {
    fn create(
        &mut self,
        window: WindowId,
        spec: &SurfaceSpec,
        events: UnboundedSender<SurfaceEvent>,
    ) -> LauncherResult<Box<dyn Surface>> {
        let program = Self::locate(spec)?;
        if spec.always_on_top {
            tracing::debug!(window, "always_on_top is not supported by app windows");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_window(WindowTask {
            window,
            program,
            spec: spec.clone(),
            profile_dir: self.profile_dir.clone(),
            client: self.client.clone(),
            commands: rx,
            events,
        }));
        Ok(Box::new(AppWindow { commands: tx }))
    }
}

#[derive(Debug)]
enum WindowCommand {
    Navigate(String),
    Focus,
    Close,
}

struct AppWindow {
    commands: UnboundedSender<WindowCommand>,
}

impl Surface for AppWindow {
    fn navigate(&mut self, url: &str) {
        let _ = self.commands.send(WindowCommand::Navigate(url.to_string()));
    }

    fn focus(&mut self) {
        let _ = self.commands.send(WindowCommand::Focus);
    }

    fn close(&mut self) {
        let _ = self.commands.send(WindowCommand::Close);
    }
}

impl Drop for AppWindow {
    fn drop(&mut self) {
        let _ = self.commands.send(WindowCommand::Close);
    }
}

struct WindowTask {
    window: WindowId,
    program: PathBuf,
    spec: SurfaceSpec,
    profile_dir: PathBuf,
    client: reqwest::Client,
    commands: UnboundedReceiver<WindowCommand>,
    events: UnboundedSender<SurfaceEvent>,
}

pub(crate) fn app_window_args(url: &str, spec: &SurfaceSpec, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--app={url}"),
        format!("--user-data-dir={}", profile_dir.display()),
        format!("--window-size={},{}", spec.width, spec.height),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
    ];
    if !spec.remember_position {
        args.push("--window-position=0,0".to_string());
    }
    args
}

async fn probe(client: &reqwest::Client, url: &str) -> Result<(), String> {
    match client.get(url).send().await {
        // Any HTTP answer means the server is up, whatever the status.
        Ok(resp) => {
            tracing::debug!(url, status = %resp.status(), "companion probe answered");
            Ok(())
        }
        Err(err) => Err(format!("probe failed: {err}")),
    }
}

fn launch(task: &WindowTask, url: &str) -> Result<Child, String> {
    std::fs::create_dir_all(&task.profile_dir).map_err(|e| {
        format!(
            "cannot create browser profile {}: {e}",
            task.profile_dir.display()
        )
    })?;
    let args = app_window_args(url, &task.spec, &task.profile_dir);
    tracing::debug!(window = task.window, program = %task.program.display(), ?args, "launching app window");
    Command::new(&task.program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("cannot launch {}: {e}", task.program.display()))
}

async fn wait_for(child: &mut Option<Child>) -> std::io::Result<std::process::ExitStatus> {
    match child {
        Some(c) => c.wait().await,
        None => futures::future::pending().await,
    }
}

async fn run_window(mut task: WindowTask) {
    let window = task.window;
    let mut child: Option<Child> = None;

    loop {
        tokio::select! {
            cmd = task.commands.recv() => match cmd {
                Some(WindowCommand::Navigate(url)) => {
                    if let Err(reason) = probe(&task.client, &url).await {
                        let _ = task.events.send(SurfaceEvent::LoadFailed { window, reason });
                        continue;
                    }
                    if child.is_none() {
                        match launch(&task, &url) {
                            Ok(c) => child = Some(c),
                            Err(reason) => {
                                let _ = task.events.send(SurfaceEvent::LoadFailed { window, reason });
                                continue;
                            }
                        }
                    }
                    let _ = task.events.send(SurfaceEvent::Loaded { window });
                }
                Some(WindowCommand::Focus) => {
                    // Relaunching with the same profile would open a second window.
                    tracing::debug!(window, "focus requested; app window stays as placed");
                }
                Some(WindowCommand::Close) | None => {
                    if let Some(mut c) = child.take() {
                        if let Err(e) = c.start_kill() {
                            tracing::warn!(window, error = %e, "closing app window failed");
                        }
                        let _ = c.wait().await;
                    }
                    break;
                }
            },
            status = wait_for(&mut child) => {
                tracing::debug!(window, ?status, "app window process exited");
                let _ = task.events.send(SurfaceEvent::Closed { window });
                break;
            }
        }
    }
}
