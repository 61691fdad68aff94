//! Supervision of the single ComfyUI server process.
//!
//! The [`Supervisor`] owns at most one running process. Everything the OS
//! reports about that process (output chunks, exit) arrives as
//! [`ProcessEvent`] messages produced by background tasks; the owner of the
//! supervisor feeds them back through [`Supervisor::on_output`],
//! [`Supervisor::on_exit`] and [`Supervisor::on_settled`].

mod command;
mod stream;

pub use command::{build_env_overlay, build_launch_plan};
pub(crate) use stream::Utf8Chunks;

use crate::error::{LauncherError, LauncherResult};
use crate::model::{LaunchConfig, LauncherEvent};
use crate::paths;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Output phrases that mean the web interface is about to be reachable.
pub const READY_MARKERS: [&str; 3] = ["To see the GUI go to", "Starting server", "Server running"];

pub type RunId = u64;

/// Delays used by the supervisor.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// Wait between a readiness marker and the auto-open.
    pub settle_delay: Duration,
    /// Wait between the polite terminate and the forced kill.
    pub grace_period: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(3),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Messages from the background tasks attached to a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Output { run: RunId, chunk: String },
    Exited { run: RunId, code: Option<i32> },
    /// The settle delay after the first readiness marker has elapsed.
    Settled { run: RunId },
}

#[derive(Debug)]
enum ProcessControl {
    Terminate,
}

#[derive(Debug)]
struct ProcessSlot {
    run: RunId,
    pid: u32,
    control: UnboundedSender<ProcessControl>,
    config: LaunchConfig,
    ready_seen: bool,
}

pub struct Supervisor {
    slot: Option<ProcessSlot>,
    /// Stopped runs whose watcher has not reported the exit yet.
    draining: Vec<RunId>,
    next_run: RunId,
    timings: Timings,
    notify: UnboundedSender<LauncherEvent>,
    process_tx: UnboundedSender<ProcessEvent>,
}

impl Supervisor {
    #[cfg(test)]
    pub fn new(
        notify: UnboundedSender<LauncherEvent>,
        process_tx: UnboundedSender<ProcessEvent>,
    ) -> Self {
        Self::with_timings(notify, process_tx, Timings::default())
    }

    pub fn with_timings(
        notify: UnboundedSender<LauncherEvent>,
        process_tx: UnboundedSender<ProcessEvent>,
        timings: Timings,
    ) -> Self {
        Self {
            slot: None,
            draining: Vec::new(),
            next_run: 1,
            timings,
            notify,
            process_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.slot.as_ref().map(|s| s.pid)
    }

    /// Runs, tracked or already stopped, whose process has not exited yet.
    pub fn live_runs(&self) -> usize {
        self.draining.len() + usize::from(self.slot.is_some())
    }

    /// Spawn the server for `cfg` and return its pid.
    pub fn start(&mut self, cfg: &LaunchConfig) -> LauncherResult<u32> {
        if let Some(slot) = &self.slot {
            return Err(LauncherError::AlreadyRunning { pid: slot.pid });
        }
        if cfg.comfyui_path.trim().is_empty() {
            return Err(LauncherError::Configuration(
                "ComfyUI path not configured".into(),
            ));
        }

        let root = Path::new(&cfg.comfyui_path);
        let (layout, interpreter) = paths::find_interpreter(root).ok_or_else(|| {
            LauncherError::Environment(format!(
                "Python interpreter not found under {}",
                root.display()
            ))
        })?;

        let plan = build_launch_plan(cfg, &interpreter);
        tracing::info!(
            program = %plan.program.display(),
            cwd = %plan.cwd.display(),
            ?layout,
            "starting ComfyUI"
        );
        tracing::debug!(args = ?plan.args, "launch arguments");

        let mut cmd = Command::new(&plan.program);
        cmd.args(&plan.args)
            .envs(plan.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&plan.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(error = %source, "spawn failed");
                self.emit(LauncherEvent::Stopped);
                return Err(LauncherError::Spawn {
                    program: plan.program.display().to_string(),
                    source,
                });
            }
        };

        let pid = child.id().unwrap_or_default();
        let run = self.next_run;
        self.next_run += 1;

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, run, self.process_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, run, self.process_tx.clone())));
        }

        let (control, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(watch(
            child,
            run,
            control_rx,
            self.process_tx.clone(),
            pumps,
            self.timings.grace_period,
        ));

        self.slot = Some(ProcessSlot {
            run,
            pid,
            control,
            config: cfg.clone(),
            ready_seen: false,
        });
        tracing::info!(pid, run, "ComfyUI started");
        self.emit(LauncherEvent::Started);
        Ok(pid)
    }

    /// Ask the running process to terminate and forget it immediately.
    ///
    /// Returns `false` when nothing was running. The forced kill after the
    /// grace period is carried out by the run's watcher task.
    pub fn stop(&mut self) -> bool {
        let Some(slot) = self.slot.take() else {
            return false;
        };
        tracing::info!(pid = slot.pid, run = slot.run, "stopping ComfyUI");
        if slot.control.send(ProcessControl::Terminate).is_err() {
            tracing::warn!(pid = slot.pid, "watcher already finished before stop");
        }
        // The exit is still owed even if the watcher finished; it is queued.
        self.draining.push(slot.run);
        self.emit(LauncherEvent::Stopped);
        true
    }

    /// Relay an output chunk and scan it for readiness markers.
    pub fn on_output(&mut self, run: RunId, chunk: String) {
        if let Some(slot) = self.slot.as_mut().filter(|s| s.run == run) {
            if !slot.ready_seen && contains_ready_marker(&chunk) {
                slot.ready_seen = true;
                tracing::info!(run, "ComfyUI reported ready");
                if slot.config.browser_settings.auto_open {
                    let tx = self.process_tx.clone();
                    let delay = self.timings.settle_delay;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(ProcessEvent::Settled { run });
                    });
                }
            }
        }
        self.emit(LauncherEvent::Output(chunk));
    }

    /// Record the exit of `run`. Returns `true` if it was the tracked run.
    pub fn on_exit(&mut self, run: RunId, code: Option<i32>) -> bool {
        if self.slot.as_ref().map(|s| s.run) != Some(run) {
            self.draining.retain(|r| *r != run);
            tracing::debug!(run, ?code, "exit of an already stopped run");
            return false;
        }
        self.slot = None;
        tracing::info!(run, ?code, "ComfyUI exited");
        self.emit(LauncherEvent::Exit(code));
        self.emit(LauncherEvent::Stopped);
        true
    }

    /// Config of `run` if it is still the tracked run once its settle delay elapsed.
    pub fn on_settled(&self, run: RunId) -> Option<&LaunchConfig> {
        self.slot
            .as_ref()
            .filter(|s| s.run == run)
            .map(|s| &s.config)
    }

    fn emit(&self, ev: LauncherEvent) {
        let _ = self.notify.send(ev);
    }
}

pub fn contains_ready_marker(chunk: &str) -> bool {
    READY_MARKERS.iter().any(|m| chunk.contains(m))
}

/// Forward raw chunks from one stream until EOF.
async fn pump<R>(mut reader: R, run: RunId, tx: UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut text = Utf8Chunks::default();
    loop {
        let chunk = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => text.push(&buf[..n]),
            Err(e) => {
                tracing::debug!(run, error = %e, "output stream closed");
                break;
            }
        };
        if chunk.is_empty() {
            continue;
        }
        if tx.send(ProcessEvent::Output { run, chunk }).is_err() {
            return;
        }
    }
    if let Some(chunk) = text.finish() {
        let _ = tx.send(ProcessEvent::Output { run, chunk });
    }
}

/// Own the child until it exits, escalating to a kill if a terminate request
/// is not honored within `grace`.
async fn watch(
    mut child: Child,
    run: RunId,
    mut control_rx: UnboundedReceiver<ProcessControl>,
    tx: UnboundedSender<ProcessEvent>,
    pumps: Vec<JoinHandle<()>>,
    grace: Duration,
) {
    let mut terminating = false;
    let mut kill_deadline: Option<Instant> = None;

    let status = loop {
        tokio::select! {
            res = child.wait() => break res,
            // A closed control channel means the supervisor is gone; treat it as a stop.
            _ = control_rx.recv(), if !terminating => {
                terminating = true;
                request_terminate(&mut child);
                kill_deadline = Some(Instant::now() + grace);
            }
            _ = async {
                match kill_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => futures::future::pending().await,
                }
            } => {
                kill_deadline = None;
                tracing::warn!(run, "grace period elapsed, killing ComfyUI");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(run, error = %e, "kill failed");
                }
            }
        }
    };

    // Let the pumps drain what the process wrote before it exited. A grandchild
    // holding the pipes open must not stall the exit notification.
    let drain = futures::future::join_all(pumps);
    if tokio::time::timeout(Duration::from_secs(1), drain).await.is_err() {
        tracing::debug!(run, "output pumps still open after exit");
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(run, error = %e, "waiting for ComfyUI failed");
            None
        }
    };
    let _ = tx.send(ProcessEvent::Exited { run, code });
}

#[cfg(unix)]
fn request_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::warn!(pid, error = %e, "SIGTERM failed");
    }
}

// No console-less polite signal on Windows: terminate right away.
#[cfg(not(unix))]
fn request_terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "terminate failed");
    }
}
