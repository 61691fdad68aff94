//! Launcher controller.
//!
//! A single task owns the process slot and the companion window slot. Front
//! ends send [`Command`]s; OS streams, exits and timers report back as
//! messages on the controller's internal channels.

use crate::companion::{Companion, RetryTimings, SurfaceEvent, SurfaceFactory};
use crate::config::ConfigStore;
use crate::dialogs::HostDialogs;
use crate::error::LauncherError;
use crate::installer;
use crate::model::{
    Ack, BrowserStatus, DirectorySelection, Failure, InstallReply, LauncherEvent, Operation,
    Response, RunningStatus, StartReply,
};
use crate::paths;
use crate::supervisor::{ProcessEvent, Supervisor, Timings};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// Requests from front ends.
#[derive(Debug)]
pub(crate) enum Command {
    Invoke {
        op: Operation,
        reply: oneshot::Sender<Response>,
    },
    /// Stop the server, close the companion and end the controller.
    Shutdown,
}

pub(crate) struct Launcher {
    store: ConfigStore,
    dialogs: Arc<dyn HostDialogs>,
    notify: UnboundedSender<LauncherEvent>,
    supervisor: Supervisor,
    companion: Companion,
    process_rx: UnboundedReceiver<ProcessEvent>,
    surface_rx: UnboundedReceiver<SurfaceEvent>,
    grace_period: Duration,
}

impl Launcher {
    pub(crate) fn new(
        store: ConfigStore,
        dialogs: Arc<dyn HostDialogs>,
        surfaces: Box<dyn SurfaceFactory>,
        notify: UnboundedSender<LauncherEvent>,
    ) -> Self {
        Self::with_timings(
            store,
            dialogs,
            surfaces,
            notify,
            Timings::default(),
            RetryTimings::default(),
        )
    }

    pub(crate) fn with_timings(
        store: ConfigStore,
        dialogs: Arc<dyn HostDialogs>,
        surfaces: Box<dyn SurfaceFactory>,
        notify: UnboundedSender<LauncherEvent>,
        process: Timings,
        retry: RetryTimings,
    ) -> Self {
        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let (surface_tx, surface_rx) = mpsc::unbounded_channel();
        Self {
            store,
            dialogs,
            supervisor: Supervisor::with_timings(notify.clone(), process_tx, process),
            companion: Companion::new(surfaces, surface_tx, notify.clone()).with_timings(retry),
            notify,
            process_rx,
            surface_rx,
            grace_period: process.grace_period,
        }
    }

    fn handle(&mut self, op: Operation, reply: oneshot::Sender<Response>) {
        tracing::debug!(op = op.name(), "operation");
        let response = match op {
            Operation::LoadConfig => Response::Config(Box::new(self.store.load())),
            Operation::SaveConfig(cfg) => match self.store.save(&cfg) {
                Ok(()) => Response::Ack(Ack::ok("Configuration saved")),
                Err(e) => {
                    tracing::error!(error = %e, "save-config failed");
                    Response::Ack(Ack::failed(e.to_string()))
                }
            },
            Operation::ValidatePath(path) => {
                Response::Validation(paths::validate(Path::new(&path)))
            }
            Operation::StartComfyui(cfg) => match self.supervisor.start(&cfg) {
                Ok(pid) => Response::Started(StartReply { success: true, pid }),
                Err(e) => {
                    if matches!(e, LauncherError::Spawn { .. }) {
                        self.companion.close();
                    }
                    failure("start-comfyui", e)
                }
            },
            Operation::StopComfyui => {
                if self.supervisor.stop() {
                    self.companion.close();
                    Response::Ack(Ack::ok("ComfyUI stopped"))
                } else {
                    Response::Ack(Ack::failed("No ComfyUI process running"))
                }
            }
            Operation::IsComfyuiRunning => Response::Running(RunningStatus {
                running: self.supervisor.is_running(),
                pid: self.supervisor.pid(),
                browser_open: self.companion.is_open(),
            }),
            Operation::OpenComfyuiBrowser(cfg) => {
                if !self.supervisor.is_running() {
                    Response::Ack(Ack::failed("ComfyUI is not running"))
                } else {
                    match self.companion.open(&cfg) {
                        Ok(_) => Response::Ack(Ack::ok("Browser opened")),
                        Err(e) => {
                            tracing::error!(error = %e, "open-comfyui-browser failed");
                            Response::Ack(Ack::failed(e.to_string()))
                        }
                    }
                }
            }
            Operation::CloseComfyuiBrowser => {
                if self.companion.close() {
                    Response::Ack(Ack::ok("Browser closed"))
                } else {
                    Response::Ack(Ack::failed("Browser is not open"))
                }
            }
            Operation::IsBrowserOpen => Response::Browser(BrowserStatus {
                open: self.companion.is_open(),
            }),

            // Operations that wait on the user or an external process run off
            // the controller task so the slots stay responsive.
            Operation::SelectDirectory => {
                let dialogs = self.dialogs.clone();
                tokio::spawn(async move {
                    let path = dialogs.pick_folder().await;
                    let _ = reply.send(Response::Directory(DirectorySelection {
                        success: path.is_some(),
                        path: path.map(|p| p.to_string_lossy().into_owned()),
                    }));
                });
                return;
            }
            Operation::InstallDependencies(cfg) => {
                let notify = self.notify.clone();
                tokio::spawn(async move {
                    let response = match installer::install_dependencies(&cfg, &notify).await {
                        Ok(()) => Response::Installed(InstallReply { success: true }),
                        Err(e) => failure("install-dependencies", e),
                    };
                    let _ = reply.send(response);
                });
                return;
            }
            Operation::ShowError { title, message } => {
                let dialogs = self.dialogs.clone();
                tokio::spawn(async move {
                    dialogs.show_error(&title, &message).await;
                    let _ = reply.send(Response::Done);
                });
                return;
            }
            Operation::ShowInfo { title, message } => {
                let dialogs = self.dialogs.clone();
                tokio::spawn(async move {
                    dialogs.show_info(&title, &message).await;
                    let _ = reply.send(Response::Done);
                });
                return;
            }
        };
        let _ = reply.send(response);
    }

    fn on_process_event(&mut self, ev: ProcessEvent) {
        match ev {
            ProcessEvent::Output { run, chunk } => self.supervisor.on_output(run, chunk),
            ProcessEvent::Exited { run, code } => {
                if self.supervisor.on_exit(run, code) {
                    self.companion.close();
                }
            }
            ProcessEvent::Settled { run } => {
                let Some(cfg) = self.supervisor.on_settled(run).cloned() else {
                    return;
                };
                match self.companion.open(&cfg) {
                    Ok(window) => {
                        tracing::info!(run, window, "companion opened automatically");
                        let _ = self.notify.send(LauncherEvent::BrowserAutoOpened);
                    }
                    Err(e) => tracing::warn!(run, error = %e, "automatic companion open failed"),
                }
            }
        }
    }

    /// Stop everything, giving the server its grace period to exit. Runs
    /// stopped earlier whose exit is still pending are waited for too.
    async fn shutdown(&mut self) {
        self.companion.close();
        self.supervisor.stop();
        if self.supervisor.live_runs() == 0 {
            return;
        }
        let limit = self.grace_period + Duration::from_secs(1);
        let supervisor = &mut self.supervisor;
        let process_rx = &mut self.process_rx;
        let wait = async move {
            while let Some(ev) = process_rx.recv().await {
                if let ProcessEvent::Exited { run, code } = ev {
                    supervisor.on_exit(run, code);
                    if supervisor.live_runs() == 0 {
                        break;
                    }
                }
            }
        };
        if tokio::time::timeout(limit, wait).await.is_err() {
            tracing::warn!("ComfyUI did not exit before shutdown");
        }
    }
}

fn failure(op: &str, e: LauncherError) -> Response {
    tracing::error!(op, error = %e, "operation failed");
    Response::Failure(Failure::new(e.to_string()))
}

/// Serve front-end commands until shutdown or until every client is gone.
pub(crate) async fn run_controller(mut launcher: Launcher, mut cmd_rx: UnboundedReceiver<Command>) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Invoke { op, reply }) => launcher.handle(op, reply),
                Some(Command::Shutdown) | None => break,
            },
            Some(ev) = launcher.process_rx.recv() => launcher.on_process_event(ev),
            Some(ev) = launcher.surface_rx.recv() => launcher.companion.on_surface_event(ev),
        }
    }
    tracing::info!("launcher shutting down");
    launcher.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::tests::{Call, FakeFactory};
    use crate::config::CONFIG_FILE;
    use crate::dialogs::tests::FakeDialogs;
    use crate::model::LaunchConfig;
    use crate::orchestrator::LauncherClient;
    use crate::paths::tests::scaffold;
    use std::path::PathBuf;

    struct Harness {
        client: LauncherClient,
        notify_rx: UnboundedReceiver<LauncherEvent>,
        factory: FakeFactory,
        dialogs: Arc<FakeDialogs>,
        _dir: tempfile::TempDir,
        task: tokio::task::JoinHandle<()>,
    }

    fn harness(dialogs: FakeDialogs) -> Harness {
        harness_with_grace(dialogs, Duration::from_millis(200))
    }

    fn harness_with_grace(dialogs: FakeDialogs, grace_period: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE));
        let factory = FakeFactory::default();
        let dialogs = Arc::new(dialogs);
        let (notify, notify_rx) = mpsc::unbounded_channel();
        let launcher = Launcher::with_timings(
            store,
            dialogs.clone(),
            Box::new(factory.clone()),
            notify,
            Timings {
                settle_delay: Duration::from_millis(50),
                grace_period,
            },
            RetryTimings::default(),
        );
        let (client, task) = LauncherClient::spawn(launcher);
        Harness {
            client,
            notify_rx,
            factory,
            dialogs,
            _dir: dir,
            task,
        }
    }

    fn ack(success: bool, message: &str) -> Response {
        Response::Ack(Ack {
            success,
            message: message.into(),
        })
    }

    #[tokio::test]
    async fn stop_without_process_reports_not_running() {
        let mut h = harness(FakeDialogs::default());
        let resp = h.client.call(Operation::StopComfyui).await.unwrap();
        assert_eq!(resp, ack(false, "No ComfyUI process running"));
        assert!(h.notify_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn manual_open_requires_a_running_server() {
        let h = harness(FakeDialogs::default());
        let resp = h
            .client
            .call(Operation::OpenComfyuiBrowser(Box::default()))
            .await
            .unwrap();
        assert_eq!(resp, ack(false, "ComfyUI is not running"));
        assert!(h.factory.calls().is_empty());

        let resp = h.client.call(Operation::CloseComfyuiBrowser).await.unwrap();
        assert_eq!(resp, ack(false, "Browser is not open"));
    }

    #[tokio::test]
    async fn start_without_root_is_a_structured_failure() {
        let h = harness(FakeDialogs::default());
        let resp = h
            .client
            .call(Operation::StartComfyui(Box::default()))
            .await
            .unwrap();
        assert_eq!(
            resp,
            Response::Failure(Failure::new("ComfyUI path not configured"))
        );
        let resp = h.client.call(Operation::IsComfyuiRunning).await.unwrap();
        assert_eq!(
            resp,
            Response::Running(RunningStatus {
                running: false,
                pid: None,
                browser_open: false
            })
        );
    }

    #[tokio::test]
    async fn config_round_trips_through_the_store() {
        let h = harness(FakeDialogs::default());
        let cfg = LaunchConfig {
            comfyui_path: "/opt/comfy".into(),
            fp16_vae: true,
            ..Default::default()
        };
        let resp = h
            .client
            .call(Operation::SaveConfig(Box::new(cfg.clone())))
            .await
            .unwrap();
        assert_eq!(resp, ack(true, "Configuration saved"));
        let resp = h.client.call(Operation::LoadConfig).await.unwrap();
        assert_eq!(resp, Response::Config(Box::new(cfg)));
    }

    #[tokio::test]
    async fn validate_path_reports_layout() {
        let root = scaffold(&["python_embeded/python.exe", "ComfyUI/main.py"]);
        let h = harness(FakeDialogs::default());
        let resp = h
            .client
            .call(Operation::ValidatePath(
                root.path().to_string_lossy().into_owned(),
            ))
            .await
            .unwrap();
        let Response::Validation(v) = resp else {
            panic!("unexpected {resp:?}");
        };
        assert!(v.valid);
        assert!(v.missing.is_empty());
    }

    #[tokio::test]
    async fn directory_selection_and_dialogs() {
        let h = harness(FakeDialogs {
            folder: Some(PathBuf::from("/picked")),
            ..Default::default()
        });
        let resp = h.client.call(Operation::SelectDirectory).await.unwrap();
        assert_eq!(
            resp,
            Response::Directory(DirectorySelection {
                success: true,
                path: Some("/picked".into())
            })
        );

        let resp = h
            .client
            .call(Operation::ShowError {
                title: "Oops".into(),
                message: "broken".into(),
            })
            .await
            .unwrap();
        assert_eq!(resp, Response::Done);
        assert_eq!(
            h.dialogs.shown(),
            vec![("error".to_string(), "Oops".to_string(), "broken".to_string())]
        );
    }

    #[tokio::test]
    async fn cancelled_picker_reports_no_path() {
        let h = harness(FakeDialogs::default());
        let resp = h.client.call(Operation::SelectDirectory).await.unwrap();
        assert_eq!(
            resp,
            Response::Directory(DirectorySelection {
                success: false,
                path: None
            })
        );
    }

    #[tokio::test]
    async fn shutdown_ends_the_controller() {
        let h = harness(FakeDialogs::default());
        h.client.shutdown();
        tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .unwrap()
            .unwrap();
        assert!(h.client.call(Operation::IsBrowserOpen).await.is_err());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::supervisor::tests::unix::{cfg_for, fake_install};
        use tokio::time::timeout;

        async fn wait_for(
            rx: &mut UnboundedReceiver<LauncherEvent>,
            want: &LauncherEvent,
        ) -> Vec<LauncherEvent> {
            let mut seen = Vec::new();
            loop {
                let ev = timeout(Duration::from_secs(10), rx.recv())
                    .await
                    .expect("notification")
                    .expect("channel open");
                let done = &ev == want;
                seen.push(ev);
                if done {
                    return seen;
                }
            }
        }

        #[tokio::test]
        async fn ready_server_auto_opens_and_exit_closes_companion() {
            let root = fake_install(
                "echo 'To see the GUI go to: http://127.0.0.1:8188'\nsleep 0.5\nexit 0",
            );
            let mut h = harness(FakeDialogs::default());
            let resp = h
                .client
                .call(Operation::StartComfyui(Box::new(cfg_for(&root))))
                .await
                .unwrap();
            assert!(matches!(resp, Response::Started(StartReply { success: true, .. })));

            wait_for(&mut h.notify_rx, &LauncherEvent::BrowserAutoOpened).await;
            let resp = h.client.call(Operation::IsBrowserOpen).await.unwrap();
            assert_eq!(resp, Response::Browser(BrowserStatus { open: true }));

            let seen = wait_for(&mut h.notify_rx, &LauncherEvent::BrowserClosed).await;
            let tail: Vec<_> = seen
                .into_iter()
                .filter(|e| !matches!(e, LauncherEvent::Output(_)))
                .collect();
            assert_eq!(
                tail,
                vec![
                    LauncherEvent::Exit(Some(0)),
                    LauncherEvent::Stopped,
                    LauncherEvent::BrowserClosed
                ]
            );
            assert!(matches!(h.factory.calls().last(), Some(Call::Close(1))));
        }

        #[tokio::test]
        async fn stop_closes_companion_and_double_start_is_rejected() {
            let root = fake_install("echo 'Starting server'\nexec sleep 30");
            let mut h = harness(FakeDialogs::default());
            let cfg = cfg_for(&root);
            h.client
                .call(Operation::StartComfyui(Box::new(cfg.clone())))
                .await
                .unwrap();

            let resp = h
                .client
                .call(Operation::StartComfyui(Box::new(cfg.clone())))
                .await
                .unwrap();
            assert!(matches!(resp, Response::Failure(f) if f.error.contains("already running")));

            wait_for(&mut h.notify_rx, &LauncherEvent::BrowserAutoOpened).await;
            let resp = h
                .client
                .call(Operation::OpenComfyuiBrowser(Box::new(cfg)))
                .await
                .unwrap();
            assert_eq!(resp, ack(true, "Browser opened"));
            assert_eq!(h.factory.navigations(), 1);

            let resp = h.client.call(Operation::StopComfyui).await.unwrap();
            assert_eq!(resp, ack(true, "ComfyUI stopped"));
            let resp = h.client.call(Operation::IsComfyuiRunning).await.unwrap();
            assert_eq!(
                resp,
                Response::Running(RunningStatus {
                    running: false,
                    pid: None,
                    browser_open: false
                })
            );
            let seen = wait_for(&mut h.notify_rx, &LauncherEvent::BrowserClosed).await;
            assert!(seen.contains(&LauncherEvent::Stopped));
            assert!(!seen.iter().any(|e| matches!(e, LauncherEvent::Exit(_))));
        }

        #[tokio::test]
        async fn shutdown_after_stop_lets_the_terminate_handler_finish() {
            let root = fake_install(
                "trap 'sleep 0.5; echo ok > \"$(dirname \"$0\")/../cleaned\"; exit 0' TERM\n\
                 echo ready\n\
                 while true; do sleep 0.1; done",
            );
            let cleaned = root.path().join("cleaned");
            let mut h = harness_with_grace(FakeDialogs::default(), Duration::from_secs(3));
            let mut cfg = cfg_for(&root);
            cfg.browser_settings.auto_open = false;
            h.client
                .call(Operation::StartComfyui(Box::new(cfg)))
                .await
                .unwrap();
            wait_for(&mut h.notify_rx, &LauncherEvent::Output("ready\n".into())).await;

            let resp = h.client.call(Operation::StopComfyui).await.unwrap();
            assert_eq!(resp, ack(true, "ComfyUI stopped"));
            h.client.shutdown();
            timeout(Duration::from_secs(10), h.task)
                .await
                .expect("controller ends")
                .unwrap();
            assert!(cleaned.exists(), "terminate handler was cut short");
        }
    }
}
