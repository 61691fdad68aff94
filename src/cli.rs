use crate::companion::BrowserFactory;
use crate::config::{ConfigStore, CONFIG_FILE};
use crate::dialogs::RfdDialogs;
use crate::model::{LauncherEvent, Operation, Response};
use crate::orchestrator::{Launcher, LauncherClient};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Output routing for the stdout/stderr writer.
enum OutputChunk {
    /// Written verbatim, no newline added.
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputChunk>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputChunk>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = stdout.lock();
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(chunk) = rx.blocking_recv() {
            match chunk {
                OutputChunk::Stdout(data) => {
                    // Progress bars redraw with '\r' and no newline.
                    let _ = out.write_all(data.as_bytes());
                    let _ = out.flush();
                }
                OutputChunk::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "comfy-launcher",
    version,
    about = "Launcher and supervisor for a local ComfyUI server"
)]
pub struct Cli {
    /// Launcher configuration file
    #[arg(long, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Run the server without the control panel, streaming its output to stdout
    #[arg(long)]
    pub headless: bool,

    /// Install the server's Python requirements and exit
    #[arg(long, conflicts_with_all = ["headless", "validate"])]
    pub install: bool,

    /// Check an installation folder, print the result as JSON and exit
    #[arg(long, value_name = "PATH", conflicts_with = "headless")]
    pub validate: Option<PathBuf>,

    /// Start ComfyUI as soon as the control panel opens
    #[arg(long)]
    pub start_on_launch: bool,
}

impl Cli {
    /// Whether this invocation opens the interactive control panel.
    pub fn is_interactive(&self) -> bool {
        cfg!(feature = "tui") && !self.headless && !self.install && self.validate.is_none()
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if let Some(path) = args.validate.as_deref() {
        let validation = crate::paths::validate(path);
        println!("{}", serde_json::to_string_pretty(&validation)?);
        return Ok(());
    }
    if args.install {
        return run_install(args).await;
    }
    if !args.headless {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
    }
    run_headless(args).await
}

/// Wire the controller to the native dialogs and the browser companion.
pub(crate) fn build_launcher(
    args: &Cli,
    notify_tx: mpsc::UnboundedSender<LauncherEvent>,
) -> Launcher {
    Launcher::new(
        ConfigStore::new(&args.config),
        Arc::new(RfdDialogs),
        Box::new(BrowserFactory::default()),
        notify_tx,
    )
}

async fn run_headless(args: Cli) -> Result<()> {
    let cfg = ConfigStore::new(&args.config).load();
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let launcher = build_launcher(&args, notify_tx);
    let (client, controller) = LauncherClient::spawn(launcher);
    let (out_tx, out_handle) = spawn_output_writer();

    match client
        .call(Operation::StartComfyui(Box::new(cfg)))
        .await?
    {
        Response::Started(reply) => {
            let _ = out_tx.send(OutputChunk::Stderr(format!(
                "ComfyUI started (pid {})",
                reply.pid
            )));
        }
        Response::Failure(f) => {
            client.shutdown();
            let _ = controller.await;
            bail!(f.error);
        }
        other => bail!("unexpected start reply: {other:?}"),
    }

    let mut exit_code = None;
    let mut stopping = false;
    loop {
        tokio::select! {
            ev = notify_rx.recv() => match ev {
                Some(LauncherEvent::Output(chunk)) => {
                    let _ = out_tx.send(OutputChunk::Stdout(chunk));
                }
                Some(LauncherEvent::Exit(code)) => exit_code = code,
                Some(LauncherEvent::Stopped) | None => break,
                Some(other) => tracing::debug!(channel = other.channel(), "notification"),
            },
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                let _ = out_tx.send(OutputChunk::Stderr("Stopping ComfyUI...".into()));
                client.call(Operation::StopComfyui).await?;
            }
        }
    }

    client.shutdown();
    controller.await.context("launcher controller panicked")?;
    drop(out_tx);
    let _ = out_handle.await;

    match exit_code {
        Some(code) if code != 0 && !stopping => bail!("ComfyUI exited with code {code}"),
        _ => Ok(()),
    }
}

async fn run_install(args: Cli) -> Result<()> {
    let cfg = ConfigStore::new(&args.config).load();
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let launcher = build_launcher(&args, notify_tx);
    let (client, controller) = LauncherClient::spawn(launcher);
    let (out_tx, out_handle) = spawn_output_writer();

    let call = client.call(Operation::InstallDependencies(Box::new(cfg)));
    tokio::pin!(call);
    let response = loop {
        tokio::select! {
            res = &mut call => break res?,
            Some(ev) = notify_rx.recv() => {
                if let LauncherEvent::InstallOutput(chunk) = ev {
                    let _ = out_tx.send(OutputChunk::Stdout(chunk));
                }
            }
        }
    };
    // Chunks sent before the reply may still be queued.
    while let Ok(ev) = notify_rx.try_recv() {
        if let LauncherEvent::InstallOutput(chunk) = ev {
            let _ = out_tx.send(OutputChunk::Stdout(chunk));
        }
    }

    client.shutdown();
    let _ = controller.await;
    drop(out_tx);
    let _ = out_handle.await;

    match response {
        Response::Installed(_) => Ok(()),
        Response::Failure(f) => bail!(f.error),
        other => bail!("unexpected install reply: {other:?}"),
    }
}
