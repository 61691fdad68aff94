use super::controller::{run_controller, Command, Launcher};
use crate::model::{Operation, Response};
use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// Cheap, cloneable handle front ends use to invoke launcher operations.
#[derive(Debug, Clone)]
pub(crate) struct LauncherClient {
    tx: UnboundedSender<Command>,
}

impl LauncherClient {
    /// Start the controller task for `launcher`.
    pub(crate) fn spawn(launcher: Launcher) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let task = tokio::spawn(run_controller(launcher, rx));
        (Self { tx }, task)
    }

    pub(crate) async fn call(&self, op: Operation) -> Result<Response> {
        let name = op.name();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Invoke { op, reply })
            .map_err(|_| anyhow!("launcher controller is not running"))?;
        rx.await
            .with_context(|| format!("{name}: controller dropped the request"))
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}
