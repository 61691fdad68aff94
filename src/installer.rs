//! `pip install -r ComfyUI/requirements.txt` with the bundled interpreter.

use crate::error::{LauncherError, LauncherResult};
use crate::model::{LaunchConfig, LauncherEvent};
use crate::paths;
use crate::supervisor::Utf8Chunks;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

pub fn pip_args(requirements: &Path) -> Vec<String> {
    vec![
        "-m".into(),
        "pip".into(),
        "install".into(),
        "-r".into(),
        requirements.to_string_lossy().into_owned(),
    ]
}

/// Install the server's Python requirements, streaming output as `install-output`.
pub async fn install_dependencies(
    cfg: &LaunchConfig,
    notify: &UnboundedSender<LauncherEvent>,
) -> LauncherResult<()> {
    if cfg.comfyui_path.trim().is_empty() {
        return Err(LauncherError::Configuration(
            "ComfyUI path not configured".into(),
        ));
    }
    let root = Path::new(&cfg.comfyui_path);
    let (_, python) = paths::find_interpreter(root).ok_or_else(|| {
        LauncherError::Environment(format!(
            "Python interpreter not found under {}",
            root.display()
        ))
    })?;
    let requirements = paths::requirements_file(root);
    if !requirements.is_file() {
        return Err(LauncherError::Environment(format!(
            "Requirements file not found at: {}",
            requirements.display()
        )));
    }

    tracing::info!(python = %python.display(), requirements = %requirements.display(), "installing dependencies");
    let mut child = Command::new(&python)
        .args(pip_args(&requirements))
        .envs(crate::supervisor::build_env_overlay(cfg, root))
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| LauncherError::Spawn {
            program: python.display().to_string(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (status, _, _) = tokio::join!(
        child.wait(),
        forward(stdout, notify),
        forward(stderr, notify)
    );

    let status = status.map_err(|source| LauncherError::Io {
        action: "wait for",
        path: python.clone(),
        source,
    })?;
    if status.success() {
        tracing::info!("dependencies installed");
        Ok(())
    } else {
        tracing::error!(code = ?status.code(), "dependency installation failed");
        Err(LauncherError::ExitFailure {
            code: status.code(),
        })
    }
}

async fn forward<R>(reader: Option<R>, notify: &UnboundedSender<LauncherEvent>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; 8192];
    let mut text = Utf8Chunks::default();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = text.push(&buf[..n]);
                if !chunk.is_empty() {
                    let _ = notify.send(LauncherEvent::InstallOutput(chunk));
                }
            }
        }
    }
    if let Some(chunk) = text.finish() {
        let _ = notify.send(LauncherEvent::InstallOutput(chunk));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::tests::scaffold;
    use tokio::sync::mpsc;

    fn cfg_for(root: &Path) -> LaunchConfig {
        LaunchConfig {
            comfyui_path: root.to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn pip_is_invoked_as_a_module() {
        let args = pip_args(Path::new("/opt/comfy/ComfyUI/requirements.txt"));
        assert_eq!(
            args,
            vec!["-m", "pip", "install", "-r", "/opt/comfy/ComfyUI/requirements.txt"]
        );
    }

    #[tokio::test]
    async fn missing_root_is_a_configuration_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = install_dependencies(&LaunchConfig::default(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::Configuration(_)));
    }

    #[tokio::test]
    async fn missing_requirements_names_the_path() {
        let root = scaffold(&["python_embeded/python.exe", "ComfyUI/main.py"]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = install_dependencies(&cfg_for(root.path()), &tx)
            .await
            .unwrap_err();
        match err {
            LauncherError::Environment(msg) => assert!(msg.contains("requirements.txt"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::supervisor::tests::unix::fake_install;
        use std::fs;

        #[tokio::test]
        async fn output_is_streamed_and_success_reported() {
            let root = fake_install("echo \"pip $*\"\nexit 0");
            fs::write(root.path().join("ComfyUI/requirements.txt"), b"torch\n").unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();

            install_dependencies(&cfg_for(root.path()), &tx).await.unwrap();

            let mut out = String::new();
            while let Ok(LauncherEvent::InstallOutput(chunk)) = rx.try_recv() {
                out.push_str(&chunk);
            }
            assert!(out.starts_with("pip -m pip install -r "), "{out}");
            assert!(out.trim_end().ends_with("requirements.txt"));
        }

        #[tokio::test]
        async fn nonzero_exit_is_an_exit_failure() {
            let root = fake_install("exit 2");
            fs::write(root.path().join("ComfyUI/requirements.txt"), b"").unwrap();
            let (tx, _rx) = mpsc::unbounded_channel();
            let err = install_dependencies(&cfg_for(root.path()), &tx)
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "Installation finished with code: 2");
        }
    }
}
