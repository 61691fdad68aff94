//! Native dialogs shown by the launcher host.

use crate::config::ConfigStore;
use crate::model::LauncherEvent;
use crate::paths;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

const PICK_FOLDER_TITLE: &str = "Select ComfyUI Installation Folder";

#[async_trait]
pub trait HostDialogs: Send + Sync {
    /// Folder picker. `None` when cancelled.
    async fn pick_folder(&self) -> Option<PathBuf>;
    async fn show_error(&self, title: &str, message: &str);
    async fn show_info(&self, title: &str, message: &str);
    /// Ask whether to pick the installation folder now.
    async fn confirm_first_run(&self) -> bool;
}

/// Dialogs backed by `rfd` (XDG desktop portal on Linux).
#[derive(Debug, Default, Clone, Copy)]
pub struct RfdDialogs;

fn default_folder() -> Option<PathBuf> {
    dirs::desktop_dir().or_else(dirs::home_dir)
}

#[async_trait]
impl HostDialogs for RfdDialogs {
    async fn pick_folder(&self) -> Option<PathBuf> {
        let mut dialog = rfd::AsyncFileDialog::new().set_title(PICK_FOLDER_TITLE);
        if let Some(dir) = default_folder() {
            dialog = dialog.set_directory(dir);
        }
        dialog.pick_folder().await.map(|f| f.path().to_path_buf())
    }

    async fn show_error(&self, title: &str, message: &str) {
        rfd::AsyncMessageDialog::new()
            .set_level(rfd::MessageLevel::Error)
            .set_title(title)
            .set_description(message)
            .set_buttons(rfd::MessageButtons::Ok)
            .show()
            .await;
    }

    async fn show_info(&self, title: &str, message: &str) {
        rfd::AsyncMessageDialog::new()
            .set_level(rfd::MessageLevel::Info)
            .set_title(title)
            .set_description(message)
            .set_buttons(rfd::MessageButtons::Ok)
            .show()
            .await;
    }

    async fn confirm_first_run(&self) -> bool {
        let answer = rfd::AsyncMessageDialog::new()
            .set_level(rfd::MessageLevel::Info)
            .set_title("Welcome to ComfyUI Launcher")
            .set_description(
                "Select your ComfyUI installation folder.\n\n\
                 It is the folder that contains the \"python_embeded\" and \"ComfyUI\" directories.",
            )
            .set_buttons(rfd::MessageButtons::OkCancelCustom(
                "Select Folder".into(),
                "Later".into(),
            ))
            .show()
            .await;
        match answer {
            rfd::MessageDialogResult::Ok | rfd::MessageDialogResult::Yes => true,
            rfd::MessageDialogResult::Custom(label) => label == "Select Folder",
            _ => false,
        }
    }
}

/// Offer to pick the installation root when none is configured yet.
///
/// A valid choice is saved and announced with `path-selected`; an invalid one
/// is explained in an error dialog. Returns the saved root, if any.
pub async fn first_run(
    dialogs: &dyn HostDialogs,
    store: &ConfigStore,
    notify: &UnboundedSender<LauncherEvent>,
) -> Option<String> {
    let mut cfg = store.load();
    if !cfg.comfyui_path.is_empty() {
        return None;
    }
    if !dialogs.confirm_first_run().await {
        tracing::info!("first-run folder selection postponed");
        return None;
    }
    let picked = dialogs.pick_folder().await?;

    let validation = paths::validate(&picked);
    if !validation.valid {
        tracing::warn!(path = %picked.display(), missing = ?validation.missing, "selected folder is not a ComfyUI installation");
        let message = format!(
            "The selected folder is not a valid ComfyUI installation.\n\nMissing: {}",
            validation.missing.join(", ")
        );
        dialogs.show_error("Invalid Path", &message).await;
        return None;
    }

    let root = picked.to_string_lossy().into_owned();
    cfg.comfyui_path = root.clone();
    if let Err(e) = store.save(&cfg) {
        tracing::error!(error = %e, "saving the selected folder failed");
        return None;
    }
    tracing::info!(path = %root, "installation folder selected");
    let _ = notify.send(LauncherEvent::PathSelected(root.clone()));
    Some(root)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use crate::model::LaunchConfig;
    use crate::paths::tests::scaffold;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Scripted answers; records every message shown.
    #[derive(Default)]
    pub(crate) struct FakeDialogs {
        pub folder: Option<PathBuf>,
        pub confirm: bool,
        pub shown: Mutex<Vec<(String, String, String)>>,
    }

    impl FakeDialogs {
        pub(crate) fn shown(&self) -> Vec<(String, String, String)> {
            self.shown.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HostDialogs for FakeDialogs {
        async fn pick_folder(&self) -> Option<PathBuf> {
            self.folder.clone()
        }
        async fn show_error(&self, title: &str, message: &str) {
            self.shown
                .lock()
                .unwrap()
                .push(("error".into(), title.into(), message.into()));
        }
        async fn show_info(&self, title: &str, message: &str) {
            self.shown
                .lock()
                .unwrap()
                .push(("info".into(), title.into(), message.into()));
        }
        async fn confirm_first_run(&self) -> bool {
            self.confirm
        }
    }

    fn empty_store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE));
        (dir, store)
    }

    #[tokio::test]
    async fn valid_choice_is_saved_and_announced() {
        let root = scaffold(&["python_embeded/python.exe", "ComfyUI/main.py"]);
        let (_dir, store) = empty_store();
        let dialogs = FakeDialogs {
            folder: Some(root.path().to_path_buf()),
            confirm: true,
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let saved = first_run(&dialogs, &store, &tx).await.unwrap();
        assert_eq!(store.load().comfyui_path, saved);
        assert_eq!(rx.try_recv().unwrap(), LauncherEvent::PathSelected(saved));
        assert!(dialogs.shown().is_empty());
    }

    #[tokio::test]
    async fn invalid_choice_shows_what_is_missing() {
        let root = scaffold(&["ComfyUI/main.py"]);
        let (_dir, store) = empty_store();
        let dialogs = FakeDialogs {
            folder: Some(root.path().to_path_buf()),
            confirm: true,
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert_eq!(first_run(&dialogs, &store, &tx).await, None);
        let shown = dialogs.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].1, "Invalid Path");
        assert!(shown[0].2.contains("python_embeded/python.exe"));
        assert!(rx.try_recv().is_err());
        assert_eq!(store.load().comfyui_path, "");
    }

    #[tokio::test]
    async fn configured_root_skips_the_prompt() {
        let (_dir, store) = empty_store();
        store
            .save(&LaunchConfig {
                comfyui_path: "/opt/comfy".into(),
                ..Default::default()
            })
            .unwrap();
        let dialogs = FakeDialogs {
            confirm: true,
            folder: Some(PathBuf::from("/elsewhere")),
            ..Default::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(first_run(&dialogs, &store, &tx).await, None);
        assert_eq!(store.load().comfyui_path, "/opt/comfy");
    }

    #[tokio::test]
    async fn later_leaves_everything_untouched() {
        let (_dir, store) = empty_store();
        let dialogs = FakeDialogs::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(first_run(&dialogs, &store, &tx).await, None);
        assert!(!store.path().exists());
        assert!(rx.try_recv().is_err());
    }
}
