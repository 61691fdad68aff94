//! Persistence for [`LaunchConfig`].
//!
//! The store never fails a read: a missing or unreadable file yields defaults,
//! and a file with bad entries keeps every entry that still fits.
//! Writes overwrite the whole file and report I/O failures.

use crate::error::{LauncherError, LauncherResult};
use crate::model::LaunchConfig;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
#[cfg(test)]
use std::path::Path;
use std::path::PathBuf;

pub const CONFIG_FILE: &str = "launcher_config.json";

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(CONFIG_FILE)
    }
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> LaunchConfig {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return LaunchConfig::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "config read failed, using defaults");
                return LaunchConfig::default();
            }
        };
        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Object(entries)) => overlay_defaults(entries),
            Ok(other) => {
                tracing::warn!(path = %self.path.display(), kind = json_kind(&other), "config is not an object, using defaults");
                LaunchConfig::default()
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "config parse failed, using defaults");
                LaunchConfig::default()
            }
        }
    }

    pub fn save(&self, cfg: &LaunchConfig) -> LauncherResult<()> {
        let json = serde_json::to_string_pretty(cfg)
            .map_err(|e| self.io_error("encode config", std::io::Error::other(e)))?;
        fs::write(&self.path, json).map_err(|e| self.io_error("write config", e))?;
        tracing::debug!(path = %self.path.display(), "config saved");
        Ok(())
    }

    fn io_error(&self, action: &'static str, source: std::io::Error) -> LauncherError {
        LauncherError::Io {
            action,
            path: self.path.clone(),
            source,
        }
    }
}

/// Lay the file's entries over the defaults one at a time. An entry that does
/// not fit its field is dropped with a warning and the default stays.
fn overlay_defaults(entries: Map<String, Value>) -> LaunchConfig {
    let mut merged = match serde_json::to_value(LaunchConfig::default()) {
        Ok(v @ Value::Object(_)) => v,
        _ => return LaunchConfig::default(),
    };
    for (key, value) in entries {
        match value {
            Value::Object(fields) if key == "browser_settings" => {
                for (field, value) in fields {
                    overlay_entry(&mut merged, Some("browser_settings"), field, value);
                }
            }
            value => overlay_entry(&mut merged, None, key, value),
        }
    }
    LaunchConfig::deserialize(&merged).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "merged config rejected, using defaults");
        LaunchConfig::default()
    })
}

fn section_mut<'a>(
    merged: &'a mut Value,
    section: Option<&str>,
) -> Option<&'a mut Map<String, Value>> {
    match section {
        Some(name) => merged.get_mut(name)?.as_object_mut(),
        None => merged.as_object_mut(),
    }
}

fn overlay_entry(merged: &mut Value, section: Option<&str>, key: String, value: Value) {
    let Some(target) = section_mut(merged, section) else {
        return;
    };
    let kind = json_kind(&value);
    let previous = target.insert(key.clone(), value);
    if LaunchConfig::deserialize(&*merged).is_ok() {
        return;
    }

    tracing::warn!(section = section.unwrap_or("-"), key = %key, kind, "config entry has the wrong type, keeping the default");
    if let Some(target) = section_mut(merged, section) {
        match previous {
            Some(previous) => target.insert(key, previous),
            None => target.remove(&key),
        };
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(contents: &str) -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, contents).unwrap();
        (dir, ConfigStore::new(path))
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nope.json"));
        assert_eq!(store.load(), LaunchConfig::default());
    }

    #[test]
    fn corrupt_file_loads_defaults() {
        let (_dir, store) = store_with("{ not json");
        assert_eq!(store.load(), LaunchConfig::default());
    }

    #[test]
    fn partial_config_is_back_filled() {
        let (_dir, store) = store_with(r#"{"comfyui_path": "D:/ComfyUI", "lowvram": true}"#);
        let cfg = store.load();
        assert_eq!(cfg.comfyui_path, "D:/ComfyUI");
        assert!(cfg.lowvram);
        assert_eq!(cfg.port, "8188");
        assert_eq!(cfg.listen, "127.0.0.1");
        assert_eq!(cfg.language, "en");
        assert_eq!(cfg.browser_settings, Default::default());
    }

    #[test]
    fn nested_browser_settings_merge_field_by_field() {
        let (_dir, store) = store_with(r#"{"browser_settings": {"width": 800}}"#);
        let cfg = store.load();
        assert_eq!(cfg.browser_settings.width, 800);
        assert_eq!(cfg.browser_settings.height, 900);
        assert!(cfg.browser_settings.auto_open);
        assert!(cfg.browser_settings.remember_position);
    }

    #[test]
    fn null_entry_keeps_its_siblings() {
        let (_dir, store) = store_with(
            r#"{"comfyui_path": "D:/ComfyUI", "lowvram": true, "hf_token": null}"#,
        );
        let cfg = store.load();
        assert_eq!(cfg.comfyui_path, "D:/ComfyUI");
        assert!(cfg.lowvram);
        assert_eq!(cfg.hf_token, "");
    }

    #[test]
    fn mistyped_browser_field_falls_back_alone() {
        let (_dir, store) = store_with(
            r#"{"comfyui_path": "D:/ComfyUI", "port": [1], "browser_settings": {"width": "800", "height": 700, "auto_open": false}}"#,
        );
        let cfg = store.load();
        assert_eq!(cfg.comfyui_path, "D:/ComfyUI");
        assert_eq!(cfg.port, "8188");
        assert_eq!(cfg.browser_settings.width, 1400);
        assert_eq!(cfg.browser_settings.height, 700);
        assert!(!cfg.browser_settings.auto_open);
    }

    #[test]
    fn non_object_browser_settings_keep_defaults() {
        let (_dir, store) = store_with(r#"{"cpu_mode": true, "browser_settings": "big"}"#);
        let cfg = store.load();
        assert!(cfg.cpu_mode);
        assert_eq!(cfg.browser_settings, Default::default());
    }

    #[test]
    fn non_object_file_loads_defaults() {
        let (_dir, store) = store_with("[1, 2, 3]");
        assert_eq!(store.load(), LaunchConfig::default());
    }

    #[test]
    fn numeric_port_is_accepted() {
        let (_dir, store) = store_with(r#"{"port": 9000}"#);
        assert_eq!(store.load().port, "9000");
    }

    #[test]
    fn unknown_keys_survive_a_save() {
        let (_dir, store) = store_with(r#"{"theme": "dark", "cpu_mode": true}"#);
        let cfg = store.load();
        assert!(cfg.cpu_mode);
        store.save(&cfg).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["cpu_mode"], true);
        assert_eq!(raw["port"], "8188");
    }

    #[test]
    fn save_writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE));
        let cfg = LaunchConfig {
            extra_args: "--preview-method auto".into(),
            ..Default::default()
        };
        store.save(&cfg).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\n  \"extra_args\": \"--preview-method auto\""));
        assert_eq!(store.load(), cfg);
    }

    #[test]
    fn save_into_missing_directory_fails_with_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("missing").join(CONFIG_FILE));
        let err = store.save(&LaunchConfig::default()).unwrap_err();
        assert!(matches!(err, LauncherError::Io { .. }));
    }
}
