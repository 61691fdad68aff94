//! Configuration fields editable from the control panel.

use crate::model::LaunchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Secret,
    Number,
    Flag,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
}

const fn field(key: &'static str, label: &'static str, kind: FieldKind) -> Field {
    Field { key, label, kind }
}

pub const FIELDS: &[Field] = &[
    field("comfyui_path", "ComfyUI folder", FieldKind::Text),
    field("port", "Port", FieldKind::Text),
    field("listen", "Listen address", FieldKind::Text),
    field("extra_args", "Extra arguments", FieldKind::Text),
    field("lowvram", "Low VRAM", FieldKind::Flag),
    field("fp16_vae", "FP16 VAE", FieldKind::Flag),
    field("dont_upcast_attention", "Don't upcast attention", FieldKind::Flag),
    field("disable_smart_memory", "Disable smart memory", FieldKind::Flag),
    field("fast_mode", "Fast mode", FieldKind::Flag),
    field("use_pytorch_cross_attention", "PyTorch cross attention", FieldKind::Flag),
    field("cpu_mode", "CPU only", FieldKind::Flag),
    field("directml", "DirectML", FieldKind::Flag),
    field("disable_auto_launch", "Disable auto launch", FieldKind::Flag),
    field("http_proxy", "HTTP proxy", FieldKind::Text),
    field("https_proxy", "HTTPS proxy", FieldKind::Text),
    field("hf_token", "Hugging Face token", FieldKind::Secret),
    field("hf_endpoint", "Hugging Face endpoint", FieldKind::Text),
    field("pip_index_url", "pip index URL", FieldKind::Text),
    field("browser.auto_open", "Open window when ready", FieldKind::Flag),
    field("browser.width", "Window width", FieldKind::Number),
    field("browser.height", "Window height", FieldKind::Number),
    field("browser.remember_position", "Remember position", FieldKind::Flag),
    field("browser.browser_path", "Browser executable", FieldKind::Text),
];

fn text_mut<'a>(cfg: &'a mut LaunchConfig, key: &str) -> Option<&'a mut String> {
    Some(match key {
        "comfyui_path" => &mut cfg.comfyui_path,
        "port" => &mut cfg.port,
        "listen" => &mut cfg.listen,
        "extra_args" => &mut cfg.extra_args,
        "http_proxy" => &mut cfg.http_proxy,
        "https_proxy" => &mut cfg.https_proxy,
        "hf_token" => &mut cfg.hf_token,
        "hf_endpoint" => &mut cfg.hf_endpoint,
        "pip_index_url" => &mut cfg.pip_index_url,
        _ => return None,
    })
}

fn flag_mut<'a>(cfg: &'a mut LaunchConfig, key: &str) -> Option<&'a mut bool> {
    match key {
        "browser.auto_open" => Some(&mut cfg.browser_settings.auto_open),
        "browser.remember_position" => Some(&mut cfg.browser_settings.remember_position),
        other => cfg.flag_mut(other),
    }
}

/// Current value as an editable string.
pub fn raw_value(cfg: &LaunchConfig, key: &str) -> String {
    let mut cfg = cfg.clone();
    if let Some(s) = text_mut(&mut cfg, key) {
        return s.clone();
    }
    if let Some(b) = flag_mut(&mut cfg, key) {
        return b.to_string();
    }
    let b = &cfg.browser_settings;
    match key {
        "browser.width" => b.width.to_string(),
        "browser.height" => b.height.to_string(),
        "browser.browser_path" => b.browser_path.clone().unwrap_or_default(),
        _ => String::new(),
    }
}

/// Value as shown in the panel; secrets are masked.
pub fn display_value(cfg: &LaunchConfig, f: &Field) -> String {
    let raw = raw_value(cfg, f.key);
    match f.kind {
        FieldKind::Flag => {
            let mark = if raw == "true" { "[x]" } else { "[ ]" };
            mark.to_string()
        }
        FieldKind::Secret if !raw.is_empty() => "•".repeat(raw.chars().count().min(12)),
        _ => raw,
    }
}

/// Flip a boolean field. Returns the new value, or `None` for non-flags.
pub fn toggle(cfg: &mut LaunchConfig, key: &str) -> Option<bool> {
    let slot = flag_mut(cfg, key)?;
    *slot = !*slot;
    Some(*slot)
}

pub fn set_value(cfg: &mut LaunchConfig, key: &str, value: &str) -> Result<(), String> {
    if let Some(s) = text_mut(cfg, key) {
        *s = value.trim().to_string();
        return Ok(());
    }
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("{v:?} is not a positive number"))
    };
    let b = &mut cfg.browser_settings;
    match key {
        "browser.width" => b.width = parse(value)?,
        "browser.height" => b.height = parse(value)?,
        "browser.browser_path" => {
            let v = value.trim();
            b.browser_path = (!v.is_empty()).then(|| v.to_string());
        }
        other => return Err(format!("{other} is not editable as text")),
    }
    Ok(())
}
