use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_PORT: &str = "8188";
pub const DEFAULT_LISTEN: &str = "127.0.0.1";

/// Persisted launcher configuration.
///
/// Every field has a default so a partial file on disk is back-filled on load.
/// Keys this version does not know about are kept in `extra` and written back
/// on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub language: String,
    pub comfyui_path: String,
    pub http_proxy: String,
    pub https_proxy: String,
    pub hf_token: String,
    pub pip_index_url: String,
    pub hf_endpoint: String,
    pub lowvram: bool,
    pub fp16_vae: bool,
    pub dont_upcast_attention: bool,
    pub disable_smart_memory: bool,
    pub fast_mode: bool,
    pub use_pytorch_cross_attention: bool,
    pub cpu_mode: bool,
    pub directml: bool,
    pub disable_auto_launch: bool,
    #[serde(deserialize_with = "string_or_number")]
    pub port: String,
    pub listen: String,
    pub extra_args: String,
    pub browser_settings: BrowserSettings,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            language: "en".into(),
            comfyui_path: String::new(),
            http_proxy: String::new(),
            https_proxy: String::new(),
            hf_token: String::new(),
            pip_index_url: String::new(),
            hf_endpoint: String::new(),
            lowvram: false,
            fp16_vae: false,
            dont_upcast_attention: false,
            disable_smart_memory: false,
            fast_mode: false,
            use_pytorch_cross_attention: false,
            cpu_mode: false,
            directml: false,
            disable_auto_launch: false,
            port: DEFAULT_PORT.into(),
            listen: DEFAULT_LISTEN.into(),
            extra_args: String::new(),
            browser_settings: BrowserSettings::default(),
            extra: BTreeMap::new(),
        }
    }
}

/// Command-line switch for each boolean flag, in the order they are appended.
pub const FLAG_SWITCHES: [(&str, &str); 9] = [
    ("lowvram", "--lowvram"),
    ("fp16_vae", "--fp16-vae"),
    ("dont_upcast_attention", "--dont-upcast-attention"),
    ("disable_smart_memory", "--disable-smart-memory"),
    ("fast_mode", "--fast"),
    ("use_pytorch_cross_attention", "--use-pytorch-cross-attention"),
    ("cpu_mode", "--cpu"),
    ("directml", "--directml"),
    ("disable_auto_launch", "--disable-auto-launch"),
];

impl LaunchConfig {
    pub fn flag(&self, key: &str) -> bool {
        match key {
            "lowvram" => self.lowvram,
            "fp16_vae" => self.fp16_vae,
            "dont_upcast_attention" => self.dont_upcast_attention,
            "disable_smart_memory" => self.disable_smart_memory,
            "fast_mode" => self.fast_mode,
            "use_pytorch_cross_attention" => self.use_pytorch_cross_attention,
            "cpu_mode" => self.cpu_mode,
            "directml" => self.directml,
            "disable_auto_launch" => self.disable_auto_launch,
            _ => false,
        }
    }

    pub fn flag_mut(&mut self, key: &str) -> Option<&mut bool> {
        match key {
            "lowvram" => Some(&mut self.lowvram),
            "fp16_vae" => Some(&mut self.fp16_vae),
            "dont_upcast_attention" => Some(&mut self.dont_upcast_attention),
            "disable_smart_memory" => Some(&mut self.disable_smart_memory),
            "fast_mode" => Some(&mut self.fast_mode),
            "use_pytorch_cross_attention" => Some(&mut self.use_pytorch_cross_attention),
            "cpu_mode" => Some(&mut self.cpu_mode),
            "directml" => Some(&mut self.directml),
            "disable_auto_launch" => Some(&mut self.disable_auto_launch),
            _ => None,
        }
    }

    /// URL of the server's web interface, falling back to defaults for blank fields.
    pub fn web_ui_url(&self) -> String {
        let listen = match self.listen.trim() {
            "" => DEFAULT_LISTEN,
            l => l,
        };
        let port = match self.port.trim() {
            "" => DEFAULT_PORT,
            p => p,
        };
        format!("http://{listen}:{port}")
    }
}

/// Preferences for the companion window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub auto_open: bool,
    pub width: u32,
    pub height: u32,
    pub remember_position: bool,
    pub minimize_to_tray: bool,
    pub always_on_top: bool,
    pub browser_path: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            auto_open: true,
            width: 1400,
            height: 900,
            remember_position: true,
            minimize_to_tray: false,
            always_on_top: false,
            browser_path: None,
        }
    }
}

// Older config files stored the port as a bare number.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

/// Asynchronous notifications pushed to the front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload")]
pub enum LauncherEvent {
    #[serde(rename = "comfyui-output")]
    Output(String),
    #[serde(rename = "comfyui-started")]
    Started,
    #[serde(rename = "comfyui-stopped")]
    Stopped,
    #[serde(rename = "comfyui-exit")]
    Exit(Option<i32>),
    #[serde(rename = "comfyui-browser-auto-opened")]
    BrowserAutoOpened,
    #[serde(rename = "comfyui-browser-closed")]
    BrowserClosed,
    #[serde(rename = "path-selected")]
    PathSelected(String),
    #[serde(rename = "install-output")]
    InstallOutput(String),
}

impl LauncherEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            LauncherEvent::Output(_) => "comfyui-output",
            LauncherEvent::Started => "comfyui-started",
            LauncherEvent::Stopped => "comfyui-stopped",
            LauncherEvent::Exit(_) => "comfyui-exit",
            LauncherEvent::BrowserAutoOpened => "comfyui-browser-auto-opened",
            LauncherEvent::BrowserClosed => "comfyui-browser-closed",
            LauncherEvent::PathSelected(_) => "path-selected",
            LauncherEvent::InstallOutput(_) => "install-output",
        }
    }
}

/// Named operations the front end can invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "kebab-case")]
pub enum Operation {
    LoadConfig,
    // Boxed so the enum stays small; LaunchConfig is the largest payload.
    SaveConfig(Box<LaunchConfig>),
    SelectDirectory,
    ValidatePath(String),
    StartComfyui(Box<LaunchConfig>),
    StopComfyui,
    IsComfyuiRunning,
    OpenComfyuiBrowser(Box<LaunchConfig>),
    CloseComfyuiBrowser,
    IsBrowserOpen,
    InstallDependencies(Box<LaunchConfig>),
    ShowError { title: String, message: String },
    ShowInfo { title: String, message: String },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::LoadConfig => "load-config",
            Operation::SaveConfig(_) => "save-config",
            Operation::SelectDirectory => "select-directory",
            Operation::ValidatePath(_) => "validate-path",
            Operation::StartComfyui(_) => "start-comfyui",
            Operation::StopComfyui => "stop-comfyui",
            Operation::IsComfyuiRunning => "is-comfyui-running",
            Operation::OpenComfyuiBrowser(_) => "open-comfyui-browser",
            Operation::CloseComfyuiBrowser => "close-comfyui-browser",
            Operation::IsBrowserOpen => "is-browser-open",
            Operation::InstallDependencies(_) => "install-dependencies",
            Operation::ShowError { .. } => "show-error",
            Operation::ShowInfo { .. } => "show-info",
        }
    }
}

/// Typed outcome of an operation. Serializes to the bare payload shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Config(Box<LaunchConfig>),
    Ack(Ack),
    Directory(DirectorySelection),
    Validation(PathValidation),
    Started(StartReply),
    Running(RunningStatus),
    Browser(BrowserStatus),
    Installed(InstallReply),
    Failure(Failure),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

impl Ack {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySelection {
    pub success: bool,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PythonLayout {
    Embeded,
    Standalone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathValidation {
    pub valid: bool,
    pub missing: Vec<String>,
    #[serde(rename = "pythonType")]
    pub python_type: Option<PythonLayout>,
    #[serde(rename = "pythonPath")]
    pub python_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReply {
    pub success: bool,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub browser_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserStatus {
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReply {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub success: bool,
    pub error: String,
}

impl Failure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
