use std::path::PathBuf;

/// Failures surfaced by launcher operations.
///
/// Every variant is turned into a structured failure result before it reaches
/// the front end; see `orchestrator::controller`.
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    /// A required configuration field is missing.
    #[error("{0}")]
    Configuration(String),

    /// The installation root lacks the interpreter, entry script, or another
    /// required file.
    #[error("{0}")]
    Environment(String),

    #[error("ComfyUI is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Installation finished with code: {}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ExitFailure { code: Option<i32> },

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type LauncherResult<T> = Result<T, LauncherError>;
