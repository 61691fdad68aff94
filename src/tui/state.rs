use crate::model::{LaunchConfig, LauncherEvent, Operation, PathValidation, Response};
use std::collections::VecDeque;
use time::macros::format_description;
use time::OffsetDateTime;

/// Messages delivered to the UI thread.
#[derive(Debug)]
pub enum UiMsg {
    Event(LauncherEvent),
    Reply {
        op: &'static str,
        result: Result<Response, String>,
    },
}

/// Scrollback for a stream of raw output chunks.
///
/// Chunks are split into display lines. A carriage return without a newline
/// rewrites the current line, the way progress bars expect.
#[derive(Debug, Clone)]
pub struct OutputLog {
    lines: VecDeque<String>,
    partial: String,
    max_lines: usize,
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::with_capacity(2000)
    }
}

impl OutputLog {
    pub fn with_capacity(max_lines: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            partial: String::new(),
            max_lines: max_lines.max(1),
        }
    }

    pub fn push(&mut self, chunk: &str) {
        let mut chars = chunk.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\n' => self.finish_line(),
                '\r' if chars.peek() == Some(&'\n') => {}
                '\r' => self.partial.clear(),
                c => self.partial.push(c),
            }
        }
    }

    /// Add a launcher note as its own line.
    pub fn note(&mut self, text: &str) {
        if !self.partial.is_empty() {
            self.finish_line();
        }
        self.partial = format!("── {} {text}", timestamp());
        self.finish_line();
    }

    fn finish_line(&mut self) {
        self.lines.push_back(std::mem::take(&mut self.partial));
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// The last `n` display lines, including an unterminated one.
    pub fn tail(&self, n: usize) -> Vec<&str> {
        let mut all: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        if !self.partial.is_empty() {
            all.push(&self.partial);
        }
        let skip = all.len().saturating_sub(n);
        all.split_off(skip)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.partial.clear();
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

pub struct UiState {
    pub tab: usize,
    pub show_help: bool,
    pub info: String,
    pub config: LaunchConfig,
    pub validation: Option<PathValidation>,
    pub running: bool,
    pub pid: Option<u32>,
    pub browser_open: bool,
    pub installing: bool,
    pub output: OutputLog,
    pub install_output: OutputLog,
    pub selected: usize,
    /// Edit buffer while a text field is being edited.
    pub editing: Option<String>,
    // Replies and notifications travel on different tasks. The n-th
    // successful start reply belongs to the n-th `Started` notification.
    started_events: u64,
    started_replies: u64,
    pending_pid: Option<u32>,
}

impl UiState {
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            tab: 0,
            show_help: false,
            info: String::new(),
            config,
            validation: None,
            running: false,
            pid: None,
            browser_open: false,
            installing: false,
            output: OutputLog::default(),
            install_output: OutputLog::default(),
            selected: 0,
            editing: None,
            started_events: 0,
            started_replies: 0,
            pending_pid: None,
        }
    }

    /// Apply a notification. May return a follow-up operation to issue.
    pub fn apply_event(&mut self, ev: LauncherEvent) -> Option<Operation> {
        match ev {
            LauncherEvent::Output(chunk) => self.output.push(&chunk),
            LauncherEvent::Started => {
                self.started_events += 1;
                self.running = true;
                if self.started_events == self.started_replies {
                    self.pid = self.pending_pid.take();
                }
                self.output.note("ComfyUI started");
            }
            LauncherEvent::Stopped => {
                self.running = false;
                self.pid = None;
                self.pending_pid = None;
                self.output.note("ComfyUI stopped");
            }
            LauncherEvent::Exit(code) => {
                let code = code.map_or_else(|| "none".to_string(), |c| c.to_string());
                self.output.note(&format!("ComfyUI exited with code {code}"));
            }
            LauncherEvent::BrowserAutoOpened => {
                self.browser_open = true;
                self.info = "Companion window opened".into();
            }
            LauncherEvent::BrowserClosed => self.browser_open = false,
            LauncherEvent::PathSelected(path) => {
                self.info = format!("ComfyUI folder set to {path}");
                self.config.comfyui_path = path.clone();
                return Some(Operation::ValidatePath(path));
            }
            LauncherEvent::InstallOutput(chunk) => self.install_output.push(&chunk),
        }
        None
    }

    /// Apply the reply to an operation. May return a follow-up operation.
    pub fn apply_reply(
        &mut self,
        op: &'static str,
        result: Result<Response, String>,
    ) -> Option<Operation> {
        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.info = format!("{op}: {e}");
                return None;
            }
        };
        match response {
            Response::Config(cfg) => self.config = *cfg,
            Response::Ack(ack) => {
                self.info = if ack.success {
                    ack.message
                } else {
                    format!("✗ {}", ack.message)
                };
            }
            Response::Directory(sel) => {
                if let Some(path) = sel.path {
                    self.config.comfyui_path = path.clone();
                    self.info = format!("Selected {path} (w to save)");
                    return Some(Operation::ValidatePath(path));
                }
            }
            Response::Validation(v) => {
                self.info = if v.valid {
                    "Installation looks good".into()
                } else {
                    format!("✗ Missing: {}", v.missing.join(", "))
                };
                self.validation = Some(v);
            }
            Response::Started(reply) => {
                self.started_replies += 1;
                self.info = format!("ComfyUI started (pid {})", reply.pid);
                if self.started_replies > self.started_events {
                    // Its notification is still on the way.
                    self.pending_pid = Some(reply.pid);
                } else if self.running {
                    self.pid = Some(reply.pid);
                }
            }
            Response::Running(status) => {
                self.running = status.running;
                self.pid = status.pid;
                self.browser_open = status.browser_open;
            }
            Response::Browser(status) => self.browser_open = status.open,
            Response::Installed(_) => {
                self.installing = false;
                self.info = "Dependencies installed".into();
                self.install_output.note("Installation finished");
            }
            Response::Failure(f) => {
                if op == "install-dependencies" {
                    self.installing = false;
                    self.install_output.note(&f.error);
                }
                self.info = format!("✗ {op}: {}", f.error);
            }
            Response::Done => {}
        }
        None
    }
}
