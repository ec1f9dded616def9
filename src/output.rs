use serde::Deserialize;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where final text goes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Type into the focused window
    Type,
    /// Copy to clipboard only
    Clipboard,
    /// Type and copy
    Both,
}

/// Opaque handle to the window that was focused when recording started.
///
/// Captured once per session, consumed once to restore focus before text
/// injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusToken(String);

impl FocusToken {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Text injection errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// Helper tool could not be spawned
    #[error("failed to run {tool}: {source}")]
    Command {
        /// Tool name
        tool: &'static str,
        /// Underlying error
        source: std::io::Error,
    },

    /// Helper tool ran but reported failure
    #[error("{tool} exited with {status}")]
    Failed {
        /// Tool name
        tool: &'static str,
        /// Exit status
        status: std::process::ExitStatus,
    },

    /// Text is empty
    #[error("text is empty")]
    EmptyText,
}

/// Text injection sink (external collaborator; best-effort).
#[cfg_attr(test, mockall::automock)]
pub trait TextSink: Send + Sync {
    /// Type text into the focused window
    ///
    /// # Errors
    /// Returns error if the injection tool cannot be run or fails.
    fn type_text(&self, text: &str) -> Result<(), SinkError>;

    /// Put text on the clipboard
    ///
    /// # Errors
    /// Returns error if the clipboard tool cannot be run or fails.
    fn set_clipboard(&self, text: &str) -> Result<(), SinkError>;
}

/// Window focus service (external collaborator; best-effort).
#[cfg_attr(test, mockall::automock)]
pub trait FocusService: Send + Sync {
    /// Token for the currently focused window, if any
    fn focused_window(&self) -> Option<FocusToken>;

    /// Re-focus the window identified by the token
    fn restore_focus(&self, token: FocusToken);
}

/// Production sink shelling out to `xdotool` / `xclip`.
pub struct CommandSink {
    /// Per-keystroke delay handed to xdotool (ms)
    type_delay_ms: u64,
}

impl CommandSink {
    #[must_use]
    pub const fn new(type_delay_ms: u64) -> Self {
        Self { type_delay_ms }
    }
}

impl TextSink for CommandSink {
    fn type_text(&self, text: &str) -> Result<(), SinkError> {
        if text.is_empty() {
            return Err(SinkError::EmptyText);
        }

        let status = Command::new("xdotool")
            .args([
                "type",
                "--clearmodifiers",
                "--delay",
                &self.type_delay_ms.to_string(),
                "--",
                text,
            ])
            .status()
            .map_err(|source| SinkError::Command {
                tool: "xdotool",
                source,
            })?;

        if !status.success() {
            return Err(SinkError::Failed {
                tool: "xdotool",
                status,
            });
        }

        debug!(text_len = text.len(), "text typed into focused window");
        Ok(())
    }

    fn set_clipboard(&self, text: &str) -> Result<(), SinkError> {
        if text.is_empty() {
            return Err(SinkError::EmptyText);
        }

        let mut child = Command::new("xclip")
            .args(["-selection", "clipboard"])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| SinkError::Command {
                tool: "xclip",
                source,
            })?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(text.as_bytes())
                .map_err(|source| SinkError::Command {
                    tool: "xclip",
                    source,
                })?;
        }

        let status = child.wait().map_err(|source| SinkError::Command {
            tool: "xclip",
            source,
        })?;

        if !status.success() {
            return Err(SinkError::Failed {
                tool: "xclip",
                status,
            });
        }

        debug!(text_len = text.len(), "text copied to clipboard");
        Ok(())
    }
}

/// Production focus service backed by `xdotool`.
pub struct CommandFocus;

impl FocusService for CommandFocus {
    fn focused_window(&self) -> Option<FocusToken> {
        let output = Command::new("xdotool")
            .arg("getactivewindow")
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let id = String::from_utf8(output.stdout).ok()?;
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        Some(FocusToken::new(id))
    }

    fn restore_focus(&self, token: FocusToken) {
        match Command::new("xdotool")
            .args(["windowactivate", token.as_str()])
            .status()
        {
            Ok(status) if status.success() => {
                debug!(window = token.as_str(), "focus restored");
            }
            Ok(status) => {
                warn!(window = token.as_str(), %status, "focus restore failed");
            }
            Err(e) => {
                warn!("failed to run xdotool windowactivate: {}", e);
            }
        }
    }
}

/// Generate preview of text for logging (pure, testable)
///
/// Truncates text >50 chars with "..." suffix. Respects UTF-8 char boundaries.
#[must_use]
pub fn text_preview(text: &str) -> String {
    if text.len() > 50 {
        let mut end = 47.min(text.len());
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            return "...".to_owned();
        }
        format!("{}...", &text[..end])
    } else {
        text.to_owned()
    }
}

/// Time for the window manager to apply restored focus before keystrokes land
const FOCUS_SETTLE: Duration = Duration::from_millis(300);

/// Routes final text to the configured sink(s).
///
/// All failures here are logged and swallowed; output is best-effort and
/// never fails the recording session.
pub struct OutputDispatcher {
    sink: Box<dyn TextSink>,
    focus: Arc<dyn FocusService>,
    mode: OutputMode,
}

impl OutputDispatcher {
    #[must_use]
    pub fn new(sink: Box<dyn TextSink>, focus: Arc<dyn FocusService>, mode: OutputMode) -> Self {
        Self { sink, focus, mode }
    }

    /// Deliver text per the configured output mode, restoring focus first.
    pub fn dispatch(&self, text: &str, focus: Option<FocusToken>) {
        if text.is_empty() {
            warn!("dispatch called with empty text, ignoring");
            return;
        }

        info!(
            mode = ?self.mode,
            text_len = text.len(),
            text_preview = %text_preview(text),
            "dispatching text"
        );

        if let Some(token) = focus {
            self.focus.restore_focus(token);
        }

        if matches!(self.mode, OutputMode::Clipboard | OutputMode::Both) {
            if let Err(e) = self.sink.set_clipboard(text) {
                warn!(error = %e, "clipboard update failed");
            }
        }

        if matches!(self.mode, OutputMode::Type | OutputMode::Both) {
            std::thread::sleep(FOCUS_SETTLE);
            if let Err(e) = self.sink.type_text(text) {
                warn!(error = %e, "text injection failed");
            }
        }
    }
}
