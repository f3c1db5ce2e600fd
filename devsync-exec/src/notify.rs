//! Operator-facing surfaces: transient notifications, confirmation prompts
//! and the shared append-only output log.

use std::io::{IsTerminal, Write};
use std::sync::Mutex;

use dialoguer::{theme::ColorfulTheme, Confirm};

/// Where the executor reports progress and asks for confirmation.
pub trait NotificationSink: Send + Sync {
    /// A short, transient notification (command start, skip decision, ...).
    fn info(&self, message: &str);

    /// Blocking yes/no question. A dismissed prompt counts as "no".
    fn confirm(&self, message: &str) -> bool;

    /// Append raw command output to the shared log.
    fn append_log(&self, text: &str);
}

/// How a [`ConsoleSink`] answers confirmation prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMode {
    /// Ask on the terminal; decline when no terminal is attached.
    #[default]
    Interactive,
    /// Answer every prompt with "yes" (`--yes`).
    AssumeYes,
    /// Answer every prompt with "no".
    AssumeNo,
}

/// Notifications go to `tracing`, command output to stdout, prompts to the
/// terminal via `dialoguer`.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    mode: PromptMode,
    // Serializes log appends with prompts so output never interleaves.
    out: Mutex<()>,
}

impl ConsoleSink {
    pub fn new(mode: PromptMode) -> Self {
        Self {
            mode,
            out: Mutex::new(()),
        }
    }

    fn attended() -> bool {
        std::io::stdin().is_terminal() && console::Term::stderr().is_term()
    }
}

impl NotificationSink for ConsoleSink {
    fn info(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn confirm(&self, message: &str) -> bool {
        match self.mode {
            PromptMode::AssumeYes => {
                tracing::info!(prompt = message, "auto-confirmed");
                true
            }
            PromptMode::AssumeNo => {
                tracing::info!(prompt = message, "auto-declined");
                false
            }
            PromptMode::Interactive if !Self::attended() => {
                tracing::warn!(prompt = message, "no terminal attached, declining");
                false
            }
            PromptMode::Interactive => {
                let _guard = self.out.lock().unwrap_or_else(|e| e.into_inner());
                Confirm::with_theme(&ColorfulTheme::default())
                    .with_prompt(message)
                    .default(false)
                    .interact_opt()
                    .unwrap_or_else(|err| {
                        tracing::warn!(error = %err, "confirmation prompt failed");
                        None
                    })
                    .unwrap_or(false)
            }
        }
    }

    fn append_log(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _guard = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        if !text.ends_with('\n') {
            let _ = stdout.write_all(b"\n");
        }
        let _ = stdout.flush();
    }
}
