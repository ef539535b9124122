//! Output abstraction layer for consistent CLI output

use std::io::{self, IsTerminal};

use colored::Colorize;
use hostaudit::CheckStatus;

/// Output mode for the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Interactive terminal with colors and unicode
    Interactive,
    /// CI environment - plain text, no colors
    CI,
    /// Piped output - plain text, no colors
    Plain,
}

impl OutputMode {
    /// Detect the appropriate output mode based on environment
    pub fn detect() -> Self {
        if is_ci::cached() {
            return OutputMode::CI;
        }

        if io::stdout().is_terminal() {
            OutputMode::Interactive
        } else {
            OutputMode::Plain
        }
    }

    pub fn colors_enabled(&self) -> bool {
        matches!(self, OutputMode::Interactive)
    }

    pub fn unicode_enabled(&self) -> bool {
        matches!(self, OutputMode::Interactive)
    }

    pub fn progress_enabled(&self) -> bool {
        matches!(self, OutputMode::Interactive)
    }
}

impl Default for OutputMode {
    fn default() -> Self {
        Self::detect()
    }
}

/// Centralized printer that respects output mode
#[derive(Debug, Clone)]
pub struct Printer {
    mode: OutputMode,
}

impl Default for Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Printer {
    /// Create a new printer with auto-detected mode
    pub fn new() -> Self {
        Self {
            mode: OutputMode::detect(),
        }
    }

    pub fn with_mode(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn println(&self, message: &str) {
        println!("{}", message);
    }

    pub fn newline(&self) {
        println!();
    }

    pub fn separator(&self) {
        if self.mode.unicode_enabled() {
            println!("{}", "━".repeat(60));
        } else {
            println!("{}", "-".repeat(60));
        }
    }

    pub fn header(&self, text: &str) {
        if self.mode.colors_enabled() {
            println!("{}", text.cyan().bold());
        } else {
            println!("{}", text);
        }
    }

    pub fn success(&self, message: &str) {
        let symbol = if self.mode.unicode_enabled() { "✓" } else { "[OK]" };
        if self.mode.colors_enabled() {
            println!("{} {}", symbol.green(), message.green());
        } else {
            println!("{} {}", symbol, message);
        }
    }

    /// Print an error message to stderr
    pub fn error(&self, message: &str) {
        let symbol = if self.mode.unicode_enabled() { "✗" } else { "[ERROR]" };
        if self.mode.colors_enabled() {
            eprintln!("{} {}", symbol.red(), message.red());
        } else {
            eprintln!("{} {}", symbol, message);
        }
    }

    pub fn warning(&self, message: &str) {
        let symbol = if self.mode.unicode_enabled() { "⚠" } else { "[WARN]" };
        if self.mode.colors_enabled() {
            println!("{} {}", symbol.yellow(), message.yellow());
        } else {
            println!("{} {}", symbol, message);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.mode.colors_enabled() {
            println!("  {}: {}", key.cyan(), value);
        } else {
            println!("  {}: {}", key, value);
        }
    }

    /// Print one check outcome as a table row
    pub fn check_row(&self, target: &str, status: CheckStatus, detail: &str) {
        let label = self.status_label(status);
        if detail.is_empty() {
            println!("  {} {}", label, target);
        } else if self.mode.colors_enabled() {
            println!("  {} {} {}", label, target, detail.dimmed());
        } else {
            println!("  {} {} ({})", label, target, detail);
        }
    }

    /// Fixed-width status marker
    pub fn status_label(&self, status: CheckStatus) -> String {
        let text = format!("{:<5}", status.as_str().to_uppercase());
        if !self.mode.colors_enabled() {
            return text;
        }
        match status {
            CheckStatus::Ok => text.green().to_string(),
            CheckStatus::Error => text.red().bold().to_string(),
        }
    }
}
