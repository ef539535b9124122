//! Command implementations

pub mod run;
pub mod runs;
pub mod sign;
pub mod verify;

use crate::cli::OutputFormat;
use crate::ui::{OutputMode, Printer};

/// Printer for a command; JSON output never gets decorations
fn printer_for(format: OutputFormat) -> Printer {
    if format.is_json() {
        Printer::with_mode(OutputMode::Plain)
    } else {
        Printer::new()
    }
}
