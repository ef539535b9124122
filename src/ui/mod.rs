//! Terminal presentation for the hostaudit CLI
//!
//! - `output` - Output mode detection and a mode-aware printer
//! - `progress` - Progress bar ticked as checks complete
//!
//! Colors, unicode symbols and progress bars are only used on an
//! interactive terminal; CI and piped output stay plain.

pub mod output;
pub mod progress;

pub use output::{OutputMode, Printer};
pub use progress::RunProgress;
