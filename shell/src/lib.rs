//! Application facade over the archiver core.
//!
//! [`Shell`] owns the job registry and the persisted [`Settings`], turns
//! collaborator requests into archiver operations and relays their events as
//! [`ShellEvent`]s on a single channel.

mod commands;
mod error;
mod settings;
mod state;

pub use commands::{ExtractMode, Shell, ShellEvent, ShellEventKind, TempExtraction};
pub use error::ShellError;
pub use settings::{settings_path, Settings, APP_DIR, SETTINGS_FILE};

pub use archiver;
