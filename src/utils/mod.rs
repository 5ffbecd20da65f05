pub mod config;
pub mod logger;
pub mod settings_file;

pub use config::*;
pub use logger::{Colors, parse_level, setup_logging};
pub use settings_file::{SettingsFile, apply_file_to_opts, load_settings};
