use anyhow::{Context, Result};
use colored::{Color, Colorize};
use env_logger::{Builder, Target};
use log::{Level, LevelFilter};
use std::io::Write;
use std::path::Path;

/// Colours for the end-of-run summary line.
pub struct Colors;

impl Colors {
    pub const SUCCEEDED: Color = Color::Green;
    pub const FAILED: Color = Color::Red;
    pub const CANCELLED: Color = Color::Yellow;

    pub fn colorize(color: Color, text: &str) -> String {
        text.color(color).to_string()
    }
}

/// Parse a `--log` value (`error`, `warn`, `info`, `debug`, `trace`, case-insensitive).
pub fn parse_level(s: &str) -> Result<LevelFilter> {
    s.trim()
        .parse::<LevelFilter>()
        .with_context(|| format!("invalid log level {s:?}"))
}

/// Install the process-wide logger: `level` for this crate, warnings only for dependencies.
/// With `log_file`, the stream goes to that file (uncoloured) instead of stderr.
pub fn setup_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let mut builder = Builder::from_default_env();
    builder
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level) // Our crate: use requested level
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let ts = buf.timestamp_millis();
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        Level::Error => "ERROR".red(),
                        _ => unreachable!(),
                    };
                    let path = record.target().to_string().white();
                    format!(
                        "{} [{} {} {}] {}",
                        ts,
                        name.cyan(),
                        level_str,
                        path,
                        record.args()
                    )
                }
                _ => format!("{} [{}] {}", ts, name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        });

    if let Some(path) = log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file {}", path.display()))?;
        colored::control::set_override(false);
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("install logger")?;
    Ok(())
}
