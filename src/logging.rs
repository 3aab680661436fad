// Logging setup: fern dispatch with a plain append-only file sink and an
// optional colored console sink.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

use colored::*;
use log::LevelFilter;

/// Padded, colored level badge for console lines.
fn level_badge(level: log::Level) -> ColoredString {
    let text = format!("{:<5}", level);
    match level {
        log::Level::Error => text.bright_red().bold(),
        log::Level::Warn => text.bright_yellow(),
        log::Level::Info => text.bright_green(),
        log::Level::Debug => text.bright_blue(),
        log::Level::Trace => text.bright_magenta(),
    }
}

/// Wires the global logger from configuration.
///
/// The file sink always runs and stays machine-greppable:
/// `<utc timestamp> <level> <target>:<line> <message>`. The console sink
/// is optional and favors the human eye: short local time, colored badge.
pub fn init_logging(level: &str, file_path: &str, log_to_console: bool) -> anyhow::Result<()> {
    let level = level_from_str(level)?;

    if let Some(dir) = Path::new(file_path).parent() {
        fs::create_dir_all(dir)?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path)?;

    let file_sink = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{utc} {level:<5} {target}:{line} {message}",
                utc = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                level = record.level(),
                target = record.target(),
                line = record.line().unwrap_or(0),
            ))
        })
        .chain(log_file);

    // Third-party chatter is capped no matter how verbose ours gets.
    let mut root = fern::Dispatch::new()
        .level(level)
        .level_for("openraft", LevelFilter::Info)
        .level_for("hyper", LevelFilter::Warn)
        .level_for("h2", LevelFilter::Warn)
        .level_for("tower", LevelFilter::Warn)
        .level_for("reqwest", LevelFilter::Warn)
        .chain(file_sink);

    if log_to_console {
        let console_sink = fern::Dispatch::new()
            .format(|out, message, record| {
                let clock = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
                out.finish(format_args!(
                    "{} {} {} {}",
                    clock.dimmed(),
                    level_badge(record.level()),
                    record.target().cyan(),
                    message
                ))
            })
            .chain(io::stdout());
        root = root.chain(console_sink);
    }

    root.apply()?;
    Ok(())
}

fn level_from_str(value: &str) -> anyhow::Result<LevelFilter> {
    let level = match value.to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        other => anyhow::bail!("unknown log level '{}'", other),
    };
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(level_from_str("INFO").unwrap(), LevelFilter::Info);
        assert_eq!(level_from_str("debug").unwrap(), LevelFilter::Debug);
        assert!(level_from_str("loud").is_err());
    }
}
