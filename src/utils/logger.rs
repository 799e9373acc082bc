use colored::{ColoredString, Colorize};
use env_logger::Builder;
use log::{Level, LevelFilter, Record};
use std::io::Write;

const PKG: &str = env!("CARGO_PKG_NAME");

fn level_tag(level: Level) -> Option<ColoredString> {
    match level {
        Level::Error => Some("ERROR".red()),
        Level::Warn => Some("WARN".yellow()),
        _ => None,
    }
}

/// Info lines are plain, debug lines dimmed; warnings and errors carry a level tag and module.
fn format_line(record: &Record) -> String {
    if let Some(tag) = level_tag(record.level()) {
        let target = record.target().white();
        return format!("[{} {} {}] {}", PKG.cyan(), tag, target, record.args());
    }
    match record.level() {
        Level::Info => format!("[{}] {}", PKG.cyan(), record.args()),
        _ => format!("[{}] {}", PKG.cyan(), record.args().to_string().dimmed()),
    }
}

/// Initialise env_logger for the binary. Safe to call more than once (later calls are ignored).
///
/// The crate logs at Info (Debug when `verbose`); dependencies stay at Warn.
/// `RUST_LOG` still applies.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(PKG, level)
        .format(|buf, record| writeln!(buf, "{}", format_line(record)))
        .try_init();
}
