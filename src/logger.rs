//! Tag-based colored logging for volumebot
//!
//! Handles:
//! - Colorized console output with aligned tag and event columns
//! - Per-module debug gating via --debug-<module> command line flags
//! - Broken pipe handling for piped output

use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

use crate::global::is_debug_enabled_for;

/// Log format widths for alignment
const TAG_WIDTH: usize = 9;
const EVENT_WIDTH: usize = 22;

/// Component tags for log routing and debug gating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    System,
    Session,
    Wallet,
    Executor,
    Oracle,
    Rpc,
    Metrics,
}

impl LogTag {
    /// Key used for --debug-<key> command line gating
    pub fn debug_key(&self) -> &'static str {
        match self {
            LogTag::System => "system",
            LogTag::Session => "session",
            LogTag::Wallet => "wallet",
            LogTag::Executor => "executor",
            LogTag::Oracle => "oracle",
            LogTag::Rpc => "rpc",
            LogTag::Metrics => "metrics",
        }
    }

    pub fn to_plain_string(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Session => "SESSION",
            LogTag::Wallet => "WALLET",
            LogTag::Executor => "EXECUTOR",
            LogTag::Oracle => "ORACLE",
            LogTag::Rpc => "RPC",
            LogTag::Metrics => "METRICS",
        }
    }
}

/// Log a message under a component tag with an event label
///
/// Events are free-form uppercase markers like "CYCLE_START" or "SWEEP_FAILED".
/// Use `log_debug` for diagnostics that should stay silent unless the module's
/// debug flag was passed.
pub fn log(tag: LogTag, event: &str, message: &str) {
    let time = Local::now().format("%H:%M:%S").to_string();

    let line = format!(
        "{} [{}] [{}] {}",
        time.dimmed(),
        format_tag(&tag),
        format_event(event),
        message
    );

    print_stdout_safe(&line);
}

/// Log only when --debug-<module> was passed for this tag
pub fn log_debug(tag: LogTag, event: &str, message: &str) {
    if is_debug_enabled_for(tag.debug_key()) {
        log(tag, event, message);
    }
}

/// Format a tag with its color, padded for column alignment
fn format_tag(tag: &LogTag) -> ColoredString {
    let padded = format!("{:<width$}", tag.to_plain_string(), width = TAG_WIDTH);
    match tag {
        LogTag::System => padded.bright_yellow().bold(),
        LogTag::Session => padded.bright_green().bold(),
        LogTag::Wallet => padded.bright_magenta().bold(),
        LogTag::Executor => padded.bright_blue().bold(),
        LogTag::Oracle => padded.bright_cyan().bold(),
        LogTag::Rpc => padded.bright_cyan().bold(),
        LogTag::Metrics => padded.bright_white().bold(),
    }
}

/// Format an event label with appropriate color
fn format_event(event: &str) -> ColoredString {
    let padded = format!("{:<width$}", event, width = EVENT_WIDTH);
    match event.to_uppercase().as_str() {
        "ERROR" => padded.bright_red().bold(),
        "WARNING" => padded.bright_yellow().bold(),
        "SUCCESS" => padded.bright_green().bold(),
        _ => padded.white().bold(),
    }
}

/// Print to stdout but ignore broken pipe errors
fn print_stdout_safe(message: &str) {
    if let Err(e) = writeln!(stdout(), "{}", message) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        let _ = writeln!(std::io::stderr(), "Logger stdout error: {}", e);
    }
    if let Err(e) = stdout().flush() {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
    }
}

/// Session banner printed at startup
pub fn header(title: &str) {
    println!();
    println!(
        "{} {} {}",
        "🤖".green().bold(),
        "VolumeBot".green().bold(),
        format!("- {}", title).bright_white().bold()
    );
    println!("{}", "─".repeat(50).dimmed());
    let _ = stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_keys_are_unique() {
        let tags = [
            LogTag::System,
            LogTag::Session,
            LogTag::Wallet,
            LogTag::Executor,
            LogTag::Oracle,
            LogTag::Rpc,
            LogTag::Metrics,
        ];
        let mut keys: Vec<&str> = tags.iter().map(|t| t.debug_key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), tags.len());
    }
}
