// ABOUTME: Logging setup for the coven-conductor console.
// ABOUTME: Crate-filtered stderr logging by default, or a plain file when the console owns the terminal.

use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Crates logged at INFO; everything else defaults to WARN. RUST_LOG overrides.
const CRATES: &[&str] = &["coven_conductor", "coven_conductor_cli"];

fn filter(default: tracing::Level) -> EnvFilter {
    CRATES.iter().fold(
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        |filter, name| {
            let directive = format!("{name}={}", default.as_str().to_lowercase());
            filter.add_directive(directive.parse().unwrap_or_else(|_| default.into()))
        },
    )
}

/// Log to stderr.
pub fn init_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(filter(tracing::Level::INFO))
        .with_writer(std::io::stderr)
        .init();
}

/// Log to a file so output does not interleave with the console.
/// If setup fails, prints a warning and falls back to stderr.
pub fn init_file(path: Option<&Path>) {
    let path = path.map(Path::to_path_buf).or_else(default_log_path);
    let result = match path {
        Some(path) => init_file_inner(&path),
        None => Err("could not determine config directory".into()),
    };
    if let Err(e) = result {
        eprintln!("Warning: failed to set up file logging: {e}");
        init_stderr();
    }
}

/// `~/.config/coven/conductor/conductor.log`
pub fn default_log_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("coven").join("conductor").join("conductor.log"))
}

fn init_file_inner(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(filter(tracing::Level::INFO))
        .with_ansi(false)
        .init();

    Ok(())
}
