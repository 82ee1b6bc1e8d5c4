use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "log.txt";

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// First directory in `dirs` where `log.txt` can be opened.
fn open_log_file(dirs: &[PathBuf]) -> Option<(&Path, RollingFileAppender)> {
    dirs.iter().find_map(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE)
            .build(dir)
            .ok()
            .map(|appender| (dir.as_path(), appender))
    })
}

/// Log to `log.txt` next to the executable, else in the temp dir, else
/// nowhere. `RUST_LOG` wins over `verbosity`.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbosity)));
    let dirs = [exe_dir(), std::env::temp_dir()];
    let (writer, location) = match open_log_file(&dirs) {
        Some((dir, appender)) => (BoxMakeWriter::new(appender), Some(dir.join(LOG_FILE))),
        None => (BoxMakeWriter::new(std::io::sink), None),
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true)
        .try_init();

    if installed.is_ok() {
        info!("===== GPTTrans start =====");
        if let Some(path) = location.filter(|p| p.parent() != Some(dirs[0].as_path())) {
            warn!("Cannot write next to the executable; logging to {}", path.display());
        }
    }
}
