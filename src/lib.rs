pub mod chat;
pub mod inference;

use std::path::{Path, PathBuf};

/// Number of rotated log files kept next to the active one.
const LOG_ROTATIONS: u32 = 3;

/// Default directory for the log file when a bare file name is configured.
///
/// - macOS: `~/Library/Application Support/ollama-chat/`
/// - Linux: `$XDG_DATA_HOME/ollama-chat/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.ollama-chat/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("ollama-chat");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ollama-chat")
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr unless `log_file` is given, in which case:
/// 1. Existing logs are rotated (`chat.log` → `chat.log.1` → … → `.3`).
/// 2. A fresh file is opened with a line-flushing writer.
/// 3. A startup banner records where the log lives.
///
/// `RUST_LOG` wins over the built-in filter; `debug` raises the crate's level.
pub fn init_tracing(debug: bool, log_file: Option<&Path>) -> std::io::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let default_filter = if debug {
        "ollama_chat=debug,warn"
    } else {
        "ollama_chat=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let Some(log_path) = log_file else {
        fmt::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
        return Ok(());
    };

    let log_path = if log_path.is_relative() && log_path.parent() == Some(Path::new("")) {
        data_dir().join(log_path)
    } else {
        log_path.to_path_buf()
    };
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    rotate_log_file(&log_path, LOG_ROTATIONS);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== ollama-chat starting ==="
    );
    Ok(())
}

/// Rotate log files: `chat.log` → `chat.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so each
/// log line is on disk even if the process is killed mid-stream.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rotate_log_file_shifts_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("chat.log");
        for (suffix, body) in [("", "current"), (".1", "one"), (".2", "two"), (".3", "three")] {
            std::fs::write(format!("{}{suffix}", base.display()), body).unwrap();
        }

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        let read = |s: &str| std::fs::read_to_string(format!("{}{s}", base.display())).unwrap();
        assert_eq!(read(".1"), "current");
        assert_eq!(read(".2"), "one");
        assert_eq!(read(".3"), "two");
    }

    #[test]
    fn test_rotate_with_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("chat.log");
        std::fs::write(&base, "only").unwrap();
        rotate_log_file(&base, 3);
        rotate_log_file(&base, 3);
        let rotated = std::fs::read_to_string(format!("{}.2", base.display())).unwrap();
        assert_eq!(rotated, "only");
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\n");
    }
}
