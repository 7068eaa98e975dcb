use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log severity level, as kept in the [`LogBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub target: String,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.level, self.target, self.message)
    }
}

/// Shared ring buffer of recent warnings and errors.
pub type LogBuffer = Arc<Mutex<VecDeque<LogEntry>>>;

pub fn new_log_buffer(capacity: usize) -> LogBuffer {
    Arc::new(Mutex::new(VecDeque::with_capacity(capacity)))
}

/// The last `count` entries of `buffer`, oldest first.
pub fn recent_entries(buffer: &LogBuffer, count: usize) -> Vec<LogEntry> {
    match buffer.lock() {
        Ok(buf) => {
            let skip = buf.len().saturating_sub(count);
            buf.iter().skip(skip).cloned().collect()
        }
        Err(_) => Vec::new(),
    }
}

/// Return the log directory path.
///
/// Precedence: `TETHER_LOG_DIR` env var > platform data dir > `./logs`.
pub fn log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TETHER_LOG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(data) = dirs::data_dir() {
        return data.join("tether").join("logs");
    }
    PathBuf::from("logs")
}

const MAX_BUFFERED_ENTRIES: usize = 200;
const LOG_RETENTION_DAYS: u64 = 7;
const LOG_FILE_PREFIX: &str = "tether.log";

/// Remove rolled log files older than `max_age_days`. Only names starting
/// with `tether.log` are touched.
fn cleanup_old_logs(log_path: &Path, max_age_days: u64) {
    let cutoff =
        std::time::SystemTime::now() - std::time::Duration::from_secs(max_age_days * 86400);
    let Ok(entries) = std::fs::read_dir(log_path) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let modified = entry.metadata().and_then(|meta| meta.modified());
        if matches!(modified, Ok(modified) if modified <= cutoff) {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

/// Pushes warn/error events into a shared ring buffer.
struct BufferLayer {
    buffer: LogBuffer,
    max_entries: usize,
    min_level: LogLevel,
}

impl BufferLayer {
    fn push(&self, entry: LogEntry) {
        if entry.level < self.min_level {
            return;
        }
        if let Ok(mut buf) = self.buffer.lock() {
            while buf.len() >= self.max_entries {
                buf.pop_front();
            }
            buf.push_back(entry);
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for BufferLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = LogLevel::from(event.metadata().level());
        if level < self.min_level {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.push(LogEntry {
            level,
            target: event.metadata().target().to_string(),
            message: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match self.message {
            Some(msg) if self.fields.is_empty() => msg,
            Some(msg) => format!("{} {}", msg, self.fields.join(" ")),
            None => self.fields.join(" "),
        }
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }
}

fn json_stderr_requested() -> bool {
    std::env::var("TETHER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Initialize logging and return the buffer of recent warnings/errors.
///
/// Filter: `TETHER_LOG`, then `RUST_LOG`, default `info`. Output goes to a
/// daily-rolling `tether.log` in [`log_dir`] (7-day retention) and to stderr,
/// as JSON when `TETHER_LOG_FORMAT=json`.
pub fn init() -> LogBuffer {
    let buffer = new_log_buffer(MAX_BUFFERED_ENTRIES);

    let filter = EnvFilter::try_from_env("TETHER_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_path = log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_path) {
        eprintln!(
            "warning: failed to create log directory {:?}: {}",
            log_path, e
        );
    }
    cleanup_old_logs(&log_path, LOG_RETENTION_DAYS);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(rolling::daily(&log_path, LOG_FILE_PREFIX))
        .with_ansi(false)
        .with_target(true);

    let stderr_layer = if json_stderr_requested() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let buffer_layer = BufferLayer {
        buffer: buffer.clone(),
        max_entries: MAX_BUFFERED_ENTRIES,
        min_level: LogLevel::Warn,
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .with(buffer_layer)
        .try_init();
    if installed.is_err() {
        eprintln!("warning: a global tracing subscriber is already installed");
    }

    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    // Serialize env-mutating tests.
    static ENV_LOCK: StdMutex<()> = StdMutex::new(());

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            level,
            target: "tether_core::test".into(),
            message: message.into(),
        }
    }

    #[test]
    fn log_dir_respects_env_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        let original = std::env::var("TETHER_LOG_DIR").ok();

        unsafe { std::env::set_var("TETHER_LOG_DIR", "/tmp/tether-test-logs") };
        assert_eq!(log_dir(), PathBuf::from("/tmp/tether-test-logs"));

        match original {
            Some(v) => unsafe { std::env::set_var("TETHER_LOG_DIR", v) },
            None => unsafe { std::env::remove_var("TETHER_LOG_DIR") },
        }
    }

    #[test]
    fn log_dir_defaults_under_data_dir() {
        let _guard = ENV_LOCK.lock().unwrap();
        let original = std::env::var("TETHER_LOG_DIR").ok();

        unsafe { std::env::remove_var("TETHER_LOG_DIR") };
        let dir = log_dir();
        match dirs::data_dir() {
            Some(data) => assert_eq!(dir, data.join("tether").join("logs")),
            None => assert_eq!(dir, PathBuf::from("logs")),
        }

        if let Some(v) = original {
            unsafe { std::env::set_var("TETHER_LOG_DIR", v) };
        }
    }

    #[test]
    fn buffer_layer_keeps_only_recent_warnings() {
        let layer = BufferLayer {
            buffer: new_log_buffer(3),
            max_entries: 3,
            min_level: LogLevel::Warn,
        };
        layer.push(entry(LogLevel::Info, "ignored"));
        for i in 0..5 {
            layer.push(entry(LogLevel::Warn, &format!("msg {i}")));
        }
        let recent = recent_entries(&layer.buffer, 10);
        let messages: Vec<&str> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn recent_entries_takes_the_tail() {
        let buffer = new_log_buffer(4);
        {
            let mut buf = buffer.lock().unwrap();
            buf.push_back(entry(LogLevel::Warn, "a"));
            buf.push_back(entry(LogLevel::Error, "b"));
        }
        let tail = recent_entries(&buffer, 1);
        assert_eq!(tail, vec![entry(LogLevel::Error, "b")]);
        assert_eq!(tail[0].to_string(), "ERROR tether_core::test: b");
    }

    #[test]
    fn log_level_ordering_and_display() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert_eq!(format!("{}", LogLevel::Warn), "WARN");
        assert_eq!(LogLevel::from(&tracing::Level::DEBUG), LogLevel::Debug);
    }

    #[test]
    fn message_visitor_joins_fields() {
        let v = MessageVisitor {
            message: Some("dropping batch".into()),
            fields: vec!["generation=2".into()],
        };
        assert_eq!(v.finish(), "dropping batch generation=2");

        let v = MessageVisitor {
            message: None,
            fields: vec!["a=1".into(), "b=2".into()],
        };
        assert_eq!(v.finish(), "a=1 b=2");
        assert_eq!(MessageVisitor::default().finish(), "");
    }

    #[test]
    fn cleanup_old_logs_removes_only_tether_logs() {
        let tmp = std::env::temp_dir().join(format!("tether-test-cleanup-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&tmp);

        let rolled_a = tmp.join("tether.log.2025-01-01");
        let rolled_b = tmp.join("tether.log.2025-01-02");
        let other = tmp.join("other.txt");
        std::fs::write(&rolled_a, "a").unwrap();
        std::fs::write(&rolled_b, "b").unwrap();
        std::fs::write(&other, "c").unwrap();

        cleanup_old_logs(&tmp, 0);
        assert!(!rolled_a.exists());
        assert!(!rolled_b.exists());
        assert!(other.exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
