use crate::logging::{recent_entries, LogBuffer};

/// User-facing error display.
///
/// The bridge calls [`show_error`](ErrorSurface::show_error) at most once per
/// failed generation: for a source load failure, an executor failure, or a
/// fatal exception reported by script code.
pub trait ErrorSurface {
    fn show_error(&mut self, message: &str);
}

impl<F: FnMut(&str)> ErrorSurface for F {
    fn show_error(&mut self, message: &str) {
        self(message)
    }
}

const ATTACHED_ENTRIES: usize = 5;

/// Default surface: logs the failure, with the most recent warnings attached
/// when a [`LogBuffer`] is available.
#[derive(Default)]
pub struct LogErrorSurface {
    buffer: Option<LogBuffer>,
}

impl LogErrorSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: LogBuffer) -> Self {
        Self {
            buffer: Some(buffer),
        }
    }

    fn context(&self) -> Vec<String> {
        self.buffer
            .as_ref()
            .map(|buffer| {
                recent_entries(buffer, ATTACHED_ENTRIES)
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ErrorSurface for LogErrorSurface {
    fn show_error(&mut self, message: &str) {
        let context = self.context();
        if context.is_empty() {
            tracing::error!(reason = message, "bridge failed");
        } else {
            tracing::error!(reason = message, recent = ?context, "bridge failed");
        }
    }
}
