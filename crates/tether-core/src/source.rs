//! Bundle sources. A provider is asked for the bundle once per generation and
//! answers with exactly one of [`SourceLink::ready`] or [`SourceLink::failed`].

use std::path::PathBuf;
use std::thread;

use crate::event::ScopedMessage;
use crate::handle::BridgeHandle;

pub trait SourceProvider {
    /// Start loading `url`. `None` means no bundle URL is configured.
    fn load(&mut self, url: Option<&str>, link: SourceLink);
}

/// Completion handle for one bundle load. Consumed by the first report.
#[derive(Debug)]
pub struct SourceLink {
    handle: BridgeHandle,
}

impl SourceLink {
    pub(crate) fn new(handle: BridgeHandle) -> Self {
        Self { handle }
    }

    pub fn ready(self, code: String) -> bool {
        self.handle.post(ScopedMessage::SourceReady { code })
    }

    pub fn failed(self, reason: impl Into<String>) -> bool {
        self.handle.post(ScopedMessage::SourceFailed {
            reason: reason.into(),
        })
    }
}

/// Reads bundles from the local filesystem (plain paths or `file://` URLs)
/// on a background thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSourceProvider;

impl FileSourceProvider {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

impl SourceProvider for FileSourceProvider {
    fn load(&mut self, url: Option<&str>, link: SourceLink) {
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            link.failed("no bundle URL configured");
            return;
        };
        let Some(path) = local_path(url) else {
            link.failed(format!("unsupported bundle URL {url}: only local files can be loaded"));
            return;
        };
        let url = url.to_string();
        thread::spawn(move || match std::fs::read_to_string(&path) {
            Ok(code) => {
                tracing::debug!(%url, bytes = code.len(), "bundle loaded");
                link.ready(code);
            }
            Err(err) => {
                link.failed(format!("failed to read bundle {}: {err}", path.display()));
            }
        });
    }
}
