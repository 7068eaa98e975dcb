//! Built-in native modules that every bridge generation registers, in a fixed
//! order, ahead of any discovered plugin modules.

pub mod exceptions;
pub mod networking;
pub mod source_code;
pub mod status;
pub mod storage;
pub mod timing;
pub mod views;

use std::path::PathBuf;

use anyhow::Result;
use tether_config::BridgeConfig;
use tether_core::{ModuleProvider, NativeModule, ProviderContext};

pub use exceptions::ExceptionsManager;
pub use networking::Networking;
pub use source_code::SourceCode;
pub use status::{AppState, NetInfo, StatusCell};
pub use storage::AsyncStorage;
pub use timing::Timing;
pub use views::ViewManager;

/// Provides the built-in modules.
///
/// Holds the app-state and reachability cells across reloads so the embedder
/// can keep updating them while generations come and go.
pub struct BuiltinProvider {
    app_state: StatusCell,
    net_info: StatusCell,
}

impl Default for BuiltinProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinProvider {
    pub fn new() -> Self {
        Self {
            app_state: StatusCell::app_state(),
            net_info: StatusCell::net_info(),
        }
    }

    pub fn app_state(&self) -> StatusCell {
        self.app_state.clone()
    }

    pub fn net_info(&self) -> StatusCell {
        self.net_info.clone()
    }
}

/// Directory for `AsyncLocalStorage`: configured, else the platform data dir.
pub fn storage_dir(config: &BridgeConfig) -> PathBuf {
    if let Some(dir) = &config.storage_dir {
        return dir.clone();
    }
    dirs::data_dir()
        .map(|data| data.join("tether").join("storage"))
        .unwrap_or_else(|| PathBuf::from("storage"))
}

impl ModuleProvider for BuiltinProvider {
    fn name(&self) -> &str {
        "builtin"
    }

    fn discover(&mut self, ctx: &ProviderContext<'_>) -> Result<Vec<Box<dyn NativeModule>>> {
        let events = ctx.handle.event_dispatcher();
        let mut modules: Vec<Box<dyn NativeModule>> = vec![Box::new(Timing::new())];

        let dir = storage_dir(ctx.config);
        match AsyncStorage::open(&dir) {
            Ok(storage) => modules.push(Box::new(storage)),
            Err(err) => tracing::warn!(
                dir = %dir.display(),
                error = %format!("{err:#}"),
                "AsyncLocalStorage unavailable; skipping module"
            ),
        }

        modules.push(Box::new(AppState::new(self.app_state.clone(), events.clone())));
        modules.push(Box::new(NetInfo::new(self.net_info.clone(), events)));
        modules.push(Box::new(Networking::new()));
        modules.push(Box::new(ViewManager::raw_text()));
        modules.push(Box::new(ViewManager::text()));
        modules.push(Box::new(ViewManager::image_view()));
        modules.push(Box::new(ExceptionsManager));
        modules.push(Box::new(SourceCode::new(ctx.config.bundle_url.as_deref())));
        Ok(modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tether_core::{BridgeHandle, ModuleRegistry};

    #[test]
    fn builtins_register_with_sequential_ids() {
        let dir = std::env::temp_dir().join(format!("tether-builtin-{}", std::process::id()));
        let config = BridgeConfig {
            storage_dir: Some(dir.clone()),
            bundle_url: Some("file:///index.bundle".into()),
            ..BridgeConfig::default()
        };
        let (tx, _rx) = mpsc::channel();
        let ctx = ProviderContext {
            handle: BridgeHandle::new(1, tx),
            config: &config,
        };
        let modules = BuiltinProvider::new().discover(&ctx).unwrap();

        let mut registry = ModuleRegistry::new(1);
        assert_eq!(registry.register(modules), 10);
        assert_eq!(
            registry.names(),
            vec![
                "Timing",
                "AsyncLocalStorage",
                "AppState",
                "NetInfo",
                "Networking",
                "RCTRawText",
                "RCTText",
                "RCTImageView",
                "ExceptionsManager",
                "SourceCode",
            ]
        );
        for (expected, module) in registry.modules().iter().enumerate() {
            assert_eq!(module.id(), expected);
        }
        let config = registry.serialize_config().to_value();
        assert_eq!(
            config["remoteModuleConfig"]["NetInfo"]["methods"]["getCurrentConnectivity"]["type"],
            "remoteAsync"
        );
        assert_eq!(
            config["remoteModuleConfig"]["SourceCode"]["constants"]["scriptURL"],
            "file:///index.bundle"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn storage_dir_prefers_config() {
        let config = BridgeConfig {
            storage_dir: Some(PathBuf::from("/var/lib/app")),
            ..BridgeConfig::default()
        };
        assert_eq!(storage_dir(&config), PathBuf::from("/var/lib/app"));
    }
}
