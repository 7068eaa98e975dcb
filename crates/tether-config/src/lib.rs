//! Configuration types and loaders for tether.
//!
//! This crate owns the on-disk schemas (`tether.toml` for the bridge and
//! `plugin.toml` for module plugins) so runtime crates share a single source
//! of truth.

pub mod bridge;
pub mod plugin;

pub use bridge::{BridgeConfig, ExecutorSettings, DEFAULT_EXECUTOR_NAME, DEFAULT_PLUGINS_PATH};
pub use plugin::{PluginCompatibility, PluginManifest, PluginModules, PluginRuntime};
