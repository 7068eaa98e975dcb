//! Out-of-process native modules.
//!
//! Plugins are discovered from `plugin.toml` manifests, started as child
//! processes and spoken to over line-delimited JSON-RPC 2.0 on stdio. Each
//! plugin declares its modules in the `tether.handshake` request; the host
//! registers them like any in-process module.

pub mod protocol;
pub mod provider;
pub mod runtime;

pub use protocol::HOST_API_VERSION;
pub use provider::{PluginModuleProvider, RemoteModule, DEFAULT_HANDSHAKE_TIMEOUT};
pub use runtime::{discover_plugins, DiscoveredPlugin, RemoteError};
