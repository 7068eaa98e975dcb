use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tether_core::{Args, BridgeHandle, MethodSpec, ModuleProvider, NativeModule, ProviderContext};

use crate::protocol::{InvokeParams, ModuleDeclaration, HOST_API_VERSION, INVOKE_METHOD};
use crate::runtime::{discover_plugins, DiscoveredPlugin, PluginSession};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Loads native modules from out-of-process plugins.
///
/// Every generation rescans the plugin roots, starts each compatible plugin
/// and registers the modules it declares during the handshake. Plugins that
/// cannot be loaded are logged and skipped; they never fail the generation.
pub struct PluginModuleProvider {
    roots: Vec<PathBuf>,
    handshake_timeout: Duration,
}

impl PluginModuleProvider {
    pub fn new(plugins_path: impl Into<PathBuf>) -> Self {
        Self {
            roots: vec![plugins_path.into()],
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    fn load(
        &self,
        plugin: &DiscoveredPlugin,
        handle: BridgeHandle,
    ) -> Result<Vec<Box<dyn NativeModule>>> {
        plugin.manifest.supports_host_api(HOST_API_VERSION)?;

        let mut session =
            PluginSession::spawn(&plugin.manifest_path, plugin.manifest.clone(), handle)?;
        let declared = session.complete_handshake(self.handshake_timeout)?;

        let session = Rc::new(RefCell::new(session));
        Ok(declared
            .into_iter()
            .map(|declaration| {
                Box::new(RemoteModule::new(declaration, session.clone())) as Box<dyn NativeModule>
            })
            .collect())
    }
}

impl ModuleProvider for PluginModuleProvider {
    fn name(&self) -> &str {
        "plugins"
    }

    fn discover(&mut self, ctx: &ProviderContext<'_>) -> Result<Vec<Box<dyn NativeModule>>> {
        let mut modules = Vec::new();
        for plugin in discover_plugins(&self.roots)? {
            match self.load(&plugin, ctx.handle.clone()) {
                Ok(loaded) => modules.extend(loaded),
                Err(err) => tracing::warn!(
                    plugin = %plugin.manifest.id,
                    error = %format!("{err:#}"),
                    "skipping plugin"
                ),
            }
        }
        Ok(modules)
    }
}

/// A module implemented by a plugin process. Modules from one plugin share its
/// session; the process stops when the last of them is dropped.
pub struct RemoteModule {
    name: String,
    methods: Vec<MethodSpec>,
    constants: Value,
    session: Rc<RefCell<PluginSession>>,
}

impl RemoteModule {
    fn new(declaration: ModuleDeclaration, session: Rc<RefCell<PluginSession>>) -> Self {
        Self {
            methods: declaration.methods.iter().map(|m| m.to_spec()).collect(),
            name: declaration.name,
            constants: declaration.constants,
            session,
        }
    }
}

impl NativeModule for RemoteModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn methods(&self) -> Vec<MethodSpec> {
        self.methods.clone()
    }

    fn constants(&self) -> Value {
        self.constants.clone()
    }

    fn invoke(&mut self, method: &str, _bridge: &BridgeHandle, args: Args) -> Result<()> {
        if !self.methods.iter().any(|spec| spec.name == method) {
            bail!("{} has no method {method}", self.name);
        }
        let params = InvokeParams {
            module: self.name.clone(),
            method: method.to_string(),
            args: args.into_inner(),
        };
        let mut session = self.session.borrow_mut();
        let plugin_id = session.plugin_id().to_string();
        session
            .notify(INVOKE_METHOD, &params)
            .with_context(|| format!("plugin {plugin_id} rejected {}.{method}", self.name))
    }
}
