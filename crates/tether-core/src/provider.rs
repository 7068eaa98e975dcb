use anyhow::Result;
use tether_config::BridgeConfig;

use crate::handle::BridgeHandle;
use crate::module::NativeModule;

/// What a provider gets to build modules for one generation.
pub struct ProviderContext<'a> {
    pub handle: BridgeHandle,
    pub config: &'a BridgeConfig,
}

/// Source of native modules, consulted on every (re)initialization.
///
/// A provider that returns an error is logged and skipped; startup continues
/// with whatever the other providers produced.
pub trait ModuleProvider {
    fn name(&self) -> &str;

    fn discover(&mut self, ctx: &ProviderContext<'_>) -> Result<Vec<Box<dyn NativeModule>>>;
}

type DiscoverFn = Box<dyn FnMut(&ProviderContext<'_>) -> Result<Vec<Box<dyn NativeModule>>>>;

/// Provider backed by a closure, for statically linked modules.
pub struct FnProvider {
    name: String,
    discover: DiscoverFn,
}

impl FnProvider {
    pub fn new(
        name: impl Into<String>,
        discover: impl FnMut(&ProviderContext<'_>) -> Result<Vec<Box<dyn NativeModule>>> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            discover: Box::new(discover),
        }
    }
}

impl ModuleProvider for FnProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn discover(&mut self, ctx: &ProviderContext<'_>) -> Result<Vec<Box<dyn NativeModule>>> {
        (self.discover)(ctx)
    }
}

/// Run every provider in order and concatenate their modules.
pub(crate) fn discover_all(
    providers: &mut [Box<dyn ModuleProvider>],
    ctx: &ProviderContext<'_>,
) -> Vec<Box<dyn NativeModule>> {
    let mut modules = Vec::new();
    for provider in providers.iter_mut() {
        match provider.discover(ctx) {
            Ok(found) => {
                tracing::debug!(
                    provider = provider.name(),
                    count = found.len(),
                    generation = ctx.handle.generation(),
                    "provider discovered modules"
                );
                modules.extend(found);
            }
            Err(err) => {
                tracing::warn!(
                    provider = provider.name(),
                    error = %err,
                    "module discovery failed; skipping provider"
                );
            }
        }
    }
    modules
}
