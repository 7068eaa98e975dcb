use anyhow::Result;
use serde_json::{Map, Value};

use crate::args::Args;
use crate::handle::BridgeHandle;

/// Calling convention of an exported method, as advertised to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Fire-and-forget; no callback arguments.
    Async,
    /// Trailing argument(s) are callback IDs the method invokes on completion.
    Callback,
    /// The last two arguments are resolve/reject callback IDs.
    Promise,
}

impl MethodKind {
    /// Method type string used in the module configuration descriptor.
    pub fn descriptor_type(self) -> &'static str {
        match self {
            MethodKind::Async | MethodKind::Callback => "remote",
            MethodKind::Promise => "remoteAsync",
        }
    }

    pub fn accepts_callback(self) -> bool {
        !matches!(self, MethodKind::Async)
    }
}

/// Declaration of one exported method: its name, argument count and kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: String,
    /// Exact number of arguments the engine must pass, callbacks included.
    pub arity: usize,
    pub kind: MethodKind,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
            kind: MethodKind::Async,
        }
    }

    pub fn callback(name: impl Into<String>, arity: usize) -> Self {
        Self {
            kind: MethodKind::Callback,
            ..Self::new(name, arity)
        }
    }

    pub fn promise(name: impl Into<String>, arity: usize) -> Self {
        Self {
            kind: MethodKind::Promise,
            ..Self::new(name, arity)
        }
    }
}

/// A native capability unit exposed to the script engine.
///
/// Modules are produced by [`crate::provider::ModuleProvider`]s and handed to
/// [`crate::registry::ModuleRegistry`], which assigns the module an ID and
/// each entry of [`methods`](NativeModule::methods) a method ID in
/// declaration order. The registry then calls [`invoke`](NativeModule::invoke)
/// from the dispatch loop, never concurrently.
pub trait NativeModule {
    /// Name the engine uses to address this module (e.g. `"Timing"`).
    fn name(&self) -> &str;

    /// Exported methods, in the order their IDs are assigned.
    fn methods(&self) -> Vec<MethodSpec>;

    /// Values exported once at registration time. Must be a JSON object.
    ///
    /// The default implementation exports nothing.
    fn constants(&self) -> Value {
        Value::Object(Map::new())
    }

    /// Run one exported method.
    ///
    /// `args` has already been checked against the declared arity. Errors are
    /// logged by the dispatcher and never abort the batch.
    fn invoke(&mut self, method: &str, bridge: &BridgeHandle, args: Args) -> Result<()>;
}
