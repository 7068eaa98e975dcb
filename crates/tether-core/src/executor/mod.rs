//! The executor contract the bridge drives a script engine through, and the
//! name-based registry used to pick an implementation at startup.

mod process;

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tether_config::{BridgeConfig, DEFAULT_EXECUTOR_NAME};

use crate::event::ScopedMessage;
use crate::handle::{BridgeHandle, Generation};

pub use process::{ExecutorError, ProcessExecutor};

/// Engine entry point that runs a module method and returns the flushed queue.
pub const CALL_FUNCTION: &str = "callFunctionReturnFlushedQueue";
/// Engine entry point that runs a callback and returns the flushed queue.
pub const INVOKE_CALLBACK: &str = "invokeCallbackAndReturnFlushedQueue";
/// Engine entry point that only returns the flushed queue.
pub const FLUSHED_QUEUE: &str = "flushedQueue";
/// Name under which the module configuration descriptor is injected.
pub const CONFIG_GLOBAL: &str = "__fbBatchedBridgeConfig";

/// Abstraction over a concrete script engine.
///
/// Every operation is asynchronous with respect to the caller: results come
/// back through the [`ExecutorLink`] handed to the executor's factory and are
/// processed on the bridge's owner thread.
pub trait Executor {
    fn name(&self) -> &str;

    /// Prepare the engine. An error here fails the generation.
    fn init(&mut self) -> Result<()>;

    /// Make a named JSON value visible to script code before the application
    /// script runs.
    fn inject_json(&mut self, name: &str, value: Value);

    /// Start running the bundle. The executor must signal
    /// [`ExecutorLink::script_done`] once its top-level execution finishes.
    fn execute_application_script(&mut self, code: String, source_url: &str);

    /// Invoke an engine entry point and deliver the response document through
    /// `reply`.
    fn execute_js_call(&mut self, method: &str, args: Vec<Value>, reply: CallReply);

    /// Release engine resources. Called before the executor is dropped.
    fn shutdown(&mut self) {}
}

/// Channel from an executor back to the bridge, bound to one generation.
#[derive(Debug, Clone)]
pub struct ExecutorLink {
    handle: BridgeHandle,
}

impl ExecutorLink {
    pub fn new(handle: BridgeHandle) -> Self {
        Self { handle }
    }

    pub fn generation(&self) -> Generation {
        self.handle.generation()
    }

    /// Signal that the application script finished its top-level execution.
    pub fn script_done(&self) -> bool {
        self.handle.post(ScopedMessage::ScriptDone)
    }

    /// Report that the engine can no longer make progress.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.handle.post(ScopedMessage::ExecutorFailed {
            reason: reason.into(),
        })
    }

    pub(crate) fn reply(&self, token: u64) -> CallReply {
        CallReply {
            handle: self.handle.clone(),
            token,
        }
    }
}

/// One-shot continuation of an `execute_js_call`.
///
/// Delivering consumes the reply, so a response document reaches the bridge
/// at most once.
#[derive(Debug)]
#[must_use = "the bridge waits for every reply to be delivered"]
pub struct CallReply {
    handle: BridgeHandle,
    token: u64,
}

impl CallReply {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn deliver(self, document: Value) -> bool {
        self.handle.post(ScopedMessage::CallResult {
            token: self.token,
            document,
        })
    }

    /// Complete the call without a document. Nothing is dispatched and a
    /// pending ready flush does not count.
    pub fn fail(self, reason: impl Into<String>) -> bool {
        self.handle.post(ScopedMessage::CallFailed {
            token: self.token,
            reason: reason.into(),
        })
    }
}

/// Builds an executor for one generation.
pub type ExecutorFactory = Box<dyn Fn(ExecutorLink, &BridgeConfig) -> Result<Box<dyn Executor>>>;

/// Named executor implementations with a mandatory default.
pub struct ExecutorRegistry {
    default_name: String,
    factories: HashMap<String, ExecutorFactory>,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExecutorRegistry {
    /// Registry whose default is the given factory.
    pub fn new(default_name: &str, default: ExecutorFactory) -> Self {
        let mut factories = HashMap::new();
        factories.insert(default_name.to_string(), default);
        Self {
            default_name: default_name.to_string(),
            factories,
        }
    }

    /// Registry with the built-in [`ProcessExecutor`] as default.
    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_EXECUTOR_NAME,
            Box::new(|link, config| {
                Ok(Box::new(ProcessExecutor::new(link, config.executor.clone())) as Box<dyn Executor>)
            }),
        )
    }

    pub fn register(&mut self, name: &str, factory: ExecutorFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Construct the executor named `name`, falling back to the default with
    /// a warning when the name is unknown or its construction fails.
    pub fn create(
        &self,
        name: &str,
        link: ExecutorLink,
        config: &BridgeConfig,
    ) -> Result<Box<dyn Executor>> {
        match self.factories.get(name) {
            Some(factory) => match factory(link.clone(), config) {
                Ok(executor) => return Ok(executor),
                Err(err) if name != self.default_name => {
                    tracing::warn!(
                        executor = name,
                        error = %err,
                        fallback = %self.default_name,
                        "could not construct executor; constructing default"
                    );
                }
                Err(err) => return Err(err),
            },
            None => {
                tracing::warn!(
                    executor = name,
                    fallback = %self.default_name,
                    "no executor registered under this name; constructing default"
                );
            }
        }

        let default = self
            .factories
            .get(&self.default_name)
            .ok_or_else(|| anyhow!("default executor {} is not registered", self.default_name))?;
        default(link, config)
    }
}
