use std::sync::mpsc::Sender;

use serde_json::Value;

use crate::args::CallbackId;
use crate::dispatcher::EventDispatcher;
use crate::event::{BridgeMessage, ScopedMessage};

/// Identity of one registry/executor generation. Bumped on every (re)init.
pub type Generation = u64;

/// Generation-bound handle native code uses to talk back to the bridge.
///
/// Cheap to clone and `Send`: timer threads, plugin readers and executors all
/// hold one. Everything posted through a handle is tagged with its
/// generation, so once the bridge reloads, late messages from the old
/// generation are discarded instead of reaching the new registry.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    generation: Generation,
    tx: Sender<BridgeMessage>,
}

impl BridgeHandle {
    /// Bind a handle to `generation`. The bridge creates one per generation;
    /// tests use this to drive modules without a running bridge.
    pub fn new(generation: Generation, tx: Sender<BridgeMessage>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Ask the engine to run `module.method(args)`. The response batch is
    /// dispatched like any other.
    pub fn enqueue_js_call(&self, module: &str, method: &str, args: Vec<Value>) -> bool {
        self.post(ScopedMessage::EnqueueJsCall {
            module: module.to_string(),
            method: method.to_string(),
            args,
        })
    }

    /// Invoke a script-side callback received as a method argument.
    pub fn invoke_callback(&self, callback: CallbackId, args: Vec<Value>) -> bool {
        self.post(ScopedMessage::InvokeCallback { callback, args })
    }

    /// Report a script or module error. Fatal errors reach the error surface.
    pub fn report_error(&self, message: impl Into<String>, fatal: bool) -> bool {
        self.post(ScopedMessage::ReportError {
            message: message.into(),
            fatal,
        })
    }

    pub fn event_dispatcher(&self) -> EventDispatcher {
        EventDispatcher::new(self.clone())
    }

    /// Post a message for this handle's generation. Returns `false` once the
    /// bridge is gone.
    pub(crate) fn post(&self, message: ScopedMessage) -> bool {
        let delivered = self
            .tx
            .send(BridgeMessage::Scoped(self.generation, message))
            .is_ok();
        if !delivered {
            tracing::debug!(generation = self.generation, "bridge inbox closed; message dropped");
        }
        delivered
    }
}

/// Generation-independent handle for embedders: reload and shutdown.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: Sender<BridgeMessage>,
}

impl ControlHandle {
    pub(crate) fn new(tx: Sender<BridgeMessage>) -> Self {
        Self { tx }
    }

    pub fn reload(&self) -> bool {
        self.tx.send(BridgeMessage::Reload).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(BridgeMessage::Shutdown).is_ok()
    }
}
