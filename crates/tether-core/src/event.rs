use serde_json::Value;

use crate::args::CallbackId;
use crate::handle::Generation;

/// Messages delivered to the bridge's owner thread.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    /// Produced by a component of one generation; dropped once that
    /// generation has been torn down.
    Scoped(Generation, ScopedMessage),
    Reload,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScopedMessage {
    /// Response document of an `execute_js_call`.
    CallResult { token: u64, document: Value },
    /// The engine reported an error instead of a response document.
    CallFailed { token: u64, reason: String },
    /// The application script finished its top-level execution.
    ScriptDone,
    /// The executor can no longer make progress (process died, init failed).
    ExecutorFailed { reason: String },
    SourceReady { code: String },
    SourceFailed { reason: String },
    EnqueueJsCall {
        module: String,
        method: String,
        args: Vec<Value>,
    },
    InvokeCallback { callback: CallbackId, args: Vec<Value> },
    ReportError { message: String, fatal: bool },
}
