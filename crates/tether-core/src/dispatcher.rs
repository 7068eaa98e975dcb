use serde_json::Value;

use crate::handle::BridgeHandle;

const DEVICE_EVENT_MODULE: &str = "RCTDeviceEventEmitter";
const DEVICE_EVENT_METHOD: &str = "emit";
const VIEW_EVENT_MODULE: &str = "RCTEventEmitter";
const VIEW_EVENT_METHOD: &str = "receiveEvent";

/// Pushes native-originated events into the engine.
///
/// Events travel outside the request/response cycle: each emission is posted
/// straight to the bridge inbox and forwarded to the executor by the owner
/// thread. Nothing is buffered here. Emissions from one thread reach the
/// engine in the order they were made; there is no ordering with respect to
/// call batches arriving concurrently.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    handle: BridgeHandle,
}

impl EventDispatcher {
    pub fn new(handle: BridgeHandle) -> Self {
        Self { handle }
    }

    /// Emit an app-wide event (`RCTDeviceEventEmitter.emit(name, body)`).
    pub fn emit(&self, event: &str, body: Value) -> bool {
        self.handle.enqueue_js_call(
            DEVICE_EVENT_MODULE,
            DEVICE_EVENT_METHOD,
            vec![Value::String(event.to_string()), body],
        )
    }

    /// Deliver an event addressed to one script-side target (e.g. a view tag).
    pub fn dispatch_to(&self, target: i64, event: &str, body: Value) -> bool {
        self.handle.enqueue_js_call(
            VIEW_EVENT_MODULE,
            VIEW_EVENT_METHOD,
            vec![Value::from(target), Value::String(event.to_string()), body],
        )
    }

    pub fn generation(&self) -> u64 {
        self.handle.generation()
    }
}
