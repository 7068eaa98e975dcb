//! Host-driven status values: application foreground state and network
//! reachability. The embedder owns a [`StatusCell`] and updates it; the
//! module of the current generation answers queries and the cell emits a
//! device event on every change.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use tether_core::{Args, BridgeHandle, EventDispatcher, MethodSpec, NativeModule};

pub const APP_STATE_EVENT: &str = "appStateDidChange";
pub const NET_INFO_EVENT: &str = "networkStatusDidChange";

struct CellInner {
    value: String,
    dispatcher: Option<EventDispatcher>,
}

/// Shared status string with change events.
#[derive(Clone)]
pub struct StatusCell {
    inner: Arc<Mutex<CellInner>>,
    event: &'static str,
    field: &'static str,
}

impl StatusCell {
    fn new(initial: &str, event: &'static str, field: &'static str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CellInner {
                value: initial.to_string(),
                dispatcher: None,
            })),
            event,
            field,
        }
    }

    /// Foreground state; starts as `"active"`.
    pub fn app_state() -> Self {
        Self::new("active", APP_STATE_EVENT, "app_state")
    }

    /// Network reachability; starts as `"unknown"`.
    pub fn net_info() -> Self {
        Self::new("unknown", NET_INFO_EVENT, "network_info")
    }

    pub fn get(&self) -> String {
        self.inner
            .lock()
            .map(|inner| inner.value.clone())
            .unwrap_or_default()
    }

    /// Update the value. Emits the change event when the value differs and a
    /// bridge generation is attached.
    pub fn set(&self, value: &str) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if inner.value == value {
            return false;
        }
        inner.value = value.to_string();
        if let Some(dispatcher) = &inner.dispatcher {
            dispatcher.emit(self.event, self.body(value));
        }
        true
    }

    fn body(&self, value: &str) -> Value {
        let mut body = Map::new();
        body.insert(self.field.to_string(), Value::String(value.to_string()));
        Value::Object(body)
    }

    fn attach(&self, dispatcher: EventDispatcher) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.dispatcher = Some(dispatcher);
        }
    }
}

/// `AppState`: `getCurrentAppState(success, error)`.
pub struct AppState {
    cell: StatusCell,
}

impl AppState {
    pub fn new(cell: StatusCell, dispatcher: EventDispatcher) -> Self {
        cell.attach(dispatcher);
        Self { cell }
    }
}

impl NativeModule for AppState {
    fn name(&self) -> &str {
        "AppState"
    }

    fn methods(&self) -> Vec<MethodSpec> {
        vec![MethodSpec::callback("getCurrentAppState", 2)]
    }

    fn constants(&self) -> Value {
        json!({ "initialAppState": self.cell.get() })
    }

    fn invoke(&mut self, method: &str, bridge: &BridgeHandle, args: Args) -> Result<()> {
        match method {
            "getCurrentAppState" => {
                let success = args.callback(0)?;
                bridge.invoke_callback(success, vec![self.cell.body(&self.cell.get())]);
                Ok(())
            }
            other => bail!("AppState has no method {other}"),
        }
    }
}

/// `NetInfo`: `getCurrentConnectivity(resolve, reject)`.
pub struct NetInfo {
    cell: StatusCell,
}

impl NetInfo {
    pub fn new(cell: StatusCell, dispatcher: EventDispatcher) -> Self {
        cell.attach(dispatcher);
        Self { cell }
    }
}

impl NativeModule for NetInfo {
    fn name(&self) -> &str {
        "NetInfo"
    }

    fn methods(&self) -> Vec<MethodSpec> {
        vec![MethodSpec::promise("getCurrentConnectivity", 2)]
    }

    fn invoke(&mut self, method: &str, bridge: &BridgeHandle, args: Args) -> Result<()> {
        match method {
            "getCurrentConnectivity" => {
                let resolve = args.callback(0)?;
                bridge.invoke_callback(resolve, vec![self.cell.body(&self.cell.get())]);
                Ok(())
            }
            other => bail!("NetInfo has no method {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tether_core::event::{BridgeMessage, ScopedMessage};
    use tether_core::CallbackId;

    #[test]
    fn current_app_state_goes_to_success_callback() {
        let (tx, rx) = mpsc::channel();
        let handle = BridgeHandle::new(1, tx);
        let mut module = AppState::new(StatusCell::app_state(), handle.event_dispatcher());
        assert_eq!(module.constants(), json!({"initialAppState": "active"}));

        module
            .invoke("getCurrentAppState", &handle, Args::new(vec![json!(10), json!(11)]))
            .unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            BridgeMessage::Scoped(
                1,
                ScopedMessage::InvokeCallback {
                    callback: CallbackId(10),
                    args: vec![json!({"app_state": "active"})],
                }
            )
        );
    }

    #[test]
    fn changes_emit_device_events_for_latest_generation() {
        let (tx, rx) = mpsc::channel();
        let cell = StatusCell::net_info();
        let _old = NetInfo::new(cell.clone(), BridgeHandle::new(1, tx.clone()).event_dispatcher());
        let _new = NetInfo::new(cell.clone(), BridgeHandle::new(2, tx).event_dispatcher());

        assert!(cell.set("wifi"));
        assert!(!cell.set("wifi"));
        let events: Vec<BridgeMessage> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![BridgeMessage::Scoped(
                2,
                ScopedMessage::EnqueueJsCall {
                    module: "RCTDeviceEventEmitter".into(),
                    method: "emit".into(),
                    args: vec![json!(NET_INFO_EVENT), json!({"network_info": "wifi"})],
                }
            )]
        );
        assert_eq!(cell.get(), "wifi");
    }

    #[test]
    fn connectivity_resolves_promise() {
        let (tx, rx) = mpsc::channel();
        let handle = BridgeHandle::new(1, tx);
        let cell = StatusCell::net_info();
        cell.set("cell");
        let mut module = NetInfo::new(cell, handle.event_dispatcher());
        module
            .invoke("getCurrentConnectivity", &handle, Args::new(vec![json!(1), json!(2)]))
            .unwrap();
        match rx.try_recv().unwrap() {
            BridgeMessage::Scoped(_, ScopedMessage::InvokeCallback { callback, args }) => {
                assert_eq!(callback, CallbackId(1));
                assert_eq!(args, vec![json!({"network_info": "cell"})]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
