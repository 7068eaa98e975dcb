use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use tether_core::{Args, BridgeHandle, EventDispatcher, MethodSpec, NativeModule};

pub const RESPONSE_EVENT: &str = "didReceiveNetworkResponse";
pub const DATA_EVENT: &str = "didReceiveNetworkData";
pub const COMPLETE_EVENT: &str = "didCompleteNetworkResponse";

type InFlight = Arc<Mutex<HashMap<i64, Arc<AtomicBool>>>>;

/// `Networking`: request transport restricted to local `file://` URLs.
///
/// `sendRequest` answers its callback with the request ID right away, then
/// reports through device events: `didReceiveNetworkResponse [id, status,
/// headers, url]`, `didReceiveNetworkData [id, text]` and finally
/// `didCompleteNetworkResponse [id, error]` with `error` null on success.
/// Any other scheme completes immediately with an error.
#[derive(Default)]
pub struct Networking {
    in_flight: InFlight,
}

impl Networking {
    pub fn new() -> Self {
        Self::default()
    }

    fn send_request(&mut self, bridge: &BridgeHandle, request_id: i64, method: &str, url: &str) {
        let events = bridge.event_dispatcher();
        let path = match url.strip_prefix("file://") {
            Some(path) if method.eq_ignore_ascii_case("GET") => path.to_string(),
            Some(_) => {
                complete(&events, request_id, Some(format!("method {method} is not supported for file URLs")));
                return;
            }
            None => {
                let scheme = url.split_once("://").map(|(s, _)| s).unwrap_or(url);
                complete(&events, request_id, Some(format!("unsupported URL scheme: {scheme}")));
                return;
            }
        };

        let aborted = Arc::new(AtomicBool::new(false));
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(request_id, Arc::clone(&aborted));
        }
        let in_flight = Arc::clone(&self.in_flight);
        let url = url.to_string();
        thread::spawn(move || {
            let result = std::fs::read_to_string(&path);
            if let Ok(mut in_flight) = in_flight.lock() {
                in_flight.remove(&request_id);
            }
            if aborted.load(Ordering::SeqCst) {
                return;
            }
            match result {
                Ok(body) => {
                    events.emit(RESPONSE_EVENT, json!([request_id, 200, {}, url]));
                    events.emit(DATA_EVENT, json!([request_id, body]));
                    complete(&events, request_id, None);
                }
                Err(err) => {
                    complete(&events, request_id, Some(format!("failed to read {path}: {err}")));
                }
            }
        });
    }

    fn abort_request(&mut self, bridge: &BridgeHandle, request_id: i64) {
        let flag = self
            .in_flight
            .lock()
            .ok()
            .and_then(|mut in_flight| in_flight.remove(&request_id));
        match flag {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                complete(
                    &bridge.event_dispatcher(),
                    request_id,
                    Some("request aborted".to_string()),
                );
            }
            None => tracing::debug!(request_id, "abort for a request that is not in flight"),
        }
    }
}

fn complete(events: &EventDispatcher, request_id: i64, error: Option<String>) {
    events.emit(COMPLETE_EVENT, json!([request_id, error]));
}

impl NativeModule for Networking {
    fn name(&self) -> &str {
        "Networking"
    }

    fn methods(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::callback("sendRequest", 6),
            MethodSpec::new("abortRequest", 1),
        ]
    }

    fn invoke(&mut self, method: &str, bridge: &BridgeHandle, args: Args) -> Result<()> {
        match method {
            "sendRequest" => {
                let http_method = args.str(0)?;
                let url = args.str(1)?;
                let request_id = args.i64(2)?;
                let callback = args.callback(5)?;
                bridge.invoke_callback(callback, vec![Value::from(request_id)]);
                self.send_request(bridge, request_id, http_method, url);
                Ok(())
            }
            "abortRequest" => {
                self.abort_request(bridge, args.i64(0)?);
                Ok(())
            }
            other => bail!("Networking has no method {other}"),
        }
    }
}
