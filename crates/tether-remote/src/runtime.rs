use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_config::PluginManifest;
use tether_core::{BridgeHandle, CallbackId};

use crate::protocol::{
    build_handshake_result, error_code, CallbackParams, EmitParams, HandshakeParams,
    JsonRpcError, ModuleDeclaration, RequestId, CALLBACK_METHOD, EMIT_METHOD, HANDSHAKE_METHOD,
    JSONRPC_VERSION,
};

/// A plugin manifest discovered on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPlugin {
    pub manifest_path: PathBuf,
    pub manifest: PluginManifest,
}

/// Plugin process failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    Spawn(String),
    Timeout {
        plugin_id: String,
        timeout_ms: u64,
    },
    ProcessExited {
        plugin_id: String,
        code: Option<i32>,
    },
    Protocol(String),
    Io(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(msg) => write!(f, "{msg}"),
            Self::Timeout {
                plugin_id,
                timeout_ms,
            } => write!(
                f,
                "timed out waiting for plugin {plugin_id} handshake after {timeout_ms}ms"
            ),
            Self::ProcessExited { plugin_id, code } => {
                write!(f, "plugin process exited: {plugin_id} (code={code:?})")
            }
            Self::Protocol(msg) => write!(f, "{msg}"),
            Self::Io(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Discover plugin manifests below `search_roots`.
///
/// A root can be either a directory (recursively searched for `plugin.toml`)
/// or a direct path to a `plugin.toml` file. Missing roots yield nothing.
/// Manifests that fail to load, and later manifests reusing an already seen
/// plugin id, are logged and skipped.
pub fn discover_plugins(search_roots: &[PathBuf]) -> Result<Vec<DiscoveredPlugin>> {
    let mut manifest_paths = Vec::new();
    for root in search_roots {
        collect_manifest_paths(root, &mut manifest_paths)
            .with_context(|| format!("failed to scan plugin root {}", root.display()))?;
    }
    manifest_paths.sort();

    let mut discovered = Vec::new();
    let mut seen_ids: BTreeMap<String, PathBuf> = BTreeMap::new();

    for path in manifest_paths {
        let manifest = match PluginManifest::from_path(&path) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!(
                    manifest = %path.display(),
                    error = %format!("{err:#}"),
                    "skipping invalid plugin manifest"
                );
                continue;
            }
        };

        if let Some(previous) = seen_ids.get(&manifest.id) {
            tracing::warn!(
                plugin = %manifest.id,
                manifest = %path.display(),
                previous = %previous.display(),
                "skipping duplicate plugin id"
            );
            continue;
        }
        seen_ids.insert(manifest.id.clone(), path.clone());

        discovered.push(DiscoveredPlugin {
            manifest_path: path,
            manifest,
        });
    }

    discovered.sort_by(|left, right| left.manifest.id.cmp(&right.manifest.id));
    Ok(discovered)
}

/// One running plugin process.
///
/// Before the handshake the reader thread hands requests to
/// [`complete_handshake`](PluginSession::complete_handshake); afterwards it
/// forwards callback and event notifications straight to the generation's
/// [`BridgeHandle`]. Dropping the session kills the process.
pub(crate) struct PluginSession {
    plugin_id: String,
    manifest: PluginManifest,
    child: Child,
    stdin: ChildStdin,
    reader_rx: Receiver<ReaderEvent>,
    handshake_complete: Arc<AtomicBool>,
}

impl PluginSession {
    pub(crate) fn spawn(
        manifest_path: &Path,
        manifest: PluginManifest,
        handle: BridgeHandle,
    ) -> std::result::Result<Self, RemoteError> {
        let manifest_dir = manifest_path.parent().ok_or_else(|| {
            RemoteError::Spawn(format!(
                "manifest has no parent directory: {}",
                manifest_path.display()
            ))
        })?;

        let entrypoint = manifest_dir.join(&manifest.runtime.entrypoint);
        if !entrypoint.exists() {
            return Err(RemoteError::Spawn(format!(
                "plugin entrypoint does not exist: {}",
                entrypoint.display()
            )));
        }

        let mut command = if let Some(runtime_command) = &manifest.runtime.command {
            let mut command = Command::new(runtime_command);
            command.args(&manifest.runtime.args);
            command.arg(&entrypoint);
            command
        } else {
            let mut command = Command::new(&entrypoint);
            command.args(&manifest.runtime.args);
            command
        };

        command
            .current_dir(manifest_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = command.spawn().map_err(|err| {
            RemoteError::Spawn(format!(
                "failed to spawn plugin {} process: {err}",
                manifest.id
            ))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            RemoteError::Spawn(format!("failed to capture plugin {} stdin pipe", manifest.id))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            RemoteError::Spawn(format!(
                "failed to capture plugin {} stdout pipe",
                manifest.id
            ))
        })?;

        let handshake_complete = Arc::new(AtomicBool::new(false));
        let reader_rx = spawn_reader(
            stdout,
            Forwarder {
                plugin_id: manifest.id.clone(),
                handle,
                handshake_complete: handshake_complete.clone(),
            },
        );
        tracing::debug!(plugin = %manifest.id, pid = child.id(), "plugin process started");

        Ok(Self {
            plugin_id: manifest.id.clone(),
            manifest,
            child,
            stdin,
            reader_rx,
            handshake_complete,
        })
    }

    pub(crate) fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Wait for `tether.handshake`, validate it against the manifest and
    /// answer. Returns the modules the plugin declared.
    pub(crate) fn complete_handshake(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<Vec<ModuleDeclaration>, RemoteError> {
        let request = self.next_request(timeout)?;

        if request.jsonrpc != JSONRPC_VERSION {
            let error = JsonRpcError {
                code: error_code::INVALID_PARAMS,
                message: format!("unsupported jsonrpc version: {}", request.jsonrpc),
                data: None,
            };
            self.send_error_response(request.id.clone(), error)?;
            return Err(RemoteError::Protocol(format!(
                "plugin {} sent jsonrpc version {}",
                self.plugin_id, request.jsonrpc
            )));
        }

        if request.method != HANDSHAKE_METHOD {
            let error = JsonRpcError {
                code: error_code::INVALID_PARAMS,
                message: format!(
                    "first plugin request must be {HANDSHAKE_METHOD}, got {}",
                    request.method
                ),
                data: None,
            };
            self.send_error_response(request.id.clone(), error)?;
            return Err(RemoteError::Protocol(format!(
                "plugin {} did not start with {HANDSHAKE_METHOD}",
                self.plugin_id
            )));
        }

        let params: HandshakeParams = match parse_params(&request) {
            Ok(params) => params,
            Err(error) => {
                self.send_error_response(request.id.clone(), error)?;
                return Err(RemoteError::Protocol(format!(
                    "invalid handshake params from plugin {}",
                    self.plugin_id
                )));
            }
        };

        if params.plugin_id != self.manifest.id {
            let error = JsonRpcError {
                code: error_code::INVALID_PARAMS,
                message: format!(
                    "handshake plugin_id mismatch: manifest={} request={}",
                    self.manifest.id, params.plugin_id
                ),
                data: None,
            };
            self.send_error_response(request.id.clone(), error)?;
            return Err(RemoteError::Protocol(format!(
                "handshake plugin_id mismatch for {}",
                self.plugin_id
            )));
        }

        if params.plugin_version != self.manifest.version {
            let error = JsonRpcError {
                code: error_code::INVALID_PARAMS,
                message: format!(
                    "handshake plugin_version mismatch: manifest={} request={}",
                    self.manifest.version, params.plugin_version
                ),
                data: None,
            };
            self.send_error_response(request.id.clone(), error)?;
            return Err(RemoteError::Protocol(format!(
                "handshake plugin_version mismatch for {}",
                self.plugin_id
            )));
        }

        match build_handshake_result(&params, &self.manifest.modules) {
            Ok(result) => {
                // Notifications may follow the response immediately.
                self.handshake_complete.store(true, Ordering::SeqCst);
                self.send_result_response(request.id, &result)?;
                tracing::info!(
                    plugin = %self.plugin_id,
                    api = %result.selected_api_version,
                    modules = params.modules.len(),
                    "plugin handshake complete"
                );
                Ok(params.modules)
            }
            Err(error) => {
                self.send_error_response(request.id.clone(), error.to_jsonrpc_error())?;
                Err(RemoteError::Protocol(format!(
                    "handshake negotiation failed for plugin {}: {error}",
                    self.plugin_id
                )))
            }
        }
    }

    /// Send a host → plugin notification.
    pub(crate) fn notify<T: Serialize>(
        &mut self,
        method: &str,
        params: &T,
    ) -> std::result::Result<(), RemoteError> {
        let params = serde_json::to_value(params).map_err(|err| {
            RemoteError::Protocol(format!("failed to encode {method} params: {err}"))
        })?;
        let notification = JsonRpcNotificationEnvelope {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        };
        self.send_json_line(&notification)
    }

    fn next_request(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<JsonRpcRequestEnvelope, RemoteError> {
        match self.reader_rx.recv_timeout(timeout) {
            Ok(ReaderEvent::Request(request)) => Ok(request),
            Ok(ReaderEvent::ProtocolError(message)) => Err(RemoteError::Protocol(format!(
                "plugin {} protocol error: {message}",
                self.plugin_id
            ))),
            Ok(ReaderEvent::IoError(message)) => Err(RemoteError::Io(format!(
                "plugin {} stdout read error: {message}",
                self.plugin_id
            ))),
            Ok(ReaderEvent::Eof) => Err(self.process_exited_error()),
            Err(RecvTimeoutError::Timeout) => {
                if let Some(status) = self.child.try_wait().map_err(|err| {
                    RemoteError::Io(format!(
                        "failed to poll plugin {} process status: {err}",
                        self.plugin_id
                    ))
                })? {
                    return Err(RemoteError::ProcessExited {
                        plugin_id: self.plugin_id.clone(),
                        code: status.code(),
                    });
                }

                Err(RemoteError::Timeout {
                    plugin_id: self.plugin_id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.process_exited_error()),
        }
    }

    fn send_result_response<T: Serialize>(
        &mut self,
        id: RequestId,
        result: &T,
    ) -> std::result::Result<(), RemoteError> {
        let result = serde_json::to_value(result).map_err(|err| {
            RemoteError::Protocol(format!("failed to encode JSON-RPC result: {err}"))
        })?;
        let response = JsonRpcResponseEnvelope {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        };
        self.send_json_line(&response)
    }

    fn send_error_response(
        &mut self,
        id: RequestId,
        error: JsonRpcError,
    ) -> std::result::Result<(), RemoteError> {
        let response = JsonRpcResponseEnvelope {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        };
        self.send_json_line(&response)
    }

    fn send_json_line<T: Serialize>(
        &mut self,
        payload: &T,
    ) -> std::result::Result<(), RemoteError> {
        let encoded = serde_json::to_string(payload).map_err(|err| {
            RemoteError::Protocol(format!("failed to encode JSON-RPC payload: {err}"))
        })?;

        self.stdin
            .write_all(encoded.as_bytes())
            .map_err(|err| self.io_error(err))?;
        self.stdin
            .write_all(b"\n")
            .map_err(|err| self.io_error(err))?;
        self.stdin.flush().map_err(|err| self.io_error(err))?;
        Ok(())
    }

    fn io_error(&mut self, error: std::io::Error) -> RemoteError {
        match self.child.try_wait() {
            Ok(Some(status)) => RemoteError::ProcessExited {
                plugin_id: self.plugin_id.clone(),
                code: status.code(),
            },
            Ok(None) | Err(_) => {
                RemoteError::Io(format!("plugin {} stdio error: {error}", self.plugin_id))
            }
        }
    }

    fn process_exited_error(&mut self) -> RemoteError {
        match self.child.try_wait() {
            Ok(Some(status)) => RemoteError::ProcessExited {
                plugin_id: self.plugin_id.clone(),
                code: status.code(),
            },
            Ok(None) => RemoteError::Io(format!(
                "plugin {} request stream ended unexpectedly",
                self.plugin_id
            )),
            Err(err) => RemoteError::Io(format!(
                "failed to poll plugin {} process status: {err}",
                self.plugin_id
            )),
        }
    }

    fn shutdown(&mut self) {
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                let _ = self.child.kill();
                let _ = self.child.wait();
                tracing::debug!(plugin = %self.plugin_id, "plugin process stopped");
            }
            Err(_) => {}
        }
    }
}

impl Drop for PluginSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JsonRpcRequestEnvelope {
    jsonrpc: String,
    id: RequestId,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JsonRpcResponseEnvelope {
    jsonrpc: String,
    id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JsonRpcNotificationEnvelope {
    jsonrpc: String,
    method: String,
    params: Value,
}

/// Any line a plugin writes: a request when `id` is present, else a
/// notification.
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    jsonrpc: String,
    #[serde(default)]
    id: Option<RequestId>,
    method: String,
    #[serde(default)]
    params: Value,
}

enum ReaderEvent {
    Request(JsonRpcRequestEnvelope),
    ProtocolError(String),
    IoError(String),
    Eof,
}

/// Routes post-handshake notifications into the bridge.
struct Forwarder {
    plugin_id: String,
    handle: BridgeHandle,
    handshake_complete: Arc<AtomicBool>,
}

impl Forwarder {
    fn ready(&self) -> bool {
        self.handshake_complete.load(Ordering::SeqCst)
    }

    fn forward(&self, method: &str, params: Value) {
        match method {
            CALLBACK_METHOD => match serde_json::from_value::<CallbackParams>(params) {
                Ok(params) => {
                    self.handle
                        .invoke_callback(CallbackId(params.callback_id), params.args);
                }
                Err(err) => self.reject(method, &err.to_string()),
            },
            EMIT_METHOD => match serde_json::from_value::<EmitParams>(params) {
                Ok(params) => {
                    self.handle.event_dispatcher().emit(&params.name, params.body);
                }
                Err(err) => self.reject(method, &err.to_string()),
            },
            other => self.reject(other, "unknown notification"),
        }
    }

    fn reject(&self, method: &str, reason: &str) {
        tracing::warn!(plugin = %self.plugin_id, method, reason, "dropping plugin notification");
    }
}

fn spawn_reader(stdout: ChildStdout, forwarder: Forwarder) -> Receiver<ReaderEvent> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || read_loop(stdout, &forwarder, &tx));
    rx
}

fn read_loop(stdout: ChildStdout, forwarder: &Forwarder, tx: &Sender<ReaderEvent>) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let _ = tx.send(ReaderEvent::IoError(err.to_string()));
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let inbound = match serde_json::from_str::<InboundEnvelope>(&line) {
            Ok(inbound) => inbound,
            Err(err) if forwarder.ready() => {
                tracing::warn!(
                    plugin = %forwarder.plugin_id,
                    error = %err,
                    "ignoring malformed plugin message"
                );
                continue;
            }
            Err(err) => {
                let _ = tx.send(ReaderEvent::ProtocolError(format!(
                    "invalid JSON-RPC message ({err}): {line}"
                )));
                return;
            }
        };

        match inbound.id {
            Some(id) if !forwarder.ready() => {
                let request = JsonRpcRequestEnvelope {
                    jsonrpc: inbound.jsonrpc,
                    id,
                    method: inbound.method,
                    params: inbound.params,
                };
                if tx.send(ReaderEvent::Request(request)).is_err() {
                    return;
                }
            }
            Some(_) => forwarder.reject(&inbound.method, "requests are not accepted after handshake"),
            None if forwarder.ready() => forwarder.forward(&inbound.method, inbound.params),
            None => forwarder.reject(&inbound.method, "handshake not complete"),
        }
    }

    if forwarder.ready() {
        tracing::warn!(plugin = %forwarder.plugin_id, "plugin closed its output");
    }
    let _ = tx.send(ReaderEvent::Eof);
}

fn parse_params<T: DeserializeOwned>(
    request: &JsonRpcRequestEnvelope,
) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(request.params.clone()).map_err(|err| JsonRpcError {
        code: error_code::INVALID_PARAMS,
        message: format!("invalid params for {}: {err}", request.method),
        data: None,
    })
}

fn collect_manifest_paths(root: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }

    if root.is_file() {
        if root.file_name().and_then(|name| name.to_str()) == Some("plugin.toml") {
            paths.push(root.to_path_buf());
        }
        return Ok(());
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        for entry in fs::read_dir(&path)
            .with_context(|| format!("failed to read directory {}", path.display()))?
        {
            let entry = entry
                .with_context(|| format!("failed to read directory entry in {}", path.display()))?;
            let child = entry.path();
            if child.is_dir() {
                stack.push(child);
                continue;
            }

            if child.file_name().and_then(|name| name.to_str()) == Some("plugin.toml") {
                paths.push(child);
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::{wait_for_transcript, write_plugin_manifest, TestDir};
    use super::*;
    use serde_json::json;
    use tether_core::event::{BridgeMessage, ScopedMessage};

    fn handle() -> (BridgeHandle, Receiver<BridgeMessage>) {
        let (tx, rx) = mpsc::channel();
        (BridgeHandle::new(3, tx), rx)
    }

    #[test]
    fn discover_plugins_skips_invalid_and_duplicate_manifests() {
        let root = TestDir::new("discovery");
        for name in ["a", "b", "c"] {
            fs::create_dir_all(root.path.join(name)).unwrap();
        }
        write_plugin_manifest(&root.path.join("a"), "tether.dup", "a.sh", "^1.0.0", &["A"]);
        write_plugin_manifest(&root.path.join("b"), "tether.dup", "b.sh", "^1.0.0", &["B"]);
        fs::write(root.path.join("c").join("plugin.toml"), "id = ").unwrap();

        let discovered = discover_plugins(std::slice::from_ref(&root.path)).unwrap();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].manifest.id, "tether.dup");
        assert!(discovered[0].manifest_path.ends_with("a/plugin.toml"));
    }

    #[test]
    fn discover_plugins_ignores_missing_roots() {
        let discovered = discover_plugins(&[PathBuf::from("/definitely/not/a/plugin/root")]).unwrap();
        assert!(discovered.is_empty());
    }

    #[test]
    fn forwarder_routes_notifications_through_handle() {
        let (handle, rx) = handle();
        let forwarder = Forwarder {
            plugin_id: "tether.fixture".into(),
            handle,
            handshake_complete: Arc::new(AtomicBool::new(true)),
        };
        forwarder.forward(CALLBACK_METHOD, json!({"callback_id": 9, "args": [1]}));
        forwarder.forward(EMIT_METHOD, json!({"name": "tick", "body": {"n": 1}}));
        forwarder.forward(CALLBACK_METHOD, json!({"args": []}));
        forwarder.forward("tether.unknown", json!({}));

        let messages: Vec<BridgeMessage> = rx.try_iter().collect();
        assert_eq!(
            messages,
            vec![
                BridgeMessage::Scoped(
                    3,
                    ScopedMessage::InvokeCallback {
                        callback: CallbackId(9),
                        args: vec![json!(1)],
                    }
                ),
                BridgeMessage::Scoped(
                    3,
                    ScopedMessage::EnqueueJsCall {
                        module: "RCTDeviceEventEmitter".into(),
                        method: "emit".into(),
                        args: vec![json!("tick"), json!({"n": 1})],
                    }
                ),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn session_rejects_mismatched_plugin_id() {
        let root = TestDir::new("id-mismatch");
        let transcript = root.path.join("transcript.log");
        let script = r#"#!/bin/sh
set -eu
echo '{"jsonrpc":"2.0","id":1,"method":"tether.handshake","params":{"plugin_id":"someone.else","plugin_version":"0.1.0","supported_api_versions":"^1.0.0","modules":[{"name":"Greeter"}]}}'
IFS= read -r line
echo "$line" >> "__TRANSCRIPT__"
"#
        .replace("__TRANSCRIPT__", &transcript.to_string_lossy());
        fs::write(root.path.join("plugin.sh"), script).unwrap();
        write_plugin_manifest(&root.path, "tether.fixture", "plugin.sh", "^1.0.0", &["Greeter"]);

        let manifest_path = root.path.join("plugin.toml");
        let manifest = PluginManifest::from_path(&manifest_path).unwrap();
        let (handle, _rx) = handle();
        let mut session = PluginSession::spawn(&manifest_path, manifest, handle).unwrap();
        let err = session
            .complete_handshake(Duration::from_secs(2))
            .unwrap_err();
        assert!(err.to_string().contains("plugin_id mismatch"));

        let lines = wait_for_transcript(&transcript, 1);
        let response: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(response["error"]["code"], error_code::INVALID_PARAMS);
    }

    #[cfg(unix)]
    #[test]
    fn session_times_out_without_handshake() {
        let root = TestDir::new("timeout");
        fs::write(root.path.join("plugin.sh"), "IFS= read -r line\n").unwrap();
        write_plugin_manifest(&root.path, "tether.silent", "plugin.sh", "^1.0.0", &["Silent"]);

        let manifest_path = root.path.join("plugin.toml");
        let manifest = PluginManifest::from_path(&manifest_path).unwrap();
        let (handle, _rx) = handle();
        let mut session = PluginSession::spawn(&manifest_path, manifest, handle).unwrap();
        let err = session
            .complete_handshake(Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, RemoteError::Timeout { .. }), "{err:?}");
    }

    #[test]
    fn spawn_requires_existing_entrypoint() {
        let root = TestDir::new("missing-entrypoint");
        write_plugin_manifest(&root.path, "tether.ghost", "ghost.sh", "^1.0.0", &["Ghost"]);
        let manifest_path = root.path.join("plugin.toml");
        let manifest = PluginManifest::from_path(&manifest_path).unwrap();
        let (handle, _rx) = handle();
        let err = PluginSession::spawn(&manifest_path, manifest, handle)
            .err()
            .unwrap();
        assert!(matches!(err, RemoteError::Spawn(_)));
    }
}
