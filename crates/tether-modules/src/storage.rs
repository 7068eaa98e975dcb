use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tether_core::{Args, BridgeHandle, CallbackId, MethodSpec, NativeModule};

const STORAGE_FILE: &str = "AsyncLocalStorage.json";

/// `AsyncLocalStorage`: a persistent string key-value store.
///
/// Every method reports through its trailing callback as `(errors, result)`,
/// where `errors` is `null` or a list of `{"message", "key"}` objects. The
/// whole store is rewritten after each mutation.
pub struct AsyncStorage {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl AsyncStorage {
    /// Open (or create) the store under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(STORAGE_FILE);
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let encoded = serde_json::to_string(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn multi_get(&self, keys: &[Value]) -> (Vec<Value>, Value) {
        let mut errors = Vec::new();
        let mut pairs = Vec::new();
        for key in keys {
            match key.as_str() {
                Some(key) => pairs.push(json!([key, self.get(key)])),
                None => errors.push(key_error(key, "key must be a string")),
            }
        }
        (errors, Value::Array(pairs))
    }

    fn multi_set(&mut self, pairs: &[Value]) -> Vec<Value> {
        let mut errors = Vec::new();
        let mut changed = false;
        for pair in pairs {
            let entry = pair.as_array().and_then(|kv| match kv.as_slice() {
                [Value::String(k), Value::String(v)] => Some((k.clone(), v.clone())),
                _ => None,
            });
            match entry {
                Some((key, value)) => {
                    self.entries.insert(key, value);
                    changed = true;
                }
                None => errors.push(key_error(pair, "entry must be a [key, value] pair of strings")),
            }
        }
        if changed {
            self.persist_or_report(&mut errors);
        }
        errors
    }

    fn multi_remove(&mut self, keys: &[Value]) -> Vec<Value> {
        let mut errors = Vec::new();
        let mut changed = false;
        for key in keys {
            match key.as_str() {
                Some(key) => changed |= self.entries.remove(key).is_some(),
                None => errors.push(key_error(key, "key must be a string")),
            }
        }
        if changed {
            self.persist_or_report(&mut errors);
        }
        errors
    }

    fn clear(&mut self) -> Vec<Value> {
        self.entries.clear();
        let mut errors = Vec::new();
        self.persist_or_report(&mut errors);
        errors
    }

    fn persist_or_report(&self, errors: &mut Vec<Value>) {
        if let Err(err) = self.persist() {
            tracing::warn!(error = %err, "failed to persist AsyncLocalStorage");
            errors.push(json!({ "message": format!("{err:#}") }));
        }
    }
}

fn key_error(key: &Value, message: &str) -> Value {
    json!({ "message": message, "key": key })
}

fn errors_value(errors: Vec<Value>) -> Value {
    if errors.is_empty() {
        Value::Null
    } else {
        Value::Array(errors)
    }
}

fn respond(bridge: &BridgeHandle, callback: CallbackId, args: Vec<Value>) {
    bridge.invoke_callback(callback, args);
}

impl NativeModule for AsyncStorage {
    fn name(&self) -> &str {
        "AsyncLocalStorage"
    }

    fn methods(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::callback("multiGet", 2),
            MethodSpec::callback("multiSet", 2),
            MethodSpec::callback("multiRemove", 2),
            MethodSpec::callback("clear", 1),
            MethodSpec::callback("getAllKeys", 1),
        ]
    }

    fn invoke(&mut self, method: &str, bridge: &BridgeHandle, args: Args) -> Result<()> {
        match method {
            "multiGet" => {
                let callback = args.callback(1)?;
                let (errors, result) = self.multi_get(args.array(0)?);
                respond(bridge, callback, vec![errors_value(errors), result]);
            }
            "multiSet" => {
                let callback = args.callback(1)?;
                let errors = self.multi_set(args.array(0)?);
                respond(bridge, callback, vec![errors_value(errors)]);
            }
            "multiRemove" => {
                let callback = args.callback(1)?;
                let errors = self.multi_remove(args.array(0)?);
                respond(bridge, callback, vec![errors_value(errors)]);
            }
            "clear" => {
                let callback = args.callback(0)?;
                let errors = self.clear();
                respond(bridge, callback, vec![errors_value(errors)]);
            }
            "getAllKeys" => {
                let callback = args.callback(0)?;
                let keys: Vec<Value> = self.entries.keys().map(|k| json!(k)).collect();
                respond(bridge, callback, vec![Value::Null, Value::Array(keys)]);
            }
            other => bail!("AsyncLocalStorage has no method {other}"),
        }
        Ok(())
    }
}
