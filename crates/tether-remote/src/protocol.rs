use std::collections::BTreeSet;
use std::fmt;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_config::PluginModules;
use tether_core::{MethodKind, MethodSpec};

/// JSON-RPC protocol version used for plugin transport.
pub const JSONRPC_VERSION: &str = "2.0";
/// Host API version negotiated during `tether.handshake`.
pub const HOST_API_VERSION: &str = "1.0.0";

/// First request a plugin sends; answered with [`HandshakeResult`].
pub const HANDSHAKE_METHOD: &str = "tether.handshake";
/// Host → plugin notification carrying one remote method call.
pub const INVOKE_METHOD: &str = "tether.module.invoke";
/// Plugin → host notification completing a script callback.
pub const CALLBACK_METHOD: &str = "tether.callback.invoke";
/// Plugin → host notification emitting a device event.
pub const EMIT_METHOD: &str = "tether.events.emit";

/// Host JSON-RPC error codes.
pub mod error_code {
    /// JSON-RPC standard invalid params error.
    pub const INVALID_PARAMS: i32 = -32602;
    /// API version is unsupported by the host.
    pub const UNSUPPORTED_API_VERSION: i32 = -32001;
    /// Plugin attempted an operation that is not authorized.
    pub const UNAUTHORIZED: i32 = -32002;
    /// Plugin host transport/runtime is unavailable.
    pub const PLUGIN_UNAVAILABLE: i32 = -32003;
}

/// JSON-RPC request/response ID type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
    Null,
}

/// JSON-RPC error payload emitted by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Handshake-specific negotiation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    InvalidVersionRequirement(String),
    UnsupportedApiVersion { host: String, supported: String },
    HostApiVersionInvalid(String),
    NoModules,
    ModuleNotAllowed(String),
    DuplicateModule(String),
    InvalidConstants(String),
}

impl HandshakeError {
    /// Map handshake failure to JSON-RPC host error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidVersionRequirement(_)
            | Self::NoModules
            | Self::DuplicateModule(_)
            | Self::InvalidConstants(_) => error_code::INVALID_PARAMS,
            Self::UnsupportedApiVersion { .. } => error_code::UNSUPPORTED_API_VERSION,
            Self::ModuleNotAllowed(_) => error_code::UNAUTHORIZED,
            Self::HostApiVersionInvalid(_) => error_code::PLUGIN_UNAVAILABLE,
        }
    }

    /// Convert to a JSON-RPC error payload.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data: None,
        }
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVersionRequirement(req) => {
                write!(f, "invalid supported_api_versions requirement: {req}")
            }
            Self::UnsupportedApiVersion { host, supported } => write!(
                f,
                "host API version {host} is not compatible with plugin requirement {supported}"
            ),
            Self::HostApiVersionInvalid(version) => {
                write!(f, "host API version constant is not valid semver: {version}")
            }
            Self::NoModules => write!(f, "handshake declares no modules"),
            Self::ModuleNotAllowed(name) => {
                write!(f, "module {name} is not listed in the plugin manifest")
            }
            Self::DuplicateModule(name) => write!(f, "module {name} is declared twice"),
            Self::InvalidConstants(name) => {
                write!(f, "constants of module {name} must be a JSON object")
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Calling convention of a declared remote method.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredKind {
    #[default]
    Async,
    Callback,
    Promise,
}

impl From<DeclaredKind> for MethodKind {
    fn from(kind: DeclaredKind) -> Self {
        match kind {
            DeclaredKind::Async => MethodKind::Async,
            DeclaredKind::Callback => MethodKind::Callback,
            DeclaredKind::Promise => MethodKind::Promise,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDeclaration {
    pub name: String,
    pub arity: usize,
    #[serde(default)]
    pub kind: DeclaredKind,
}

impl MethodDeclaration {
    pub fn to_spec(&self) -> MethodSpec {
        MethodSpec {
            name: self.name.clone(),
            arity: self.arity,
            kind: self.kind.into(),
        }
    }
}

/// One module a plugin exports, as declared in its handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDeclaration {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodDeclaration>,
    #[serde(default = "empty_object")]
    pub constants: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Parameters for `tether.handshake`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeParams {
    pub plugin_id: String,
    pub plugin_version: String,
    pub supported_api_versions: String,
    #[serde(default)]
    pub modules: Vec<ModuleDeclaration>,
}

/// Result payload for `tether.handshake`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResult {
    pub selected_api_version: String,
}

/// Parameters for `tether.module.invoke`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeParams {
    pub module: String,
    pub method: String,
    pub args: Vec<Value>,
}

/// Parameters for `tether.callback.invoke`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackParams {
    pub callback_id: u64,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Parameters for `tether.events.emit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitParams {
    pub name: String,
    #[serde(default)]
    pub body: Value,
}

/// Negotiate host API version against plugin-supported semver requirement.
pub fn negotiate_api_version(
    supported_api_versions: &str,
) -> std::result::Result<String, HandshakeError> {
    let supported = VersionReq::parse(supported_api_versions).map_err(|_| {
        HandshakeError::InvalidVersionRequirement(supported_api_versions.to_string())
    })?;

    let host = Version::parse(HOST_API_VERSION)
        .map_err(|_| HandshakeError::HostApiVersionInvalid(HOST_API_VERSION.to_string()))?;

    if supported.matches(&host) {
        Ok(host.to_string())
    } else {
        Err(HandshakeError::UnsupportedApiVersion {
            host: host.to_string(),
            supported: supported_api_versions.to_string(),
        })
    }
}

/// Validate the declared modules against the manifest allowlist, then
/// negotiate the API version.
pub fn build_handshake_result(
    params: &HandshakeParams,
    allowlist: &PluginModules,
) -> std::result::Result<HandshakeResult, HandshakeError> {
    if params.modules.is_empty() {
        return Err(HandshakeError::NoModules);
    }
    let mut seen = BTreeSet::new();
    for module in &params.modules {
        if !allowlist.allows(&module.name) {
            return Err(HandshakeError::ModuleNotAllowed(module.name.clone()));
        }
        if !seen.insert(module.name.as_str()) {
            return Err(HandshakeError::DuplicateModule(module.name.clone()));
        }
        if !module.constants.is_object() {
            return Err(HandshakeError::InvalidConstants(module.name.clone()));
        }
    }

    Ok(HandshakeResult {
        selected_api_version: negotiate_api_version(&params.supported_api_versions)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allow(names: &[&str]) -> PluginModules {
        PluginModules {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn params(modules: Value) -> HandshakeParams {
        serde_json::from_value(json!({
            "plugin_id": "test.plugin",
            "plugin_version": "0.1.0",
            "supported_api_versions": "^1.0",
            "modules": modules,
        }))
        .unwrap()
    }

    #[test]
    fn negotiate_api_version_accepts_compatible_range() {
        let selected = negotiate_api_version("^1.0").unwrap();
        assert_eq!(selected, HOST_API_VERSION);
    }

    #[test]
    fn negotiate_api_version_rejects_incompatible_range() {
        let err = negotiate_api_version("^2.0").unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedApiVersion { .. }));
        assert_eq!(err.code(), error_code::UNSUPPORTED_API_VERSION);
    }

    #[test]
    fn negotiate_api_version_rejects_invalid_range() {
        let err = negotiate_api_version("not-a-version").unwrap_err();
        assert!(matches!(err, HandshakeError::InvalidVersionRequirement(_)));
        assert_eq!(err.code(), error_code::INVALID_PARAMS);
    }

    #[test]
    fn module_declarations_default_kind_and_constants() {
        let params = params(json!([
            {"name": "Greeter", "methods": [{"name": "greet", "arity": 2, "kind": "callback"}]},
            {"name": "Clock", "methods": [{"name": "tick", "arity": 0}], "constants": {"hz": 60}},
        ]));
        let greeter = &params.modules[0];
        assert_eq!(greeter.constants, json!({}));
        assert_eq!(greeter.methods[0].to_spec(), MethodSpec::callback("greet", 2));
        assert_eq!(params.modules[1].methods[0].to_spec(), MethodSpec::new("tick", 0));

        let result = build_handshake_result(&params, &allow(&["Greeter", "Clock"])).unwrap();
        assert_eq!(result.selected_api_version, HOST_API_VERSION);
    }

    #[test]
    fn handshake_rejects_modules_outside_allowlist() {
        let params = params(json!([{"name": "Sneaky"}]));
        let err = build_handshake_result(&params, &allow(&["Greeter"])).unwrap_err();
        assert_eq!(err, HandshakeError::ModuleNotAllowed("Sneaky".into()));
        assert_eq!(err.to_jsonrpc_error().code, error_code::UNAUTHORIZED);
    }

    #[test]
    fn handshake_rejects_malformed_module_lists() {
        let allowlist = allow(&["Greeter"]);
        assert_eq!(
            build_handshake_result(&params(json!([])), &allowlist).unwrap_err(),
            HandshakeError::NoModules
        );
        assert_eq!(
            build_handshake_result(&params(json!([{"name": "Greeter"}, {"name": "Greeter"}])), &allowlist)
                .unwrap_err(),
            HandshakeError::DuplicateModule("Greeter".into())
        );
        assert_eq!(
            build_handshake_result(&params(json!([{"name": "Greeter", "constants": [1]}])), &allowlist)
                .unwrap_err(),
            HandshakeError::InvalidConstants("Greeter".into())
        );
    }
}
