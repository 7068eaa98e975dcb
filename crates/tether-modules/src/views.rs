use anyhow::{bail, Result};
use serde_json::{Map, Value};
use tether_core::{Args, BridgeHandle, MethodSpec, NativeModule};

/// Rendering bridge manager: advertises the native props a view accepts.
/// The widgets themselves live outside the bridge.
pub struct ViewManager {
    name: &'static str,
    props: &'static [(&'static str, &'static str)],
}

impl ViewManager {
    pub const fn new(name: &'static str, props: &'static [(&'static str, &'static str)]) -> Self {
        Self { name, props }
    }

    pub fn raw_text() -> Self {
        Self::new("RCTRawText", &[("text", "string")])
    }

    pub fn text() -> Self {
        Self::new(
            "RCTText",
            &[
                ("color", "color"),
                ("fontFamily", "string"),
                ("fontSize", "number"),
                ("fontStyle", "string"),
                ("fontWeight", "string"),
                ("lineHeight", "number"),
                ("numberOfLines", "number"),
                ("textAlign", "string"),
            ],
        )
    }

    pub fn image_view() -> Self {
        Self::new(
            "RCTImageView",
            &[
                ("resizeMode", "string"),
                ("src", "string"),
                ("tintColor", "color"),
            ],
        )
    }
}

impl NativeModule for ViewManager {
    fn name(&self) -> &str {
        self.name
    }

    fn methods(&self) -> Vec<MethodSpec> {
        Vec::new()
    }

    fn constants(&self) -> Value {
        let props: Map<String, Value> = self
            .props
            .iter()
            .map(|(name, kind)| (name.to_string(), Value::String(kind.to_string())))
            .collect();
        let mut constants = Map::new();
        constants.insert("nativeProps".to_string(), Value::Object(props));
        Value::Object(constants)
    }

    fn invoke(&mut self, method: &str, _bridge: &BridgeHandle, _args: Args) -> Result<()> {
        bail!("{} exports no methods (called {method})", self.name)
    }
}
