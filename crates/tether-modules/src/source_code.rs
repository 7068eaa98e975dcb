use anyhow::{bail, Result};
use serde_json::{json, Value};
use tether_core::{Args, BridgeHandle, MethodSpec, NativeModule};

/// `SourceCode`: exports the bundle URL as the `scriptURL` constant.
pub struct SourceCode {
    script_url: String,
}

impl SourceCode {
    pub fn new(bundle_url: Option<&str>) -> Self {
        Self {
            script_url: bundle_url.unwrap_or_default().to_string(),
        }
    }
}

impl NativeModule for SourceCode {
    fn name(&self) -> &str {
        "SourceCode"
    }

    fn methods(&self) -> Vec<MethodSpec> {
        Vec::new()
    }

    fn constants(&self) -> Value {
        json!({ "scriptURL": self.script_url })
    }

    fn invoke(&mut self, method: &str, _bridge: &BridgeHandle, _args: Args) -> Result<()> {
        bail!("SourceCode exports no methods (called {method})")
    }
}
