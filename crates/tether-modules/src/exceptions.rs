use anyhow::{bail, Result};
use serde::Deserialize;
use serde_json::Value;
use tether_core::{Args, BridgeHandle, MethodSpec, NativeModule};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackFrame {
    #[serde(default)]
    method_name: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line_number: Option<u64>,
    #[serde(default)]
    column: Option<u64>,
}

impl StackFrame {
    fn describe(&self) -> String {
        let method = self.method_name.as_deref().unwrap_or("<anonymous>");
        let file = self.file.as_deref().unwrap_or("<unknown>");
        match (self.line_number, self.column) {
            (Some(line), Some(col)) => format!("{method} ({file}:{line}:{col})"),
            (Some(line), None) => format!("{method} ({file}:{line})"),
            _ => format!("{method} ({file})"),
        }
    }
}

/// Render `message` with up to `max_frames` stack frames. Frames that do not
/// parse are skipped.
fn format_exception(message: &str, stack: &Value, max_frames: usize) -> String {
    let frames: Vec<StackFrame> = stack
        .as_array()
        .map(|frames| {
            frames
                .iter()
                .filter_map(|f| serde_json::from_value(f.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    let mut text = message.to_string();
    for frame in frames.iter().take(max_frames) {
        text.push_str("\n    at ");
        text.push_str(&frame.describe());
    }
    text
}

const MAX_FRAMES: usize = 10;

/// `ExceptionsManager`: script error reports. Fatal exceptions go to the
/// bridge's error surface; soft ones are logged.
#[derive(Debug, Default)]
pub struct ExceptionsManager;

impl NativeModule for ExceptionsManager {
    fn name(&self) -> &str {
        "ExceptionsManager"
    }

    fn methods(&self) -> Vec<MethodSpec> {
        vec![
            MethodSpec::new("reportSoftException", 3),
            MethodSpec::new("reportFatalException", 3),
            MethodSpec::new("updateExceptionMessage", 3),
        ]
    }

    fn invoke(&mut self, method: &str, bridge: &BridgeHandle, args: Args) -> Result<()> {
        let message = args.str(0)?;
        let stack = args.value(1)?;
        let exception_id = args.i64(2).ok();
        let report = format_exception(message, stack, MAX_FRAMES);
        match method {
            "reportSoftException" => {
                tracing::warn!(exception_id, "{report}");
            }
            "reportFatalException" => {
                tracing::error!(exception_id, "{report}");
                bridge.report_error(report, true);
            }
            "updateExceptionMessage" => {
                tracing::info!(exception_id, "exception updated: {report}");
            }
            other => bail!("ExceptionsManager has no method {other}"),
        }
        Ok(())
    }
}
