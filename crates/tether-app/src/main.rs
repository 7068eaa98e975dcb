use std::env;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use tether_config::BridgeConfig;
use tether_core::{logging, Bridge, ControlHandle, LogErrorSurface};
use tether_modules::BuiltinProvider;
use tether_remote::PluginModuleProvider;

/// Commands accepted on stdin while the bridge runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Reload,
    Quit,
}

fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim() {
        "reload" | "r" => Some(ConsoleCommand::Reload),
        "quit" | "exit" | "q" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

/// Load the config file when one is given, then layer `TETHER_*` overrides.
fn load_config(path: Option<PathBuf>) -> Result<BridgeConfig> {
    let mut config = match path {
        Some(path) => BridgeConfig::from_path(&path)?,
        None => BridgeConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn spawn_console(control: ControlHandle) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Some(ConsoleCommand::Reload) => {
                    if !control.reload() {
                        break;
                    }
                }
                Some(ConsoleCommand::Quit) => {
                    control.shutdown();
                    break;
                }
                None if line.trim().is_empty() => {}
                None => tracing::warn!(input = %line.trim(), "unknown command (try reload or quit)"),
            }
        }
    });
}

fn main() -> Result<()> {
    let log_buffer = logging::init();
    tracing::info!("tether starting up");

    let config_path = env::args_os().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("failed to load configuration")?;
    tracing::info!(
        bundle = config.bundle_url.as_deref().unwrap_or("<none>"),
        plugins = %config.plugins_path.display(),
        executor = %config.executor_name,
        "configuration loaded"
    );

    let plugins = PluginModuleProvider::new(config.plugins_path.clone());
    let mut bridge = Bridge::new(config)
        .with_error_surface(LogErrorSurface::with_buffer(log_buffer))
        .with_provider(BuiltinProvider::new())
        .with_provider(plugins);
    bridge.on_state_changed(|state| tracing::debug!(%state, "bridge state changed"));

    spawn_console(bridge.control_handle());
    bridge.init()?;
    bridge.run();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_commands() {
        assert_eq!(parse_command(" reload\n"), Some(ConsoleCommand::Reload));
        assert_eq!(parse_command("quit"), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("q"), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("dance"), None);
    }

    #[test]
    fn missing_config_path_uses_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.executor_name, BridgeConfig::default().executor_name);
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let err = load_config(Some(PathBuf::from("/definitely/not/tether.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("tether.toml"));
    }
}
