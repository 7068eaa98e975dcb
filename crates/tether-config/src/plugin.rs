use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// `plugin.toml`: an out-of-process plugin that exports native modules.
///
/// ```toml
/// id = "tether.vibration"
/// name = "Vibration"
/// version = "0.1.0"
///
/// [runtime]
/// entrypoint = "plugin.py"
/// command = "python3"
///
/// [compatibility]
/// host_api = "^1.0.0"
///
/// [modules]
/// names = ["Vibration"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub runtime: PluginRuntime,
    pub compatibility: PluginCompatibility,
    pub modules: PluginModules,
}

/// Process launch. Without `command` the entrypoint is executed directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginRuntime {
    pub entrypoint: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginCompatibility {
    /// Semver requirement the host API version must satisfy.
    pub host_api: String,
}

/// Module names the plugin may register. The handshake is refused for
/// anything else.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginModules {
    #[serde(default)]
    pub names: Vec<String>,
}

impl PluginManifest {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(input).context("plugin manifest is not valid TOML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read plugin manifest {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("rejected plugin manifest {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.id.is_empty() && !self.id.contains(char::is_whitespace),
            "plugin id {:?} must be non-empty without whitespace",
            self.id
        );
        ensure!(!self.name.trim().is_empty(), "plugin {} has an empty name", self.id);
        Version::parse(&self.version)
            .with_context(|| format!("plugin {} version {:?} is not semver", self.id, self.version))?;
        self.host_requirement()?;
        self.runtime
            .validate()
            .with_context(|| format!("plugin {} runtime", self.id))?;
        self.modules
            .validate()
            .with_context(|| format!("plugin {} modules", self.id))
    }

    /// Fails unless `host_api_version` satisfies `compatibility.host_api`.
    pub fn supports_host_api(&self, host_api_version: &str) -> Result<()> {
        let host = Version::parse(host_api_version)
            .with_context(|| format!("host API version {host_api_version:?} is not semver"))?;
        let requirement = self.host_requirement()?;
        ensure!(
            requirement.matches(&host),
            "plugin {} needs host API {requirement}, host provides {host}",
            self.id
        );
        Ok(())
    }

    fn host_requirement(&self) -> Result<VersionReq> {
        VersionReq::parse(&self.compatibility.host_api).with_context(|| {
            format!(
                "plugin {} host_api {:?} is not a semver requirement",
                self.id, self.compatibility.host_api
            )
        })
    }
}

impl PluginRuntime {
    fn validate(&self) -> Result<()> {
        ensure!(!self.entrypoint.trim().is_empty(), "entrypoint is empty");
        if let Some(command) = &self.command {
            ensure!(!command.trim().is_empty(), "command is empty");
        }
        if let Some(arg) = self.args.iter().find(|arg| arg.is_empty() || arg.trim() != *arg) {
            bail!("argument {arg:?} is empty or padded with whitespace");
        }
        Ok(())
    }
}

impl PluginModules {
    pub fn allows(&self, module: &str) -> bool {
        self.names.iter().any(|name| name == module)
    }

    fn validate(&self) -> Result<()> {
        ensure!(!self.names.is_empty(), "no module names declared");
        let mut seen = BTreeSet::new();
        for name in &self.names {
            ensure!(is_module_name(name), "{name:?} is not a valid module name");
            ensure!(seen.insert(name.as_str()), "module {name} listed twice");
        }
        Ok(())
    }
}

/// Registry names are identifiers: a leading ASCII letter, then letters,
/// digits or underscores.
fn is_module_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA: &str = r#"
id = "com.example.camera"
name = "Camera"
version = "2.3.1"

[runtime]
entrypoint = "bin/camera-plugin"

[compatibility]
host_api = ">=1.0, <1.5"

[modules]
names = ["CameraRoll", "ImagePicker_v2"]
"#;

    fn camera_with(from: &str, to: &str) -> Result<PluginManifest> {
        assert!(CAMERA.contains(from), "fixture has no {from:?}");
        PluginManifest::from_toml_str(&CAMERA.replace(from, to))
    }

    fn rejection(from: &str, to: &str) -> String {
        format!("{:#}", camera_with(from, to).unwrap_err())
    }

    #[test]
    fn camera_manifest_loads_with_runtime_defaults() {
        let manifest = PluginManifest::from_toml_str(CAMERA).unwrap();
        assert_eq!(manifest.runtime.command, None);
        assert!(manifest.runtime.args.is_empty());
        assert!(manifest.modules.allows("ImagePicker_v2"));
        assert!(!manifest.modules.allows("imagepicker_v2"));
    }

    #[test]
    fn module_names_must_be_identifiers() {
        for bad in ["\"2Camera\"", "\"Camera Roll\"", "\"Camera-Roll\"", "\"_Camera\"", "\"\""] {
            let err = rejection("\"CameraRoll\"", bad);
            assert!(err.contains("is not a valid module name"), "{bad}: {err}");
            assert!(err.contains("plugin com.example.camera modules"), "{err}");
        }
    }

    #[test]
    fn module_lists_must_be_unique_and_nonempty() {
        let err = rejection("\"ImagePicker_v2\"", "\"CameraRoll\"");
        assert!(err.contains("module CameraRoll listed twice"), "{err}");

        let err = rejection("names = [\"CameraRoll\", \"ImagePicker_v2\"]", "names = []");
        assert!(err.contains("no module names declared"), "{err}");
    }

    #[test]
    fn ids_allow_dots_but_not_whitespace() {
        assert!(camera_with("com.example.camera", "camera").is_ok());
        let err = rejection("com.example.camera", "com example");
        assert!(err.contains("without whitespace"), "{err}");
    }

    #[test]
    fn runtime_arguments_must_be_trimmed() {
        let raw = "entrypoint = \"bin/camera-plugin\"";
        assert!(camera_with(raw, &format!("{raw}\nargs = [\"--fps\", \"30\"]")).is_ok());
        let err = rejection(raw, &format!("{raw}\nargs = [\" --fps\"]"));
        assert!(err.contains("runtime"), "{err}");
        assert!(err.contains("padded with whitespace"), "{err}");
        let err = rejection(raw, &format!("{raw}\ncommand = \"  \""));
        assert!(err.contains("command is empty"), "{err}");
    }

    #[test]
    fn versions_are_checked_as_semver() {
        let err = rejection("version = \"2.3.1\"", "version = \"2.3\"");
        assert!(err.contains("is not semver"), "{err}");
        let err = rejection(">=1.0, <1.5", "one-point-oh");
        assert!(err.contains("is not a semver requirement"), "{err}");
    }

    #[test]
    fn unknown_keys_and_missing_sections_fail_to_parse() {
        let err = rejection("[compatibility]", "[compat]");
        assert!(err.contains("not valid TOML"), "{err}");
        let err = rejection("name = \"Camera\"", "name = \"Camera\"\nicon = \"cam.png\"");
        assert!(err.contains("not valid TOML"), "{err}");
    }

    #[test]
    fn host_api_range_is_enforced() {
        let manifest = PluginManifest::from_toml_str(CAMERA).unwrap();
        manifest.supports_host_api("1.4.9").unwrap();
        let err = manifest.supports_host_api("1.5.0").unwrap_err().to_string();
        assert!(err.contains("needs host API"), "{err}");
        assert!(manifest.supports_host_api("latest").is_err());
    }

    #[test]
    fn from_path_names_the_file() {
        let path = std::env::temp_dir().join(format!("tether-plugin-{}.toml", std::process::id()));
        fs::write(&path, CAMERA.replace("2.3.1", "x")).unwrap();
        let err = format!("{:#}", PluginManifest::from_path(&path).unwrap_err());
        fs::remove_file(&path).unwrap();
        assert!(err.contains(&path.display().to_string()), "{err}");

        let missing = format!("{:#}", PluginManifest::from_path(&path).unwrap_err());
        assert!(missing.contains("cannot read plugin manifest"), "{missing}");
    }
}
