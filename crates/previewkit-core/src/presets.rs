//! Configuration resolution through named preset aspects.
//!
//! Each aspect is resolved from an initial value and the options gathered so
//! far. [`resolve_bundler_config`] chains them in a fixed order:
//!
//! 1. `typescript`
//! 2. `babel`, which sees the typescript options
//! 3. `framework`
//! 4. `bundler`, which sees all previous results
//!
//! [`JsonPresets`] answers aspects from a `previewkit.json` file whose
//! top-level keys are aspect names.

use crate::compiler::Compiler;
use crate::config::BundlerConfig;
use crate::error::ConfigError;
use futures::future::BoxFuture;
use semver::VersionReq;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const TYPESCRIPT: &str = "typescript";
pub const BABEL: &str = "babel";
pub const FRAMEWORK: &str = "framework";
pub const BUNDLER: &str = "bundler";
pub const BUNDLER_VERSION: &str = "bundlerVersion";

/// Which workflow the configuration is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    Development,
    Production,
}

impl ConfigType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "DEVELOPMENT",
            Self::Production => "PRODUCTION",
        }
    }

    /// Bundler mode matching this config type.
    #[must_use]
    pub fn mode(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Source of configuration aspects.
pub trait Presets: Send + Sync {
    /// Resolve `aspect`, starting from `initial`.
    fn apply<'a>(
        &'a self,
        aspect: &'a str,
        initial: Value,
        options: &'a Value,
    ) -> BoxFuture<'a, Result<Value, ConfigError>>;
}

/// Resolve every aspect and assemble the bundler configuration.
pub async fn resolve_bundler_config(
    presets: &dyn Presets,
    config_type: ConfigType,
) -> Result<BundlerConfig, ConfigError> {
    let mut options = json!({ "configType": config_type.as_str() });

    let typescript = presets.apply(TYPESCRIPT, json!({}), &options).await?;
    options["typescriptOptions"] = typescript.clone();

    let babel = presets.apply(BABEL, json!({}), &options).await?;
    options["babelOptions"] = babel.clone();

    let framework = presets.apply(FRAMEWORK, json!({}), &options).await?;
    let framework_options = match &framework {
        Value::Object(map) => map.get("options").cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    };
    options["frameworkOptions"] = framework_options.clone();

    let bundler = presets.apply(BUNDLER, json!({}), &options).await?;
    let mut config: BundlerConfig =
        serde_json::from_value(bundler).map_err(|source| ConfigError::InvalidAspect {
            aspect: BUNDLER.to_string(),
            source,
        })?;

    config.typescript_options = present(typescript);
    config.babel_options = present(babel);
    config.framework_options = present(framework_options);
    if config.mode.is_none() {
        config.mode = Some(config_type.mode().to_string());
    }

    debug!(name = config.display_name(), mode = ?config.mode, "resolved bundler config");
    Ok(config)
}

fn present(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other),
    }
}

/// Check the compiler against the `bundlerVersion` requirement.
///
/// A mismatch is logged and reported as `false`; it does not stop the build.
pub async fn check_compiler_version(
    presets: &dyn Presets,
    compiler: &dyn Compiler,
) -> Result<bool, ConfigError> {
    let requirement = presets
        .apply(BUNDLER_VERSION, Value::String("*".to_string()), &Value::Null)
        .await?;
    let requirement = match requirement {
        Value::String(requirement) => requirement,
        Value::Null => return Ok(true),
        other => {
            return Err(ConfigError::other(format!(
                "`{BUNDLER_VERSION}` must be a string, got {other}"
            )))
        }
    };

    let req = VersionReq::parse(&requirement).map_err(|source| {
        ConfigError::InvalidVersionRequirement {
            requirement: requirement.clone(),
            source,
        }
    })?;

    let version = compiler.version();
    if req.matches(&version) {
        Ok(true)
    } else {
        warn!(
            compiler = compiler.name(),
            %version,
            required = %req,
            "bundler version does not match the configured requirement"
        );
        Ok(false)
    }
}

/// Presets read from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct JsonPresets {
    base_dir: PathBuf,
    aspects: Map<String, Value>,
}

impl JsonPresets {
    /// Load presets from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(base_dir_of(path), value)
    }

    /// Load presets from `path`, or empty presets if the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "no presets file, using defaults");
            Ok(Self {
                base_dir: base_dir_of(path),
                aspects: Map::new(),
            })
        }
    }

    /// Presets from an already parsed document.
    pub fn from_value(base_dir: PathBuf, value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(aspects) => Ok(Self { base_dir, aspects }),
            other => Err(ConfigError::other(format!(
                "presets must be a JSON object keyed by aspect, got {other}"
            ))),
        }
    }

    #[must_use]
    pub fn aspect(&self, name: &str) -> Option<&Value> {
        self.aspects.get(name)
    }

    fn resolve_output_path(&self, config: &mut Value) {
        let Some(path) = config.pointer_mut("/output/path") else {
            return;
        };
        if let Value::String(raw) = path {
            let candidate = Path::new(raw.as_str());
            if candidate.is_relative() {
                *raw = self.base_dir.join(candidate).to_string_lossy().into_owned();
            }
        }
    }
}

fn base_dir_of(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

impl Presets for JsonPresets {
    fn apply<'a>(
        &'a self,
        aspect: &'a str,
        initial: Value,
        _options: &'a Value,
    ) -> BoxFuture<'a, Result<Value, ConfigError>> {
        Box::pin(async move {
            let mut value = match self.aspects.get(aspect) {
                Some(overlay) => merge(initial, overlay.clone()),
                None => initial,
            };
            if aspect == BUNDLER {
                self.resolve_output_path(&mut value);
            }
            Ok(value)
        })
    }
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; anything
/// else is replaced.
fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerHandle;
    use std::sync::Mutex;

    /// Records the options each aspect was resolved with.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, Value)>>,
    }

    impl Presets for Recording {
        fn apply<'a>(
            &'a self,
            aspect: &'a str,
            initial: Value,
            options: &'a Value,
        ) -> BoxFuture<'a, Result<Value, ConfigError>> {
            Box::pin(async move {
                self.seen
                    .lock()
                    .unwrap()
                    .push((aspect.to_string(), options.clone()));
                Ok(match aspect {
                    TYPESCRIPT => json!({ "check": false }),
                    FRAMEWORK => json!({ "name": "react", "options": { "fastRefresh": true } }),
                    BUNDLER => json!({ "name": "demo", "entry": "./index.js" }),
                    _ => initial,
                })
            })
        }
    }

    struct Versioned(semver::Version);

    impl Compiler for Versioned {
        fn name(&self) -> &str {
            "versioned"
        }

        fn version(&self) -> semver::Version {
            self.0.clone()
        }

        fn configure(&self, _config: &BundlerConfig) -> Option<Box<dyn CompilerHandle>> {
            None
        }
    }

    #[tokio::test]
    async fn test_aspects_are_chained_in_order() {
        let presets = Recording::default();
        let config = resolve_bundler_config(&presets, ConfigType::Production)
            .await
            .unwrap();

        let seen = presets.seen.lock().unwrap();
        let order: Vec<&str> = seen.iter().map(|(aspect, _)| aspect.as_str()).collect();
        assert_eq!(order, vec![TYPESCRIPT, BABEL, FRAMEWORK, BUNDLER]);

        assert_eq!(seen[1].1["typescriptOptions"], json!({ "check": false }));
        assert_eq!(seen[3].1["frameworkOptions"], json!({ "fastRefresh": true }));
        assert_eq!(seen[3].1["configType"], "PRODUCTION");

        assert_eq!(config.display_name(), "demo");
        assert_eq!(config.mode.as_deref(), Some("production"));
        assert_eq!(config.typescript_options, Some(json!({ "check": false })));
        assert!(config.babel_options.is_none());
        assert_eq!(config.rest.get("entry"), Some(&json!("./index.js")));
    }

    #[tokio::test]
    async fn test_json_presets_merge_over_initial() {
        let presets = JsonPresets::from_value(
            PathBuf::from("/project"),
            json!({ "bundler": { "output": { "publicPath": "/static/" }, "mode": "none" } }),
        )
        .unwrap();

        let value = presets
            .apply(BUNDLER, json!({ "output": { "path": "dist" } }), &Value::Null)
            .await
            .unwrap();

        assert_eq!(value["output"]["publicPath"], "/static/");
        assert_eq!(value["output"]["path"], "/project/dist");
        assert_eq!(value["mode"], "none");
    }

    #[tokio::test]
    async fn test_json_presets_missing_aspect_keeps_initial() {
        let presets = JsonPresets::default();
        let value = presets
            .apply(BABEL, json!({ "presets": [] }), &Value::Null)
            .await
            .unwrap();
        assert_eq!(value, json!({ "presets": [] }));
    }

    #[test]
    fn test_json_presets_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("previewkit.json");
        std::fs::write(&path, r#"{ "bundlerVersion": "^5" }"#).unwrap();

        let presets = JsonPresets::load(&path).unwrap();
        assert_eq!(presets.aspect(BUNDLER_VERSION), Some(&json!("^5")));

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(JsonPresets::load(&path).is_err());

        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            JsonPresets::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let presets = JsonPresets::load_or_default(&dir.path().join("previewkit.json")).unwrap();
        assert!(presets.aspect(BUNDLER).is_none());
    }

    #[tokio::test]
    async fn test_version_check() {
        let presets =
            JsonPresets::from_value(PathBuf::from("."), json!({ "bundlerVersion": "^5.0" }))
                .unwrap();

        let matching = Versioned(semver::Version::new(5, 2, 0));
        let stale = Versioned(semver::Version::new(4, 46, 0));

        assert!(check_compiler_version(&presets, &matching).await.unwrap());
        assert!(!check_compiler_version(&presets, &stale).await.unwrap());
        assert!(check_compiler_version(&JsonPresets::default(), &stale)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_invalid_version_requirement() {
        let presets =
            JsonPresets::from_value(PathBuf::from("."), json!({ "bundlerVersion": "not a range" }))
                .unwrap();
        let result = check_compiler_version(&presets, &Versioned(semver::Version::new(1, 0, 0))).await;
        assert!(matches!(
            result,
            Err(ConfigError::InvalidVersionRequirement { .. })
        ));
    }

    #[test]
    fn test_merge_replaces_non_objects() {
        assert_eq!(
            merge(json!({ "a": [1], "b": { "c": 1 } }), json!({ "a": [2], "b": { "d": 2 } })),
            json!({ "a": [2], "b": { "c": 1, "d": 2 } })
        );
    }
}
