pub mod build;
pub mod dev;
pub mod version;

use miette::{IntoDiagnostic, Result};
use previewkit_core::{Config, JsonPresets, Presets, ProcessCompiler};
use std::sync::Arc;

/// Which bundler executable to drive.
#[derive(Debug, Clone)]
pub struct CompilerSpec {
    pub program: String,
    pub version: Option<semver::Version>,
    pub args: Vec<String>,
}

impl CompilerSpec {
    fn compiler(&self, config: &Config) -> ProcessCompiler {
        let compiler = ProcessCompiler::new(self.program.clone(), self.args.clone())
            .with_cwd(config.cwd.clone());
        match &self.version {
            Some(version) => compiler.with_version(version.clone()),
            None => compiler,
        }
    }
}

/// Presets from the configured file, or defaults when it does not exist.
fn load_presets(config: &Config) -> Result<Arc<dyn Presets>> {
    let presets = JsonPresets::load_or_default(&config.config_path()).into_diagnostic()?;
    Ok(Arc::new(presets))
}
