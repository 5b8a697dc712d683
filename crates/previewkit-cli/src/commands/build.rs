//! `previewkit build` command implementation.

use super::{load_presets, CompilerSpec};
use miette::{IntoDiagnostic, Result};
use previewkit_core::stats::aggregate;
use previewkit_core::version::RESULT_SCHEMA_VERSION;
use previewkit_core::{
    BuildError, BuildOptions, BuildOutcome, Config, Orchestrator, StaticStats,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Build command action.
#[derive(Debug, Clone)]
pub struct BuildAction {
    pub config: Config,
    pub compiler: CompilerSpec,
}

/// Build result for JSON output.
#[derive(Debug, Serialize)]
struct BuildResultJson {
    schema_version: u32,
    cwd: String,
    ok: bool,
    total_duration_ms: u64,
    errors: Vec<String>,
    warnings: Vec<String>,
    notes: Vec<String>,
}

impl BuildResultJson {
    fn new(config: &Config, result: &Result<BuildOutcome, BuildError>, elapsed_ms: u64) -> Self {
        let mut json = Self {
            schema_version: RESULT_SCHEMA_VERSION,
            cwd: config.cwd.display().to_string(),
            ok: result.is_ok(),
            total_duration_ms: elapsed_ms,
            errors: Vec::new(),
            warnings: Vec::new(),
            notes: Vec::new(),
        };

        // Failures without compiler diagnostics render as a single error.
        let summary = match result {
            Ok(outcome) => aggregate(outcome.stats.as_ref(), None),
            Err(e) => match e.stats() {
                Some(stats) => aggregate(stats.as_ref(), None),
                None => aggregate(&StaticStats::from_error(e.to_string()), None),
            },
        };
        json.errors = summary.errors;
        json.warnings = summary.warnings;

        if !config.config_path().exists() {
            json.notes
                .push(format!("no presets file at {}", config.config_path().display()));
        }
        json
    }
}

/// Run the build. Returns the process exit code.
pub async fn run(action: BuildAction, json: bool) -> Result<i32> {
    let started = Instant::now();
    let presets = load_presets(&action.config)?;
    let orchestrator = Orchestrator::new(Arc::new(action.compiler.compiler(&action.config)));

    // JSON output needs the raw diagnostics, not a summary.
    let options = BuildOptions::new(presets)
        .with_start_time(started)
        .with_debug(action.config.debug_bundler || json);

    let result = orchestrator.build(options).await;
    let code = orchestrator.exit_code();

    if json {
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let output = BuildResultJson::new(&action.config, &result, elapsed_ms);
        println!("{}", serde_json::to_string(&output).into_diagnostic()?);
        return Ok(code);
    }

    let outcome = result.into_diagnostic()?;
    println!(
        "  Preview built in {:.2}s",
        outcome.total_time.as_secs_f64()
    );
    Ok(code)
}
