#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use previewkit_core::Config;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "previewkit")]
#[command(author, version, about = "Build and serve component previews through an external bundler", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Presets file (defaults to previewkit.json in the working directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Compile the preview once
    Build {
        /// Report the bundler's raw diagnostics instead of a summary
        #[arg(long)]
        debug_bundler: bool,

        #[command(flatten)]
        compiler: CompilerArgs,
    },

    /// Watch and serve the preview
    Dev {
        /// Port to listen on
        #[arg(short, long, default_value_t = 6006)]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Give up if the first compile takes longer than this
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,

        /// Report the bundler's raw diagnostics instead of a summary
        #[arg(long)]
        debug_bundler: bool,

        #[command(flatten)]
        compiler: CompilerArgs,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct CompilerArgs {
    /// Bundler executable speaking the previewkit event protocol
    #[arg(long, value_name = "PROGRAM", env = "PREVIEWKIT_COMPILER")]
    compiler: String,

    /// Version of the wrapped bundler, checked against `bundlerVersion`
    #[arg(long, value_name = "VERSION")]
    compiler_version: Option<semver::Version>,

    /// Arguments passed to the bundler executable (after --)
    #[arg(last = true)]
    args: Vec<String>,
}

impl From<CompilerArgs> for commands::CompilerSpec {
    fn from(args: CompilerArgs) -> Self {
        Self {
            program: args.compiler,
            version: args.compiler_version,
            args: args.args,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    // Build config
    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json)
        .with_config_file(cli.config);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(),
        Some(Commands::Build {
            debug_bundler,
            compiler,
        }) => {
            let span = tracing::info_span!("build", cmd = "build", cwd = %cwd.display());
            let _guard = span.enter();

            let action = commands::build::BuildAction {
                config: config.with_debug_bundler(debug_bundler),
                compiler: compiler.into(),
            };
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            let code = rt.block_on(commands::build::run(action, cli.json))?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Some(Commands::Dev {
            port,
            host,
            timeout_secs,
            debug_bundler,
            compiler,
        }) => {
            let action = commands::dev::DevAction {
                config: config.with_debug_bundler(debug_bundler),
                compiler: compiler.into(),
                port,
                host,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::dev::run(action))
        }
    }
}
