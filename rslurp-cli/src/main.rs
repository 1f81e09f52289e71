//! rslurp CLI
//!
//! Downloads every matching file linked from one or more HTTP directory
//! listings, in parallel, resuming partial files.

mod error;
mod render;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use rslurp::config::{parse_duration, ConfigFile};
use rslurp::logging::{self, LogRouter};
use rslurp::Orchestrator;
use tracing::debug;

use crate::error::CliError;
use crate::render::TerminalRenderer;

/// Download all files linked from HTTP directory listings.
#[derive(Debug, Parser)]
#[command(name = "rslurp", version, about)]
pub struct Cli {
    /// Directory listing URLs.
    pub urls: Vec<String>,

    /// Number of parallel downloads [default: 1]
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Dry run. List and filter, but download nothing.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Only download files whose name matches this regex.
    #[arg(short, long)]
    pub matching: Option<String>,

    /// Time between progress updates, e.g. 500ms or 2s [default: 1s]
    #[arg(long, value_parser = parse_duration)]
    pub ui_delay: Option<Duration>,

    /// Print a line for every finished file and debug logs.
    #[arg(short, long)]
    pub verbose: bool,

    /// Output directory, or archive path with --tar [default: .]
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Write everything into a single tar archive (requires one worker).
    #[arg(long)]
    pub tar: bool,

    /// Do not verify the server certificate.
    #[arg(long)]
    pub no_verify_cert: bool,

    /// Only negotiate TLS 1.3.
    #[arg(long)]
    pub fast_cipher: bool,

    /// PEM file with the root certificates to trust.
    #[arg(long)]
    pub root_ca: Option<PathBuf>,

    /// Username for basic auth.
    #[arg(long, env = "RSLURP_USERNAME")]
    pub username: Option<String>,

    /// Password for basic auth.
    #[arg(long, env = "RSLURP_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Per-request timeout, 0 for none [default: 30s]
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Config file [default: <config dir>/rslurp/config.ini]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    if cli.urls.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }

    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::load_default()?,
    };
    let config = settings::resolve(&cli, &file)?;

    let router = LogRouter::new();
    let _logging = logging::init(&router, cli.verbose, cli.log_file.as_deref())?;
    debug!(?config, "Resolved configuration");

    let orchestrator = Orchestrator::new(config).with_log_router(router);
    let interrupt = orchestrator.interrupt_handle();
    ctrlc::set_handler(move || interrupt.interrupt("interrupt"))?;

    let report = orchestrator.run(&cli.urls, Box::new(TerminalRenderer::stdout()))?;

    if let Some(reason) = &report.output_error {
        eprintln!("Finalizing output failed: {}", reason);
    }
    if report.failed > 0 {
        println!("Number of errors: {}", report.failed);
    }
    Ok(ExitCode::from(report.exit_code()))
}
