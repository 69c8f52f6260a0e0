use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use sketch_autocommit::prompts::{CONTRACT_VERSION, OTA_ARTIFACT_URL};
use sketch_autocommit::{
    Credentials, GitHubStore, OpenAiOracle, PipelineConfig, PipelineError, PublishPipeline,
};

/// Exit code for invalid invocations (bad config, missing credentials).
const EXIT_PRECONDITION: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "sketch-autocommit",
    version,
    about = "Apply a natural-language change to the tracked firmware sketch and publish it"
)]
struct Cli {
    /// Change to apply. Prompted for on the terminal when omitted.
    #[arg(short, long)]
    request: Option<String>,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Generate and stamp, print the sketch to stdout, publish nothing.
    #[arg(long)]
    dry_run: bool,
}

fn prompt_for_request() -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "What do you want to change in the sketch?\n> ")?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read change request from stdin")?;
    Ok(line.trim().to_string())
}

fn build_pipeline(
    config: PipelineConfig,
    credentials: &Credentials,
) -> Result<PublishPipeline<OpenAiOracle, GitHubStore>> {
    let oracle = OpenAiOracle::new(&config.oracle, credentials.oracle_token.clone())
        .context("Failed to build oracle client")?;
    let store = GitHubStore::new(&config.store, &config.repository, credentials.store_token.clone())
        .context("Failed to build store client")?;
    Ok(PublishPipeline::new(config, oracle, store))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match PipelineConfig::load(cli.config.as_deref()).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(config) => config,
        Err(e) => {
            error!(category = %e.category(), "{e}");
            return Ok(ExitCode::from(EXIT_PRECONDITION));
        }
    };
    let credentials = match Credentials::from_env() {
        Ok(credentials) => credentials,
        Err(e) => {
            error!(category = %e.category(), "{e}");
            return Ok(ExitCode::from(EXIT_PRECONDITION));
        }
    };

    info!(
        repo = %format!("{}/{}", config.repository.owner, config.repository.name),
        path = %config.repository.sketch_path,
        contract_version = CONTRACT_VERSION,
        "sketch autocommit starting"
    );

    let request = match cli.request {
        Some(request) => request,
        None => prompt_for_request()?,
    };

    let pipeline = build_pipeline(config, &credentials)?;

    let outcome = if cli.dry_run {
        pipeline.prepare(&request).await.map(|prepared| {
            info!(
                marker = %prepared.marker(),
                create = prepared.base_revision().is_none(),
                "dry run, nothing published"
            );
            println!("{}", prepared.content());
        })
    } else {
        pipeline.run(&request).await.map(|published| {
            println!(
                "{} {} (marker {}, commit {})",
                published.action,
                published.path,
                published.marker,
                published.commit_id.as_deref().unwrap_or("unknown")
            );
            println!("The build pipeline will compile it and refresh {OTA_ARTIFACT_URL}");
        })
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            report(&e);
            Ok(ExitCode::from(e.exit_code() as u8))
        }
    }
}

fn report(err: &PipelineError) {
    error!(
        state = err.terminal_state(),
        category = %err.category(),
        "{err}"
    );
    if let PipelineError::ConcurrentModification(_) = err {
        eprintln!("The sketch changed while this run was generating. Run again to apply the change on top of the new version.");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
