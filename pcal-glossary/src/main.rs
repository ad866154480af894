//! pcal-glossary - Plant-Name Glossary Pipeline
//!
//! Batch CLI: reads the plant corpus and the curated glossary, fills gaps from
//! the knowledge base and machine translation, and writes the translation
//! artifact consumed by the gardening-calendar app.
//!
//! Exit status is non-zero only on fatal errors or cancellation; a run that
//! leaves labels missing still succeeds.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use pcal_common::config::{load_toml_config, ConfigOverrides, ConfigResolver, CONFIG_ENV_VAR};
use pcal_glossary::GlossaryPipeline;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Command-line arguments for pcal-glossary
#[derive(Parser, Debug)]
#[command(name = "pcal-glossary")]
#[command(about = "Builds the multilingual plant-name translation artifact")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Plant corpus (JSON)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Curated glossary seed (JSON)
    #[arg(long)]
    glossary: Option<PathBuf>,

    /// Artifact destination
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Translation cache database
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Directory for plant_names_<locale>.json files
    #[arg(long)]
    per_locale_dir: Option<PathBuf>,

    /// Run report (JSON)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Comma-separated locale set (e.g. fr,en,es,pt-BR,de)
    #[arg(short, long, value_delimiter = ',')]
    locales: Option<Vec<String>>,

    /// Maximum concurrent network requests per stage
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<String>,

    /// Glossary-only run: skip knowledge-base and translation stages
    #[arg(long)]
    offline: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            corpus_path: self.corpus.clone(),
            glossary_path: self.glossary.clone(),
            output_path: self.output.clone(),
            cache_path: self.cache.clone(),
            per_locale_dir: self.per_locale_dir.clone(),
            report_path: self.report.clone(),
            locales: self.locales.clone(),
            max_in_flight: self.max_in_flight,
            log_level: self.log_level.clone(),
            offline: self.offline,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Resolve configuration (CLI → ENV → TOML → defaults)
    let loaded =
        load_toml_config(args.config.as_deref()).context("Failed to load config file")?;
    let config = ConfigResolver::new(loaded.config.clone())
        .with_overrides(args.overrides())
        .resolve()
        .context("Invalid configuration")?;

    pcal_common::logging::init_tracing(&config.logging)
        .context("Failed to initialize logging")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("PCAL_GIT_HASH"),
        built = env!("PCAL_BUILD_TIMESTAMP"),
        profile = env!("PCAL_BUILD_PROFILE"),
        "Starting pcal-glossary"
    );
    loaded.log_source();
    let locales = config
        .locales
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(",");
    info!(
        corpus = %config.corpus_path.display(),
        glossary = %config.glossary_path.display(),
        output = %config.output_path.display(),
        locales = %locales,
        reference_locale = %config.reference_locale,
        offline = args.offline,
        "Configuration resolved"
    );

    let pipeline = GlossaryPipeline::from_config(&config)
        .await
        .context("Failed to initialize pipeline")?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    match pipeline.run(&cancel).await {
        Ok(summary) => {
            summary.log_summary();
            if summary.cancelled {
                Ok(ExitCode::from(130))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(e) => {
            error!(error = %e, "Glossary run failed");
            Err(e).context("Glossary run failed")
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling run");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling run");
        },
    }
}
