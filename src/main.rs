use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::error;

use qiniu_autossl_lib::{
    config::{AppConfig, DEFAULT_CONFIG_PATH},
    context::ContextLoader,
    reconcile,
    storage::{CertificateStore, Db, SqliteCertificateStore},
};

/// Keeps Qiniu CDN hostnames served over HTTPS with ACME wildcard certificates.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "AUTOSSL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, env = "AUTOSSL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Reconcile forever (default)
    Run,
    /// Run a single pass and exit non-zero if any unit still failed
    Once,
    /// Print the stored certificate records
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let mut loader = ContextLoader::load(&cli.config)?;
            reconcile::run_forever(&mut loader)
        }
        Command::Once => {
            let loader = ContextLoader::load(&cli.config)?;
            let report = reconcile::run_once(&loader.current(), Utc::now())?;
            Ok(if report.is_clean() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Status => {
            print_status(cli)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_status(cli: &Cli) -> Result<()> {
    let config = AppConfig::from_file(&cli.config)?;
    let db = Db::initialize_with_path(&config.store.path)
        .with_context(|| format!("failed to open store {}", config.store.path.display()))?;
    let store = SqliteCertificateStore::new(db);
    let records = store.list_records()?;

    if records.is_empty() {
        println!("no certificates recorded");
        return Ok(());
    }

    let policy = config.renewal_policy();
    let now = Utc::now();
    for record in records {
        let due = if policy.needs_renewal(record.not_after, now) {
            "renewal due"
        } else {
            "ok"
        };
        println!(
            "{}\t{}\t{}\t{}\t{}",
            record.parent_domain,
            record.cert_id,
            record.not_after.format("%Y-%m-%d %H:%M:%S UTC"),
            due,
            record.domains.join(",")
        );
    }
    Ok(())
}
