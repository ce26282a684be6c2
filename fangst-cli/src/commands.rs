use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use fangst_config::{ConfigError, FangstConfig, SecretBackend};
use fangst_core::secrets::{FileSecretStore, MemorySecretStore, SecretStore};
use fangst_engine::CaptureRuntime;
use fangst_telemetry::EventLogger;
use fangst_tls::CertificateManager;

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the capture platform (enabled sources per configuration)
    Run(RunArgs),
    /// Generate or validate the interception CA and print its certificate path
    Cert(CertArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Configuration file; defaults and FANGST_ env vars apply on top
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CertArgs {
    /// Configuration file; defaults and FANGST_ env vars apply on top
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Copy the CA certificate here for client installation
    #[arg(long)]
    pub out: Option<PathBuf>,
}

type CommandResult = anyhow::Result<()>;

pub fn run_command(cli: Cli) -> CommandResult {
    match cli.command {
        Commands::Run(args) => run_capture(args),
        Commands::Cert(args) => prepare_ca(args),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<FangstConfig, ConfigError> {
    match path {
        Some(path) => FangstConfig::load_from_path(path),
        None => FangstConfig::load(),
    }
}

fn run_capture(args: RunArgs) -> CommandResult {
    let config = load_config(args.config.as_ref())?;
    EventLogger::init(&config.telemetry.log_filter);
    info!("Configuration loaded and validated");
    CaptureRuntime::new(config)?.run()?;
    Ok(())
}

fn prepare_ca(args: CertArgs) -> CommandResult {
    let config = load_config(args.config.as_ref())?;
    EventLogger::init(&config.telemetry.log_filter);

    let secrets: Arc<dyn SecretStore> = match config.tls.secret_backend {
        SecretBackend::File => Arc::new(FileSecretStore::new(&config.tls.secret_dir)?),
        SecretBackend::Memory => Arc::new(MemorySecretStore::new()),
    };
    let manager = CertificateManager::new(&config.tls.cert_dir, secrets);
    manager.validate_or_generate()?;

    let cert_path = manager.get_ca_cert_path()?;
    if let Some(out) = args.out {
        std::fs::copy(&cert_path, &out)?;
        println!("{}", out.display());
    } else {
        println!("{}", cert_path.display());
    }
    Ok(())
}
