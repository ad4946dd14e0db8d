//! chartwatch CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use chartwatch_common::telemetry::{LogFormat, TelemetryConfig};

/// chartwatch - drive chart releases through their lifecycle and verify
/// each step from cluster events
#[derive(Parser, Debug)]
#[command(name = "chartwatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags accepted by every command
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Harness config file
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "CHARTWATCH_CONFIG",
        default_value = config::DEFAULT_CONFIG_FILE
    )]
    pub config: PathBuf,

    /// Kubeconfig path (overrides the config file)
    #[arg(long, global = true, env = "CHARTWATCH_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the configured releases in dependency order
    Install(commands::install::InstallArgs),
    /// Upgrade one configured release to a new chart version
    Upgrade(commands::upgrade::UpgradeArgs),
    /// Remove every configured release, dependents first
    Uninstall(commands::uninstall::UninstallArgs),
    /// Report constraint audit results
    Audit(commands::audit::AuditArgs),
    /// Apply the configured policy and check that it denies what it should
    Enforce(commands::enforce::EnforceArgs),
    /// List source-code providers or transform a stored provider config
    Providers(commands::providers::ProvidersArgs),
}

impl Cli {
    /// Telemetry settings for this invocation
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            format: self.global.log_format.into(),
            default_filter: None,
        }
    }

    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Install(args) => commands::install::run(&self.global, args).await,
            Commands::Upgrade(args) => commands::upgrade::run(&self.global, args).await,
            Commands::Uninstall(args) => commands::uninstall::run(&self.global, args).await,
            Commands::Audit(args) => commands::audit::run(&self.global, args).await,
            Commands::Enforce(args) => commands::enforce::run(&self.global, args).await,
            Commands::Providers(args) => commands::providers::run(args),
        }
    }
}
