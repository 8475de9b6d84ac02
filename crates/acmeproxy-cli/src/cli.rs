use std::path::{Path, PathBuf};
use std::sync::Arc;

use acmeproxy::acme::InstantAcmeClient;
use acmeproxy::cache::DirCache;
use acmeproxy::config::{Config, LogLevel};
use acmeproxy::server::Server;
use acmeproxy::tls::{AllowList, CertificateManager};
use clap::{Parser, Subcommand};
use log::{debug, info};

use crate::error::CliError;
use crate::format::FormatType;

const DEFAULT_CONFIG_NAME: &str = "acmeproxy";

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the proxy with the provided configuration
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "acmeproxy.toml")]
        config: PathBuf,
    },

    /// Create a new configuration file in the target directory
    Init {
        /// The directory the configuration file will be created in (default: current directory)
        #[arg(required = false)]
        target_dir: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = FormatType::Toml)]
        format: FormatType,
    },

    /// Print the version of the CLI
    Version,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// The log level for the application, overrides the configuration file
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    #[clap(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn new() -> Self {
        Cli::parse()
    }

    /// Start logging, the CLI flag always overrides the level set in the configuration file
    fn init_logging(&self, configured: Option<LogLevel>) {
        let level = self
            .log_level
            .or(configured)
            .unwrap_or(LogLevel::Info)
            .to_log_level_filter();
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .init();
    }

    pub async fn execute(&self) -> Result<(), CliError> {
        match &self.command {
            Commands::Run { config } => self.run(config).await,
            Commands::Init { target_dir, format } => {
                self.init_logging(None);
                let dir = target_dir.clone().unwrap_or_else(|| PathBuf::from("."));
                init(&dir, *format)
            }
            Commands::Version => {
                println!("acmeproxy {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }

    async fn run(&self, path: &Path) -> Result<(), CliError> {
        let config = match read_config(path) {
            Ok(config) => config,
            Err(err) => {
                self.init_logging(None);
                return Err(err);
            }
        };
        self.init_logging(config.log_level);
        debug!("Loaded configuration from {}", path.display());

        let cache = Arc::new(DirCache::new(config.acme.cache_dir.clone()));
        let acme = Arc::new(
            InstantAcmeClient::with_cache(
                &config.acme.directory_url,
                config.acme.email.as_deref(),
                cache.as_ref(),
            )
            .await?,
        );

        let mut builder =
            CertificateManager::builder(acme, cache).options(config.acme.manager_options());
        if !config.acme.allowed_domains.is_empty() {
            builder = builder.checker(Arc::new(AllowList::new(config.acme.allowed_domains.as_slice())));
        }
        let manager = builder.build();

        let server = Server::new(config, manager);
        server.run().await?;

        info!("Proxy stopped");
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<Config, CliError> {
    let input = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let format = FormatType::Toml.format(&input);
    Ok(format.parse()?)
}

fn init(target_dir: &Path, format: FormatType) -> Result<(), CliError> {
    let path = target_dir.join(format!("{DEFAULT_CONFIG_NAME}.{}", format.extension()));
    if path.exists() {
        return Err(CliError::AlreadyExists(path));
    }

    std::fs::create_dir_all(target_dir).map_err(|source| CliError::Read {
        path: target_dir.to_path_buf(),
        source,
    })?;

    Config::default().write_to_file(&path, format.format(""))?;
    println!("Created {}", path.display());
    Ok(())
}
