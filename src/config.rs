use crate::{
    models::derivative::DerivativeSpec,
    services::{derivative_service::validate_specs, image_codec::OutputFormat},
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{
    env,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub jpeg_quality: u8,
    pub specs: Vec<DerivativeSpec>,
}

/// What the binary should do once configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Serve the HTTP API.
    Serve,
    /// Apply the metadata schema and exit.
    Migrate,
    /// Process the trigger in the given JSON file, print the report, and exit.
    Event(PathBuf),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Fixed-size image derivative generator")]
pub struct Args {
    /// Host to bind to (overrides DERIVATIVES_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DERIVATIVES_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides DERIVATIVES_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DERIVATIVES_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// JPEG quality for derivatives, 1-100 (overrides DERIVATIVES_JPEG_QUALITY)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// JSON file with the derivative table (overrides DERIVATIVES_SPECS_FILE)
    #[arg(long)]
    pub specs_file: Option<PathBuf>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "event")]
    pub migrate: bool,

    /// Process one trigger payload from a JSON file and exit
    #[arg(long)]
    pub event: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over the variables visible through `lookup`, then defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, RunMode)> {
        let env_host = lookup("DERIVATIVES_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var::<u16>(&lookup, "DERIVATIVES_PORT")?.unwrap_or(3000);
        let env_storage =
            lookup("DERIVATIVES_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("DERIVATIVES_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/derivatives.db".into());
        let env_quality = parse_var::<u8>(&lookup, "DERIVATIVES_JPEG_QUALITY")?.unwrap_or(85);
        let env_specs = lookup("DERIVATIVES_SPECS_FILE").map(PathBuf::from);

        let jpeg_quality = args.jpeg_quality.unwrap_or(env_quality);
        if !(1..=100).contains(&jpeg_quality) {
            bail!("JPEG quality must be between 1 and 100, got {}", jpeg_quality);
        }

        let specs = match args.specs_file.or(env_specs) {
            Some(path) => load_specs(&path)?,
            None => DerivativeSpec::defaults(),
        };

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            jpeg_quality,
            specs,
        };

        let mode = match (args.migrate, args.event) {
            (true, _) => RunMode::Migrate,
            (false, Some(path)) => RunMode::Event(path),
            (false, None) => RunMode::Serve,
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::Jpeg {
            quality: self.jpeg_quality,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err))
        })
        .transpose()
}

/// Read and validate a derivative table from a JSON file.
pub fn load_specs(path: &Path) -> Result<Vec<DerivativeSpec>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading specs file {}", path.display()))?;
    let specs: Vec<DerivativeSpec> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing specs file {}", path.display()))?;
    validate_specs(&specs).with_context(|| format!("validating specs file {}", path.display()))?;
    Ok(specs)
}
