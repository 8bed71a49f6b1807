use crate::models::file_type::{DEFAULT_ACCEPTED_TYPES, FileTypePolicy};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "IMAGE_INTAKE_";
const DEFAULT_BUCKETS: &str = "product-images,blog-images,site-assets";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub sweep_interval: Duration,
    pub buckets: Vec<String>,
    pub pipeline: PipelineSettings,
}

/// Knobs shared by the intake and commit services.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Prefix for preview and asset URLs, without a trailing slash.
    pub public_base_url: String,
    pub max_upload_bytes: u64,
    pub max_pixels: u64,
    pub max_target_dimension: u32,
    pub temp_ttl: Duration,
    pub processing_timeout: Duration,
    /// Previews at or below this size are returned as `data:` URLs. 0 disables.
    pub inline_preview_max_bytes: u64,
    pub accepted_types: FileTypePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:3000".into(),
            max_upload_bytes: 20 * 1024 * 1024,
            max_pixels: 40_000_000,
            max_target_dimension: 4096,
            temp_ttl: Duration::from_secs(3600),
            processing_timeout: Duration::from_secs(30),
            inline_preview_max_bytes: 0,
            accepted_types: FileTypePolicy::default(),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Staged image intake and derivation service")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_INTAKE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_INTAKE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root directory for staged originals and derivatives (overrides IMAGE_INTAKE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IMAGE_INTAKE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL used in returned links (overrides IMAGE_INTAKE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Upload byte ceiling (overrides IMAGE_INTAKE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Per-call processing timeout in seconds (overrides IMAGE_INTAKE_PROCESSING_TIMEOUT_SECS)
    #[arg(long)]
    pub processing_timeout_secs: Option<u64>,

    /// Lifetime of staged uploads in seconds (overrides IMAGE_INTAKE_TEMP_TTL_SECS)
    #[arg(long)]
    pub temp_ttl_secs: Option<u64>,

    /// Comma separated MIME allow-list (overrides IMAGE_INTAKE_ACCEPTED_TYPES)
    #[arg(long)]
    pub accepted_types: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge `args` over values read through `lookup`, falling back to defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let defaults = PipelineSettings::default();

        let port = match args.port {
            Some(port) => port,
            None => parse_or(&var, "PORT", 3000)?,
        };
        let max_upload_bytes = match args.max_upload_bytes {
            Some(v) => v,
            None => parse_or(&var, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        };
        let processing_timeout_secs = match args.processing_timeout_secs {
            Some(v) => v,
            None => parse_or(
                &var,
                "PROCESSING_TIMEOUT_SECS",
                defaults.processing_timeout.as_secs(),
            )?,
        };
        let temp_ttl_secs = match args.temp_ttl_secs {
            Some(v) => v,
            None => parse_or(&var, "TEMP_TTL_SECS", defaults.temp_ttl.as_secs())?,
        };
        let accepted_types = args
            .accepted_types
            .or_else(|| var("ACCEPTED_TYPES"))
            .map(|list| FileTypePolicy::parse(&list))
            .unwrap_or_else(|| FileTypePolicy::new(DEFAULT_ACCEPTED_TYPES));
        if accepted_types.accepted().next().is_none() {
            anyhow::bail!("{ENV_PREFIX}ACCEPTED_TYPES must name at least one MIME type");
        }

        let pipeline = PipelineSettings {
            public_base_url: args
                .public_base_url
                .or_else(|| var("PUBLIC_BASE_URL"))
                .unwrap_or(defaults.public_base_url)
                .trim_end_matches('/')
                .to_string(),
            max_upload_bytes,
            max_pixels: parse_or(&var, "MAX_PIXELS", defaults.max_pixels)?,
            max_target_dimension: parse_or(
                &var,
                "MAX_TARGET_DIMENSION",
                defaults.max_target_dimension,
            )?,
            temp_ttl: Duration::from_secs(temp_ttl_secs),
            processing_timeout: Duration::from_secs(processing_timeout_secs),
            inline_preview_max_bytes: parse_or(&var, "INLINE_PREVIEW_MAX_BYTES", 0)?,
            accepted_types,
        };

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/image_intake.db".into()),
            sweep_interval: Duration::from_secs(parse_or(&var, "SWEEP_INTERVAL_SECS", 300)?),
            buckets: var("BUCKETS")
                .unwrap_or_else(|| DEFAULT_BUCKETS.into())
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(String::from)
                .collect(),
            pipeline,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{}`", value)),
        None => Ok(default),
    }
}
