use crate::{
    models::destination::{Destination, parse_destination_arg},
    services::upload_service::DEFAULT_DESTINATION,
    storage::chunk_fs::FileSystemChunkStorage,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use std::{collections::HashMap, env, str::FromStr};

const DEFAULT_MAX_CHUNK_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_CHUNK_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_TEMPLATE: &str = "uploads/%Y/%m/%d";

/// Where in-flight chunks are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChunkBackendKind {
    /// Scratch directory on local disk.
    Filesystem,
    /// Process memory; only for single-instance deployments.
    Memory,
}

impl FromStr for ChunkBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(s, true).map_err(|e| anyhow!(e))
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub chunk_backend: ChunkBackendKind,
    pub chunk_dir: String,
    pub storage_dir: String,
    pub database_url: String,
    pub destinations: HashMap<String, Destination>,
    pub max_chunk_bytes: usize,
    pub chunk_ttl_secs: u64,
}

/// Run mode picked on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    /// Apply the schema and exit.
    Migrate,
    /// Delete chunks older than the TTL and exit.
    Sweep,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked upload server")]
pub struct Args {
    /// Host to bind to (overrides RESUMABLE_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RESUMABLE_UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Chunk storage backend (overrides RESUMABLE_UPLOAD_CHUNK_BACKEND)
    #[arg(long, value_enum)]
    pub chunk_backend: Option<ChunkBackendKind>,

    /// Scratch directory for chunks (overrides RESUMABLE_UPLOAD_CHUNK_DIR)
    #[arg(long)]
    pub chunk_dir: Option<String>,

    /// Directory for collected files (overrides RESUMABLE_UPLOAD_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides RESUMABLE_UPLOAD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Upload destination as NAME=TEMPLATE, repeatable
    /// (overrides RESUMABLE_UPLOAD_DESTINATIONS, comma separated)
    #[arg(long = "destination")]
    pub destinations: Vec<String>,

    /// Largest accepted chunk in bytes (overrides RESUMABLE_UPLOAD_MAX_CHUNK_BYTES)
    #[arg(long)]
    pub max_chunk_bytes: Option<usize>,

    /// Age in seconds after which unfinished chunks are swept
    /// (overrides RESUMABLE_UPLOAD_CHUNK_TTL_SECS)
    #[arg(long)]
    pub chunk_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "sweep")]
    pub migrate: bool,

    /// Sweep stale chunks and exit
    #[arg(long)]
    pub sweep: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, RunMode)> {
        // --- Environment fallback ---
        let env_host = env::var("RESUMABLE_UPLOAD_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("RESUMABLE_UPLOAD_PORT", 3000u16)?;
        let env_backend = env_parse("RESUMABLE_UPLOAD_CHUNK_BACKEND", ChunkBackendKind::Filesystem)?;
        let env_chunk_dir = env::var("RESUMABLE_UPLOAD_CHUNK_DIR").unwrap_or_else(|_| {
            FileSystemChunkStorage::default_root()
                .to_string_lossy()
                .into_owned()
        });
        let env_storage =
            env::var("RESUMABLE_UPLOAD_STORAGE_DIR").unwrap_or_else(|_| "./data/files".into());
        let env_db = env::var("RESUMABLE_UPLOAD_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/resumable_upload.db".into());
        let env_destinations: Vec<String> = env::var("RESUMABLE_UPLOAD_DESTINATIONS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let env_max_chunk = env_parse("RESUMABLE_UPLOAD_MAX_CHUNK_BYTES", DEFAULT_MAX_CHUNK_BYTES)?;
        let env_ttl = env_parse("RESUMABLE_UPLOAD_CHUNK_TTL_SECS", DEFAULT_CHUNK_TTL_SECS)?;

        let raw_destinations = if args.destinations.is_empty() {
            env_destinations
        } else {
            args.destinations
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            chunk_backend: args.chunk_backend.unwrap_or(env_backend),
            chunk_dir: args.chunk_dir.unwrap_or(env_chunk_dir),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            destinations: build_destinations(&raw_destinations)?,
            max_chunk_bytes: args.max_chunk_bytes.unwrap_or(env_max_chunk),
            chunk_ttl_secs: args.chunk_ttl_secs.unwrap_or(env_ttl),
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.sweep {
            RunMode::Sweep
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

/// Named destinations, always including `default`.
fn build_destinations(raw: &[String]) -> Result<HashMap<String, Destination>> {
    let mut destinations = HashMap::new();
    for entry in raw {
        let (name, destination) = parse_destination_arg(entry).map_err(|e| anyhow!(e))?;
        destinations.insert(name, destination);
    }
    destinations
        .entry(DEFAULT_DESTINATION.to_string())
        .or_insert_with(|| Destination::template(DEFAULT_TEMPLATE));
    Ok(destinations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_defaults() {
        let args = Args::try_parse_from([
            "resumable-upload",
            "--port",
            "8080",
            "--chunk-backend",
            "memory",
            "--destination",
            "avatars=media/avatars",
            "--destination",
            "default=files/%Y",
            "--sweep",
        ])
        .unwrap();
        let (cfg, mode) = AppConfig::from_args(args).unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.chunk_backend, ChunkBackendKind::Memory);
        assert_eq!(mode, RunMode::Sweep);
        assert!(matches!(
            cfg.destinations.get("default"),
            Some(Destination::Template(t)) if t == "files/%Y"
        ));
        assert!(cfg.destinations.contains_key("avatars"));
    }

    #[test]
    fn default_destination_is_always_present() {
        let destinations = build_destinations(&[]).unwrap();
        assert!(matches!(
            destinations.get(DEFAULT_DESTINATION),
            Some(Destination::Template(t)) if t == DEFAULT_TEMPLATE
        ));
    }

    #[test]
    fn malformed_destination_is_an_error() {
        assert!(build_destinations(&["no-separator".to_string()]).is_err());
    }

    #[test]
    fn migrate_and_sweep_conflict() {
        assert!(Args::try_parse_from(["resumable-upload", "--migrate", "--sweep"]).is_err());
    }

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!(
            "FileSystem".parse::<ChunkBackendKind>().unwrap(),
            ChunkBackendKind::Filesystem
        );
        assert!("s3".parse::<ChunkBackendKind>().is_err());
    }
}
