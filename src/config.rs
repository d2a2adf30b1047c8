use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr};

/// Which object store backs uploaded file bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Backblaze B2 native API.
    B2,
    /// Sharded directory tree on local disk.
    Local,
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "b2" => Ok(Backend::B2),
            "local" => Ok(Backend::Local),
            other => anyhow::bail!("unknown backend `{}` (expected `b2` or `local`)", other),
        }
    }
}

/// Credentials and bucket for the B2 backend.
///
/// Values are carried as given; missing ones are reported by the B2 client
/// when it authorizes at startup.
#[derive(Clone, Default)]
pub struct B2Config {
    pub key_id: Option<String>,
    pub application_key: Option<String>,
    pub bucket_name: Option<String>,
}

impl std::fmt::Debug for B2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("B2Config")
            .field("key_id", &self.key_id)
            .field(
                "application_key",
                &self.application_key.as_ref().map(|_| "<redacted>"),
            )
            .field("bucket_name", &self.bucket_name)
            .finish()
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub backend: Backend,
    pub storage_dir: String,
    pub download_content_type: String,
    pub max_upload_bytes: usize,
    pub b2: B2Config,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Upload, list and download files backed by B2")]
pub struct Args {
    /// Host to bind to (overrides FILE_DEPOT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_DEPOT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides FILE_DEPOT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Object store backend (overrides FILE_DEPOT_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Directory used by the local backend (overrides FILE_DEPOT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Media type declared on downloads (overrides FILE_DEPOT_DOWNLOAD_CONTENT_TYPE)
    #[arg(long)]
    pub download_content_type: Option<String>,

    /// Largest accepted upload body in bytes (overrides FILE_DEPOT_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Create the database schema and exit
    #[arg(long)]
    pub migrate: bool,
}

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge parsed arguments with values from `lookup`, falling back to defaults.
    ///
    /// Arguments win over the environment.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_port = parse_var(&lookup, "FILE_DEPOT_PORT")?.unwrap_or(DEFAULT_PORT);
        let env_backend = parse_var(&lookup, "FILE_DEPOT_BACKEND")?.unwrap_or(Backend::B2);
        let env_max_upload = parse_var(&lookup, "FILE_DEPOT_MAX_UPLOAD_BYTES")?
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("FILE_DEPOT_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.unwrap_or(env_port),
            database_url: args
                .database_url
                .or_else(|| lookup("FILE_DEPOT_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./files.db".into()),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args
                .storage_dir
                .or_else(|| lookup("FILE_DEPOT_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            download_content_type: args
                .download_content_type
                .or_else(|| lookup("FILE_DEPOT_DOWNLOAD_CONTENT_TYPE"))
                .unwrap_or_else(|| "audio/mpeg".into()),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            b2: B2Config {
                key_id: lookup("B2_KEY_ID"),
                application_key: lookup("B2_APPLICATION_KEY"),
                bucket_name: lookup("B2_BUCKET_NAME"),
            },
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(None),
    }
}
