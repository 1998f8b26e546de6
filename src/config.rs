use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, str::FromStr};

const ENV_PREFIX: &str = "MEDIOA_";

/// Longest accepted validity of signed download links.
const MAX_DOWNLOAD_EXPIRE_DAYS: i64 = 36_500;

const BYTES_PER_MB: u64 = 1 << 20;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Base URL clients reach this server on; download and blob links are
    /// built from it.
    pub public_url: String,
    pub storage_dir: String,
    pub database_url: String,
    /// Presenting this key at secret creation grants a master secret.
    pub secret_key: String,
    /// Key signing blob read links.
    pub signing_key: String,
    pub upload_max_size_mb: u64,
    pub download_expire_days: i64,
    pub password_hash_cost: u32,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Media storage gateway")]
pub struct Args {
    /// Host to bind to (overrides MEDIOA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIOA_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Public base URL (overrides MEDIOA_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Directory where blobs are stored (overrides MEDIOA_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides MEDIOA_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted upload body in MB (overrides MEDIOA_UPLOAD_MAX_SIZE_MB)
    #[arg(long)]
    pub upload_max_size_mb: Option<u64>,

    /// Validity of signed download links in days (overrides MEDIOA_DOWNLOAD_EXPIRE_DAYS)
    #[arg(long)]
    pub download_expire_days: Option<i64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Merge CLI overrides over values from `lookup`, then defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        let port = match args.port {
            Some(port) => port,
            None => parse_var(&var, "PORT")?.unwrap_or(3000),
        };
        let upload_max_size_mb = match args.upload_max_size_mb {
            Some(mb) => mb,
            None => parse_var(&var, "UPLOAD_MAX_SIZE_MB")?.unwrap_or(100),
        };
        let download_expire_days = match args.download_expire_days {
            Some(days) => days,
            None => parse_var(&var, "DOWNLOAD_EXPIRE_DAYS")?.unwrap_or(30),
        };
        let password_hash_cost =
            parse_var(&var, "PASSWORD_HASH_COST")?.unwrap_or(bcrypt::DEFAULT_COST);

        let cfg = Self {
            host: args
                .host
                .or_else(|| var("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port,
            public_url: args
                .public_url
                .or_else(|| var("PUBLIC_URL"))
                .unwrap_or_else(|| format!("http://localhost:{port}"))
                .trim_end_matches('/')
                .to_string(),
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/blobs".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/medioa.db".into()),
            secret_key: var("SECRET_KEY").unwrap_or_default(),
            signing_key: var("SIGNING_KEY").unwrap_or_default(),
            upload_max_size_mb,
            download_expire_days,
            password_hash_cost,
        };

        cfg.validate(args.migrate)?;
        Ok((cfg, args.migrate))
    }

    fn validate(&self, migrate: bool) -> Result<()> {
        if self.upload_max_size_mb == 0 {
            bail!("{ENV_PREFIX}UPLOAD_MAX_SIZE_MB must be greater than zero");
        }
        let fits = self
            .upload_max_size_mb
            .checked_mul(BYTES_PER_MB)
            .is_some_and(|bytes| usize::try_from(bytes).is_ok());
        if !fits {
            bail!("{ENV_PREFIX}UPLOAD_MAX_SIZE_MB is too large");
        }
        if !(1..=MAX_DOWNLOAD_EXPIRE_DAYS).contains(&self.download_expire_days) {
            bail!(
                "{ENV_PREFIX}DOWNLOAD_EXPIRE_DAYS must be between 1 and {MAX_DOWNLOAD_EXPIRE_DAYS}"
            );
        }
        if !(4..=31).contains(&self.password_hash_cost) {
            bail!("{ENV_PREFIX}PASSWORD_HASH_COST must be between 4 and 31");
        }
        if self.signing_key.is_empty() && !migrate {
            bail!("{ENV_PREFIX}SIGNING_KEY is required");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upload_max_bytes(&self) -> usize {
        self.upload_max_size_mb
            .checked_mul(BYTES_PER_MB)
            .and_then(|bytes| usize::try_from(bytes).ok())
            .unwrap_or(usize::MAX)
    }

    pub fn download_validity(&self) -> chrono::Duration {
        chrono::Duration::days(self.download_expire_days)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{value}`"))
        })
        .transpose()
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("public_url", &self.public_url)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("secret_key", &redacted(&self.secret_key))
            .field("signing_key", &redacted(&self.signing_key))
            .field("upload_max_size_mb", &self.upload_max_size_mb)
            .field("download_expire_days", &self.download_expire_days)
            .field("password_hash_cost", &self.password_hash_cost)
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "<unset>" } else { "<redacted>" }
}
