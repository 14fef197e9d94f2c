use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use std::{env, fmt, path::PathBuf, str::FromStr};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_UPLOAD_ATTEMPTS: u32 = 100;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024;

/// Which object storage implementation backs the per-user buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Supabase Storage over its REST API.
    Supabase,
    /// Plain directories on local disk, served back under `/public`.
    Local,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "supabase" => Ok(Self::Supabase),
            "local" => Ok(Self::Local),
            other => Err(anyhow!("unknown storage backend `{}`", other)),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub supabase_url: String,
    pub supabase_key: String,
    pub secret_token: String,
    pub save_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub sample_file: PathBuf,
    pub storage_backend: StorageBackend,
    pub storage_dir: PathBuf,
    pub public_sharing: bool,
    pub max_upload_attempts: u32,
    pub pandoc: String,
    pub oauth_provider: String,
    pub public_base_url: String,
    pub http_timeout_secs: u64,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Upload, convert and preview Org documents")]
pub struct Args {
    /// Host to bind to (overrides ORGSHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ORGSHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Supabase project URL (overrides SUPABASE_URL)
    #[arg(long)]
    pub supabase_url: Option<String>,

    /// Directory holding the per-user local copies (overrides ORGSHARE_SAVE_DIR)
    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    /// Root for per-request scratch directories (overrides ORGSHARE_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// File seeded into empty buckets (overrides ORGSHARE_SAMPLE_FILE)
    #[arg(long)]
    pub sample_file: Option<PathBuf>,

    /// Object storage backend (overrides ORGSHARE_STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub storage_backend: Option<StorageBackend>,

    /// Bucket root for the local backend (overrides ORGSHARE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Let anyone open `/s/<user_id>/<filename>` (overrides ORGSHARE_PUBLIC_SHARING)
    #[arg(long)]
    pub public_sharing: bool,

    /// Upper bound on name-collision retries (overrides ORGSHARE_MAX_UPLOAD_ATTEMPTS)
    #[arg(long)]
    pub max_upload_attempts: Option<u32>,

    /// Path or name of the pandoc binary (overrides ORGSHARE_PANDOC)
    #[arg(long)]
    pub pandoc: Option<String>,

    /// OAuth provider used by `/login` (overrides ORGSHARE_OAUTH_PROVIDER)
    #[arg(long)]
    pub oauth_provider: Option<String>,

    /// External URL the identity provider redirects back to (overrides ORGSHARE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Timeout for calls to Supabase (overrides ORGSHARE_HTTP_TIMEOUT_SECS)
    #[arg(long)]
    pub http_timeout_secs: Option<u64>,

    /// Largest accepted request body for uploads (overrides ORGSHARE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_sources(Args::parse(), |name| env::var(name))
    }

    /// Merge parsed args over values looked up through `lookup`.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |name: &str| -> Result<Option<String>> {
            match lookup(name) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };
        let required = |name: &str| -> Result<String> {
            var(name)?
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("{} must be set", name))
        };

        // --- Environment fallback ---
        let env_host = var("ORGSHARE_HOST")?.unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "ORGSHARE_PORT")?.unwrap_or(DEFAULT_PORT);
        let env_supabase_url = match args.supabase_url {
            Some(url) => url,
            None => required("SUPABASE_URL")?,
        };
        let supabase_key = required("SUPABASE_KEY")?;
        let secret_token = required("SECRET_TOKEN")?;
        let env_save = var("ORGSHARE_SAVE_DIR")?.unwrap_or_else(|| "./save".into());
        let env_temp = var("ORGSHARE_TEMP_DIR")?.unwrap_or_else(|| "./temp".into());
        let env_sample =
            var("ORGSHARE_SAMPLE_FILE")?.unwrap_or_else(|| "./tested_file/test.org".into());
        let env_backend =
            parse_var(&var, "ORGSHARE_STORAGE_BACKEND")?.unwrap_or(StorageBackend::Supabase);
        let env_storage = var("ORGSHARE_STORAGE_DIR")?.unwrap_or_else(|| "./data/buckets".into());
        let env_sharing = parse_var(&var, "ORGSHARE_PUBLIC_SHARING")?.unwrap_or(false);
        let env_attempts = parse_var(&var, "ORGSHARE_MAX_UPLOAD_ATTEMPTS")?
            .unwrap_or(DEFAULT_MAX_UPLOAD_ATTEMPTS);
        let env_pandoc = var("ORGSHARE_PANDOC")?.unwrap_or_else(|| "pandoc".into());
        let env_provider = var("ORGSHARE_OAUTH_PROVIDER")?.unwrap_or_else(|| "github".into());
        let env_base_url = var("ORGSHARE_PUBLIC_BASE_URL")?;
        let env_timeout =
            parse_var(&var, "ORGSHARE_HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        let env_max_bytes =
            parse_var(&var, "ORGSHARE_MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

        // --- Merge ---
        let port = args.port.unwrap_or(env_port);
        let max_upload_attempts = args.max_upload_attempts.unwrap_or(env_attempts);
        if max_upload_attempts == 0 {
            anyhow::bail!("max upload attempts must be at least 1");
        }

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            supabase_url: env_supabase_url.trim_end_matches('/').to_string(),
            supabase_key,
            secret_token,
            save_dir: args.save_dir.unwrap_or_else(|| env_save.into()),
            temp_dir: args.temp_dir.unwrap_or_else(|| env_temp.into()),
            sample_file: args.sample_file.unwrap_or_else(|| env_sample.into()),
            storage_backend: args.storage_backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or_else(|| env_storage.into()),
            public_sharing: args.public_sharing || env_sharing,
            max_upload_attempts,
            pandoc: args.pandoc.unwrap_or(env_pandoc),
            oauth_provider: args.oauth_provider.unwrap_or(env_provider),
            public_base_url: args
                .public_base_url
                .or(env_base_url)
                .unwrap_or_else(|| format!("http://localhost:{}", port))
                .trim_end_matches('/')
                .to_string(),
            http_timeout_secs: args.http_timeout_secs.unwrap_or(env_timeout),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_bytes),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, V>(var: &V, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    V: Fn(&str) -> Result<Option<String>>,
{
    match var(name)? {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("parsing {} value `{}`: {}", name, value, err)),
        None => Ok(None),
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &"<redacted>")
            .field("secret_token", &"<redacted>")
            .field("save_dir", &self.save_dir)
            .field("temp_dir", &self.temp_dir)
            .field("sample_file", &self.sample_file)
            .field("storage_backend", &self.storage_backend)
            .field("storage_dir", &self.storage_dir)
            .field("public_sharing", &self.public_sharing)
            .field("max_upload_attempts", &self.max_upload_attempts)
            .field("pandoc", &self.pandoc)
            .field("oauth_provider", &self.oauth_provider)
            .field("public_base_url", &self.public_base_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SUPABASE_URL", "https://project.supabase.co/"),
        ("SUPABASE_KEY", "anon-key"),
        ("SECRET_TOKEN", "hunter2"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let cfg = AppConfig::from_sources(Args::default(), lookup(&REQUIRED)).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.supabase_url, "https://project.supabase.co");
        assert_eq!(cfg.save_dir, PathBuf::from("./save"));
        assert_eq!(cfg.temp_dir, PathBuf::from("./temp"));
        assert_eq!(cfg.storage_backend, StorageBackend::Supabase);
        assert!(!cfg.public_sharing);
        assert_eq!(cfg.max_upload_attempts, 100);
        assert_eq!(cfg.public_base_url, "http://localhost:8080");
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = AppConfig::from_sources(
            Args::default(),
            lookup(&[("SUPABASE_URL", "u"), ("SUPABASE_KEY", "k")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SECRET_TOKEN"));
    }

    #[test]
    fn cli_args_override_environment() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("ORGSHARE_PORT", "9000"));
        vars.push(("ORGSHARE_STORAGE_BACKEND", "local"));
        let args = Args {
            port: Some(7000),
            public_sharing: true,
            ..Args::default()
        };
        let cfg = AppConfig::from_sources(args, lookup(&vars)).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.storage_backend, StorageBackend::Local);
        assert!(cfg.public_sharing);
    }

    #[test]
    fn malformed_numbers_are_reported_with_the_variable_name() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("ORGSHARE_MAX_UPLOAD_ATTEMPTS", "many"));
        let err = AppConfig::from_sources(Args::default(), lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("ORGSHARE_MAX_UPLOAD_ATTEMPTS"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = AppConfig::from_sources(Args::default(), lookup(&REQUIRED)).unwrap();
        let printed = format!("{:?}", cfg);
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("anon-key"));
    }
}
