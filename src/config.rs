use anyhow::{Context, Result};
use clap::Parser;
use std::env;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub max_upload_bytes: usize,
    pub cors_origin: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File upload and download service")]
pub struct Args {
    /// Host to bind to (overrides FILE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored (overrides FILE_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted request body in bytes (overrides FILE_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Origin allowed to call the API from a browser (overrides FILE_STORE_CORS_ORIGIN)
    #[arg(long)]
    pub cors_origin: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over environment values over defaults.
    pub fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        // --- Environment fallback ---
        let env_host = lookup("FILE_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env(&lookup, "FILE_STORE_PORT")?.unwrap_or(8080);
        let env_storage =
            lookup("FILE_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_db = lookup("FILE_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/file_store.db".into());
        let env_max_upload =
            parse_env(&lookup, "FILE_STORE_MAX_UPLOAD_BYTES")?.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let env_cors =
            lookup("FILE_STORE_CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".into());

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            cors_origin: args.cors_origin.unwrap_or(env_cors),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(
        vars: &[(&str, &str)],
    ) -> impl Fn(&str) -> Result<String, env::VarError> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_without_env_or_args() {
        let cfg = AppConfig::merge(Args::default(), lookup_from(&[])).unwrap();

        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.storage_dir, "./data/uploads");
        assert_eq!(cfg.database_url, "sqlite://./data/meta/file_store.db");
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(cfg.cors_origin, "http://localhost:3000");
    }

    #[test]
    fn env_overrides_defaults_and_args_override_env() {
        let lookup = lookup_from(&[
            ("FILE_STORE_PORT", "9000"),
            ("FILE_STORE_STORAGE_DIR", "/srv/files"),
            ("FILE_STORE_MAX_UPLOAD_BYTES", "2048"),
        ]);
        let args = Args {
            port: Some(7000),
            ..Args::default()
        };

        let cfg = AppConfig::merge(args, lookup).unwrap();

        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.storage_dir, "/srv/files");
        assert_eq!(cfg.max_upload_bytes, 2048);
    }

    #[test]
    fn malformed_numeric_env_is_an_error() {
        let result = AppConfig::merge(Args::default(), lookup_from(&[("FILE_STORE_PORT", "http")]));
        assert!(result.is_err());
    }
}
