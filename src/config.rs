use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const MIB: u64 = 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub bucket: String,
    pub max_upload_bytes: u64,
    pub min_part_bytes: u64,
    pub max_sessions: usize,
    pub session_ttl_secs: Option<u64>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File storage gateway with multipart uploads")]
pub struct Args {
    /// Host to bind to (overrides FILE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides FILE_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket files are stored in (overrides FILE_GATEWAY_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Largest accepted single-shot upload in bytes (overrides FILE_GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Minimum size of every non-final part in bytes (overrides FILE_GATEWAY_MIN_PART_BYTES)
    #[arg(long)]
    pub min_part_bytes: Option<u64>,

    /// Maximum number of open multipart sessions (overrides FILE_GATEWAY_MAX_SESSIONS)
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Abort sessions older than this many seconds (overrides FILE_GATEWAY_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up with `lookup`, over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = lookup("FILE_GATEWAY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&lookup, "FILE_GATEWAY_PORT")?.unwrap_or(8080);
        let env_storage =
            lookup("FILE_GATEWAY_STORAGE_DIR").unwrap_or_else(|| "./data/objects".into());
        let env_db = lookup("FILE_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/meta/file_gateway.db".into());
        let env_bucket = lookup("FILE_GATEWAY_BUCKET").unwrap_or_else(|| "uploads".into());
        let env_max_upload =
            parse_var(&lookup, "FILE_GATEWAY_MAX_UPLOAD_BYTES")?.unwrap_or(300 * MIB);
        let env_min_part = parse_var(&lookup, "FILE_GATEWAY_MIN_PART_BYTES")?.unwrap_or(5 * MIB);
        let env_max_sessions = parse_var(&lookup, "FILE_GATEWAY_MAX_SESSIONS")?.unwrap_or(10_000);
        let env_ttl = parse_var(&lookup, "FILE_GATEWAY_SESSION_TTL_SECS")?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            bucket: args.bucket.unwrap_or(env_bucket),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            min_part_bytes: args.min_part_bytes.unwrap_or(env_min_part),
            max_sessions: args.max_sessions.unwrap_or(env_max_sessions),
            session_ttl_secs: args.session_ttl_secs.or(env_ttl),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_env_or_args() {
        let cfg = AppConfig::resolve(Args::default(), lookup(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.bucket, "uploads");
        assert_eq!(cfg.max_upload_bytes, 300 * MIB);
        assert_eq!(cfg.min_part_bytes, 5 * MIB);
        assert_eq!(cfg.session_ttl_secs, None);
    }

    #[test]
    fn args_override_env() {
        let env = lookup(&[("FILE_GATEWAY_PORT", "9000"), ("FILE_GATEWAY_BUCKET", "files")]);
        let args = Args {
            port: Some(7000),
            ..Args::default()
        };
        let cfg = AppConfig::resolve(args, env).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.bucket, "files");
    }

    #[test]
    fn env_values_are_parsed() {
        let env = lookup(&[
            ("FILE_GATEWAY_SESSION_TTL_SECS", "3600"),
            ("FILE_GATEWAY_MAX_SESSIONS", "12"),
        ]);
        let cfg = AppConfig::resolve(Args::default(), env).unwrap();
        assert_eq!(cfg.session_ttl_secs, Some(3600));
        assert_eq!(cfg.max_sessions, 12);
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = AppConfig::resolve(Args::default(), lookup(&[("FILE_GATEWAY_PORT", "http")]))
            .unwrap_err();
        assert!(err.to_string().contains("FILE_GATEWAY_PORT"));
    }
}
