//! Command-line and environment configuration, validated once at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use gantry_api::{ApiConfig, WorkflowApiClient};
use gantry_core::Credential;
use gantry_server::ServerConfig;
use gantry_telemetry::{parse_level, LogFormat, TelemetryConfig, TelemetryError};
use secrecy::SecretString;
use tracing::warn;

/// Secrets shorter than this are accepted with a warning.
pub const MIN_TOKEN_LEN: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// One client over stdin/stdout.
    Stdio,
    /// Many clients over SSE.
    Http,
}

#[derive(Parser)]
#[command(name = "gantry", version, about = "MCP gateway for a workflow automation API")]
pub struct Cli {
    #[arg(long, env = "MCP_MODE", value_enum, default_value_t = Mode::Stdio)]
    pub mode: Mode,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Bearer secret for HTTP mode.
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// File holding the bearer secret. `AUTH_TOKEN` wins when both are set.
    #[arg(long, env = "AUTH_TOKEN_FILE")]
    pub auth_token_file: Option<PathBuf>,

    #[arg(long, env = "WORKFLOW_API_URL")]
    pub api_url: Option<String>,

    #[arg(long, env = "WORKFLOW_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "WORKFLOW_API_TIMEOUT_SECS", default_value_t = 30)]
    pub api_timeout_secs: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// `json` or `pretty`. Defaults to json in HTTP mode, pretty in stdio mode.
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("AUTH_TOKEN or AUTH_TOKEN_FILE is required in http mode")]
    MissingAuthToken,

    #[error("failed to read token file {path}: {source}")]
    TokenFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid workflow API configuration: {0}")]
    Api(#[from] gantry_api::ApiError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Resolve the shared secret from an inline value or a file.
/// Blank values count as absent.
pub fn resolve_credential(
    inline: Option<&str>,
    file: Option<&Path>,
) -> Result<Option<Credential>, ConfigError> {
    if let Some(token) = inline.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(Some(Credential::from(token.to_string())));
    }
    let Some(path) = file else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::TokenFile {
        path: path.to_path_buf(),
        source,
    })?;
    let token = contents.trim();
    if token.is_empty() {
        return Ok(None);
    }
    Ok(Some(Credential::from(token.to_string())))
}

/// The secret HTTP mode cannot start without.
pub fn require_credential(cli: &Cli) -> Result<Credential, ConfigError> {
    let credential = resolve_credential(cli.auth_token.as_deref(), cli.auth_token_file.as_deref())?
        .ok_or(ConfigError::MissingAuthToken)?;
    if credential.len() < MIN_TOKEN_LEN {
        warn!(
            length = credential.len(),
            recommended = MIN_TOKEN_LEN,
            "auth token is shorter than recommended"
        );
    }
    Ok(credential)
}

/// The transport to run, with everything it needs to start.
pub enum Transport {
    Stdio,
    Http {
        credential: Credential,
        config: ServerConfig,
    },
}

/// Resolve the selected mode. HTTP mode fails here when no secret is set.
pub fn transport(cli: &Cli) -> Result<Transport, ConfigError> {
    match cli.mode {
        Mode::Stdio => Ok(Transport::Stdio),
        Mode::Http => Ok(Transport::Http {
            credential: require_credential(cli)?,
            config: server_config(cli),
        }),
    }
}

/// Build the REST client when both URL and key are configured.
pub fn api_client(cli: &Cli) -> Result<Option<Arc<WorkflowApiClient>>, ConfigError> {
    let url = cli.api_url.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let key = cli.api_key.as_deref().map(str::trim).filter(|s| !s.is_empty());
    match (url, key) {
        (Some(url), Some(key)) => {
            let mut config = ApiConfig::new(url, SecretString::from(key.to_string()));
            config.timeout = Duration::from_secs(cli.api_timeout_secs.max(1));
            Ok(Some(Arc::new(WorkflowApiClient::new(config)?)))
        }
        (None, None) => Ok(None),
        (url, _) => {
            warn!(
                url_set = url.is_some(),
                "WORKFLOW_API_URL and WORKFLOW_API_KEY must both be set; API tools disabled"
            );
            Ok(None)
        }
    }
}

pub fn server_config(cli: &Cli) -> ServerConfig {
    ServerConfig {
        host: cli.host.clone(),
        port: cli.port,
        ..ServerConfig::default()
    }
}

/// Logging setup for the selected mode. Stdio always logs to stderr.
pub fn telemetry_config(cli: &Cli) -> Result<TelemetryConfig, ConfigError> {
    let level = parse_level(&cli.log_level)?;
    let mut config = match cli.mode {
        Mode::Stdio => TelemetryConfig::for_stdio(level),
        Mode::Http => TelemetryConfig {
            log_level: level,
            ..TelemetryConfig::default()
        },
    };
    if let Some(format) = &cli.log_format {
        config.format = format.parse::<LogFormat>()?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_telemetry::LogWriter;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["gantry"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn inline_token_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        let credential = resolve_credential(Some("inline"), Some(file.path()))
            .unwrap()
            .unwrap();
        assert!(credential.verify("inline"));
    }

    #[test]
    fn token_file_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  file-secret  ").unwrap();
        let credential = resolve_credential(None, Some(file.path())).unwrap().unwrap();
        assert!(credential.verify("file-secret"));
    }

    #[test]
    fn blank_inline_falls_back_to_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "file-secret").unwrap();
        let credential = resolve_credential(Some("   "), Some(file.path()))
            .unwrap()
            .unwrap();
        assert!(credential.verify("file-secret"));
    }

    #[test]
    fn unreadable_token_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = resolve_credential(None, Some(&missing)).err().unwrap();
        assert!(matches!(err, ConfigError::TokenFile { .. }));
    }

    #[test]
    fn empty_sources_resolve_to_none() {
        assert!(resolve_credential(None, None).unwrap().is_none());
        assert!(resolve_credential(Some(""), None).unwrap().is_none());
    }

    #[test]
    fn http_mode_requires_secret() {
        let cli = cli(&["--mode", "http", "--auth-token", ""]);
        assert!(matches!(
            require_credential(&cli),
            Err(ConfigError::MissingAuthToken)
        ));
    }

    #[test]
    fn short_secret_is_accepted() {
        let cli = cli(&["--mode", "http", "--auth-token", "short"]);
        assert!(require_credential(&cli).unwrap().verify("short"));
    }

    #[test]
    fn transport_follows_mode() {
        let stdio = cli(&["--mode", "stdio", "--auth-token", ""]);
        assert!(matches!(transport(&stdio), Ok(Transport::Stdio)));

        let missing = cli(&["--mode", "http", "--auth-token", ""]);
        assert!(matches!(transport(&missing), Err(ConfigError::MissingAuthToken)));

        let http = cli(&["--mode", "http", "--auth-token", "secret", "--port", "8080"]);
        match transport(&http).unwrap() {
            Transport::Http { credential, config } => {
                assert!(credential.verify("secret"));
                assert_eq!(config.port, 8080);
            }
            Transport::Stdio => panic!("expected http transport"),
        }
    }

    #[test]
    fn api_client_needs_url_and_key() {
        let both = cli(&["--api-url", "http://localhost:5678", "--api-key", "k"]);
        assert!(api_client(&both).unwrap().is_some());
        let only_url = cli(&["--api-url", "http://localhost:5678", "--api-key", ""]);
        assert!(api_client(&only_url).unwrap().is_none());
        let bad = cli(&["--api-url", "::not a url::", "--api-key", "k"]);
        assert!(matches!(api_client(&bad), Err(ConfigError::Api(_))));
    }

    #[test]
    fn stdio_logs_to_stderr() {
        let cli = cli(&["--mode", "stdio", "--log-level", "debug"]);
        let config = telemetry_config(&cli).unwrap();
        assert_eq!(config.writer, LogWriter::Stderr);
        assert_eq!(config.log_level, tracing::Level::DEBUG);
    }

    #[test]
    fn http_defaults_to_json_stdout() {
        let cli = cli(&["--mode", "http", "--log-format", "pretty"]);
        let config = telemetry_config(&cli).unwrap();
        assert_eq!(config.writer, LogWriter::Stdout);
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn server_config_takes_host_and_port() {
        let cli = cli(&["--host", "127.0.0.1", "--port", "8080"]);
        let config = server_config(&cli);
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.idle_timeout, Duration::from_secs(1800));
    }
}
