//! Service configuration.
//!
//! Values come from a TOML file (explicit `--config` path or the per-user
//! config directory) and may be overridden on the command line. The token,
//! codespace name and server URL may be stored encrypted.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::api::broker::{DEFAULT_BROKER_QUEUE, DEFAULT_BROKER_URI};
use crate::api::devices_endpoint;
use crate::audio::EnumerationScope;
use crate::crypt::decrypt_or_plain;

pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const USAGE: &str = "\
Usage: sound-agent [options]

Options:
  --config <path>       Configuration file (default: per-user config.toml)
  --url <url>           Base server URL, e.g. http://localhost:5027
  --transport <method>  Transport method: None, Direct or RabbitMQ
  --encrypt <value>     Print the encrypted form of a value and exit
  -h, --help            Help information
  --version             Version information
";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine the config directory")]
    NoConfigDir,

    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("FATAL: No \"{0}\" property configured")]
    MissingMandatory(&'static str),

    #[error("Option {0} requires a value")]
    MissingArgument(String),

    #[error("Unknown option: {0}")]
    UnknownArgument(String),
}

/// How reports reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMethod {
    /// Log and discard
    #[default]
    None,

    /// HTTP dispatch queue
    Direct,

    /// Publish to a RabbitMQ queue drained by a separate consumer
    RabbitMq,
}

impl TransportMethod {
    /// Case-insensitive parse; unknown values fall back to `None`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => TransportMethod::None,
            "direct" => TransportMethod::Direct,
            "rabbitmq" => TransportMethod::RabbitMq,
            _ => {
                info!(value, "Invalid transport method, using None");
                TransportMethod::None
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportMethod::None => "None",
            TransportMethod::Direct => "Direct",
            TransportMethod::RabbitMq => "RabbitMQ",
        }
    }
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default, alias = "apiBaseUrl")]
    pub api_base_url: Option<String>,

    #[serde(default, alias = "universalToken")]
    pub universal_token: Option<String>,

    #[serde(default, alias = "codespaceName")]
    pub codespace_name: Option<String>,

    #[serde(default, alias = "transportMethod")]
    pub transport_method: Option<String>,

    /// AMQP URI for the RabbitMQ transport, may be encrypted
    #[serde(default, alias = "rabbitMqUri")]
    pub rabbitmq_uri: Option<String>,

    #[serde(default, alias = "rabbitMqQueue")]
    pub rabbitmq_queue: Option<String>,

    /// Only devices whose name contains this text are tracked
    #[serde(default)]
    pub name_filter: String,

    /// Track capture endpoints too, not only render
    #[serde(default = "default_true")]
    pub render_and_capture: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            universal_token: None,
            codespace_name: None,
            transport_method: None,
            rabbitmq_uri: None,
            rabbitmq_queue: None,
            name_filter: String::new(),
            render_and_capture: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub config: Option<PathBuf>,
    pub url: Option<String>,
    pub transport: Option<String>,
    pub encrypt: Option<String>,
    pub help: bool,
    pub version: bool,
}

impl CliArgs {
    /// Parse arguments, program name excluded.
    ///
    /// Accepts both `--opt value` and `--opt=value`.
    pub fn parse<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = CliArgs::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };

            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| ConfigError::MissingArgument(flag.clone()))
            };

            match flag.as_str() {
                "--config" => parsed.config = Some(PathBuf::from(value()?)),
                "--url" => parsed.url = Some(value()?),
                "--transport" => parsed.transport = Some(value()?),
                "--encrypt" => parsed.encrypt = Some(value()?),
                "-h" | "--help" => parsed.help = true,
                "--version" => parsed.version = true,
                _ => return Err(ConfigError::UnknownArgument(arg)),
            }
        }

        Ok(parsed)
    }
}

/// Default configuration file path.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let dirs =
        ProjectDirs::from("com", "SoundAgent", "SoundAgent").ok_or(ConfigError::NoConfigDir)?;
    Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Load the configuration file.
///
/// An explicit path must exist; a missing default file yields defaults.
pub fn load_file(explicit: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = default_config_path()?;
            if !path.exists() {
                info!(?path, "Config file not found, using defaults");
                return Ok(FileConfig::default());
            }
            path
        }
    };

    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
}

/// Fully resolved service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Server URL with the REST path appended
    pub api_base_url: String,

    pub universal_token: String,
    pub codespace_name: String,
    pub transport: TransportMethod,
    pub rabbitmq_uri: String,
    pub rabbitmq_queue: String,
    pub name_filter: String,
    pub scope: EnumerationScope,
}

impl AgentConfig {
    /// Merge file values with command-line overrides.
    pub fn resolve(file: FileConfig, args: &CliArgs) -> Result<Self, ConfigError> {
        let server_url = match &args.url {
            Some(url) => url.clone(),
            None => mandatory("api_base_url", file.api_base_url)?,
        };

        let transport = match args.transport.as_deref().or(file.transport_method.as_deref()) {
            Some(value) if !value.trim().is_empty() => TransportMethod::parse(value),
            _ => {
                info!("Transport method not configured, using None");
                TransportMethod::None
            }
        };
        info!(transport = transport.as_str(), "Transport method validated");

        let universal_token = mandatory("universal_token", file.universal_token)?;
        let codespace_name = mandatory("codespace_name", file.codespace_name)?;

        Ok(Self {
            api_base_url: devices_endpoint(&server_url),
            universal_token,
            codespace_name,
            transport,
            rabbitmq_uri: file
                .rabbitmq_uri
                .filter(|uri| !uri.is_empty())
                .map(|uri| decrypt_or_plain(&uri))
                .unwrap_or_else(|| DEFAULT_BROKER_URI.to_string()),
            rabbitmq_queue: file
                .rabbitmq_queue
                .filter(|queue| !queue.is_empty())
                .unwrap_or_else(|| DEFAULT_BROKER_QUEUE.to_string()),
            name_filter: file.name_filter,
            scope: if file.render_and_capture {
                EnumerationScope::RenderAndCapture
            } else {
                EnumerationScope::RenderOnly
            },
        })
    }
}

/// Read a mandatory, possibly encrypted, value.
fn mandatory(key: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.is_empty() => Ok(decrypt_or_plain(&value)),
        _ => Err(ConfigError::MissingMandatory(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::{encrypt, CONFIG_KEY};
    use std::io::Write;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn complete_file() -> FileConfig {
        FileConfig {
            api_base_url: Some("http://localhost:5027".to_string()),
            universal_token: Some("token".to_string()),
            codespace_name: Some("space".to_string()),
            transport_method: Some("direct".to_string()),
            ..FileConfig::default()
        }
    }

    #[test]
    fn test_transport_method_parse() {
        assert_eq!(TransportMethod::parse("DIRECT"), TransportMethod::Direct);
        assert_eq!(TransportMethod::parse("rabbitMQ"), TransportMethod::RabbitMq);
        assert_eq!(TransportMethod::parse("none"), TransportMethod::None);
        assert_eq!(TransportMethod::parse("carrier pigeon"), TransportMethod::None);
    }

    #[test]
    fn test_cli_parse() {
        let parsed = CliArgs::parse(args(&["--url", "http://x", "--transport=Direct", "-h"])).unwrap();
        assert_eq!(parsed.url.as_deref(), Some("http://x"));
        assert_eq!(parsed.transport.as_deref(), Some("Direct"));
        assert!(parsed.help);
        assert!(!parsed.version);
    }

    #[test]
    fn test_cli_errors() {
        assert!(matches!(
            CliArgs::parse(args(&["--url"])),
            Err(ConfigError::MissingArgument(flag)) if flag == "--url"
        ));
        assert!(matches!(
            CliArgs::parse(args(&["--bogus"])),
            Err(ConfigError::UnknownArgument(_))
        ));
    }

    #[test]
    fn test_resolve_appends_rest_path_and_prefers_cli() {
        let cli = CliArgs {
            url: Some("https://space-5027.app.github.dev".to_string()),
            transport: Some("None".to_string()),
            ..CliArgs::default()
        };
        let config = AgentConfig::resolve(complete_file(), &cli).unwrap();
        assert_eq!(
            config.api_base_url,
            "https://space-5027.app.github.dev/api/AudioDevices"
        );
        assert_eq!(config.transport, TransportMethod::None);

        let config = AgentConfig::resolve(complete_file(), &CliArgs::default()).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:5027/api/AudioDevices");
        assert_eq!(config.transport, TransportMethod::Direct);
        assert_eq!(config.scope, EnumerationScope::RenderAndCapture);
        assert_eq!(config.rabbitmq_uri, DEFAULT_BROKER_URI);
        assert_eq!(config.rabbitmq_queue, DEFAULT_BROKER_QUEUE);
    }

    #[test]
    fn test_broker_settings_from_file() {
        let mut file = complete_file();
        file.transport_method = Some("RabbitMQ".to_string());
        file.rabbitmq_uri = Some(encrypt("amqp://agent:secret@mq:5672/%2f", CONFIG_KEY).unwrap());
        file.rabbitmq_queue = Some("audio".to_string());

        let config = AgentConfig::resolve(file, &CliArgs::default()).unwrap();
        assert_eq!(config.transport, TransportMethod::RabbitMq);
        assert_eq!(config.rabbitmq_uri, "amqp://agent:secret@mq:5672/%2f");
        assert_eq!(config.rabbitmq_queue, "audio");
    }

    #[test]
    fn test_missing_mandatory_value() {
        let mut file = complete_file();
        file.codespace_name = None;
        assert!(matches!(
            AgentConfig::resolve(file, &CliArgs::default()),
            Err(ConfigError::MissingMandatory("codespace_name"))
        ));
    }

    #[test]
    fn test_encrypted_token_is_decrypted() {
        let mut file = complete_file();
        file.universal_token = Some(encrypt("ghp_abc", CONFIG_KEY).unwrap());
        let config = AgentConfig::resolve(file, &CliArgs::default()).unwrap();
        assert_eq!(config.universal_token, "ghp_abc");
    }

    #[test]
    fn test_load_file_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
apiBaseUrl = "http://localhost:5027"
universal_token = "token"
codespace_name = "space"
name_filter = "Jabra"
render_and_capture = false
"#
        )
        .unwrap();

        let loaded = load_file(Some(file.path())).unwrap();
        assert_eq!(loaded.api_base_url.as_deref(), Some("http://localhost:5027"));
        assert_eq!(loaded.name_filter, "Jabra");
        assert!(!loaded.render_and_capture);
        assert!(loaded.transport_method.is_none());

        let config = AgentConfig::resolve(loaded, &CliArgs::default()).unwrap();
        assert_eq!(config.scope, EnumerationScope::RenderOnly);
        assert_eq!(config.transport, TransportMethod::None);
    }

    #[test]
    fn test_load_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            load_file(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "api_base_url = [").unwrap();
        assert!(matches!(
            load_file(Some(&broken)),
            Err(ConfigError::Parse { .. })
        ));
    }
}
