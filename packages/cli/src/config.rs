// ABOUTME: Server configuration loaded from WARDEN_* environment variables
// ABOUTME: Validates values up front so startup fails fast on bad settings

use std::env;
use std::net::IpAddr;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("WARDEN_API_TOKEN must be set to a non-empty value")]
    MissingApiToken,
    #[error("Invalid IP address for {key}: {value}")]
    InvalidAddress { key: &'static str, value: String },
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub api_token: String,
    pub database_url: String,
    pub sandbox_image: String,
    /// Address sandbox ports are published on, probed at and reached at
    pub sandbox_host: IpAddr,
    pub workspace_dir: PathBuf,
    pub mount_docker_socket: bool,
    pub tool_timeout: Duration,
    pub event_buffer: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_token", &"<redacted>")
            .field("database_url", &self.database_url)
            .field("sandbox_image", &self.sandbox_image)
            .field("sandbox_host", &self.sandbox_host)
            .field("workspace_dir", &self.workspace_dir)
            .field("mount_docker_socket", &self.mount_docker_socket)
            .field("tool_timeout", &self.tool_timeout)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = parse_addr(
            "WARDEN_HOST",
            get("WARDEN_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
        )?;

        let port = get("WARDEN_PORT")
            .unwrap_or_else(|| "8000".to_string())
            .trim()
            .parse::<u16>()?;
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let api_token = get("WARDEN_API_TOKEN").ok_or(ConfigError::MissingApiToken)?;

        let database_url = get("WARDEN_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://warden-sessions.db".to_string());

        let sandbox_image =
            get("WARDEN_SANDBOX_IMAGE").unwrap_or_else(|| "warden-sandbox:latest".to_string());

        let sandbox_host = parse_addr(
            "WARDEN_SANDBOX_HOST",
            get("WARDEN_SANDBOX_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
        )?;

        let workspace_dir = match get("WARDEN_WORKSPACE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };

        let mount_docker_socket = match get("WARDEN_MOUNT_DOCKER_SOCKET") {
            Some(value) => parse_bool("WARDEN_MOUNT_DOCKER_SOCKET", value)?,
            None => false,
        };

        let tool_timeout_secs: u64 =
            parse_positive("WARDEN_TOOL_TIMEOUT_SECS", get("WARDEN_TOOL_TIMEOUT_SECS"), 30)?;

        let event_buffer: usize =
            parse_positive("WARDEN_EVENT_BUFFER", get("WARDEN_EVENT_BUFFER"), 256)?;

        Ok(Config {
            host,
            port,
            api_token,
            database_url,
            sandbox_image,
            sandbox_host,
            workspace_dir,
            mount_docker_socket,
            tool_timeout: Duration::from_secs(tool_timeout_secs),
            event_buffer,
        })
    }
}

fn parse_addr(key: &'static str, value: String) -> Result<IpAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidAddress { key, value })
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}

fn parse_positive<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}
