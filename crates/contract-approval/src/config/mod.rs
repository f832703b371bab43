use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::workflows::contract_approval::ApprovalPolicyConfig;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub workflow: WorkflowConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let storage = StorageConfig {
            backend: StorageBackend::parse(
                &env::var("APP_STORAGE").unwrap_or_else(|_| "memory".to_string()),
            )?,
            sled_path: env::var("APP_SLED_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/approvals.sled")),
            contracts_path: env::var("APP_CONTRACTS_PATH").ok().map(PathBuf::from),
        };

        let workflow = WorkflowConfig::from_env()?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            storage,
            workflow,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Which persistence adapter backs the approval repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Sled,
}

impl StorageBackend {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "memory" | "in-memory" => Ok(Self::Memory),
            "sled" => Ok(Self::Sled),
            other => Err(ConfigError::InvalidStorage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub sled_path: PathBuf,
    pub contracts_path: Option<PathBuf>,
}

/// Approval chain policy and query limits.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub policy: ApprovalPolicyConfig,
    pub max_page_size: u32,
}

impl WorkflowConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = ApprovalPolicyConfig::default();

        let base_chain = match env::var("APPROVAL_BASE_CHAIN") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|role| !role.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => defaults.base_chain,
        };

        let escalation_threshold = match env::var("APPROVAL_ESCALATION_THRESHOLD") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber("APPROVAL_ESCALATION_THRESHOLD"))?,
            Err(_) => defaults.escalation_threshold,
        };

        let max_page_size = match env::var("APPROVAL_MAX_PAGE_SIZE") {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or(ConfigError::InvalidNumber("APPROVAL_MAX_PAGE_SIZE"))?,
            Err(_) => 100,
        };

        Ok(Self {
            policy: ApprovalPolicyConfig {
                base_chain,
                escalation_role: env::var("APPROVAL_ESCALATION_ROLE")
                    .unwrap_or(defaults.escalation_role),
                escalation_threshold,
                admin_role: env::var("APPROVAL_ADMIN_ROLE").unwrap_or(defaults.admin_role),
            },
            max_page_size,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidStorage(String),
    InvalidNumber(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidStorage(value) => {
                write!(f, "APP_STORAGE must be 'memory' or 'sled', found '{value}'")
            }
            ConfigError::InvalidNumber(key) => write!(f, "{key} must be a positive integer"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidStorage(_)
            | ConfigError::InvalidNumber(_) => None,
        }
    }
}
