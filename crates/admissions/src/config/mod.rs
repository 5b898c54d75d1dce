use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Deployment stage; picks defaults for logging and the bind address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }

    fn default_log_level(self) -> &'static str {
        match self {
            AppEnvironment::Development => "debug",
            AppEnvironment::Test => "warn",
            AppEnvironment::Production => "info",
        }
    }

    fn default_host(self) -> &'static str {
        match self {
            AppEnvironment::Production => "0.0.0.0",
            _ => "127.0.0.1",
        }
    }
}

/// Everything the service reads from the environment (and `.env`) at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub admissions: AdmissionsConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = env::var("APP_ENV")
            .map(|value| AppEnvironment::parse(&value))
            .unwrap_or(AppEnvironment::Development);

        let port = match env::var("APP_PORT") {
            Ok(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort { value })?,
            Err(_) => 3000,
        };
        let server = ServerConfig {
            host: env::var("APP_HOST").unwrap_or_else(|_| environment.default_host().to_string()),
            port,
        };

        let telemetry = TelemetryConfig {
            log_level: env::var("APP_LOG_LEVEL")
                .unwrap_or_else(|_| environment.default_log_level().to_string()),
            ansi: environment == AppEnvironment::Development,
        };

        Ok(Self {
            environment,
            server,
            telemetry,
            admissions: AdmissionsConfig::from_env()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = if self.host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.host
                .parse()
                .map_err(|source| ConfigError::InvalidHost {
                    value: self.host.clone(),
                    source,
                })?
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Colored output; only enabled for local development.
    pub ansi: bool,
}

/// Workflow policy and storage tuning for the admission engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionsConfig {
    /// Prefix shared by temporary ids and student codes, e.g. `SCH`.
    pub school_prefix: String,
    /// Whether `scheduleInterview` is legal straight from `Applied`.
    pub interview_from_applied: bool,
    pub operation_timeout: Duration,
    pub conflict_retries: u32,
    pub lock_timeout: Duration,
    pub document_base_url: String,
}

impl Default for AdmissionsConfig {
    fn default() -> Self {
        Self {
            school_prefix: "SCH".to_string(),
            interview_from_applied: true,
            operation_timeout: Duration::from_millis(5_000),
            conflict_retries: 3,
            lock_timeout: Duration::from_millis(2_000),
            document_base_url: "https://documents.local".to_string(),
        }
    }
}

impl AdmissionsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let school_prefix = match env::var("ADMISSIONS_SCHOOL_PREFIX") {
            Ok(value) => validate_prefix(value.trim())?,
            Err(_) => defaults.school_prefix,
        };

        let interview_from_applied = match env::var("ADMISSIONS_INTERVIEW_FROM_APPLIED") {
            Ok(value) => parse_flag("ADMISSIONS_INTERVIEW_FROM_APPLIED", &value)?,
            Err(_) => defaults.interview_from_applied,
        };

        let operation_timeout = millis_var("ADMISSIONS_OPERATION_TIMEOUT_MS")?
            .unwrap_or(defaults.operation_timeout);
        let lock_timeout =
            millis_var("ADMISSIONS_LOCK_TIMEOUT_MS")?.unwrap_or(defaults.lock_timeout);

        let conflict_retries = match env::var("ADMISSIONS_CONFLICT_RETRIES") {
            Ok(value) => value
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNumber {
                    name: "ADMISSIONS_CONFLICT_RETRIES",
                })?,
            Err(_) => defaults.conflict_retries,
        };

        let document_base_url = env::var("ADMISSIONS_DOCUMENT_BASE_URL")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or(defaults.document_base_url);

        Ok(Self {
            school_prefix,
            interview_from_applied,
            operation_timeout,
            conflict_retries,
            lock_timeout,
            document_base_url,
        })
    }
}

/// Prefixes end up verbatim in codes, so only `[A-Z0-9]+` is accepted.
pub fn validate_prefix(value: &str) -> Result<String, ConfigError> {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        Ok(value.to_string())
    } else {
        Err(ConfigError::InvalidPrefix {
            value: value.to_string(),
        })
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag { name }),
    }
}

fn millis_var(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidNumber { name }),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16 (got '{value}')")]
    InvalidPort { value: String },
    #[error("APP_HOST must be `localhost` or an IP address (got '{value}')")]
    InvalidHost {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("ADMISSIONS_SCHOOL_PREFIX must be uppercase letters or digits (got '{value}')")]
    InvalidPrefix { value: String },
    #[error("{name} must be a non-negative integer")]
    InvalidNumber { name: &'static str },
    #[error("{name} must be true or false")]
    InvalidFlag { name: &'static str },
}
