//! Service configuration loaded from environment variables.
//!
//! Required variables must be present and valid, or the process exits with
//! a clear message before anything connects.

use std::env::VarError;
use std::str::FromStr;
use std::time::Duration;

use moldap_events::KafkaConfig;
use moldap_ldap::LdapConfig;
use moldap_sync::{
    DiscriminatorConfig, ManagerSettings, PollErrorPolicy, PollerSettings, DEFAULT_ROUTING_KEY,
};

const DEFAULT_LOG_FILTER: &str = "info,moldap=debug";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Everything the service needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub ldap: LdapConfig,
    /// Scopes to poll, one task each.
    pub search_bases: Vec<String>,
    pub poller: PollerSettings,
    pub poll_interval: Duration,
    pub error_policy: PollErrorPolicy,
    pub routing_key: String,
    /// Present when `KAFKA_BOOTSTRAP_SERVERS` is set.
    pub kafka: Option<KafkaConfig>,
    pub discriminator: DiscriminatorConfig,
    pub healthcheck_interval: Duration,
    pub log_filter: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let required = |var: &str| reader(var).map_err(|_| ConfigError::MissingVar(var.into()));

        let database_url = required("DATABASE_URL")?;
        let database_max_connections = parse_or(&reader, "DATABASE_MAX_CONNECTIONS", 5u32)?;

        let ldap = ldap_config(&reader)?;

        let search_bases = match reader("LDAP_SEARCH_BASES") {
            Ok(raw) => json_list(&raw, "LDAP_SEARCH_BASES")?,
            Err(_) => vec![ldap.base_dn.clone()],
        };
        if search_bases.is_empty() || search_bases.iter().any(|b| b.trim().is_empty()) {
            return Err(ConfigError::InvalidValue(
                "LDAP_SEARCH_BASES".into(),
                "at least one non-empty search base is required".into(),
            ));
        }

        let defaults = PollerSettings::default();
        let poller = PollerSettings {
            id_attribute: reader("LDAP_ID_ATTRIBUTE").unwrap_or(defaults.id_attribute),
            timestamp_attribute: reader("LDAP_TIMESTAMP_ATTRIBUTE")
                .unwrap_or(defaults.timestamp_attribute),
        };

        let poll_interval_secs = parse_or(&reader, "POLL_INTERVAL_SECS", 5u64)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_INTERVAL_SECS".into(),
                "must be positive".into(),
            ));
        }

        let error_policy = match reader("POLL_ERROR_POLICY") {
            Ok(raw) => PollErrorPolicy::from_str(&raw)
                .map_err(|e| ConfigError::InvalidValue("POLL_ERROR_POLICY".into(), e))?,
            Err(_) => PollErrorPolicy::default(),
        };

        let routing_key =
            reader("EVENT_ROUTING_KEY").unwrap_or_else(|_| DEFAULT_ROUTING_KEY.to_string());

        let kafka = match reader("KAFKA_BOOTSTRAP_SERVERS") {
            Ok(_) => Some(
                KafkaConfig::from_reader(&reader)
                    .map_err(|e| ConfigError::InvalidValue("KAFKA_*".into(), e.to_string()))?,
            ),
            Err(_) => None,
        };

        let discriminator = DiscriminatorConfig::new(
            optional_json_list(&reader, "DISCRIMINATOR_FIELDS")?,
            optional_json_list(&reader, "DISCRIMINATOR_TEMPLATES")?,
        );
        discriminator.validate().map_err(|e| {
            ConfigError::InvalidValue("DISCRIMINATOR_FIELDS".into(), e.to_string())
        })?;

        let healthcheck_interval_secs = parse_or(&reader, "HEALTHCHECK_INTERVAL_SECS", 30u64)?;

        let log_filter = reader("LOG_FILTER").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            database_url,
            database_max_connections,
            ldap,
            search_bases,
            poller,
            poll_interval: Duration::from_secs(poll_interval_secs),
            error_policy,
            routing_key,
            kafka,
            discriminator,
            healthcheck_interval: Duration::from_secs(healthcheck_interval_secs.max(1)),
            log_filter,
        })
    }

    /// Settings for the poller manager.
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            scopes: self.search_bases.clone(),
            poll_interval: self.poll_interval,
            error_policy: self.error_policy,
        }
    }
}

fn ldap_config<F>(reader: &F) -> Result<LdapConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let required = |var: &str| reader(var).map_err(|_| ConfigError::MissingVar(var.into()));

    let mut config = LdapConfig::new(
        required("LDAP_HOST")?,
        required("LDAP_BASE_DN")?,
        required("LDAP_BIND_DN")?,
    );

    if parse_or(reader, "LDAP_USE_SSL", false)? {
        config = config.with_ssl();
    }
    if parse_or(reader, "LDAP_USE_STARTTLS", false)? {
        config = config.with_starttls();
    }
    if let Ok(password) = reader("LDAP_BIND_PASSWORD") {
        config = config.with_password(password);
    }
    config.port = parse_or(reader, "LDAP_PORT", config.port)?;
    config.connect_timeout_secs =
        parse_or(reader, "LDAP_CONNECT_TIMEOUT_SECS", config.connect_timeout_secs)?;
    let page_size = parse_or(reader, "LDAP_PAGE_SIZE", config.page_size)?;
    let max_pages = parse_or(reader, "LDAP_MAX_PAGES", config.max_pages)?;
    config = config.with_paging(page_size, max_pages);

    config
        .validate()
        .map_err(|e| ConfigError::InvalidValue("LDAP_*".into(), e.to_string()))?;
    Ok(config)
}

/// Parse `var` if set, else return `default`.
fn parse_or<F, T>(reader: &F, var: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match reader(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(var.into(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn json_list(raw: &str, var: &str) -> Result<Vec<String>, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::InvalidValue(var.into(), e.to_string()))
}

fn optional_json_list<F>(reader: &F, var: &str) -> Result<Vec<String>, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match reader(var) {
        Ok(raw) => json_list(&raw, var),
        Err(_) => Ok(Vec::new()),
    }
}
