//! LDAP connection configuration
//!
//! Configuration types for LDAP/Active Directory connections.

use serde::{Deserialize, Serialize};

use crate::error::{LdapError, LdapResult};

/// Configuration for the LDAP connector.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server hostname or IP address.
    pub host: String,

    /// LDAP server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on plain LDAP connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Base DN (e.g., "dc=example,dc=com").
    pub base_dn: String,

    /// Bind DN for authentication (e.g., "cn=sync,dc=example,dc=com").
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Page size requested through the paged results control.
    #[serde(default = "default_page_size")]
    pub page_size: i32,

    /// Upper bound on pages followed for one search.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> i32 {
    500
}

fn default_max_pages() -> usize {
    10_000
}

impl LdapConfig {
    /// Create a new LDAP config with required fields.
    pub fn new(
        host: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }

    /// Set bind password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Enable SSL (LDAPS).
    #[must_use]
    pub fn with_ssl(mut self) -> Self {
        self.use_ssl = true;
        self.port = 636;
        self
    }

    /// Enable STARTTLS.
    #[must_use]
    pub fn with_starttls(mut self) -> Self {
        self.use_starttls = true;
        self
    }

    /// Set pagination bounds.
    #[must_use]
    pub fn with_paging(mut self, page_size: i32, max_pages: usize) -> Self {
        self.page_size = page_size;
        self.max_pages = max_pages;
        self
    }

    /// Get the LDAP URL.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LdapResult<()> {
        if self.host.trim().is_empty() {
            return Err(LdapError::InvalidConfiguration {
                message: "host is required".to_string(),
            });
        }

        if self.base_dn.trim().is_empty() {
            return Err(LdapError::InvalidConfiguration {
                message: "base_dn is required".to_string(),
            });
        }

        if self.bind_dn.trim().is_empty() {
            return Err(LdapError::InvalidConfiguration {
                message: "bind_dn is required".to_string(),
            });
        }

        if self.use_ssl && self.use_starttls {
            return Err(LdapError::InvalidConfiguration {
                message: "use_ssl and use_starttls are mutually exclusive".to_string(),
            });
        }

        if self.page_size <= 0 {
            return Err(LdapError::InvalidConfiguration {
                message: "page_size must be positive".to_string(),
            });
        }

        if self.max_pages == 0 {
            return Err(LdapError::InvalidConfiguration {
                message: "max_pages must be positive".to_string(),
            });
        }

        Ok(())
    }
}
