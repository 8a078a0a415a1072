//! LDAP connector implementation
//!
//! Owns the directory connection and implements [`DirectorySearch`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::controls::{Control, ControlType, PagedResults, RawControl};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchResult};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::LdapConfig;
use crate::entry::DirectoryEntry;
use crate::error::{LdapError, LdapResult};

/// `noSuchObject` result code.
const RC_NO_SUCH_OBJECT: u32 = 32;

/// `invalidCredentials` result code.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Directory operations needed by the change poller and the discriminator.
#[async_trait]
pub trait DirectorySearch: Send + Sync {
    /// Subtree search below `base`, following paged results until exhausted.
    ///
    /// A missing search base yields an empty result rather than an error.
    async fn search_paged(
        &self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> LdapResult<Vec<DirectoryEntry>>;

    /// Base-scope read of exactly one object.
    ///
    /// Returns `None` if the object does not exist.
    async fn read_object(
        &self,
        dn: &str,
        attributes: &[String],
    ) -> LdapResult<Option<DirectoryEntry>>;
}

/// LDAP connector for LDAP/Active Directory.
pub struct LdapConnector {
    /// Configuration.
    config: LdapConfig,

    /// Cached LDAP connection (lazily initialized).
    connection: Arc<RwLock<Option<Ldap>>>,

    /// Whether the connector has been disposed.
    disposed: Arc<RwLock<bool>>,
}

impl LdapConnector {
    /// Create a new LDAP connector with the given configuration.
    pub fn new(config: LdapConfig) -> LdapResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            disposed: Arc::new(RwLock::new(false)),
        })
    }

    /// The configuration this connector was built from.
    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Get an LDAP connection, creating one if necessary.
    async fn get_connection(&self) -> LdapResult<Ldap> {
        if *self.disposed.read().await {
            return Err(LdapError::Disposed);
        }

        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let conn = self.create_connection().await?;

        {
            let mut conn_guard = self.connection.write().await;
            *conn_guard = Some(conn.clone());
        }

        Ok(conn)
    }

    /// Drop the cached connection so the next call reconnects.
    async fn invalidate_connection(&self) {
        if self.connection.write().await.take().is_some() {
            debug!("Discarded cached LDAP connection");
        }
    }

    /// Create a new LDAP connection.
    async fn create_connection(&self) -> LdapResult<Ldap> {
        let url = self.config.url();

        debug!(url = %url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                LdapError::connection_failed_with_source(
                    format!("Failed to connect to LDAP server at {url}"),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let bind_dn = &self.config.bind_dn;
        let bind_password = self.config.bind_password.as_deref().unwrap_or("");

        debug!(bind_dn = %bind_dn, "Performing LDAP bind");

        let result = ldap
            .simple_bind(bind_dn, bind_password)
            .await
            .map_err(|e| {
                LdapError::connection_failed_with_source(format!("LDAP bind failed for {bind_dn}"), e)
            })?;

        if result.rc != 0 {
            if result.rc == RC_INVALID_CREDENTIALS {
                return Err(LdapError::AuthenticationFailed);
            }
            return Err(LdapError::connection_failed(format!(
                "LDAP bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(host = %self.config.host, "LDAP connection established successfully");

        Ok(ldap)
    }

    /// Close the connection and refuse further use.
    pub async fn dispose(&self) -> LdapResult<()> {
        *self.disposed.write().await = true;

        let mut conn_guard = self.connection.write().await;
        if let Some(mut ldap) = conn_guard.take() {
            if let Err(e) = ldap.unbind().await {
                warn!(error = %e, "Error during LDAP unbind");
            }
        }

        info!("LDAP connector disposed");
        Ok(())
    }

    async fn fetch_pages(
        &self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> LdapResult<Vec<DirectoryEntry>> {
        let mut ldap = self.get_connection().await?;
        let mut entries = Vec::new();
        let mut cookie: Vec<u8> = Vec::new();

        for page in 0..self.config.max_pages {
            let SearchResult(results, outcome) = ldap
                .with_controls(vec![RawControl::from(PagedResults {
                    size: self.config.page_size,
                    cookie: cookie.clone(),
                })])
                .search(base, Scope::Subtree, filter, attributes.to_vec())
                .await
                .map_err(|e| LdapError::operation_failed_with_source("LDAP search failed", e))?;

            if outcome.rc == RC_NO_SUCH_OBJECT {
                debug!(base = %base, "Search base does not exist, returning no entries");
                return Ok(Vec::new());
            }

            let outcome = outcome.success().map_err(|e| {
                LdapError::operation_failed_with_source(format!("LDAP search below {base} failed"), e)
            })?;

            entries.extend(
                results
                    .into_iter()
                    .map(SearchEntry::construct)
                    .map(DirectoryEntry::from),
            );

            cookie = outcome
                .ctrls
                .iter()
                .find_map(|Control(kind, raw)| match kind {
                    Some(ControlType::PagedResults) => Some(raw.parse::<PagedResults>().cookie),
                    _ => None,
                })
                .unwrap_or_default();

            if cookie.is_empty() {
                debug!(base = %base, pages = page + 1, found = entries.len(), "Paged search exhausted");
                return Ok(entries);
            }
        }

        warn!(
            base = %base,
            max_pages = self.config.max_pages,
            found = entries.len(),
            "Paged search hit the page limit, returning partial result"
        );
        Ok(entries)
    }

    async fn fetch_object(
        &self,
        dn: &str,
        attributes: &[String],
    ) -> LdapResult<Option<DirectoryEntry>> {
        let mut ldap = self.get_connection().await?;

        let SearchResult(results, outcome) = ldap
            .search(dn, Scope::Base, "(objectClass=*)", attributes.to_vec())
            .await
            .map_err(|e| LdapError::operation_failed_with_source("LDAP read failed", e))?;

        if outcome.rc == RC_NO_SUCH_OBJECT {
            return Ok(None);
        }

        outcome.success().map_err(|e| {
            LdapError::operation_failed_with_source(format!("LDAP read of {dn} failed"), e)
        })?;

        Ok(results
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .map(DirectoryEntry::from))
    }
}

#[async_trait]
impl DirectorySearch for LdapConnector {
    #[instrument(skip(self, attributes))]
    async fn search_paged(
        &self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> LdapResult<Vec<DirectoryEntry>> {
        let result = self.fetch_pages(base, filter, attributes).await;
        if matches!(result, Err(LdapError::OperationFailed { .. } | LdapError::ConnectionFailed { .. })) {
            self.invalidate_connection().await;
        }
        result
    }

    #[instrument(skip(self, attributes))]
    async fn read_object(
        &self,
        dn: &str,
        attributes: &[String],
    ) -> LdapResult<Option<DirectoryEntry>> {
        let result = self.fetch_object(dn, attributes).await;
        if matches!(result, Err(LdapError::OperationFailed { .. } | LdapError::ConnectionFailed { .. })) {
            self.invalidate_connection().await;
        }
        result
    }
}

impl std::fmt::Debug for LdapConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConnector")
            .field("config", &self.config)
            .finish()
    }
}
