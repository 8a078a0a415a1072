//! # LDAP Directory Client
//!
//! Directory-side building blocks for synchronising an LDAP or Active
//! Directory tree with the MO organisation system.
//!
//! ## Features
//!
//! - Lazily established, cached LDAP v3 connection (LDAPS and STARTTLS)
//! - Paged subtree search following the RFC 2696 cookie, with a page cap
//! - Base-scope single object reads for attribute resolution
//! - Generalized Time codec for change-timestamp filters
//! - Entity identifier decoding (`entryUUID` text and `objectGUID` binary)
//!
//! ## Example
//!
//! ```ignore
//! use moldap_ldap::{changed_since_filter, DirectorySearch, LdapConfig, LdapConnector};
//!
//! let config = LdapConfig::new("ldap.example.com", "dc=example,dc=com", "cn=sync,dc=example,dc=com")
//!     .with_password("secret")
//!     .with_ssl();
//!
//! let connector = LdapConnector::new(config)?;
//! let filter = changed_since_filter("modifyTimestamp", &last_seen_at);
//! let entries = connector
//!     .search_paged("ou=people,dc=example,dc=com", &filter, &["entryUUID".into()])
//!     .await?;
//! ```

pub mod config;
pub mod connector;
pub mod entry;
pub mod error;
pub mod filter;
pub mod timestamp;

pub use config::LdapConfig;
pub use connector::{DirectorySearch, LdapConnector};
pub use entry::DirectoryEntry;
pub use error::{LdapError, LdapResult};
pub use filter::{changed_since_filter, escape_filter_value};
pub use timestamp::{
    decode_generalized_time, decode_to_utc, encode_generalized_time, truncate_to_second,
};
