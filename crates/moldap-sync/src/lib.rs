//! # moldap-sync
//!
//! Change detection and account discrimination for synchronising an LDAP
//! or Active Directory tree with the MO organisation system.
//!
//! ## Features
//!
//! - **Watermarks**: per-scope "last seen" timestamp plus same-second ties,
//!   persisted in Postgres under row locks
//! - **Change polling**: paged `>=` searches on the directory change
//!   timestamp, folded into identifiers and a watermark advance
//! - **Event emission**: one message per changed entity, published before
//!   the watermark moves (at-least-once)
//! - **Lifecycle**: one task per scope with start, stop and health
//! - **Discrimination**: prioritised Rhai rules picking one account out of
//!   several candidates, with explicit ambiguity
//!
//! ## Example
//!
//! ```rust,ignore
//! use moldap_sync::{ChangePoller, EventEmitter, ManagerSettings, PgWatermarkStore, PollerManager};
//!
//! let store = Arc::new(PgWatermarkStore::new(pool));
//! store.run_migrations().await?;
//!
//! let manager = PollerManager::new(store, poller, emitter, settings);
//! manager.start().await?;
//! // ...
//! manager.stop().await;
//! ```

pub mod cycle;
pub mod discriminator;
pub mod emitter;
pub mod error;
pub mod manager;
pub mod poller;
pub mod watermark;

pub use cycle::{run_poll_cycle, PollCycleReport};
pub use discriminator::{Discriminator, DiscriminatorConfig, DiscriminatorError};
pub use emitter::{EventEmitter, DEFAULT_ROUTING_KEY};
pub use error::{SyncError, SyncResult};
pub use manager::{ManagerSettings, ManagerState, PollErrorPolicy, PollerManager};
pub use poller::{ChangeEvent, ChangePoller, PollOutcome, PollerSettings};
pub use watermark::{
    sentinel_epoch, MemoryWatermarkStore, PgWatermarkStore, ScopeWatermark, WatermarkLease,
    WatermarkStore,
};
