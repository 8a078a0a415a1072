//! Account discrimination.
//!
//! When several directory accounts correlate to one organisational entity,
//! the discriminator fetches a few configured attributes of each and runs
//! prioritised boolean rules over them to pick the authoritative account.

mod config;
mod engine;
mod error;
mod evaluator;

pub use config::DiscriminatorConfig;
pub use engine::{
    strip_delimiters, CompiledRule, DiscriminatorCandidate, RhaiRuleConfig, RhaiRuleEngine,
    RuleEngine,
};
pub use error::DiscriminatorError;
pub use evaluator::Discriminator;
