//! Discriminator evaluator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::future::try_join_all;
use moldap_ldap::DirectorySearch;
use tracing::{debug, instrument, warn};

use super::config::DiscriminatorConfig;
use super::engine::{CompiledRule, DiscriminatorCandidate, RhaiRuleEngine, RuleEngine};
use super::error::DiscriminatorError;

/// Picks the one directory account that represents an organisational
/// entity out of several candidates.
pub struct Discriminator {
    directory: Arc<dyn DirectorySearch>,
    fields: Vec<String>,
    rules: Vec<Box<dyn CompiledRule>>,
}

impl Discriminator {
    /// Build with the Rhai rule engine.
    pub fn new(
        directory: Arc<dyn DirectorySearch>,
        config: &DiscriminatorConfig,
    ) -> Result<Self, DiscriminatorError> {
        Self::with_engine(directory, config, &RhaiRuleEngine::new())
    }

    /// Build with a custom rule engine. All templates are compiled here, so
    /// broken templates fail at startup rather than per request.
    pub fn with_engine(
        directory: Arc<dyn DirectorySearch>,
        config: &DiscriminatorConfig,
        engine: &dyn RuleEngine,
    ) -> Result<Self, DiscriminatorError> {
        config.validate()?;

        let rules = if config.is_configured() {
            config
                .templates
                .iter()
                .map(|template| engine.compile(template, &config.fields))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            if !config.templates.is_empty() {
                warn!(
                    templates = config.templates.len(),
                    "Discriminator templates configured without fields, ignoring them"
                );
            }
            Vec::new()
        };

        Ok(Self {
            directory,
            fields: config.fields.clone(),
            rules,
        })
    }

    /// Whether discriminator fields are configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Resolve a candidate set of any size.
    ///
    /// No candidates means no winner. Without configured fields a single
    /// candidate wins outright and several are rejected. With fields
    /// configured every non-empty set goes through [`evaluate`](Self::evaluate).
    pub async fn resolve_candidates(
        &self,
        candidates: &BTreeSet<String>,
    ) -> Result<Option<String>, DiscriminatorError> {
        if candidates.is_empty() {
            return Ok(None);
        }
        self.evaluate(candidates).await
    }

    /// Evaluate the rules over a non-empty candidate set.
    ///
    /// Without configured fields the set must hold exactly one candidate,
    /// which is returned as is.
    ///
    /// The first rule matching exactly one candidate decides. A rule
    /// matching several candidates is an ambiguity and stops evaluation.
    /// When no rule matches anything the result is `Ok(None)`.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn evaluate(
        &self,
        candidates: &BTreeSet<String>,
    ) -> Result<Option<String>, DiscriminatorError> {
        if candidates.is_empty() {
            return Err(DiscriminatorError::EmptyCandidateSet);
        }
        if !self.is_configured() {
            return match candidates.len() {
                1 => Ok(candidates.iter().next().cloned()),
                count => Err(DiscriminatorError::UnconfiguredMultipleCandidates { count }),
            };
        }

        let resolved = try_join_all(candidates.iter().map(|dn| self.load_candidate(dn))).await?;

        for (rule_index, rule) in self.rules.iter().enumerate() {
            let mut matches = Vec::new();
            for candidate in &resolved {
                if rule.matches(candidate)? {
                    matches.push(candidate.dn.clone());
                }
            }

            match matches.len() {
                0 => continue,
                1 => {
                    debug!(rule_index, winner = %matches[0], "Discriminator rule selected candidate");
                    return Ok(matches.pop());
                }
                _ => {
                    warn!(
                        rule_index,
                        template = %rule.template(),
                        matches = ?matches,
                        "Discriminator rule matched several candidates"
                    );
                    return Err(DiscriminatorError::Ambiguous {
                        rule_index,
                        matches,
                    });
                }
            }
        }

        debug!("No discriminator rule matched any candidate");
        Ok(None)
    }

    /// Fetch the configured attributes of one candidate.
    ///
    /// Multi-valued and missing attributes both resolve to `None`.
    async fn load_candidate(&self, dn: &str) -> Result<DiscriminatorCandidate, DiscriminatorError> {
        let unavailable = |reason: String| DiscriminatorError::CandidateUnavailable {
            dn: dn.to_string(),
            reason,
        };

        let entry = self
            .directory
            .read_object(dn, &self.fields)
            .await
            .map_err(|e| unavailable(e.to_string()))?
            .ok_or_else(|| unavailable("object not found".to_string()))?;

        let attributes: BTreeMap<String, Option<String>> = self
            .fields
            .iter()
            .map(|field| (field.clone(), entry.single_value(field).map(str::to_string)))
            .collect();

        Ok(DiscriminatorCandidate {
            dn: dn.to_string(),
            attributes,
        })
    }
}

impl std::fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discriminator")
            .field("fields", &self.fields)
            .field(
                "rules",
                &self.rules.iter().map(|r| r.template()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
