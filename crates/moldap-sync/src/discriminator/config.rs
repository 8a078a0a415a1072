//! Discriminator configuration.

use serde::{Deserialize, Serialize};

use super::error::DiscriminatorError;

/// Variable names rule templates always have; fields may not shadow them.
pub(crate) const RESERVED_VARIABLES: [&str; 2] = ["dn", "value"];

/// Attributes to fetch per candidate and the rules that rank candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscriminatorConfig {
    /// Attribute names fetched for every candidate.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Boolean rule templates, most important first.
    #[serde(default)]
    pub templates: Vec<String>,
}

impl DiscriminatorConfig {
    pub fn new(fields: Vec<String>, templates: Vec<String>) -> Self {
        Self { fields, templates }
    }

    /// Whether candidates are ranked at all.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Reject configurations that cannot be evaluated.
    pub fn validate(&self) -> Result<(), DiscriminatorError> {
        if self.is_configured() && self.templates.is_empty() {
            return Err(DiscriminatorError::MissingTemplates);
        }

        for (index, name) in self.fields.iter().enumerate() {
            if !is_identifier(name) {
                return Err(DiscriminatorError::InvalidField {
                    name: name.clone(),
                    reason: "must start with a letter or '_' and contain only letters, digits and '_'"
                        .to_string(),
                });
            }
            if RESERVED_VARIABLES.contains(&name.as_str()) {
                return Err(DiscriminatorError::InvalidField {
                    name: name.clone(),
                    reason: "name is reserved".to_string(),
                });
            }
            if self.fields[..index].contains(name) {
                return Err(DiscriminatorError::InvalidField {
                    name: name.clone(),
                    reason: "configured more than once".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
