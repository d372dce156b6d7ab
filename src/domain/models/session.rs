//! Session keys for agent conversation continuity.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::provider::ProviderKind;

/// Stable identity of an agent conversation.
///
/// `persona` alone, or `persona:provider` when the movement names a
/// provider, so the same persona under two providers never shares a
/// session. This is the only place the key is derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(persona: &str, movement_provider: Option<ProviderKind>) -> Self {
        match movement_provider {
            Some(provider) => Self(format!("{persona}:{provider}")),
            None => Self(persona.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-system safe form of the key.
    pub fn file_stem(&self) -> String {
        self.0.replace(':', "__").replace(['/', '\\'], "_")
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
