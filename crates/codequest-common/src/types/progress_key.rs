//! Progress record identifier
//!
//! A record is keyed by `module_id + "-" + language_id`, e.g. `web-javascript`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

use crate::error::KeyError;
use crate::PROGRESS_KEY_SEPARATOR;

/// Unique identifier of a (module, language) progress record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgressKey {
    module_id: String,
    language_id: String,
}

impl ProgressKey {
    /// Build a key from its parts. Neither part may be empty.
    pub fn new(module_id: impl Into<String>, language_id: impl Into<String>) -> Result<Self, KeyError> {
        let module_id = module_id.into().trim().to_string();
        let language_id = language_id.into().trim().to_string();

        if module_id.is_empty() {
            return Err(KeyError::EmptyModule);
        }
        if language_id.is_empty() {
            return Err(KeyError::EmptyLanguage);
        }
        if language_id.contains(PROGRESS_KEY_SEPARATOR) {
            return Err(KeyError::Malformed(format!(
                "{module_id}{PROGRESS_KEY_SEPARATOR}{language_id}"
            )));
        }

        Ok(Self {
            module_id,
            language_id,
        })
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }
}

impl std::fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.module_id, PROGRESS_KEY_SEPARATOR, self.language_id)
    }
}

impl FromStr for ProgressKey {
    type Err = KeyError;

    /// Module ids may contain the separator, language ids may not,
    /// so the split happens at the last separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, language) = s
            .rsplit_once(PROGRESS_KEY_SEPARATOR)
            .ok_or_else(|| KeyError::Malformed(s.to_string()))?;
        Self::new(module, language)
    }
}

impl Serialize for ProgressKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProgressKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
