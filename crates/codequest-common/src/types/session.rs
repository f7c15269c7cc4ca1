//! Learner session identifier

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Opaque code chosen at onboarding and presented on every call
///
/// Only presence is checked; the code's strength is the onboarding
/// collaborator's concern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate a raw code, trimming surrounding whitespace
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, SessionError> {
        let code = raw.as_ref().trim();
        if code.is_empty() {
            return Err(SessionError::Missing);
        }
        Ok(Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims() {
        let id = SessionId::parse("  QUEST42 ").unwrap();
        assert_eq!(id.as_str(), "QUEST42");
    }

    #[test]
    fn test_empty_code_is_missing() {
        assert_eq!(SessionId::parse(""), Err(SessionError::Missing));
        assert_eq!(SessionId::parse("   \t"), Err(SessionError::Missing));
    }

    #[test]
    fn test_deserialize_validates() {
        let id: SessionId = serde_json::from_str("\" QUEST42\"").unwrap();
        assert_eq!(id.as_str(), "QUEST42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"QUEST42\"");

        assert!(serde_json::from_str::<SessionId>("\"  \"").is_err());
        assert!(serde_json::from_str::<SessionId>("\"\"").is_err());
    }
}
