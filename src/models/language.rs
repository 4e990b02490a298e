//! Language partition identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A language code such as `en_US` or `pt_BR`.
///
/// Used as the partition key of the cache, so it doubles as part of a file
/// name and is restricted to ASCII letters, digits, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    /// Parse and validate a language code.
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::validation("language code is empty"));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::validation(format!(
                "language code '{code}' contains invalid characters"
            )));
        }
        Ok(Self(code.to_string()))
    }

    /// Built-in codes that are known to be valid.
    pub(crate) fn from_static(code: &'static str) -> Self {
        Self(code.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Language {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.0
    }
}

impl std::str::FromStr for Language {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
