//! Locale codes
//!
//! Locale codes arrive in several spellings depending on who produced the
//! data (`pt_BR` in hand-written glossaries, `pt-br` from linked-data
//! services, `pt-BR` in configuration). Every input is canonicalized through
//! [`LocaleCode::parse`] so that the same locale always compares equal.
//!
//! Canonical form: language subtag lowercase, script subtag titlecase,
//! region subtag uppercase, joined with `-` (`pt-BR`, `zh-Hant-TW`, `es-419`).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical locale code
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocaleCode(String);

impl LocaleCode {
    /// Parse and canonicalize a locale code
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("empty locale code".to_string()));
        }

        let mut parts = Vec::new();
        for (index, subtag) in trimmed.split(['-', '_']).enumerate() {
            if subtag.is_empty() || !subtag.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::InvalidInput(format!(
                    "invalid locale code '{}'",
                    raw
                )));
            }

            let canonical = if index == 0 {
                if !(2..=3).contains(&subtag.len())
                    || !subtag.chars().all(|c| c.is_ascii_alphabetic())
                {
                    return Err(Error::InvalidInput(format!(
                        "invalid language subtag in locale code '{}'",
                        raw
                    )));
                }
                subtag.to_ascii_lowercase()
            } else if subtag.len() == 4 && subtag.chars().all(|c| c.is_ascii_alphabetic()) {
                // Script: Hant, Latn
                let mut chars = subtag.chars();
                let first = chars.next().map(|c| c.to_ascii_uppercase());
                first
                    .into_iter()
                    .chain(chars.map(|c| c.to_ascii_lowercase()))
                    .collect()
            } else if subtag.len() == 2 {
                subtag.to_ascii_uppercase()
            } else {
                subtag.to_ascii_lowercase()
            };
            parts.push(canonical);
        }

        Ok(Self(parts.join("-")))
    }

    /// Canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary language subtag (`pt` for `pt-BR`)
    pub fn language(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    /// Lowercase form used by linked-data language tags (`pt-br`)
    pub fn to_lowercase_tag(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for LocaleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LocaleCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LocaleCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<LocaleCode> for String {
    fn from(code: LocaleCode) -> Self {
        code.0
    }
}

/// Parse a comma-separated locale list (`fr,en,pt-BR`)
pub fn parse_locale_list(raw: &str) -> Result<Vec<LocaleCode>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(LocaleCode::parse)
        .collect()
}
