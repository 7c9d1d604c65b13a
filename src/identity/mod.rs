//! Recipients and rosters
//!
//! A roster is the list of people eligible to receive a submission. Each
//! recipient carries a set of identifying fields; one of them is chosen per
//! run as the token that file and folder names are matched against.

pub mod resolver;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::error::ReconcileError;

pub use resolver::IdentifierResolver;

/// Stable identity of a recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(u64);

impl RecipientId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for RecipientId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for RecipientId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The roster field used as the matching token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierField {
    #[default]
    Username,
    #[value(name = "idnumber")]
    IdNumber,
    Email,
}

impl IdentifierField {
    /// Key of this field in a recipient's field map
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierField::Username => "username",
            IdentifierField::IdNumber => "idnumber",
            IdentifierField::Email => "email",
        }
    }
}

impl fmt::Display for IdentifierField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown identifier field '{0}' (expected username, idnumber or email)")]
pub struct UnknownField(pub String);

impl FromStr for IdentifierField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "username" => Ok(IdentifierField::Username),
            "idnumber" => Ok(IdentifierField::IdNumber),
            "email" => Ok(IdentifierField::Email),
            _ => Err(UnknownField(s.to_string())),
        }
    }
}

/// One eligible recipient.
///
/// In JSON the identifying fields sit beside `id` and `fullName`:
/// `{"id": 3, "fullName": "Ada", "username": "user03", "email": "ada@example.org"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: RecipientId,
    pub full_name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl Recipient {
    pub fn new(id: u64, full_name: impl Into<String>) -> Self {
        Self {
            id: RecipientId(id),
            full_name: full_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, field: IdentifierField, value: impl Into<String>) -> Self {
        self.fields.insert(field.as_str().to_string(), value.into());
        self
    }

    /// Raw value of a field, empty when the recipient does not have it
    pub fn field(&self, field: IdentifierField) -> &str {
        self.fields
            .get(field.as_str())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Source of eligible recipients
pub trait RosterSource {
    fn list_eligible_recipients(&self) -> Result<Vec<Recipient>, ReconcileError>;
}

/// Roster held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    recipients: Vec<Recipient>,
}

impl StaticRoster {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self { recipients }
    }
}

impl RosterSource for StaticRoster {
    fn list_eligible_recipients(&self) -> Result<Vec<Recipient>, ReconcileError> {
        Ok(self.recipients.clone())
    }
}

/// Roster read from a JSON array on disk
#[derive(Debug, Clone)]
pub struct JsonRoster {
    path: PathBuf,
}

impl JsonRoster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RosterSource for JsonRoster {
    fn list_eligible_recipients(&self) -> Result<Vec<Recipient>, ReconcileError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ReconcileError::Roster(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ReconcileError::Roster(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_identifier_field_parsing() {
        assert_eq!("username".parse::<IdentifierField>().unwrap(), IdentifierField::Username);
        assert_eq!(" IDNUMBER ".parse::<IdentifierField>().unwrap(), IdentifierField::IdNumber);
        assert!("phone".parse::<IdentifierField>().is_err());
        assert_eq!(
            serde_json::to_string(&IdentifierField::IdNumber).unwrap(),
            "\"idnumber\""
        );
    }

    #[test]
    fn test_missing_field_is_empty() {
        let r = Recipient::new(1, "Ada").with_field(IdentifierField::Username, "user01");
        assert_eq!(r.field(IdentifierField::Username), "user01");
        assert_eq!(r.field(IdentifierField::Email), "");
    }

    #[test]
    fn test_json_roster() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(
            &path,
            r#"[
                {"id": 1, "fullName": "Ada Lovelace", "username": "user01", "idnumber": "7"},
                {"id": 2, "fullName": "Alan Turing", "email": "alan@example.org"}
            ]"#,
        )
        .unwrap();

        let recipients = JsonRoster::new(&path).list_eligible_recipients().unwrap();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].id, RecipientId::from(1));
        assert_eq!(recipients[0].field(IdentifierField::IdNumber), "7");
        assert_eq!(recipients[1].field(IdentifierField::Email), "alan@example.org");
    }

    #[test]
    fn test_json_roster_missing_file() {
        let dir = tempdir().unwrap();
        let result = JsonRoster::new(dir.path().join("nope.json")).list_eligible_recipients();
        assert!(matches!(result, Err(ReconcileError::Roster(_))));
    }
}
