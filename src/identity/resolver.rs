//! Token to recipient resolution
//!
//! Built once per run from the roster and then only read. The mapping is
//! injective: construction fails if two recipients share a non-empty token.

use std::collections::HashMap;

use super::{IdentifierField, Recipient, RecipientId};
use crate::error::ReconcileError;
use crate::store::StagedItem;

/// Normalized form of a roster value
fn normalize(value: &str) -> &str {
    value.trim()
}

#[derive(Debug, Clone)]
pub struct IdentifierResolver {
    field: IdentifierField,
    recipients: Vec<Recipient>,
    by_token: HashMap<String, usize>,
    by_id: HashMap<RecipientId, usize>,
}

impl IdentifierResolver {
    /// Build the mapping for `field`.
    ///
    /// Recipients with an empty value are kept for reverse lookups but can
    /// never be matched.
    pub fn build(recipients: Vec<Recipient>, field: IdentifierField) -> Result<Self, ReconcileError> {
        let mut by_token = HashMap::new();
        let mut by_id = HashMap::new();

        for (index, recipient) in recipients.iter().enumerate() {
            by_id.insert(recipient.id, index);

            let token = normalize(recipient.field(field));
            if token.is_empty() {
                continue;
            }
            if by_token.insert(token.to_string(), index).is_some() {
                return Err(ReconcileError::AmbiguousIdentifier {
                    field: field.to_string(),
                    value: token.to_string(),
                });
            }
        }

        tracing::debug!(
            "Identifier map built on {} with {} of {} recipients",
            field,
            by_token.len(),
            recipients.len()
        );

        Ok(Self {
            field,
            recipients,
            by_token,
            by_id,
        })
    }

    pub fn field(&self) -> IdentifierField {
        self.field
    }

    /// Number of recipients that can be matched
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Recipient for a token, if any
    pub fn lookup(&self, token: &str) -> Option<&Recipient> {
        if token.is_empty() {
            return None;
        }
        self.by_token.get(token).map(|&i| &self.recipients[i])
    }

    /// Like `lookup`, but an unknown token is an error
    pub fn lookup_or_fail(&self, token: &str) -> Result<&Recipient, ReconcileError> {
        self.lookup(token)
            .ok_or_else(|| ReconcileError::UnknownIdentifier {
                token: token.to_string(),
            })
    }

    /// Recipient by id
    pub fn recipient(&self, id: RecipientId) -> Option<&Recipient> {
        self.by_id.get(&id).map(|&i| &self.recipients[i])
    }

    /// The normalized token of a recipient (empty if it has none)
    pub fn token_for(&self, id: RecipientId) -> &str {
        self.recipient(id)
            .map(|r| normalize(r.field(self.field)))
            .unwrap_or("")
    }

    /// Recipient matched by a staged item's name
    pub fn resolve(&self, item: &StagedItem) -> Option<&Recipient> {
        self.lookup(effective_token(item))
    }
}

/// The token a staged item is matched by: a directory's name, or a file's
/// name without its extension
pub fn effective_token(item: &StagedItem) -> &str {
    if item.is_directory {
        &item.name
    } else {
        item.stem()
    }
}
