//! Strongly-typed ID types for CRM entities.
//!
//! Umsatz.io issues opaque string identifiers. Wrapping them keeps a contact
//! id from being passed where a webhook id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to generate a strongly-typed wrapper around a CRM-issued id.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an id string without validation.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the id and returns the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        reason: "id is empty".to_string(),
                    });
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Identifier of a CRM contact.
    ContactId
);

define_id!(
    /// Identifier of a CRM deal.
    DealId
);

define_id!(
    /// Identifier of a note attached to a contact or deal.
    NoteId
);

define_id!(
    /// Identifier of a registered webhook.
    WebhookId
);

define_id!(
    /// Identifier of a custom field on a contact or deal card.
    FieldId
);

define_id!(
    /// Identifier of a saved CRM filter group.
    FilterGroupId
);

define_id!(
    /// Identifier of a deal pipeline.
    PipelineId
);

define_id!(
    /// Identifier of a stage within a pipeline.
    StageId
);

define_id!(
    /// Identifier of a lead form.
    FormId
);
