//! Buyer/seller identity, consumed by the core by reference only.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a buyer or seller profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ProfileId(pub Uuid);

impl ProfileId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        ProfileId(Uuid::new_v4())
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for ProfileId {
    fn from(uuid: Uuid) -> Self {
        ProfileId(uuid)
    }
}

impl std::ops::Deref for ProfileId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Declared marketplace role of a profile.
///
/// `Both` is stored and accepted but drives no authorization decisions in the
/// reservation engine; authorization is always derived from the buyer/seller
/// references captured on the request row itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum ProfileRole {
    Buyer,
    Seller,
    Both,
}

/// Identity and contact information, read-only from the core's perspective.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Profile {
    pub id: ProfileId,
    pub display_name: String,
    /// Opaque destination token for the notification channel, if any.
    pub contact_token: Option<String>,
    pub role: ProfileRole,
}
