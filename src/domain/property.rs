//! Property listings and their status vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::profile::ProfileId;

/// Unique identifier for a property listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PropertyId(pub Uuid);

impl PropertyId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        PropertyId(Uuid::new_v4())
    }
}

impl Default for PropertyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for PropertyId {
    fn from(uuid: Uuid) -> Self {
        PropertyId(uuid)
    }
}

impl std::ops::Deref for PropertyId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Lifecycle status of a property listing.
///
/// Exactly one status holds at any time, and only the reservation engine
/// mutates it. `Withdrawn` is a reserved seller-side terminal state: the
/// engine defines no transition into or out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum PropertyStatus {
    /// Open for reservation requests.
    Available,
    /// Held by exactly one pending request.
    Requested,
    /// Seller accepted a request; terminal.
    Sold,
    /// Seller pulled the listing; reserved, terminal.
    Withdrawn,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Available => "available",
            PropertyStatus::Requested => "requested",
            PropertyStatus::Sold => "sold",
            PropertyStatus::Withdrawn => "withdrawn",
        }
    }
}

impl std::fmt::Display for PropertyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A property listing row.
///
/// The descriptive fields (price, address, counts, image URL) are carried for
/// the surrounding application; only `status` and `seller_id` participate in
/// engine decisions.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Property {
    pub id: PropertyId,
    pub seller_id: ProfileId,
    pub price: i64,
    pub address: String,
    pub bedrooms: i32,
    pub bathrooms: i32,
    /// Opaque reference into the application's blob store.
    pub image_url: Option<String>,
    pub status: PropertyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for listing a new property. Status is always `available` at birth.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyInput {
    pub seller_id: ProfileId,
    pub price: i64,
    pub address: String,
    pub bedrooms: i32,
    pub bathrooms: i32,
    pub image_url: Option<String>,
}
