//! Reservation requests and the lifecycle state machine.
//!
//! A request is born `pending` (never any other way: the only insertion path
//! is the engine's `create_request`), and leaves `pending` exactly once:
//!
//! ```text
//! (none) ──create_request──▶ pending ──respond(accept)──▶ accepted  [property: sold]
//!                               │    ──respond(decline)─▶ declined  [property: available]
//!                               └────cancel_request─────▶ cancelled [property: available]
//! ```
//!
//! `accepted`, `declined` and `cancelled` are terminal: no request is ever
//! revived. The legality check lives on [`RequestStatus::can_transition_to`]
//! so the engine and its tests share one definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::profile::ProfileId;
use super::property::{PropertyId, PropertyStatus};

/// Unique identifier for a reservation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        RequestId(uuid)
    }
}

impl std::ops::Deref for RequestId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Lifecycle status of a reservation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum RequestStatus {
    /// Waiting for the seller's decision; holds the property reservation.
    Pending,
    /// Seller accepted; terminal.
    Accepted,
    /// Seller declined; terminal.
    Declined,
    /// Buyer withdrew; terminal.
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Only `pending` has outgoing edges; everything else is terminal.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(self, RequestStatus::Pending) && next != RequestStatus::Pending
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seller's decision on a pending request.
///
/// Parsing happens at the facade boundary, before any lock is taken, so a
/// malformed decision string never reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Declined,
}

impl Decision {
    /// The request status this decision transitions to.
    pub fn request_status(&self) -> RequestStatus {
        match self {
            Decision::Accepted => RequestStatus::Accepted,
            Decision::Declined => RequestStatus::Declined,
        }
    }

    /// The property status mirroring this decision: `sold` on accept, back to
    /// `available` on decline.
    pub fn property_status(&self) -> PropertyStatus {
        match self {
            Decision::Accepted => PropertyStatus::Sold,
            Decision::Declined => PropertyStatus::Available,
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Decision::Accepted),
            "declined" => Ok(Decision::Declined),
            other => Err(format!(
                "invalid decision '{}', expected 'accepted' or 'declined'",
                other
            )),
        }
    }
}

/// A reservation request row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Request {
    pub id: RequestId,
    pub buyer_id: ProfileId,
    pub property_id: PropertyId,
    /// Denormalized from the property at creation time.
    pub seller_id: ProfileId,
    pub message: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
