//! Append-only audit records of property-state transitions.
//!
//! The engine writes one record per committed transition, inside the same
//! transaction as the transition itself; the core never reads them back.
//! Replaying the history of a property reproduces its current status, which
//! the integration tests use as a consistency check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::profile::ProfileId;
use super::property::{PropertyId, PropertyStatus};
use super::request::RequestId;

/// Engine action that caused a property-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum HistoryAction {
    RequestCreated,
    RequestCancelled,
    RequestAccepted,
    RequestDeclined,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::RequestCreated => "request_created",
            HistoryAction::RequestCancelled => "request_cancelled",
            HistoryAction::RequestAccepted => "request_accepted",
            HistoryAction::RequestDeclined => "request_declined",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit entry: who moved which property between which statuses.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HistoryRecord {
    pub id: i64,
    pub property_id: PropertyId,
    pub actor_id: ProfileId,
    pub action: HistoryAction,
    pub old_values: serde_json::Value,
    pub new_values: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// The property status recorded on the `new_values` side, if present.
    pub fn new_status(&self) -> Option<PropertyStatus> {
        self.new_values
            .get("status")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// Build the `old_values`/`new_values` pair for a status transition.
pub(crate) fn status_change(
    old: PropertyStatus,
    new: PropertyStatus,
    request_id: RequestId,
) -> (serde_json::Value, serde_json::Value) {
    (
        json!({ "status": old }),
        json!({ "status": new, "request_id": request_id }),
    )
}

/// Replay a property's audit trail and return the status it ends in.
///
/// Records must be in insertion order (ascending `id`). Returns `None` for an
/// empty history, meaning the property has never left its initial status.
pub fn replay_property_status(records: &[HistoryRecord]) -> Option<PropertyStatus> {
    records.last().and_then(HistoryRecord::new_status)
}
