//! Operation surface of the reservation engine.
//!
//! This module defines the [`Reservations`] trait: the three lifecycle
//! operations plus the read accessors the facade and tests consume. All
//! business rules live behind this seam so no caller can shortcut the locking
//! guarantees of the Postgres implementation.

pub mod postgres;

use async_trait::async_trait;

use crate::domain::{
    Decision, HistoryRecord, Profile, ProfileId, Property, PropertyId, Request, RequestId,
};
use crate::error::Result;

/// Atomic reservation operations over the entity store.
///
/// The three mutating operations are the only write paths for request rows
/// and for property `status`; each runs in a single storage transaction and
/// either commits completely or leaves no trace.
#[async_trait]
pub trait Reservations: Send + Sync {
    /// Place a pending reservation request on an available property.
    ///
    /// Serialized per property by an exclusive row lock: of any number of
    /// concurrent calls for the same property, exactly one commits while the
    /// property is `available`; the rest observe the winner's state and fail
    /// with `PropertyNotAvailable`. A buyer holding a pending request
    /// anywhere else fails with `DuplicatePendingRequest`, enforced by the
    /// store's partial unique index rather than any in-process check.
    ///
    /// On success the counterparty is notified asynchronously; notification
    /// failures never surface here.
    async fn create_request(
        &self,
        buyer_id: ProfileId,
        property_id: PropertyId,
        message: Option<String>,
    ) -> Result<RequestId>;

    /// Withdraw a pending request. Only the owning buyer may cancel; the
    /// property returns to `available`.
    async fn cancel_request(&self, request_id: RequestId, caller_id: ProfileId) -> Result<()>;

    /// Accept or decline a pending request. Only the property's seller may
    /// respond; the property moves to `sold` on accept or back to
    /// `available` on decline.
    async fn respond_to_request(
        &self,
        request_id: RequestId,
        caller_id: ProfileId,
        decision: Decision,
    ) -> Result<()>;

    /// Fetch a request by id.
    async fn get_request(&self, request_id: RequestId) -> Result<Request>;

    /// Fetch a property by id.
    async fn get_property(&self, property_id: PropertyId) -> Result<Property>;

    /// Read-only identity lookup.
    async fn get_profile(&self, profile_id: ProfileId) -> Result<Profile>;

    /// A property's audit trail in insertion order.
    async fn property_history(&self, property_id: PropertyId) -> Result<Vec<HistoryRecord>>;
}
