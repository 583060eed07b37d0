//! Core domain types for the marketplace reservation system.
//!
//! Identifiers are newtypes over [`uuid::Uuid`]; status vocabularies are
//! closed enums that map onto the `TEXT` columns enforced by CHECK
//! constraints in the schema. Transition legality lives here so both the
//! engine and its tests share a single source of truth.

pub mod history;
pub mod profile;
pub mod property;
pub mod request;

pub use history::{HistoryAction, HistoryRecord, replay_property_status};
pub use profile::{Profile, ProfileId, ProfileRole};
pub use property::{Property, PropertyId, PropertyInput, PropertyStatus};
pub use request::{Decision, Request, RequestId, RequestStatus};
