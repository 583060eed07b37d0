//! Reservation core for a real-estate marketplace.
//!
//! Buyers request properties from sellers; sellers accept or decline, buyers
//! cancel. This crate owns the part of that flow with real invariants: the
//! request lifecycle state machine and the concurrency-safe property
//! reservation behind it, built on PostgreSQL row locks and a partial unique
//! index. It guarantees that
//!
//! * a property holds at most one active reservation at a time,
//! * a buyer holds at most one pending request system-wide,
//! * every transition (create/cancel/respond) is atomic under concurrent
//!   access from clients racing for the same property.
//!
//! After a reservation commits, the counterparty is notified through an
//! asynchronous best-effort dispatcher whose failures never affect the
//! reservation outcome. Everything else around the marketplace (UI, image
//! storage, push delivery, authentication) is an external collaborator with a
//! narrow contract.

pub mod config;
pub mod domain;
pub mod error;
pub mod facade;
pub mod metrics;
pub mod notify;
pub mod store;

// Re-export commonly used types
pub use config::NotifierConfig;
pub use domain::{
    Decision, HistoryAction, HistoryRecord, Profile, ProfileId, ProfileRole, Property, PropertyId,
    PropertyInput, PropertyStatus, Request, RequestId, RequestStatus, replay_property_status,
};
pub use error::{KeyturnError, Result};
pub use facade::{ApiError, ErrorCode, MarketplaceApi};
pub use notify::{
    DeliveryError, MockNotificationSink, NotificationSink, Notifier, RequestNotice, WebhookSink,
};
pub use store::Reservations;
pub use store::postgres::PostgresMarketplace;

/// Get the keyturn database migrator.
///
/// Returns a migrator that can be run against a connection pool.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
