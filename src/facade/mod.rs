//! Client-facing API surface.
//!
//! [`MarketplaceApi`] is the boundary application clients call. It validates
//! parameters (well-formed ids, bounded message length, parseable decision)
//! and translates engine errors into the closed [`ErrorCode`] set, and does
//! nothing else. Business rules are never checked here: every shortcut past
//! the engine would also be a shortcut past its locks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Decision, ProfileId, PropertyId, RequestId};
use crate::error::KeyturnError;
use crate::store::Reservations;

/// Upper bound on the optional message attached to a request.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Closed set of client-visible error codes.
///
/// `DuplicatePendingRequest` and `PropertyNotAvailable` are expected
/// steady-state conditions a client UI should handle gracefully; the rest
/// indicate programming or authorization errors, except `Transient`, which
/// callers may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    PropertyNotAvailable,
    SelfRequestForbidden,
    DuplicatePendingRequest,
    Forbidden,
    InvalidStateTransition,
    InvalidArgument,
    Transient,
}

/// Error shape returned to clients; transport-agnostic and serde-ready.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    fn invalid_argument(message: impl Into<String>) -> Self {
        ApiError {
            code: ErrorCode::InvalidArgument,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<KeyturnError> for ApiError {
    fn from(e: KeyturnError) -> Self {
        let code = match &e {
            KeyturnError::PropertyNotFound(_)
            | KeyturnError::RequestNotFound(_)
            | KeyturnError::ProfileNotFound(_) => ErrorCode::NotFound,
            KeyturnError::PropertyNotAvailable(_, _) => ErrorCode::PropertyNotAvailable,
            KeyturnError::SelfRequestForbidden(_) => ErrorCode::SelfRequestForbidden,
            KeyturnError::DuplicatePendingRequest(_) => ErrorCode::DuplicatePendingRequest,
            KeyturnError::Forbidden(_, _) => ErrorCode::Forbidden,
            KeyturnError::InvalidStateTransition(_, _) => ErrorCode::InvalidStateTransition,
            KeyturnError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            KeyturnError::Transient(_) | KeyturnError::Other(_) => ErrorCode::Transient,
        };
        ApiError {
            code,
            message: e.to_string(),
        }
    }
}

/// The RPC-style operation surface exposed to application clients.
///
/// Generic over the engine so it can be exercised against a mock in tests;
/// production wires it to [`PostgresMarketplace`].
///
/// [`PostgresMarketplace`]: crate::store::postgres::PostgresMarketplace
pub struct MarketplaceApi<R: Reservations> {
    engine: Arc<R>,
}

impl<R: Reservations> MarketplaceApi<R> {
    pub fn new(engine: Arc<R>) -> Self {
        Self { engine }
    }

    /// Request a property on behalf of a buyer. Returns the new request id.
    pub async fn create_request(
        &self,
        buyer_id: Uuid,
        property_id: Uuid,
        message: Option<String>,
    ) -> Result<RequestId, ApiError> {
        if buyer_id.is_nil() {
            return Err(ApiError::invalid_argument("buyer id must not be nil"));
        }
        if property_id.is_nil() {
            return Err(ApiError::invalid_argument("property id must not be nil"));
        }
        if let Some(message) = &message
            && message.len() > MAX_MESSAGE_LEN
        {
            return Err(ApiError::invalid_argument(format!(
                "message exceeds {} bytes",
                MAX_MESSAGE_LEN
            )));
        }

        let request_id = self
            .engine
            .create_request(ProfileId(buyer_id), PropertyId(property_id), message)
            .await?;
        Ok(request_id)
    }

    /// Cancel a pending request on behalf of its buyer.
    pub async fn cancel_request(
        &self,
        request_id: Uuid,
        caller_id: Uuid,
    ) -> Result<bool, ApiError> {
        if request_id.is_nil() {
            return Err(ApiError::invalid_argument("request id must not be nil"));
        }
        if caller_id.is_nil() {
            return Err(ApiError::invalid_argument("caller id must not be nil"));
        }

        self.engine
            .cancel_request(RequestId(request_id), ProfileId(caller_id))
            .await?;
        Ok(true)
    }

    /// Accept or decline a pending request on behalf of the seller.
    ///
    /// The decision string is parsed here, before the engine takes any lock;
    /// anything but `accepted` or `declined` is rejected up front.
    pub async fn respond_to_request(
        &self,
        request_id: Uuid,
        caller_id: Uuid,
        decision: &str,
    ) -> Result<bool, ApiError> {
        if request_id.is_nil() {
            return Err(ApiError::invalid_argument("request id must not be nil"));
        }
        if caller_id.is_nil() {
            return Err(ApiError::invalid_argument("caller id must not be nil"));
        }
        let decision: Decision = decision
            .parse()
            .map_err(ApiError::invalid_argument)?;

        self.engine
            .respond_to_request(RequestId(request_id), ProfileId(caller_id), decision)
            .await?;
        Ok(true)
    }
}
