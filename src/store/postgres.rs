//! PostgreSQL implementation of the reservation engine.
//!
//! Correctness under concurrency comes from exactly two mechanisms, both
//! storage-level:
//!
//! * per-row `SELECT ... FOR UPDATE` locks scoped to one transaction: every
//!   operation on the same property or request row serializes on them;
//! * the partial unique index `requests_one_pending_per_buyer`: the only
//!   safe enforcement point for the one-pending-request-per-buyer rule, since
//!   creates for different properties never contend for the same row lock.
//!
//! Error paths simply drop the open transaction, which rolls it back; no
//! partial writes can be observed. Notification dispatch happens strictly
//! after commit and never feeds back into the result.

use anyhow::anyhow;
use async_trait::async_trait;
use metrics::counter;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::Transaction;

use super::Reservations;
use crate::domain::history::status_change;
use crate::domain::{
    Decision, HistoryAction, HistoryRecord, Profile, ProfileId, ProfileRole, Property, PropertyId,
    PropertyInput, PropertyStatus, Request, RequestId, RequestStatus,
};
use crate::error::{KeyturnError, Result};
use crate::notify::{Notifier, RequestNotice};

/// Postgres-backed marketplace: the reservation engine plus the thin listing
/// and identity writes around it.
///
/// # Example
/// ```ignore
/// use keyturn::{PostgresMarketplace, Notifier, MockNotificationSink, NotifierConfig};
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgresql://localhost/keyturn").await?;
/// let (notifier, _worker) = Notifier::spawn(sink, NotifierConfig::default(), shutdown);
/// let marketplace = PostgresMarketplace::new(pool).with_notifier(notifier);
///
/// let request_id = marketplace.create_request(buyer, property, None).await?;
/// ```
pub struct PostgresMarketplace {
    pool: PgPool,
    notifier: Option<Notifier>,
}

/// Property fields read under the row lock in `create_request`.
#[derive(sqlx::FromRow)]
struct PropertyLockRow {
    status: PropertyStatus,
    seller_id: ProfileId,
}

/// Request fields read under the row lock in cancel/respond.
#[derive(sqlx::FromRow)]
struct RequestLockRow {
    buyer_id: ProfileId,
    seller_id: ProfileId,
    property_id: PropertyId,
    status: RequestStatus,
}

impl PostgresMarketplace {
    /// Create a marketplace without notification dispatch (notices are
    /// silently skipped). Attach a dispatcher with [`with_notifier`].
    ///
    /// [`with_notifier`]: PostgresMarketplace::with_notifier
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            notifier: None,
        }
    }

    /// Attach the notification dispatcher. Builder method, chained after
    /// `new()`.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Register a profile. Identity writes are otherwise outside the core;
    /// this exists for the surrounding application and for tests.
    pub async fn create_profile(
        &self,
        display_name: &str,
        contact_token: Option<&str>,
        role: ProfileRole,
    ) -> Result<ProfileId> {
        sqlx::query_scalar::<_, ProfileId>(
            r#"
            INSERT INTO profiles (display_name, contact_token, role)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(display_name)
        .bind(contact_token)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to create profile: {}", e)))
    }

    /// List a new property for a seller. Every listing is born `available`.
    #[tracing::instrument(skip(self, input), fields(seller_id = %input.seller_id))]
    pub async fn create_property(&self, input: PropertyInput) -> Result<PropertyId> {
        sqlx::query_scalar::<_, PropertyId>(
            r#"
            INSERT INTO properties (seller_id, price, address, bedrooms, bathrooms, image_url)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(input.seller_id)
        .bind(input.price)
        .bind(&input.address)
        .bind(input.bedrooms)
        .bind(input.bathrooms)
        .bind(input.image_url.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e
                && db_err.code().as_deref() == Some("23503")
            {
                return KeyturnError::ProfileNotFound(input.seller_id);
            }
            KeyturnError::Transient(anyhow!("Failed to create property: {}", e))
        })
    }

    /// Lock one property row for the duration of the transaction and return
    /// the fields the engine decides on. Blocks until any concurrent holder
    /// of the same row commits or aborts.
    async fn lock_property(
        tx: &mut Transaction<'_, Postgres>,
        property_id: PropertyId,
    ) -> Result<PropertyLockRow> {
        sqlx::query_as::<_, PropertyLockRow>(
            r#"
            SELECT status, seller_id
            FROM properties
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(property_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to lock property: {}", e)))?
        .ok_or(KeyturnError::PropertyNotFound(property_id))
    }

    /// Lock one request row, same semantics as [`lock_property`].
    ///
    /// [`lock_property`]: PostgresMarketplace::lock_property
    async fn lock_request(
        tx: &mut Transaction<'_, Postgres>,
        request_id: RequestId,
    ) -> Result<RequestLockRow> {
        sqlx::query_as::<_, RequestLockRow>(
            r#"
            SELECT buyer_id, seller_id, property_id, status
            FROM requests
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(request_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to lock request: {}", e)))?
        .ok_or(KeyturnError::RequestNotFound(request_id))
    }

    async fn update_property_status(
        tx: &mut Transaction<'_, Postgres>,
        property_id: PropertyId,
        status: PropertyStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE properties
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(property_id)
        .bind(status)
        .execute(&mut **tx)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to update property status: {}", e)))?;
        Ok(())
    }

    async fn update_request_status(
        tx: &mut Transaction<'_, Postgres>,
        request_id: RequestId,
        status: RequestStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE requests
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(request_id)
        .bind(status)
        .execute(&mut **tx)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to update request status: {}", e)))?;
        Ok(())
    }

    /// Append one audit record inside the open transaction. A failed write
    /// here propagates and aborts the whole transaction: history is never
    /// silently lost.
    async fn append_history(
        tx: &mut Transaction<'_, Postgres>,
        property_id: PropertyId,
        actor_id: ProfileId,
        action: HistoryAction,
        old_values: serde_json::Value,
        new_values: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO property_history (property_id, actor_id, action, old_values, new_values)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(property_id)
        .bind(actor_id)
        .bind(action)
        .bind(old_values)
        .bind(new_values)
        .execute(&mut **tx)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to append history: {}", e)))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| KeyturnError::Transient(anyhow!("Failed to begin transaction: {}", e)))
    }

    async fn commit(tx: Transaction<'_, Postgres>) -> Result<()> {
        tx.commit()
            .await
            .map_err(|e| KeyturnError::Transient(anyhow!("Failed to commit transaction: {}", e)))
    }
}

/// Map the insert-time database errors of `create_request` onto the typed
/// taxonomy: the partial-index violation is a legitimate concurrent outcome,
/// a buyer FK violation means the profile does not exist.
fn map_insert_request_error(e: sqlx::Error, buyer_id: ProfileId) -> KeyturnError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505")
            && db_err.constraint() == Some("requests_one_pending_per_buyer")
        {
            return KeyturnError::DuplicatePendingRequest(buyer_id);
        }
        // Property and seller existence were already verified under the
        // property lock, so a remaining FK violation points at the buyer.
        if db_err.code().as_deref() == Some("23503") {
            return KeyturnError::ProfileNotFound(buyer_id);
        }
    }
    KeyturnError::Transient(anyhow!("Failed to insert request: {}", e))
}

#[async_trait]
impl Reservations for PostgresMarketplace {
    #[tracing::instrument(skip(self, message), fields(buyer_id = %buyer_id, property_id = %property_id))]
    async fn create_request(
        &self,
        buyer_id: ProfileId,
        property_id: PropertyId,
        message: Option<String>,
    ) -> Result<RequestId> {
        let mut tx = self.begin().await?;

        // The concurrency linchpin: every concurrent attempt on this property
        // queues here and observes the winner's committed state on wake-up.
        let property = Self::lock_property(&mut tx, property_id).await?;

        if property.status != PropertyStatus::Available {
            counter!("keyturn_reservation_conflicts_total", "reason" => "property_not_available")
                .increment(1);
            tracing::info!(status = %property.status, "Property not available for request");
            return Err(KeyturnError::PropertyNotAvailable(
                property_id,
                property.status,
            ));
        }
        if property.seller_id == buyer_id {
            return Err(KeyturnError::SelfRequestForbidden(buyer_id));
        }

        // The partial unique index fires here if the buyer already holds a
        // pending request anywhere; the property lock we hold is released by
        // the rollback and its row is left untouched.
        let request_id = sqlx::query_scalar::<_, RequestId>(
            r#"
            INSERT INTO requests (buyer_id, property_id, seller_id, message)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(buyer_id)
        .bind(property_id)
        .bind(property.seller_id)
        .bind(message.as_deref())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            let mapped = map_insert_request_error(e, buyer_id);
            if matches!(mapped, KeyturnError::DuplicatePendingRequest(_)) {
                counter!("keyturn_reservation_conflicts_total", "reason" => "duplicate_pending")
                    .increment(1);
            }
            mapped
        })?;

        Self::update_property_status(&mut tx, property_id, PropertyStatus::Requested).await?;

        let (old_values, new_values) = status_change(
            PropertyStatus::Available,
            PropertyStatus::Requested,
            request_id,
        );
        Self::append_history(
            &mut tx,
            property_id,
            buyer_id,
            HistoryAction::RequestCreated,
            old_values,
            new_values,
        )
        .await?;

        // Resolved inside the transaction so the notification worker never
        // needs database access. The FK guarantees the row exists.
        let contact_token: Option<String> =
            sqlx::query_scalar("SELECT contact_token FROM profiles WHERE id = $1")
                .bind(property.seller_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    KeyturnError::Transient(anyhow!("Failed to read seller contact: {}", e))
                })?;

        Self::commit(tx).await?;

        counter!("keyturn_reservations_total", "outcome" => "created").increment(1);
        tracing::info!(request_id = %request_id, "Reservation created");

        // Strictly after commit: fire-and-forget. enqueue() cannot fail the
        // caller, and the worker's retries are its own business.
        if let Some(notifier) = &self.notifier {
            notifier.enqueue(RequestNotice {
                request_id,
                seller_id: property.seller_id,
                contact_token,
            });
        }

        Ok(request_id)
    }

    #[tracing::instrument(skip(self), fields(request_id = %request_id, caller_id = %caller_id))]
    async fn cancel_request(&self, request_id: RequestId, caller_id: ProfileId) -> Result<()> {
        let mut tx = self.begin().await?;

        let request = Self::lock_request(&mut tx, request_id).await?;

        if request.buyer_id != caller_id {
            return Err(KeyturnError::Forbidden(caller_id, request_id));
        }
        // A concurrent respond_to_request that won the lock race left the
        // request terminal; we observe that here instead of overwriting it.
        if !request.status.can_transition_to(RequestStatus::Cancelled) {
            return Err(KeyturnError::InvalidStateTransition(
                request_id,
                request.status,
            ));
        }

        Self::update_request_status(&mut tx, request_id, RequestStatus::Cancelled).await?;
        Self::update_property_status(&mut tx, request.property_id, PropertyStatus::Available)
            .await?;

        let (old_values, new_values) = status_change(
            PropertyStatus::Requested,
            PropertyStatus::Available,
            request_id,
        );
        Self::append_history(
            &mut tx,
            request.property_id,
            caller_id,
            HistoryAction::RequestCancelled,
            old_values,
            new_values,
        )
        .await?;

        Self::commit(tx).await?;

        counter!("keyturn_reservations_total", "outcome" => "cancelled").increment(1);
        tracing::info!("Reservation cancelled");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(request_id = %request_id, caller_id = %caller_id, decision = ?decision))]
    async fn respond_to_request(
        &self,
        request_id: RequestId,
        caller_id: ProfileId,
        decision: Decision,
    ) -> Result<()> {
        let mut tx = self.begin().await?;

        let request = Self::lock_request(&mut tx, request_id).await?;

        if request.seller_id != caller_id {
            return Err(KeyturnError::Forbidden(caller_id, request_id));
        }
        if !request.status.can_transition_to(decision.request_status()) {
            return Err(KeyturnError::InvalidStateTransition(
                request_id,
                request.status,
            ));
        }

        Self::update_request_status(&mut tx, request_id, decision.request_status()).await?;
        Self::update_property_status(&mut tx, request.property_id, decision.property_status())
            .await?;

        let action = match decision {
            Decision::Accepted => HistoryAction::RequestAccepted,
            Decision::Declined => HistoryAction::RequestDeclined,
        };
        let (old_values, new_values) = status_change(
            PropertyStatus::Requested,
            decision.property_status(),
            request_id,
        );
        Self::append_history(
            &mut tx,
            request.property_id,
            caller_id,
            action,
            old_values,
            new_values,
        )
        .await?;

        Self::commit(tx).await?;

        let outcome = match decision {
            Decision::Accepted => "accepted",
            Decision::Declined => "declined",
        };
        counter!("keyturn_reservations_total", "outcome" => outcome).increment(1);
        tracing::info!(outcome, "Reservation responded to");
        Ok(())
    }

    async fn get_request(&self, request_id: RequestId) -> Result<Request> {
        sqlx::query_as::<_, Request>(
            r#"
            SELECT id, buyer_id, property_id, seller_id, message, status, created_at, updated_at
            FROM requests
            WHERE id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to get request: {}", e)))?
        .ok_or(KeyturnError::RequestNotFound(request_id))
    }

    async fn get_property(&self, property_id: PropertyId) -> Result<Property> {
        sqlx::query_as::<_, Property>(
            r#"
            SELECT id, seller_id, price, address, bedrooms, bathrooms, image_url, status,
                   created_at, updated_at
            FROM properties
            WHERE id = $1
            "#,
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to get property: {}", e)))?
        .ok_or(KeyturnError::PropertyNotFound(property_id))
    }

    async fn get_profile(&self, profile_id: ProfileId) -> Result<Profile> {
        sqlx::query_as::<_, Profile>(
            r#"
            SELECT id, display_name, contact_token, role
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to get profile: {}", e)))?
        .ok_or(KeyturnError::ProfileNotFound(profile_id))
    }

    async fn property_history(&self, property_id: PropertyId) -> Result<Vec<HistoryRecord>> {
        sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT id, property_id, actor_id, action, old_values, new_values, recorded_at
            FROM property_history
            WHERE property_id = $1
            ORDER BY id
            "#,
        )
        .bind(property_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| KeyturnError::Transient(anyhow!("Failed to get property history: {}", e)))
    }
}
