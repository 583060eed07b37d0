//! Integration tests for the reservation engine against a live Postgres.
//!
//! `#[sqlx::test]` provisions an isolated database per test and applies the
//! migrations in `./migrations` before the test body runs.

use std::sync::Arc;
use std::time::Duration;

use keyturn::{
    Decision, KeyturnError, MarketplaceApi, MockNotificationSink, Notifier, NotifierConfig,
    PostgresMarketplace, ProfileId, ProfileRole, PropertyId, PropertyInput, PropertyStatus,
    RequestStatus, Reservations, replay_property_status,
};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

async fn seed_profiles(market: &PostgresMarketplace) -> (ProfileId, ProfileId) {
    let seller = market
        .create_profile("Sasha Seller", Some("seller-token"), ProfileRole::Seller)
        .await
        .expect("Failed to create seller");
    let buyer = market
        .create_profile("Blake Buyer", Some("buyer-token"), ProfileRole::Buyer)
        .await
        .expect("Failed to create buyer");
    (seller, buyer)
}

async fn seed_property(market: &PostgresMarketplace, seller: ProfileId) -> PropertyId {
    market
        .create_property(PropertyInput {
            seller_id: seller,
            price: 450_000,
            address: "12 Maple Street".to_string(),
            bedrooms: 3,
            bathrooms: 2,
            image_url: None,
        })
        .await
        .expect("Failed to create property")
}

#[sqlx::test]
#[test_log::test]
async fn create_request_reserves_the_property(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;

    let request_id = market
        .create_request(buyer, property, Some("Is the roof new?".to_string()))
        .await
        .expect("Failed to create request");

    let request = market.get_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.buyer_id, buyer);
    assert_eq!(request.property_id, property);
    // Seller captured from the property at creation time.
    assert_eq!(request.seller_id, seller);
    assert_eq!(request.message.as_deref(), Some("Is the roof new?"));

    let prop = market.get_property(property).await.unwrap();
    assert_eq!(prop.status, PropertyStatus::Requested);

    let history = market.property_history(property).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].actor_id, buyer);
}

#[sqlx::test]
#[test_log::test]
async fn second_pending_request_for_the_same_buyer_is_rejected(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (seller, buyer) = seed_profiles(&market).await;
    let property_p = seed_property(&market, seller).await;
    let property_q = seed_property(&market, seller).await;

    market.create_request(buyer, property_p, None).await.unwrap();

    // Different property, so no property-lock contention: only the partial
    // unique index stands in the way.
    let err = market
        .create_request(buyer, property_q, None)
        .await
        .unwrap_err();
    assert!(matches!(err, KeyturnError::DuplicatePendingRequest(b) if b == buyer));

    let prop_q = market.get_property(property_q).await.unwrap();
    assert_eq!(prop_q.status, PropertyStatus::Available);
    assert!(market.property_history(property_q).await.unwrap().is_empty());
}

#[sqlx::test]
#[test_log::test]
async fn concurrent_creates_on_one_property_admit_exactly_one_winner(pool: PgPool) {
    let market = Arc::new(PostgresMarketplace::new(pool));
    let (seller, buyer_b) = seed_profiles(&market).await;
    let buyer_c = market
        .create_profile("Casey Buyer", None, ProfileRole::Buyer)
        .await
        .unwrap();
    let property = seed_property(&market, seller).await;

    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let mut handles = Vec::new();
    for buyer in [buyer_b, buyer_c] {
        let market = market.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            market.create_request(buyer, property, None).await
        }));
    }

    let mut successes = 0;
    let mut not_available = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(KeyturnError::PropertyNotAvailable(p, status)) => {
                assert_eq!(p, property);
                assert_eq!(status, PropertyStatus::Requested);
                not_available += 1;
            }
            Err(other) => panic!("Unexpected error: {}", other),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(not_available, 1);

    let prop = market.get_property(property).await.unwrap();
    assert_eq!(prop.status, PropertyStatus::Requested);
}

#[sqlx::test]
#[test_log::test]
async fn accepting_a_request_sells_the_property(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;
    let request_id = market.create_request(buyer, property, None).await.unwrap();

    market
        .respond_to_request(request_id, seller, Decision::Accepted)
        .await
        .expect("Failed to accept request");

    let request = market.get_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Accepted);
    let prop = market.get_property(property).await.unwrap();
    assert_eq!(prop.status, PropertyStatus::Sold);
}

#[sqlx::test]
#[test_log::test]
async fn cancelling_a_pending_request_frees_the_property(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;
    let request_id = market.create_request(buyer, property, None).await.unwrap();

    market.cancel_request(request_id, buyer).await.unwrap();

    let request = market.get_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Cancelled);
    let prop = market.get_property(property).await.unwrap();
    assert_eq!(prop.status, PropertyStatus::Available);
}

#[sqlx::test]
#[test_log::test]
async fn cancelling_an_accepted_request_is_an_invalid_transition(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;
    let request_id = market.create_request(buyer, property, None).await.unwrap();
    market
        .respond_to_request(request_id, seller, Decision::Accepted)
        .await
        .unwrap();

    let err = market.cancel_request(request_id, buyer).await.unwrap_err();
    assert!(matches!(
        err,
        KeyturnError::InvalidStateTransition(r, RequestStatus::Accepted) if r == request_id
    ));

    // No state changed.
    let request = market.get_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Accepted);
    let prop = market.get_property(property).await.unwrap();
    assert_eq!(prop.status, PropertyStatus::Sold);
}

#[sqlx::test]
#[test_log::test]
async fn declining_frees_the_buyer_for_a_new_request(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (seller, buyer) = seed_profiles(&market).await;
    let property_p = seed_property(&market, seller).await;
    let property_q = seed_property(&market, seller).await;

    let request_id = market.create_request(buyer, property_p, None).await.unwrap();
    market
        .respond_to_request(request_id, seller, Decision::Declined)
        .await
        .unwrap();

    let request = market.get_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Declined);
    let prop_p = market.get_property(property_p).await.unwrap();
    assert_eq!(prop_p.status, PropertyStatus::Available);

    // The pending slot is free again.
    market
        .create_request(buyer, property_q, None)
        .await
        .expect("Buyer should be able to request another property after a decline");
}

#[sqlx::test]
#[test_log::test]
async fn only_the_buyer_cancels_and_only_the_seller_responds(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;
    let request_id = market.create_request(buyer, property, None).await.unwrap();

    let err = market.cancel_request(request_id, seller).await.unwrap_err();
    assert!(matches!(err, KeyturnError::Forbidden(c, _) if c == seller));

    let err = market
        .respond_to_request(request_id, buyer, Decision::Accepted)
        .await
        .unwrap_err();
    assert!(matches!(err, KeyturnError::Forbidden(c, _) if c == buyer));

    let request = market.get_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
}

#[sqlx::test]
#[test_log::test]
async fn requesting_your_own_listing_is_forbidden(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (seller, _) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;

    let err = market.create_request(seller, property, None).await.unwrap_err();
    assert!(matches!(err, KeyturnError::SelfRequestForbidden(s) if s == seller));

    let prop = market.get_property(property).await.unwrap();
    assert_eq!(prop.status, PropertyStatus::Available);
}

#[sqlx::test]
#[test_log::test]
async fn unknown_ids_fail_with_not_found(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (_, buyer) = seed_profiles(&market).await;

    let err = market
        .create_request(buyer, PropertyId::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, KeyturnError::PropertyNotFound(_)));

    let err = market
        .cancel_request(keyturn::RequestId::new(), buyer)
        .await
        .unwrap_err();
    assert!(matches!(err, KeyturnError::RequestNotFound(_)));
}

#[sqlx::test]
#[test_log::test]
async fn concurrent_cancel_and_respond_admit_exactly_one_winner(pool: PgPool) {
    let market = Arc::new(PostgresMarketplace::new(pool));
    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;
    let request_id = market.create_request(buyer, property, None).await.unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    let cancel = {
        let market = market.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            market.cancel_request(request_id, buyer).await
        })
    };
    let respond = {
        let market = market.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            market
                .respond_to_request(request_id, seller, Decision::Accepted)
                .await
        })
    };

    let outcomes = [cancel.await.unwrap(), respond.await.unwrap()];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one of cancel/respond may win");
    for outcome in &outcomes {
        if let Err(e) = outcome {
            assert!(
                matches!(e, KeyturnError::InvalidStateTransition(_, _)),
                "loser must observe the winner's terminal state, got: {}",
                e
            );
        }
    }

    // Final state is consistent with whichever won: no silent overwrite.
    let request = market.get_request(request_id).await.unwrap();
    let prop = market.get_property(property).await.unwrap();
    match request.status {
        RequestStatus::Cancelled => assert_eq!(prop.status, PropertyStatus::Available),
        RequestStatus::Accepted => assert_eq!(prop.status, PropertyStatus::Sold),
        other => panic!("Request ended in unexpected state '{}'", other),
    }
}

#[sqlx::test]
#[test_log::test]
async fn replaying_history_reproduces_the_property_status(pool: PgPool) {
    let market = PostgresMarketplace::new(pool);
    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;

    let first = market.create_request(buyer, property, None).await.unwrap();
    market
        .respond_to_request(first, seller, Decision::Declined)
        .await
        .unwrap();
    let second = market.create_request(buyer, property, None).await.unwrap();
    market
        .respond_to_request(second, seller, Decision::Accepted)
        .await
        .unwrap();

    let history = market.property_history(property).await.unwrap();
    assert_eq!(history.len(), 4);

    let replayed = replay_property_status(&history);
    let prop = market.get_property(property).await.unwrap();
    assert_eq!(replayed, Some(prop.status));
    assert_eq!(prop.status, PropertyStatus::Sold);
}

#[sqlx::test]
#[test_log::test]
async fn committed_reservation_notifies_the_seller(pool: PgPool) {
    let sink = Arc::new(MockNotificationSink::new());
    let shutdown = CancellationToken::new();
    let (notifier, worker) =
        Notifier::spawn(sink.clone(), NotifierConfig::default(), shutdown.clone());
    let market = PostgresMarketplace::new(pool).with_notifier(notifier);

    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;
    let request_id = market.create_request(buyer, property, None).await.unwrap();

    let start = tokio::time::Instant::now();
    while sink.delivered_count() < 1 {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "notification was never delivered"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let delivered = sink.delivered();
    assert_eq!(delivered[0].request_id, request_id);
    assert_eq!(delivered[0].seller_id, seller);
    assert_eq!(delivered[0].contact_token.as_deref(), Some("seller-token"));

    shutdown.cancel();
    worker.await.unwrap();
}

#[sqlx::test]
#[test_log::test]
async fn notification_failure_never_affects_the_reservation(pool: PgPool) {
    let sink = Arc::new(MockNotificationSink::new());
    sink.push_outcome(Err(keyturn::DeliveryError::Rejected(
        "bad token".to_string(),
    )));
    let shutdown = CancellationToken::new();
    let (notifier, worker) =
        Notifier::spawn(sink.clone(), NotifierConfig::default(), shutdown.clone());
    let market = PostgresMarketplace::new(pool).with_notifier(notifier);

    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;

    // The reservation commits regardless of what the sink does.
    let request_id = market.create_request(buyer, property, None).await.unwrap();
    let request = market.get_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    let prop = market.get_property(property).await.unwrap();
    assert_eq!(prop.status, PropertyStatus::Requested);

    shutdown.cancel();
    worker.await.unwrap();
}

#[sqlx::test]
#[test_log::test]
async fn facade_round_trip_over_the_postgres_engine(pool: PgPool) {
    let market = Arc::new(PostgresMarketplace::new(pool));
    let (seller, buyer) = seed_profiles(&market).await;
    let property = seed_property(&market, seller).await;
    let api = MarketplaceApi::new(market.clone());

    let request_id = api
        .create_request(*buyer, *property, Some("offer inside".to_string()))
        .await
        .expect("Facade create should succeed");

    let err = api
        .respond_to_request(*request_id, *seller, "maybe")
        .await
        .unwrap_err();
    assert_eq!(err.code, keyturn::ErrorCode::InvalidArgument);

    assert!(api
        .respond_to_request(*request_id, *seller, "accepted")
        .await
        .unwrap());

    let err = api.cancel_request(*request_id, *buyer).await.unwrap_err();
    assert_eq!(err.code, keyturn::ErrorCode::InvalidStateTransition);

    let prop = market.get_property(property).await.unwrap();
    assert_eq!(prop.status, PropertyStatus::Sold);
}
