use chrono::{Duration, Utc};
use restock_engine::config::AppConfig;
use restock_engine::db;
use restock_engine::entities::stock_movement::MovementType;
use restock_engine::events::{process_events, EventSender};
use restock_engine::services::stock_ledger::{NewMovement, PositionKey, StockLedgerService};
use restock_engine::ServiceError;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Fresh in-memory database plus a ledger service wired to a draining
/// event loop. One connection so every test sees the same SQLite memory.
async fn setup() -> StockLedgerService {
    let mut cfg = AppConfig::new("sqlite::memory:", "test");
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");

    let (tx, rx) = mpsc::channel(100);
    let sender = EventSender::new(tx);
    tokio::spawn(process_events(rx));

    StockLedgerService::new(Arc::new(pool), Arc::new(sender), 30)
}

fn fresh_key() -> PositionKey {
    PositionKey {
        store_id: Uuid::new_v4(),
        product_id: Uuid::new_v4(),
        variant_id: Uuid::new_v4(),
    }
}

fn movement(key: PositionKey, movement_type: MovementType, quantity: i32) -> NewMovement {
    NewMovement {
        store_id: key.store_id,
        product_id: key.product_id,
        variant_id: key.variant_id,
        movement_type,
        quantity,
        reference_id: None,
        reference_type: None,
        occurred_at: None,
    }
}

#[tokio::test]
async fn oversell_is_rejected_and_position_unchanged() {
    let svc = setup().await;
    let key = fresh_key();

    let first = svc
        .record_movement(movement(key, MovementType::Restock, 10))
        .await
        .expect("first restock");
    assert_eq!(first.previous_stock, 0);
    assert_eq!(first.new_stock, 10);

    let second = svc
        .record_movement(movement(key, MovementType::Restock, 50))
        .await
        .expect("second restock");
    assert_eq!(second.previous_stock, 10);
    assert_eq!(second.new_stock, 60);

    let err = svc
        .record_movement(movement(key, MovementType::Sale, 70))
        .await
        .expect_err("oversell must fail");
    assert!(matches!(err, ServiceError::InsufficientStock(_)));

    let position = svc
        .get_position(key)
        .await
        .expect("load position")
        .expect("position exists");
    assert_eq!(position.current_stock, 60);
    assert_eq!(position.version, 2);

    let (entries, total) = svc.movement_history(key, 0, 10).await.expect("history");
    assert_eq!(total, 2);
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn sales_cannot_consume_reserved_stock() {
    let svc = setup().await;
    let key = fresh_key();

    svc.record_movement(movement(key, MovementType::Restock, 10))
        .await
        .expect("seed stock");

    let reserved = svc
        .reserve_stock(key, 4, Some(Uuid::new_v4()))
        .await
        .expect("reserve");
    assert_eq!(reserved.reserved_stock, 4);
    assert_eq!(reserved.available_stock, 6);

    let err = svc
        .record_movement(movement(key, MovementType::Sale, 7))
        .await
        .expect_err("sale beyond available must fail");
    assert!(matches!(err, ServiceError::InsufficientStock(_)));

    let sold = svc
        .record_movement(movement(key, MovementType::Sale, 6))
        .await
        .expect("sale within available");
    assert_eq!(sold.new_stock, 4);
    assert_eq!(sold.available_stock, 0);

    let err = svc
        .release_stock(key, 5, None)
        .await
        .expect_err("cannot release more than reserved");
    assert!(matches!(err, ServiceError::InvalidMovement(_)));

    let released = svc.release_stock(key, 4, None).await.expect("release");
    assert_eq!(released.reserved_stock, 0);
    assert_eq!(released.available_stock, 4);
}

#[tokio::test]
async fn reserving_unknown_position_is_not_found() {
    let svc = setup().await;

    let err = svc
        .reserve_stock(fresh_key(), 1, None)
        .await
        .expect_err("no position to reserve against");
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn thresholds_drive_alert_flags() {
    let svc = setup().await;
    let key = fresh_key();

    let position = svc
        .set_stock_levels(key, 5, 20)
        .await
        .expect("configure thresholds ahead of stock");
    assert!(position.low_stock_alert);
    assert!(!position.overstock_alert);

    let low = svc
        .record_movement(movement(key, MovementType::Restock, 3))
        .await
        .expect("small restock");
    assert!(low.low_stock_alert);
    assert!(!low.overstock_alert);

    let over = svc
        .record_movement(movement(key, MovementType::Restock, 30))
        .await
        .expect("large restock");
    assert_eq!(over.new_stock, 33);
    assert!(!over.low_stock_alert);
    assert!(over.overstock_alert);

    // A zero maximum means no upper threshold is configured.
    let unbounded = svc
        .set_stock_levels(key, 5, 0)
        .await
        .expect("clear maximum");
    assert!(!unbounded.overstock_alert);

    let err = svc
        .set_stock_levels(key, 5, 3)
        .await
        .expect_err("maximum below minimum");
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = svc
        .set_stock_levels(key, -1, 0)
        .await
        .expect_err("negative threshold");
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn voiding_replays_surviving_history() {
    let svc = setup().await;
    let key = fresh_key();

    let restock = svc
        .record_movement(movement(key, MovementType::Restock, 10))
        .await
        .expect("restock");
    let sale = svc
        .record_movement(movement(key, MovementType::Sale, 8))
        .await
        .expect("sale");

    // Removing the restock would replay the sale against nothing.
    let err = svc
        .void_movement(restock.movement_id)
        .await
        .expect_err("void leaving negative stock must fail");
    assert!(matches!(err, ServiceError::InvalidMovement(_)));

    let position = svc
        .void_movement(sale.movement_id)
        .await
        .expect("void the sale");
    assert_eq!(position.current_stock, 10);

    let (entries, total) = svc.movement_history(key, 0, 10).await.expect("history");
    assert_eq!(total, 1);
    assert_eq!(entries[0].id, restock.movement_id);

    let position = svc
        .void_movement(restock.movement_id)
        .await
        .expect("void the restock too");
    assert_eq!(position.current_stock, 0);

    let err = svc
        .void_movement(sale.movement_id)
        .await
        .expect_err("double void");
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn rebuild_matches_incremental_position() {
    let svc = setup().await;
    let key = fresh_key();

    for (movement_type, quantity) in [
        (MovementType::Restock, 20),
        (MovementType::Sale, 5),
        (MovementType::Adjustment, -2),
        (MovementType::Return, 3),
        (MovementType::Transfer, 4),
    ] {
        svc.record_movement(movement(key, movement_type, quantity))
            .await
            .expect("movement");
    }

    let incremental = svc
        .get_position(key)
        .await
        .expect("load position")
        .expect("position exists");
    assert_eq!(incremental.current_stock, 12);

    let rebuilt = svc.rebuild_position(key).await.expect("rebuild");
    assert_eq!(rebuilt.current_stock, incremental.current_stock);
    assert_eq!(rebuilt.low_stock_alert, incremental.low_stock_alert);
    assert_eq!(rebuilt.overstock_alert, incremental.overstock_alert);
    assert_eq!(rebuilt.version, incremental.version + 1);
}

#[tokio::test]
async fn movement_history_pages_newest_first() {
    let svc = setup().await;
    let key = fresh_key();
    let now = Utc::now();

    for hours_ago in [3, 2, 1] {
        let mut input = movement(key, MovementType::Restock, hours_ago);
        input.occurred_at = Some(now - Duration::hours(i64::from(hours_ago)));
        svc.record_movement(input).await.expect("movement");
    }

    let (first_page, total) = svc.movement_history(key, 0, 2).await.expect("page 0");
    assert_eq!(total, 3);
    assert_eq!(first_page.len(), 2);
    assert_eq!(first_page[0].quantity, 1);
    assert_eq!(first_page[1].quantity, 2);

    let (second_page, _) = svc.movement_history(key, 1, 2).await.expect("page 1");
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].quantity, 3);
}

#[tokio::test]
async fn adjustment_quantity_rules() {
    let svc = setup().await;
    let key = fresh_key();

    let err = svc
        .record_movement(movement(key, MovementType::Adjustment, 0))
        .await
        .expect_err("zero adjustment");
    assert!(matches!(err, ServiceError::InvalidMovement(_)));

    let err = svc
        .record_movement(movement(key, MovementType::Sale, -5))
        .await
        .expect_err("negative sale quantity");
    assert!(matches!(err, ServiceError::InvalidMovement(_)));

    svc.record_movement(movement(key, MovementType::Restock, 5))
        .await
        .expect("restock");
    let adjusted = svc
        .record_movement(movement(key, MovementType::Adjustment, -3))
        .await
        .expect("shrinkage write-off");
    assert_eq!(adjusted.new_stock, 2);
}
