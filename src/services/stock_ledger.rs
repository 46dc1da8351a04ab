use crate::{
    db::DbPool,
    entities::stock_movement::{self, MovementType},
    entities::stock_position,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    static ref STOCK_MOVEMENTS: IntCounter = IntCounter::new(
        "stock_movements_recorded_total",
        "Total number of recorded stock movements"
    )
    .expect("metric can be created");
    static ref STOCK_MOVEMENT_FAILURES: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "stock_movement_failures_total",
            "Total number of rejected stock movements"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Identity of one ledger projection: a variant in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
}

/// Input for appending one ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewMovement {
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub movement_type: MovementType,
    /// Positive for restock/sale/transfer/return; signed for adjustments
    pub quantity: i32,
    pub reference_id: Option<Uuid>,
    #[validate(length(max = 50))]
    pub reference_type: Option<String>,
    /// Defaults to now when not supplied
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewMovement {
    pub fn position_key(&self) -> PositionKey {
        PositionKey {
            store_id: self.store_id,
            product_id: self.product_id,
            variant_id: self.variant_id,
        }
    }
}

/// Flat view of a committed movement and the position it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedMovement {
    pub movement_id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub previous_stock: i32,
    pub new_stock: i32,
    pub available_stock: i32,
    pub low_stock_alert: bool,
    pub overstock_alert: bool,
    pub occurred_at: DateTime<Utc>,
}

/// In-memory projection of one position, the pure core both the incremental
/// path and full rebuilds go through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Projection {
    pub current_stock: i32,
    pub reserved_stock: i32,
    pub minimum_stock: i32,
    pub maximum_stock: i32,
}

impl Projection {
    pub fn from_position(position: &stock_position::Model) -> Self {
        Self {
            current_stock: position.current_stock,
            reserved_stock: position.reserved_stock,
            minimum_stock: position.minimum_stock,
            maximum_stock: position.maximum_stock,
        }
    }

    pub fn available(&self) -> i32 {
        self.current_stock - self.reserved_stock
    }

    pub fn low_stock(&self) -> bool {
        self.current_stock < self.minimum_stock
    }

    /// A maximum of zero means no overstock threshold is configured.
    pub fn overstock(&self) -> bool {
        self.maximum_stock > 0 && self.current_stock > self.maximum_stock
    }

    /// Validates and applies one movement, returning (previous, new) stock.
    /// Rejected movements leave the projection untouched.
    pub fn apply(
        &mut self,
        movement_type: MovementType,
        quantity: i32,
    ) -> Result<(i32, i32), ServiceError> {
        validate_quantity(movement_type, quantity)?;

        let delta = movement_type.signed_delta(quantity);
        let previous = self.current_stock;
        let new_stock = previous
            .checked_add(delta)
            .ok_or_else(|| ServiceError::InvalidMovement("quantity out of range".to_string()))?;

        if new_stock < self.reserved_stock {
            return Err(ServiceError::InsufficientStock(format!(
                "Available: {}, Required: {}",
                self.available(),
                -i64::from(delta)
            )));
        }

        self.current_stock = new_stock;
        Ok((previous, new_stock))
    }
}

/// Quantity rules per movement type: adjustments carry a sign and must be
/// non-zero, every other type must be strictly positive.
pub fn validate_quantity(movement_type: MovementType, quantity: i32) -> Result<(), ServiceError> {
    if movement_type.allows_signed_quantity() {
        if quantity == 0 {
            return Err(ServiceError::InvalidMovement(
                "adjustment quantity must be non-zero".to_string(),
            ));
        }
    } else if quantity <= 0 {
        return Err(ServiceError::InvalidMovement(format!(
            "{} quantity must be positive",
            movement_type.as_str()
        )));
    }
    Ok(())
}

/// Folds surviving movements into a stock level. Historical entries were
/// validated when recorded, so the fold itself is unchecked.
pub fn replay_stock<'a, I>(movements: I) -> i64
where
    I: IntoIterator<Item = &'a stock_movement::Model>,
{
    movements
        .into_iter()
        .map(|m| i64::from(m.movement_type.signed_delta(m.quantity)))
        .sum()
}

/// Sales statistics over a trailing window of movements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub units_sold: i64,
    pub sales_velocity: f64,
    pub turnover_rate: f64,
    pub days_of_inventory: Option<f64>,
}

/// Computes turnover and cover from the window's sale movements. `window`
/// must be ordered by `occurred_at` ascending.
pub fn window_stats(
    window: &[stock_movement::Model],
    current_stock: i32,
    window_days: i64,
) -> WindowStats {
    let units_sold: i64 = window
        .iter()
        .filter(|m| m.movement_type == MovementType::Sale)
        .map(|m| i64::from(m.quantity))
        .sum();

    let start_stock = window
        .first()
        .map(|m| m.previous_stock)
        .unwrap_or(current_stock);
    let average_stock = f64::from(start_stock + current_stock) / 2.0;

    let turnover_rate = if average_stock > 0.0 {
        units_sold as f64 / average_stock
    } else {
        0.0
    };

    let sales_velocity = units_sold as f64 / window_days.max(1) as f64;
    let days_of_inventory = if sales_velocity > 0.0 {
        Some(f64::from(current_stock) / sales_velocity)
    } else {
        None
    };

    WindowStats {
        units_sold,
        sales_velocity,
        turnover_rate,
        days_of_inventory,
    }
}

/// Append-only stock ledger with a per-key serialized projection.
#[derive(Clone)]
pub struct StockLedgerService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    position_locks: Arc<DashMap<PositionKey, Arc<Mutex<()>>>>,
    turnover_window_days: i64,
}

impl StockLedgerService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        turnover_window_days: i64,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            position_locks: Arc::new(DashMap::new()),
            turnover_window_days,
        }
    }

    fn lock_for(&self, key: PositionKey) -> Arc<Mutex<()>> {
        self.position_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Appends one movement to the ledger and advances the position
    /// projection in the same transaction. Movements for the same key are
    /// serialized; different keys proceed in parallel.
    #[instrument(skip(self, input), fields(store_id = %input.store_id, variant_id = %input.variant_id))]
    pub async fn record_movement(
        &self,
        input: NewMovement,
    ) -> Result<RecordedMovement, ServiceError> {
        input.validate().map_err(|e| {
            STOCK_MOVEMENT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            ServiceError::ValidationError(e.to_string())
        })?;
        if let Err(e) = validate_quantity(input.movement_type, input.quantity) {
            STOCK_MOVEMENT_FAILURES
                .with_label_values(&["invalid_movement"])
                .inc();
            return Err(e);
        }

        let key = input.position_key();
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let db = self.db_pool.as_ref();
        let window_days = self.turnover_window_days;
        let movement_type = input.movement_type;
        let quantity = input.quantity;
        let reference_id = input.reference_id;
        let reference_type = input.reference_type.clone();
        let occurred_at = input.occurred_at.unwrap_or_else(Utc::now);

        let result = db
            .transaction::<_, (stock_movement::Model, stock_position::Model, bool, bool), ServiceError>(
                move |txn| {
                    Box::pin(async move {
                        let existing = stock_position::Entity::find()
                            .filter(stock_position::Column::StoreId.eq(key.store_id))
                            .filter(stock_position::Column::ProductId.eq(key.product_id))
                            .filter(stock_position::Column::VariantId.eq(key.variant_id))
                            .one(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?;

                        let now = Utc::now();
                        let (mut projection, was_low, was_over) = match &existing {
                            Some(p) => (Projection::from_position(p), p.low_stock_alert, p.overstock_alert),
                            None => (Projection::default(), false, false),
                        };

                        let (previous_stock, new_stock) =
                            projection.apply(movement_type, quantity)?;

                        let movement = stock_movement::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            store_id: Set(key.store_id),
                            product_id: Set(key.product_id),
                            variant_id: Set(key.variant_id),
                            movement_type: Set(movement_type),
                            quantity: Set(quantity),
                            previous_stock: Set(previous_stock),
                            new_stock: Set(new_stock),
                            reference_id: Set(reference_id),
                            reference_type: Set(reference_type),
                            occurred_at: Set(occurred_at),
                            deleted_at: Set(None),
                            created_at: Set(now),
                        }
                        .insert(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                        let window_start = now - Duration::days(window_days);
                        let window = stock_movement::Entity::find()
                            .filter(stock_movement::Column::StoreId.eq(key.store_id))
                            .filter(stock_movement::Column::ProductId.eq(key.product_id))
                            .filter(stock_movement::Column::VariantId.eq(key.variant_id))
                            .filter(stock_movement::Column::DeletedAt.is_null())
                            .filter(stock_movement::Column::OccurredAt.gte(window_start))
                            .order_by_asc(stock_movement::Column::OccurredAt)
                            .all(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?;
                        let stats = window_stats(&window, new_stock, window_days);

                        let position = match existing {
                            Some(p) => {
                                let version = p.version;
                                let mut active: stock_position::ActiveModel = p.into();
                                active.current_stock = Set(new_stock);
                                active.available_stock = Set(projection.available());
                                active.stock_turnover_rate = Set(stats.turnover_rate);
                                active.days_of_inventory = Set(stats.days_of_inventory);
                                active.low_stock_alert = Set(projection.low_stock());
                                active.overstock_alert = Set(projection.overstock());
                                active.version = Set(version + 1);
                                active.updated_at = Set(now);
                                active
                                    .update(txn)
                                    .await
                                    .map_err(ServiceError::DatabaseError)?
                            }
                            None => stock_position::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                store_id: Set(key.store_id),
                                product_id: Set(key.product_id),
                                variant_id: Set(key.variant_id),
                                current_stock: Set(new_stock),
                                minimum_stock: Set(0),
                                maximum_stock: Set(0),
                                reserved_stock: Set(0),
                                available_stock: Set(projection.available()),
                                stock_turnover_rate: Set(stats.turnover_rate),
                                days_of_inventory: Set(stats.days_of_inventory),
                                low_stock_alert: Set(projection.low_stock()),
                                overstock_alert: Set(projection.overstock()),
                                version: Set(1),
                                created_at: Set(now),
                                updated_at: Set(now),
                            }
                            .insert(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?,
                        };

                        Ok((movement, position, was_low, was_over))
                    })
                },
            )
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            });

        let (movement, position, was_low, was_over) = match result {
            Ok(v) => v,
            Err(err) => {
                let label = match &err {
                    ServiceError::InsufficientStock(_) => "insufficient_stock",
                    ServiceError::InvalidMovement(_) => "invalid_movement",
                    _ => "database_error",
                };
                STOCK_MOVEMENT_FAILURES.with_label_values(&[label]).inc();
                return Err(err);
            }
        };

        info!(
            movement_id = %movement.id,
            store_id = %movement.store_id,
            product_id = %movement.product_id,
            variant_id = %movement.variant_id,
            movement_type = movement.movement_type.as_str(),
            quantity = movement.quantity,
            previous_stock = movement.previous_stock,
            new_stock = movement.new_stock,
            "Stock movement recorded"
        );

        self.event_sender
            .send(Event::MovementRecorded {
                movement_id: movement.id,
                store_id: movement.store_id,
                product_id: movement.product_id,
                variant_id: movement.variant_id,
                movement_type: movement.movement_type.as_str().to_string(),
                quantity: movement.quantity,
                previous_stock: movement.previous_stock,
                new_stock: movement.new_stock,
            })
            .await
            .map_err(|e| {
                STOCK_MOVEMENT_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                ServiceError::EventError(format!("Failed to send movement event: {}", e))
            })?;

        self.send_alert_edges(&position, was_low, was_over).await;
        STOCK_MOVEMENTS.inc();

        Ok(RecordedMovement {
            movement_id: movement.id,
            store_id: movement.store_id,
            product_id: movement.product_id,
            variant_id: movement.variant_id,
            movement_type: movement.movement_type,
            quantity: movement.quantity,
            previous_stock: movement.previous_stock,
            new_stock: movement.new_stock,
            available_stock: position.available_stock,
            low_stock_alert: position.low_stock_alert,
            overstock_alert: position.overstock_alert,
            occurred_at: movement.occurred_at,
        })
    }

    /// Current projection for a key, if any movements or levels were recorded.
    pub async fn get_position(
        &self,
        key: PositionKey,
    ) -> Result<Option<stock_position::Model>, ServiceError> {
        let db = self.db_pool.as_ref();
        stock_position::Entity::find()
            .filter(stock_position::Column::StoreId.eq(key.store_id))
            .filter(stock_position::Column::ProductId.eq(key.product_id))
            .filter(stock_position::Column::VariantId.eq(key.variant_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Sets the minimum/maximum thresholds for a key and re-derives the alert
    /// flags. Creates the position when none exists yet so thresholds can be
    /// configured ahead of the first movement.
    #[instrument(skip(self))]
    pub async fn set_stock_levels(
        &self,
        key: PositionKey,
        minimum_stock: i32,
        maximum_stock: i32,
    ) -> Result<stock_position::Model, ServiceError> {
        if minimum_stock < 0 || maximum_stock < 0 {
            return Err(ServiceError::ValidationError(
                "stock thresholds cannot be negative".to_string(),
            ));
        }
        if maximum_stock > 0 && maximum_stock < minimum_stock {
            return Err(ServiceError::ValidationError(format!(
                "maximum_stock {} is below minimum_stock {}",
                maximum_stock, minimum_stock
            )));
        }

        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let db = self.db_pool.as_ref();
        let (position, was_low, was_over) = db
            .transaction::<_, (stock_position::Model, bool, bool), ServiceError>(move |txn| {
                Box::pin(async move {
                    let existing = stock_position::Entity::find()
                        .filter(stock_position::Column::StoreId.eq(key.store_id))
                        .filter(stock_position::Column::ProductId.eq(key.product_id))
                        .filter(stock_position::Column::VariantId.eq(key.variant_id))
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    let now = Utc::now();
                    match existing {
                        Some(p) => {
                            let was_low = p.low_stock_alert;
                            let was_over = p.overstock_alert;
                            let projection = Projection {
                                minimum_stock,
                                maximum_stock,
                                ..Projection::from_position(&p)
                            };
                            let version = p.version;
                            let mut active: stock_position::ActiveModel = p.into();
                            active.minimum_stock = Set(minimum_stock);
                            active.maximum_stock = Set(maximum_stock);
                            active.low_stock_alert = Set(projection.low_stock());
                            active.overstock_alert = Set(projection.overstock());
                            active.version = Set(version + 1);
                            active.updated_at = Set(now);
                            let updated = active
                                .update(txn)
                                .await
                                .map_err(ServiceError::DatabaseError)?;
                            Ok((updated, was_low, was_over))
                        }
                        None => {
                            let projection = Projection {
                                minimum_stock,
                                maximum_stock,
                                ..Projection::default()
                            };
                            let created = stock_position::ActiveModel {
                                id: Set(Uuid::new_v4()),
                                store_id: Set(key.store_id),
                                product_id: Set(key.product_id),
                                variant_id: Set(key.variant_id),
                                current_stock: Set(0),
                                minimum_stock: Set(minimum_stock),
                                maximum_stock: Set(maximum_stock),
                                reserved_stock: Set(0),
                                available_stock: Set(0),
                                stock_turnover_rate: Set(0.0),
                                days_of_inventory: Set(None),
                                low_stock_alert: Set(projection.low_stock()),
                                overstock_alert: Set(projection.overstock()),
                                version: Set(1),
                                created_at: Set(now),
                                updated_at: Set(now),
                            }
                            .insert(txn)
                            .await
                            .map_err(ServiceError::DatabaseError)?;
                            Ok((created, false, false))
                        }
                    }
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        info!(
            store_id = %key.store_id,
            product_id = %key.product_id,
            variant_id = %key.variant_id,
            minimum_stock,
            maximum_stock,
            "Stock levels updated"
        );

        self.event_sender
            .send(Event::StockLevelsUpdated {
                store_id: key.store_id,
                product_id: key.product_id,
                variant_id: key.variant_id,
                minimum_stock,
                maximum_stock,
            })
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))?;

        self.send_alert_edges(&position, was_low, was_over).await;

        Ok(position)
    }

    /// Reserves stock against the available balance. Reservations do not
    /// append ledger movements; they only partition the current stock.
    #[instrument(skip(self))]
    pub async fn reserve_stock(
        &self,
        key: PositionKey,
        quantity: i32,
        reference_id: Option<Uuid>,
    ) -> Result<stock_position::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidMovement(
                "reservation quantity must be positive".to_string(),
            ));
        }

        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let db = self.db_pool.as_ref();
        let position = db
            .transaction::<_, stock_position::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let position = stock_position::Entity::find()
                        .filter(stock_position::Column::StoreId.eq(key.store_id))
                        .filter(stock_position::Column::ProductId.eq(key.product_id))
                        .filter(stock_position::Column::VariantId.eq(key.variant_id))
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "No stock position for variant {} in store {}",
                                key.variant_id, key.store_id
                            ))
                        })?;

                    if quantity > position.available_stock {
                        return Err(ServiceError::InsufficientStock(format!(
                            "Available: {}, Required: {}",
                            position.available_stock, quantity
                        )));
                    }

                    let version = position.version;
                    let reserved = position.reserved_stock + quantity;
                    let available = position.current_stock - reserved;
                    let mut active: stock_position::ActiveModel = position.into();
                    active.reserved_stock = Set(reserved);
                    active.available_stock = Set(available);
                    active.version = Set(version + 1);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::DatabaseError)
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        info!(
            store_id = %key.store_id,
            variant_id = %key.variant_id,
            quantity,
            reserved_stock = position.reserved_stock,
            available_stock = position.available_stock,
            "Stock reserved"
        );

        self.event_sender
            .send(Event::StockReserved {
                store_id: key.store_id,
                product_id: key.product_id,
                variant_id: key.variant_id,
                quantity,
                reference_id,
            })
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))?;

        Ok(position)
    }

    /// Returns previously reserved stock to the available balance.
    #[instrument(skip(self))]
    pub async fn release_stock(
        &self,
        key: PositionKey,
        quantity: i32,
        reference_id: Option<Uuid>,
    ) -> Result<stock_position::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidMovement(
                "release quantity must be positive".to_string(),
            ));
        }

        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let db = self.db_pool.as_ref();
        let position = db
            .transaction::<_, stock_position::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let position = stock_position::Entity::find()
                        .filter(stock_position::Column::StoreId.eq(key.store_id))
                        .filter(stock_position::Column::ProductId.eq(key.product_id))
                        .filter(stock_position::Column::VariantId.eq(key.variant_id))
                        .one(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!(
                                "No stock position for variant {} in store {}",
                                key.variant_id, key.store_id
                            ))
                        })?;

                    if quantity > position.reserved_stock {
                        return Err(ServiceError::InvalidMovement(format!(
                            "cannot release {} units, only {} reserved",
                            quantity, position.reserved_stock
                        )));
                    }

                    let version = position.version;
                    let reserved = position.reserved_stock - quantity;
                    let available = position.current_stock - reserved;
                    let mut active: stock_position::ActiveModel = position.into();
                    active.reserved_stock = Set(reserved);
                    active.available_stock = Set(available);
                    active.version = Set(version + 1);
                    active.updated_at = Set(Utc::now());
                    active.update(txn).await.map_err(ServiceError::DatabaseError)
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        info!(
            store_id = %key.store_id,
            variant_id = %key.variant_id,
            quantity,
            reserved_stock = position.reserved_stock,
            available_stock = position.available_stock,
            "Stock released"
        );

        self.event_sender
            .send(Event::StockReleased {
                store_id: key.store_id,
                product_id: key.product_id,
                variant_id: key.variant_id,
                quantity,
                reference_id,
            })
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))?;

        Ok(position)
    }

    /// Paginated movement history for a key, newest first, excluding voided
    /// entries.
    pub async fn movement_history(
        &self,
        key: PositionKey,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        let db = self.db_pool.as_ref();
        let paginator = stock_movement::Entity::find()
            .filter(stock_movement::Column::StoreId.eq(key.store_id))
            .filter(stock_movement::Column::ProductId.eq(key.product_id))
            .filter(stock_movement::Column::VariantId.eq(key.variant_id))
            .filter(stock_movement::Column::DeletedAt.is_null())
            .order_by_desc(stock_movement::Column::OccurredAt)
            .order_by_desc(stock_movement::Column::CreatedAt)
            .paginate(db, per_page.max(1));

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let items = paginator
            .fetch_page(page)
            .await
            .map_err(ServiceError::db_error)?;
        Ok((items, total))
    }

    /// Logically deletes a movement and rebuilds the position from the
    /// surviving history. Rejected when removing the entry would leave the
    /// position owing more stock than reservations hold.
    #[instrument(skip(self))]
    pub async fn void_movement(
        &self,
        movement_id: Uuid,
    ) -> Result<stock_position::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let movement = stock_movement::Entity::find_by_id(movement_id)
            .filter(stock_movement::Column::DeletedAt.is_null())
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Stock movement {} not found", movement_id))
            })?;

        let key = PositionKey {
            store_id: movement.store_id,
            product_id: movement.product_id,
            variant_id: movement.variant_id,
        };
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let window_days = self.turnover_window_days;
        let position = db
            .transaction::<_, stock_position::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let now = Utc::now();
                    let mut active: stock_movement::ActiveModel = movement.into();
                    active.deleted_at = Set(Some(now));
                    active
                        .update(txn)
                        .await
                        .map_err(ServiceError::DatabaseError)?;

                    rebuild_in_txn(txn, key, window_days, RebuildReason::Void).await
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        info!(
            %movement_id,
            store_id = %key.store_id,
            variant_id = %key.variant_id,
            current_stock = position.current_stock,
            "Stock movement voided"
        );

        self.event_sender
            .send(Event::MovementVoided {
                movement_id,
                store_id: key.store_id,
                product_id: key.product_id,
                variant_id: key.variant_id,
            })
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))?;

        Ok(position)
    }

    /// Replays the full surviving history for a key through the projection,
    /// a repair path for positions suspected of drift.
    #[instrument(skip(self))]
    pub async fn rebuild_position(
        &self,
        key: PositionKey,
    ) -> Result<stock_position::Model, ServiceError> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let db = self.db_pool.as_ref();
        let window_days = self.turnover_window_days;
        let position = db
            .transaction::<_, stock_position::Model, ServiceError>(move |txn| {
                Box::pin(
                    async move { rebuild_in_txn(txn, key, window_days, RebuildReason::Repair).await },
                )
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        info!(
            store_id = %key.store_id,
            variant_id = %key.variant_id,
            current_stock = position.current_stock,
            "Stock position rebuilt"
        );

        self.event_sender
            .send(Event::PositionRebuilt {
                store_id: key.store_id,
                product_id: key.product_id,
                variant_id: key.variant_id,
                current_stock: position.current_stock,
            })
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))?;

        Ok(position)
    }

    async fn send_alert_edges(
        &self,
        position: &stock_position::Model,
        was_low: bool,
        was_over: bool,
    ) {
        if position.low_stock_alert && !was_low {
            if let Err(e) = self
                .event_sender
                .send(Event::LowStockDetected {
                    store_id: position.store_id,
                    product_id: position.product_id,
                    variant_id: position.variant_id,
                    current_stock: position.current_stock,
                    minimum_stock: position.minimum_stock,
                })
                .await
            {
                warn!(error = %e, "Failed to send low stock event");
            }
        }
        if position.overstock_alert && !was_over {
            if let Err(e) = self
                .event_sender
                .send(Event::OverstockDetected {
                    store_id: position.store_id,
                    product_id: position.product_id,
                    variant_id: position.variant_id,
                    current_stock: position.current_stock,
                    maximum_stock: position.maximum_stock,
                })
                .await
            {
                warn!(error = %e, "Failed to send overstock event");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RebuildReason {
    Void,
    Repair,
}

async fn rebuild_in_txn(
    txn: &sea_orm::DatabaseTransaction,
    key: PositionKey,
    window_days: i64,
    reason: RebuildReason,
) -> Result<stock_position::Model, ServiceError> {
    let survivors = stock_movement::Entity::find()
        .filter(stock_movement::Column::StoreId.eq(key.store_id))
        .filter(stock_movement::Column::ProductId.eq(key.product_id))
        .filter(stock_movement::Column::VariantId.eq(key.variant_id))
        .filter(stock_movement::Column::DeletedAt.is_null())
        .order_by_asc(stock_movement::Column::OccurredAt)
        .order_by_asc(stock_movement::Column::CreatedAt)
        .all(txn)
        .await
        .map_err(ServiceError::DatabaseError)?;

    let position = stock_position::Entity::find()
        .filter(stock_position::Column::StoreId.eq(key.store_id))
        .filter(stock_position::Column::ProductId.eq(key.product_id))
        .filter(stock_position::Column::VariantId.eq(key.variant_id))
        .one(txn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "No stock position for variant {} in store {}",
                key.variant_id, key.store_id
            ))
        })?;

    let folded = replay_stock(&survivors);
    let current = i32::try_from(folded)
        .map_err(|_| ServiceError::InternalError("replayed stock out of range".to_string()))?;

    if current < position.reserved_stock {
        return match reason {
            RebuildReason::Void => Err(ServiceError::InvalidMovement(format!(
                "voiding would leave stock at {} below {} reserved",
                current, position.reserved_stock
            ))),
            RebuildReason::Repair => Err(ServiceError::InternalError(format!(
                "ledger replay left stock at {} below {} reserved",
                current, position.reserved_stock
            ))),
        };
    }

    let now = Utc::now();
    let window_start = now - Duration::days(window_days);
    let window: Vec<stock_movement::Model> = survivors
        .into_iter()
        .filter(|m| m.occurred_at >= window_start)
        .collect();
    let stats = window_stats(&window, current, window_days);

    let projection = Projection {
        current_stock: current,
        ..Projection::from_position(&position)
    };
    let version = position.version;
    let mut active: stock_position::ActiveModel = position.into();
    active.current_stock = Set(current);
    active.available_stock = Set(projection.available());
    active.stock_turnover_rate = Set(stats.turnover_rate);
    active.days_of_inventory = Set(stats.days_of_inventory);
    active.low_stock_alert = Set(projection.low_stock());
    active.overstock_alert = Set(projection.overstock());
    active.version = Set(version + 1);
    active.updated_at = Set(now);
    active
        .update(txn)
        .await
        .map_err(ServiceError::DatabaseError)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(movement_type: MovementType, quantity: i32, previous: i32) -> stock_movement::Model {
        stock_movement::Model {
            id: Uuid::new_v4(),
            store_id: Uuid::nil(),
            product_id: Uuid::nil(),
            variant_id: Uuid::nil(),
            movement_type,
            quantity,
            previous_stock: previous,
            new_stock: previous + movement_type.signed_delta(quantity),
            reference_id: None,
            reference_type: None,
            occurred_at: Utc::now(),
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn restock_then_oversell_leaves_stock_unchanged() {
        let mut projection = Projection {
            current_stock: 10,
            ..Projection::default()
        };

        let (previous, new_stock) = projection.apply(MovementType::Restock, 50).expect("restock");
        assert_eq!(previous, 10);
        assert_eq!(new_stock, 60);

        let err = projection.apply(MovementType::Sale, 70).unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
        assert_eq!(projection.current_stock, 60);
    }

    #[test]
    fn sale_cannot_eat_into_reservations() {
        let mut projection = Projection {
            current_stock: 10,
            reserved_stock: 4,
            ..Projection::default()
        };

        let err = projection.apply(MovementType::Sale, 7).unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
        assert_eq!(projection.current_stock, 10);

        projection.apply(MovementType::Sale, 6).expect("within available");
        assert_eq!(projection.current_stock, 4);
        assert_eq!(projection.available(), 0);
    }

    #[test]
    fn adjustments_carry_their_sign() {
        let mut projection = Projection {
            current_stock: 20,
            ..Projection::default()
        };

        projection.apply(MovementType::Adjustment, -5).expect("write-down");
        assert_eq!(projection.current_stock, 15);

        projection.apply(MovementType::Adjustment, 3).expect("found stock");
        assert_eq!(projection.current_stock, 18);

        let err = projection.apply(MovementType::Adjustment, 0).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidMovement(_)));
    }

    #[test]
    fn non_adjustments_require_positive_quantity() {
        for movement_type in [
            MovementType::Restock,
            MovementType::Sale,
            MovementType::Transfer,
            MovementType::Return,
        ] {
            assert!(matches!(
                validate_quantity(movement_type, 0),
                Err(ServiceError::InvalidMovement(_))
            ));
            assert!(matches!(
                validate_quantity(movement_type, -3),
                Err(ServiceError::InvalidMovement(_))
            ));
            assert!(validate_quantity(movement_type, 1).is_ok());
        }
    }

    #[test]
    fn alert_flags_follow_thresholds() {
        let projection = Projection {
            current_stock: 5,
            minimum_stock: 10,
            maximum_stock: 100,
            ..Projection::default()
        };
        assert!(projection.low_stock());
        assert!(!projection.overstock());

        let projection = Projection {
            current_stock: 150,
            minimum_stock: 10,
            maximum_stock: 100,
            ..Projection::default()
        };
        assert!(projection.overstock());

        // No configured maximum means no overstock alert
        let projection = Projection {
            current_stock: 150,
            ..Projection::default()
        };
        assert!(!projection.overstock());
    }

    #[test]
    fn replay_matches_incremental_application() {
        let sequence = [
            (MovementType::Restock, 50),
            (MovementType::Sale, 12),
            (MovementType::Adjustment, -3),
            (MovementType::Return, 2),
            (MovementType::Transfer, 7),
        ];

        let mut projection = Projection::default();
        let mut history = Vec::new();
        for (movement_type, quantity) in sequence {
            let previous = projection.current_stock;
            projection.apply(movement_type, quantity).expect("valid");
            history.push(movement(movement_type, quantity, previous));
        }

        assert_eq!(replay_stock(&history), i64::from(projection.current_stock));
    }

    #[test]
    fn window_stats_from_sales_only() {
        let history = vec![
            movement(MovementType::Restock, 40, 0),
            movement(MovementType::Sale, 10, 40),
            movement(MovementType::Transfer, 5, 30),
            movement(MovementType::Sale, 5, 25),
        ];
        let stats = window_stats(&history, 20, 30);

        assert_eq!(stats.units_sold, 15);
        assert!((stats.sales_velocity - 0.5).abs() < 1e-9);
        // Average stock across the window is (0 + 20) / 2 = 10
        assert!((stats.turnover_rate - 1.5).abs() < 1e-9);
        assert!((stats.days_of_inventory.expect("velocity > 0") - 40.0).abs() < 1e-9);
    }

    #[test]
    fn window_stats_without_sales() {
        let history = vec![movement(MovementType::Restock, 40, 0)];
        let stats = window_stats(&history, 40, 30);

        assert_eq!(stats.units_sold, 0);
        assert_eq!(stats.sales_velocity, 0.0);
        assert_eq!(stats.turnover_rate, 0.0);
        assert_eq!(stats.days_of_inventory, None);
    }
}
