use crate::{
    config::AnalyticsPolicy,
    db::DbPool,
    entities::product_analytics_snapshot::{self, RiskLevel},
    entities::product_variant,
    entities::promotion::{self, PromotionStatus},
    entities::stock_movement::{self, MovementType},
    entities::stock_position,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use lazy_static::lazy_static;
use prometheus::IntCounter;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

lazy_static! {
    static ref SNAPSHOTS_COMPUTED: IntCounter = IntCounter::new(
        "analytics_snapshots_computed_total",
        "Total number of analytics snapshots computed"
    )
    .expect("metric can be created");
}

/// Catalog-wide distribution points used to normalize per-variant metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CatalogStats {
    pub median_velocity: f64,
    pub margin_top_quartile: f64,
    pub max_turnover: f64,
    pub max_velocity: f64,
}

/// (price - cost) / price, clamped to [0, 1]. A zero price yields 0 rather
/// than a division error.
pub fn profit_margin(unit_price: Decimal, unit_cost: Decimal) -> f64 {
    if unit_price.is_zero() {
        return 0.0;
    }
    let margin = ((unit_price - unit_cost) / unit_price)
        .to_f64()
        .unwrap_or(0.0);
    margin.clamp(0.0, 1.0)
}

/// Stockout risk from days of cover: available stock over daily sales.
/// Zero velocity means nothing is selling, which is low risk, not high.
pub fn risk_level_for(
    available_stock: i32,
    sales_velocity: f64,
    policy: &AnalyticsPolicy,
) -> RiskLevel {
    if sales_velocity <= 0.0 {
        return RiskLevel::Low;
    }
    let cover_days = f64::from(available_stock.max(0)) / sales_velocity;
    if cover_days < policy.high_risk_days {
        RiskLevel::High
    } else if cover_days > policy.low_risk_days {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}

/// Weighted combination of turnover, margin and velocity, each normalized
/// against the catalog maxima. Monotonic in every input.
pub fn performance_score(
    turnover_rate: f64,
    profit_margin: f64,
    sales_velocity: f64,
    stats: &CatalogStats,
    policy: &AnalyticsPolicy,
) -> f64 {
    let normalized = |value: f64, max: f64| {
        if max > 0.0 {
            (value / max).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };
    let weight_sum = policy.turnover_weight + policy.margin_weight + policy.velocity_weight;
    if weight_sum <= 0.0 {
        return 0.0;
    }
    (policy.turnover_weight * normalized(turnover_rate, stats.max_turnover)
        + policy.margin_weight * profit_margin.clamp(0.0, 1.0)
        + policy.velocity_weight * normalized(sales_velocity, stats.max_velocity))
        / weight_sum
}

/// Linear-interpolated percentile of a sample; `p` in [0, 1]. Empty input
/// yields 0.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
    }
}

fn saturate_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Stock on hand across stores at the start of the window: per store the
/// `previous_stock` of its first window movement, falling back to the current
/// level for stores with no movements. `window` must be ordered by
/// `occurred_at` ascending.
fn aggregate_start_stock(
    window: &[stock_movement::Model],
    positions: &[stock_position::Model],
) -> i64 {
    let mut first_by_store: HashMap<Uuid, i32> = HashMap::new();
    for movement in window {
        first_by_store
            .entry(movement.store_id)
            .or_insert(movement.previous_stock);
    }
    positions
        .iter()
        .map(|p| {
            i64::from(
                first_by_store
                    .get(&p.store_id)
                    .copied()
                    .unwrap_or(p.current_stock),
            )
        })
        .sum()
}

/// Derives immutable per-variant analytics snapshots from the ledger,
/// aggregating across stores by summation.
#[derive(Clone)]
pub struct AnalyticsService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    policy: AnalyticsPolicy,
}

impl AnalyticsService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        policy: AnalyticsPolicy,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            policy,
        }
    }

    pub fn policy(&self) -> &AnalyticsPolicy {
        &self.policy
    }

    /// Computes (or returns the existing) snapshot for one variant. Idempotent
    /// per (product, variant, period, analytics date).
    #[instrument(skip(self))]
    pub async fn compute_snapshot(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
        period_days: i32,
        now: DateTime<Utc>,
    ) -> Result<product_analytics_snapshot::Model, ServiceError> {
        if period_days <= 0 {
            return Err(ServiceError::ValidationError(
                "period_days must be positive".to_string(),
            ));
        }
        let stats = self.catalog_stats(period_days, now).await?;
        let variant = self.load_variant(product_id, variant_id).await?;
        self.compute_snapshot_with_stats(&variant, period_days, now, &stats)
            .await
    }

    /// Snapshots for every active variant, the analysis batch input. Catalog
    /// stats are computed once and shared.
    #[instrument(skip(self))]
    pub async fn compute_period_snapshots(
        &self,
        period_days: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<product_analytics_snapshot::Model>, ServiceError> {
        if period_days <= 0 {
            return Err(ServiceError::ValidationError(
                "period_days must be positive".to_string(),
            ));
        }
        let stats = self.catalog_stats(period_days, now).await?;
        let variants = product_variant::Entity::find()
            .filter(product_variant::Column::IsActive.eq(true))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        let snapshots = try_join_all(
            variants
                .iter()
                .map(|variant| self.compute_snapshot_with_stats(variant, period_days, now, &stats)),
        )
        .await?;

        info!(
            count = snapshots.len(),
            period_days, "Computed period snapshots"
        );
        Ok(snapshots)
    }

    /// Distribution points over the active catalog for the trailing window:
    /// median velocity, top-quartile margin boundary and normalization maxima.
    #[instrument(skip(self))]
    pub async fn catalog_stats(
        &self,
        period_days: i32,
        now: DateTime<Utc>,
    ) -> Result<CatalogStats, ServiceError> {
        let db = self.db_pool.as_ref();
        let variants = product_variant::Entity::find()
            .filter(product_variant::Column::IsActive.eq(true))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        if variants.is_empty() {
            return Ok(CatalogStats::default());
        }

        let window_start = now - Duration::days(i64::from(period_days.max(1)));
        let sales = stock_movement::Entity::find()
            .filter(stock_movement::Column::MovementType.eq(MovementType::Sale))
            .filter(stock_movement::Column::DeletedAt.is_null())
            .filter(stock_movement::Column::OccurredAt.gte(window_start))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut sold_by_variant: HashMap<(Uuid, Uuid), i64> = HashMap::new();
        for sale in &sales {
            *sold_by_variant
                .entry((sale.product_id, sale.variant_id))
                .or_default() += i64::from(sale.quantity);
        }

        let velocities: Vec<f64> = variants
            .iter()
            .map(|v| {
                sold_by_variant
                    .get(&(v.product_id, v.id))
                    .copied()
                    .unwrap_or(0) as f64
                    / f64::from(period_days.max(1))
            })
            .collect();
        let margins: Vec<f64> = variants
            .iter()
            .map(|v| profit_margin(v.unit_price, v.unit_cost))
            .collect();

        let positions = stock_position::Entity::find()
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let max_turnover = positions
            .iter()
            .map(|p| p.stock_turnover_rate)
            .fold(0.0, f64::max);
        let max_velocity = velocities.iter().copied().fold(0.0, f64::max);

        Ok(CatalogStats {
            median_velocity: percentile(&velocities, 0.5),
            margin_top_quartile: percentile(&margins, 0.75),
            max_turnover,
            max_velocity,
        })
    }

    /// Promotions whose status and date window make them live at `now`.
    pub async fn active_promotions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<promotion::Model>, ServiceError> {
        promotion::Entity::find()
            .filter(promotion::Column::Status.eq(PromotionStatus::Active))
            .filter(promotion::Column::StartsAt.lte(now))
            .filter(promotion::Column::EndsAt.gte(now))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn load_variant(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
    ) -> Result<product_variant::Model, ServiceError> {
        product_variant::Entity::find_by_id(variant_id)
            .filter(product_variant::Column::ProductId.eq(product_id))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product variant {} not found", variant_id))
            })
    }

    pub(crate) async fn compute_snapshot_with_stats(
        &self,
        variant: &product_variant::Model,
        period_days: i32,
        now: DateTime<Utc>,
        stats: &CatalogStats,
    ) -> Result<product_analytics_snapshot::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let analytics_date = now.date_naive();

        let key_filter = || {
            product_analytics_snapshot::Entity::find()
                .filter(product_analytics_snapshot::Column::ProductId.eq(variant.product_id))
                .filter(product_analytics_snapshot::Column::VariantId.eq(variant.id))
                .filter(product_analytics_snapshot::Column::SalesPeriodDays.eq(period_days))
                .filter(product_analytics_snapshot::Column::AnalyticsDate.eq(analytics_date))
        };

        if let Some(existing) = key_filter()
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            return Ok(existing);
        }

        let positions = stock_position::Entity::find()
            .filter(stock_position::Column::ProductId.eq(variant.product_id))
            .filter(stock_position::Column::VariantId.eq(variant.id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        let current_stock: i64 = positions.iter().map(|p| i64::from(p.current_stock)).sum();
        let available_stock: i64 = positions.iter().map(|p| i64::from(p.available_stock)).sum();
        let minimum_stock: i64 = positions.iter().map(|p| i64::from(p.minimum_stock)).sum();
        let maximum_stock: i64 = positions.iter().map(|p| i64::from(p.maximum_stock)).sum();

        let window_start = now - Duration::days(i64::from(period_days));
        let window = stock_movement::Entity::find()
            .filter(stock_movement::Column::ProductId.eq(variant.product_id))
            .filter(stock_movement::Column::VariantId.eq(variant.id))
            .filter(stock_movement::Column::DeletedAt.is_null())
            .filter(stock_movement::Column::OccurredAt.gte(window_start))
            .order_by_asc(stock_movement::Column::OccurredAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let units_sold: i64 = window
            .iter()
            .filter(|m| m.movement_type == MovementType::Sale)
            .map(|m| i64::from(m.quantity))
            .sum();
        let sales_velocity = units_sold as f64 / f64::from(period_days);

        let start_stock = aggregate_start_stock(&window, &positions);
        let average_stock = (start_stock + current_stock) as f64 / 2.0;
        let stock_turnover_rate = if average_stock > 0.0 {
            units_sold as f64 / average_stock
        } else {
            0.0
        };

        let margin = profit_margin(variant.unit_price, variant.unit_cost);
        let total_revenue = variant.unit_price * Decimal::from(units_sold);
        let total_profit = (variant.unit_price - variant.unit_cost) * Decimal::from(units_sold);

        let promotions = self.active_promotions(now).await?;
        let applicable: Vec<&promotion::Model> = promotions
            .iter()
            .filter(|p| p.applies_to(variant))
            .collect();
        let has_active_promotion = !applicable.is_empty();
        let promotion_discount = applicable.iter().map(|p| p.discount_percent).max();

        let risk_level = risk_level_for(saturate_i32(available_stock), sales_velocity, &self.policy);
        let score = performance_score(
            stock_turnover_rate,
            margin,
            sales_velocity,
            stats,
            &self.policy,
        );

        let snapshot_id = Uuid::new_v4();
        let active = product_analytics_snapshot::ActiveModel {
            id: Set(snapshot_id),
            product_id: Set(variant.product_id),
            variant_id: Set(variant.id),
            sales_velocity: Set(sales_velocity),
            total_sales: Set(saturate_i32(units_sold)),
            sales_period_days: Set(period_days),
            current_stock: Set(saturate_i32(current_stock)),
            available_stock: Set(saturate_i32(available_stock)),
            minimum_stock: Set(saturate_i32(minimum_stock)),
            maximum_stock: Set(saturate_i32(maximum_stock)),
            stock_turnover_rate: Set(stock_turnover_rate),
            unit_cost: Set(variant.unit_cost),
            unit_price: Set(variant.unit_price),
            profit_margin: Set(margin),
            total_revenue: Set(total_revenue),
            total_profit: Set(total_profit),
            has_active_promotion: Set(has_active_promotion),
            promotion_discount: Set(promotion_discount),
            performance_score: Set(score),
            risk_level: Set(risk_level),
            analytics_date: Set(analytics_date),
            created_at: Set(now),
        };

        let inserted = product_analytics_snapshot::Entity::insert(active)
            .on_conflict(
                OnConflict::columns([
                    product_analytics_snapshot::Column::ProductId,
                    product_analytics_snapshot::Column::VariantId,
                    product_analytics_snapshot::Column::SalesPeriodDays,
                    product_analytics_snapshot::Column::AnalyticsDate,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(db)
            .await;
        match inserted {
            Ok(_) => {}
            // A concurrent writer for the same key won the race; fall through
            // to the re-select.
            Err(DbErr::RecordNotInserted) => {}
            Err(e) => return Err(ServiceError::DatabaseError(e)),
        }

        let snapshot = key_filter()
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::InternalError("snapshot missing after insert".to_string())
            })?;

        if snapshot.id == snapshot_id {
            SNAPSHOTS_COMPUTED.inc();
            info!(
                snapshot_id = %snapshot.id,
                product_id = %snapshot.product_id,
                variant_id = %snapshot.variant_id,
                sales_velocity = snapshot.sales_velocity,
                risk_level = ?snapshot.risk_level,
                "Analytics snapshot computed"
            );
            self.event_sender
                .send(Event::SnapshotComputed {
                    snapshot_id: snapshot.id,
                    product_id: snapshot.product_id,
                    variant_id: snapshot.variant_id,
                })
                .await
                .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))?;
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn margin_clamps_to_unit_interval() {
        assert_eq!(profit_margin(dec!(0), dec!(10)), 0.0);
        assert_eq!(profit_margin(dec!(50), dec!(80)), 0.0);
        assert!((profit_margin(dec!(100), dec!(60)) - 0.4).abs() < 1e-9);
        // A negative cost cannot push the margin past 1
        assert_eq!(profit_margin(dec!(100), dec!(-10)), 1.0);
    }

    #[test]
    fn risk_bands_follow_days_of_cover() {
        let policy = AnalyticsPolicy::default();

        assert_eq!(risk_level_for(0, 0.0, &policy), RiskLevel::Low);
        // 15 units at 10/day is 1.5 days of cover
        assert_eq!(risk_level_for(15, 10.0, &policy), RiskLevel::High);
        assert_eq!(risk_level_for(100, 10.0, &policy), RiskLevel::Medium);
        assert_eq!(risk_level_for(400, 10.0, &policy), RiskLevel::Low);
        assert_eq!(risk_level_for(-5, 10.0, &policy), RiskLevel::High);
    }

    #[test]
    fn performance_score_is_monotonic() {
        let policy = AnalyticsPolicy::default();
        let stats = CatalogStats {
            median_velocity: 5.0,
            margin_top_quartile: 0.5,
            max_turnover: 4.0,
            max_velocity: 20.0,
        };

        let base = performance_score(1.0, 0.3, 5.0, &stats, &policy);
        assert!(performance_score(2.0, 0.3, 5.0, &stats, &policy) >= base);
        assert!(performance_score(1.0, 0.5, 5.0, &stats, &policy) >= base);
        assert!(performance_score(1.0, 0.3, 10.0, &stats, &policy) >= base);
        assert!(base > 0.0 && base <= 1.0);
    }

    #[test]
    fn performance_score_with_empty_catalog() {
        let policy = AnalyticsPolicy::default();
        let stats = CatalogStats::default();

        let score = performance_score(3.0, 0.5, 12.0, &stats, &policy);
        let expected = policy.margin_weight * 0.5
            / (policy.turnover_weight + policy.margin_weight + policy.velocity_weight);
        assert!((score - expected).abs() < 1e-9);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [3.0, 1.0, 4.0, 2.0];
        assert!((percentile(&values, 0.5) - 2.5).abs() < 1e-9);
        assert!((percentile(&values, 0.75) - 3.25).abs() < 1e-9);
        assert_eq!(percentile(&[], 0.5), 0.0);
        assert_eq!(percentile(&[7.0], 0.9), 7.0);
    }

    #[test]
    fn start_stock_prefers_first_window_movement() {
        let store_a = Uuid::new_v4();
        let store_b = Uuid::new_v4();
        let product = Uuid::new_v4();
        let variant = Uuid::new_v4();

        let movement = stock_movement::Model {
            id: Uuid::new_v4(),
            store_id: store_a,
            product_id: product,
            variant_id: variant,
            movement_type: MovementType::Sale,
            quantity: 3,
            previous_stock: 5,
            new_stock: 2,
            reference_id: None,
            reference_type: None,
            occurred_at: Utc::now(),
            deleted_at: None,
            created_at: Utc::now(),
        };
        let position = |store_id: Uuid, current: i32| stock_position::Model {
            id: Uuid::new_v4(),
            store_id,
            product_id: product,
            variant_id: variant,
            current_stock: current,
            minimum_stock: 0,
            maximum_stock: 0,
            reserved_stock: 0,
            available_stock: current,
            stock_turnover_rate: 0.0,
            days_of_inventory: None,
            low_stock_alert: false,
            overstock_alert: false,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let positions = vec![position(store_a, 2), position(store_b, 7)];
        assert_eq!(aggregate_start_stock(&[movement], &positions), 12);
        assert_eq!(aggregate_start_stock(&[], &positions), 9);
    }
}
