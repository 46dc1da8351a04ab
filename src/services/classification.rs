use crate::{
    config::AnalyticsPolicy,
    entities::product_analytics_snapshot::{Model as Snapshot, RiskLevel},
    entities::restock_recommendation::RecommendationCategory,
    services::analytics::CatalogStats,
};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

// Priority bands per category. Within a band the score grows with how far
// the trigger exceeds its threshold, saturating below base + span.
const FAST_MOVING_BASE: i32 = 75;
const FAST_MOVING_SPAN: i32 = 24;
const PROMOTION_BASE: i32 = 70;
const PROMOTION_SPAN: i32 = 25;
const HIGH_PROFIT_BASE: i32 = 55;
const HIGH_PROFIT_SPAN: i32 = 30;
const REGULAR_BASE: i32 = 30;
const REGULAR_SPAN: i32 = 30;
const SLOW_MOVING_BASE: i32 = 20;
const SLOW_MOVING_SPAN: i32 = 25;

/// Deterministic restock classification for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: RecommendationCategory,
    pub priority_score: i32,
    pub recommended_quantity: i32,
    pub reasoning: String,
}

fn saturating_priority(base: i32, span: i32, excess: f64) -> i32 {
    let ratio = excess.max(0.0);
    let scaled = f64::from(base) + f64::from(span) * (ratio / (1.0 + ratio));
    (scaled.round() as i32).clamp(1, 100)
}

/// Refill target: the larger of twice the minimum threshold and the expected
/// sales over the restock horizon, less what is already on hand. Never
/// negative.
pub fn recommended_quantity(snapshot: &Snapshot, policy: &AnalyticsPolicy) -> i32 {
    let horizon_demand = (snapshot.sales_velocity * policy.restock_horizon_days).ceil() as i64;
    let target = (i64::from(snapshot.minimum_stock) * 2).max(horizon_demand);
    (target - i64::from(snapshot.current_stock)).clamp(0, i64::from(i32::MAX)) as i32
}

/// Ordered decision list, first match wins, so every snapshot lands in
/// exactly one category:
/// 1. applicable active promotion
/// 2. high stockout risk while selling above the catalog median
/// 3. over the maximum threshold while selling below the catalog median
/// 4. top-quartile margin with thin available cover
/// 5. regular restock
pub fn classify(
    snapshot: &Snapshot,
    stats: &CatalogStats,
    policy: &AnalyticsPolicy,
) -> Classification {
    let quantity = recommended_quantity(snapshot, policy);

    if snapshot.has_active_promotion {
        let discount = snapshot
            .promotion_discount
            .and_then(|d| d.to_f64())
            .unwrap_or(0.0);
        return Classification {
            category: RecommendationCategory::SupplierPromotions,
            priority_score: saturating_priority(PROMOTION_BASE, PROMOTION_SPAN, discount / 20.0),
            recommended_quantity: quantity,
            reasoning: format!(
                "Active supplier promotion ({:.0}% off) while selling {:.1} units/day",
                discount, snapshot.sales_velocity
            ),
        };
    }

    if snapshot.risk_level == RiskLevel::High && snapshot.sales_velocity > stats.median_velocity {
        let excess = if stats.median_velocity > 0.0 {
            snapshot.sales_velocity / stats.median_velocity - 1.0
        } else {
            snapshot.sales_velocity
        };
        let cover_days = if snapshot.sales_velocity > 0.0 {
            f64::from(snapshot.available_stock.max(0)) / snapshot.sales_velocity
        } else {
            0.0
        };
        return Classification {
            category: RecommendationCategory::FastMovingLowStock,
            priority_score: saturating_priority(FAST_MOVING_BASE, FAST_MOVING_SPAN, excess),
            recommended_quantity: quantity,
            reasoning: format!(
                "Selling {:.1} units/day against the catalog median of {:.1} with only {:.1} days of cover",
                snapshot.sales_velocity, stats.median_velocity, cover_days
            ),
        };
    }

    if snapshot.maximum_stock > 0
        && snapshot.current_stock > snapshot.maximum_stock
        && snapshot.sales_velocity < stats.median_velocity
    {
        let excess = f64::from(snapshot.current_stock) / f64::from(snapshot.maximum_stock) - 1.0;
        return Classification {
            category: RecommendationCategory::SlowMovingHighStock,
            priority_score: saturating_priority(SLOW_MOVING_BASE, SLOW_MOVING_SPAN, excess),
            recommended_quantity: quantity,
            reasoning: format!(
                "Overstocked at {} units against a maximum of {} while selling {:.1} units/day",
                snapshot.current_stock, snapshot.maximum_stock, snapshot.sales_velocity
            ),
        };
    }

    if stats.margin_top_quartile > 0.0
        && snapshot.profit_margin >= stats.margin_top_quartile
        && i64::from(snapshot.available_stock) < i64::from(snapshot.minimum_stock) * 2
    {
        let excess = if stats.margin_top_quartile < 1.0 {
            (snapshot.profit_margin - stats.margin_top_quartile)
                / (1.0 - stats.margin_top_quartile)
        } else {
            0.0
        };
        return Classification {
            category: RecommendationCategory::HighProfitPotential,
            priority_score: saturating_priority(HIGH_PROFIT_BASE, HIGH_PROFIT_SPAN, excess),
            recommended_quantity: quantity,
            reasoning: format!(
                "Margin {:.0}% sits in the catalog top quartile with {} available against a minimum of {}",
                snapshot.profit_margin * 100.0,
                snapshot.available_stock,
                snapshot.minimum_stock
            ),
        };
    }

    let shortfall = if snapshot.minimum_stock > 0 && snapshot.current_stock < snapshot.minimum_stock
    {
        f64::from(snapshot.minimum_stock - snapshot.current_stock)
            / f64::from(snapshot.minimum_stock)
    } else {
        0.0
    };
    Classification {
        category: RecommendationCategory::RegularRestock,
        priority_score: saturating_priority(REGULAR_BASE, REGULAR_SPAN, shortfall),
        recommended_quantity: quantity,
        reasoning: format!(
            "Routine replenishment: {} on hand against a minimum of {}",
            snapshot.current_stock, snapshot.minimum_stock
        ),
    }
}
