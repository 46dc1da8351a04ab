//! Property-based tests for the pure ledger and classification cores.
//!
//! These use proptest to drive the projection arithmetic, replay
//! equivalence and the classifier across generated inputs, catching edge
//! cases the unit tests miss.

use chrono::Utc;
use proptest::prelude::*;
use restock_engine::config::AnalyticsPolicy;
use restock_engine::entities::product_analytics_snapshot::{Model as Snapshot, RiskLevel};
use restock_engine::entities::restock_recommendation::RecommendationCategory;
use restock_engine::entities::stock_movement::{self, MovementType};
use restock_engine::services::ai_augmentation::{
    merge, AiRecommendationItem, AiRecommendationSets, AiResponse, BaselineItem,
};
use restock_engine::services::analytics::{
    percentile, performance_score, profit_margin, risk_level_for, CatalogStats,
};
use restock_engine::services::classification::{classify, recommended_quantity, Classification};
use restock_engine::services::stock_ledger::{replay_stock, validate_quantity, Projection};
use rust_decimal::Decimal;
use uuid::Uuid;

// Strategies for generating test data

fn movement_type_strategy() -> impl Strategy<Value = MovementType> {
    prop_oneof![
        Just(MovementType::Restock),
        Just(MovementType::Sale),
        Just(MovementType::Adjustment),
        Just(MovementType::Transfer),
        Just(MovementType::Return),
    ]
}

fn quantity_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![1i32..5_000, -5_000i32..0]
}

fn movement_sequence_strategy() -> impl Strategy<Value = Vec<(MovementType, i32)>> {
    prop::collection::vec((movement_type_strategy(), quantity_strategy()), 0..40)
}

fn category_strategy() -> impl Strategy<Value = RecommendationCategory> {
    prop_oneof![
        Just(RecommendationCategory::FastMovingLowStock),
        Just(RecommendationCategory::SlowMovingHighStock),
        Just(RecommendationCategory::HighProfitPotential),
        Just(RecommendationCategory::SupplierPromotions),
        Just(RecommendationCategory::RegularRestock),
    ]
}

fn stats_strategy() -> impl Strategy<Value = CatalogStats> {
    (0.0f64..100.0, 0.0f64..=1.0, 0.0f64..20.0, 0.0f64..200.0).prop_map(
        |(median_velocity, margin_top_quartile, max_turnover, max_velocity)| CatalogStats {
            median_velocity,
            margin_top_quartile,
            max_turnover,
            max_velocity,
        },
    )
}

#[allow(clippy::too_many_arguments)]
fn make_snapshot(
    sales_velocity: f64,
    current_stock: i32,
    available_stock: i32,
    minimum_stock: i32,
    maximum_stock: i32,
    stock_turnover_rate: f64,
    profit_margin: f64,
    has_active_promotion: bool,
    promotion_discount: Option<Decimal>,
    risk_level: RiskLevel,
) -> Snapshot {
    let now = Utc::now();
    Snapshot {
        id: Uuid::new_v4(),
        product_id: Uuid::new_v4(),
        variant_id: Uuid::new_v4(),
        sales_velocity,
        total_sales: 0,
        sales_period_days: 30,
        current_stock,
        available_stock,
        minimum_stock,
        maximum_stock,
        stock_turnover_rate,
        unit_cost: Decimal::from(4),
        unit_price: Decimal::from(10),
        profit_margin,
        total_revenue: Decimal::ZERO,
        total_profit: Decimal::ZERO,
        has_active_promotion,
        promotion_discount,
        performance_score: 0.5,
        risk_level,
        analytics_date: now.date_naive(),
        created_at: now,
    }
}

fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    (
        0.0f64..200.0,
        0i32..5_000,
        0i32..5_000,
        0i32..1_000,
        0i32..10_000,
        0.0f64..20.0,
        0.0f64..=1.0,
        any::<bool>(),
        0u32..90,
        0u8..3,
    )
        .prop_map(
            |(
                velocity,
                current,
                available_seed,
                minimum,
                maximum,
                turnover,
                margin,
                promo,
                discount,
                risk_pick,
            )| {
                let risk = match risk_pick {
                    0 => RiskLevel::Low,
                    1 => RiskLevel::Medium,
                    _ => RiskLevel::High,
                };
                make_snapshot(
                    velocity,
                    current,
                    available_seed.min(current),
                    minimum,
                    maximum,
                    turnover,
                    margin,
                    promo,
                    promo.then(|| Decimal::from(discount)),
                    risk,
                )
            },
        )
}

fn severity(level: RiskLevel) -> u8 {
    match level {
        RiskLevel::Low => 0,
        RiskLevel::Medium => 1,
        RiskLevel::High => 2,
    }
}

// Property: replaying the accepted movements reproduces the incremental
// projection exactly, which is what makes voids safe to rebuild from.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn replay_matches_incremental_projection(sequence in movement_sequence_strategy()) {
        let mut projection = Projection::default();
        let mut accepted = Vec::new();
        let now = Utc::now();
        let store_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();
        let variant_id = Uuid::new_v4();

        for (movement_type, quantity) in sequence {
            if let Ok((previous_stock, new_stock)) = projection.apply(movement_type, quantity) {
                accepted.push(stock_movement::Model {
                    id: Uuid::new_v4(),
                    store_id,
                    product_id,
                    variant_id,
                    movement_type,
                    quantity,
                    previous_stock,
                    new_stock,
                    reference_id: None,
                    reference_type: None,
                    occurred_at: now,
                    deleted_at: None,
                    created_at: now,
                });
            }
        }

        prop_assert_eq!(replay_stock(&accepted), i64::from(projection.current_stock));
        prop_assert!(projection.current_stock >= 0);
    }

    #[test]
    fn accepted_movements_never_breach_reservations(
        reserved in 0i32..500,
        sequence in movement_sequence_strategy(),
    ) {
        let mut projection = Projection {
            current_stock: reserved,
            reserved_stock: reserved,
            minimum_stock: 0,
            maximum_stock: 0,
        };

        for (movement_type, quantity) in sequence {
            let before = projection.current_stock;
            match projection.apply(movement_type, quantity) {
                Ok((previous_stock, new_stock)) => {
                    prop_assert_eq!(previous_stock, before);
                    prop_assert_eq!(new_stock, projection.current_stock);
                    prop_assert!(new_stock >= projection.reserved_stock);
                }
                Err(_) => prop_assert_eq!(projection.current_stock, before),
            }
        }
    }

    #[test]
    fn quantity_rules_follow_the_movement_type(
        movement_type in movement_type_strategy(),
        quantity in -5_000i32..5_000,
    ) {
        let accepted = validate_quantity(movement_type, quantity).is_ok();
        if movement_type == MovementType::Adjustment {
            prop_assert_eq!(accepted, quantity != 0);
        } else {
            prop_assert_eq!(accepted, quantity > 0);
        }
    }
}

// Property: every snapshot lands in exactly one category with a bounded
// priority and a non-negative order size.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn classification_is_total_and_bounded(
        snapshot in snapshot_strategy(),
        stats in stats_strategy(),
    ) {
        let policy = AnalyticsPolicy::default();
        let classification = classify(&snapshot, &stats, &policy);
        prop_assert!((1..=100).contains(&classification.priority_score));
        prop_assert!(classification.recommended_quantity >= 0);
        prop_assert!(!classification.reasoning.is_empty());
    }

    #[test]
    fn promotions_always_win_the_decision_list(
        snapshot in snapshot_strategy(),
        stats in stats_strategy(),
    ) {
        let mut snapshot = snapshot;
        snapshot.has_active_promotion = true;
        let classification = classify(&snapshot, &stats, &AnalyticsPolicy::default());
        prop_assert_eq!(
            classification.category,
            RecommendationCategory::SupplierPromotions
        );
    }

    #[test]
    fn restock_quantity_reaches_the_larger_target(snapshot in snapshot_strategy()) {
        let policy = AnalyticsPolicy::default();
        let quantity = recommended_quantity(&snapshot, &policy);
        prop_assert!(quantity >= 0);

        if quantity > 0 {
            let final_stock = i64::from(snapshot.current_stock) + i64::from(quantity);
            let horizon_demand =
                (snapshot.sales_velocity * policy.restock_horizon_days).ceil() as i64;
            prop_assert!(final_stock >= i64::from(snapshot.minimum_stock) * 2);
            prop_assert!(final_stock >= horizon_demand);
        }
    }
}

// Property: analytics scoring stays inside its documented ranges.
proptest! {
    #[test]
    fn profit_margin_is_a_unit_interval(price in 0i64..100_000, cost in 0i64..100_000) {
        let margin = profit_margin(
            Decimal::from(price) / Decimal::from(100),
            Decimal::from(cost) / Decimal::from(100),
        );
        prop_assert!((0.0..=1.0).contains(&margin));
    }

    #[test]
    fn performance_score_stays_normalized(
        turnover in 0.0f64..50.0,
        margin in 0.0f64..=1.0,
        velocity in 0.0f64..500.0,
        stats in stats_strategy(),
    ) {
        let score = performance_score(turnover, margin, velocity, &stats, &AnalyticsPolicy::default());
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn zero_velocity_is_always_low_risk(available in 0i32..10_000) {
        let policy = AnalyticsPolicy::default();
        prop_assert_eq!(risk_level_for(available, 0.0, &policy), RiskLevel::Low);
    }

    #[test]
    fn risk_never_worsens_with_more_cover(
        available in 0i32..10_000,
        extra in 0i32..10_000,
        velocity in 0.0f64..500.0,
    ) {
        let policy = AnalyticsPolicy::default();
        let tighter = risk_level_for(available, velocity, &policy);
        let looser = risk_level_for(available + extra, velocity, &policy);
        prop_assert!(severity(looser) <= severity(tighter));
    }

    #[test]
    fn percentile_stays_within_observed_range(
        values in prop::collection::vec(0.0f64..1_000.0, 1..50),
        p in 0.0f64..=1.0,
    ) {
        let result = percentile(&values, p);
        let mut sorted = values;
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
        prop_assert!(result >= sorted[0]);
        prop_assert!(result <= sorted[sorted.len() - 1]);
    }
}

// Property: the AI merge never invents rows, never loses rows, and only
// overrides on a confident disagreement.
proptest! {
    #[test]
    fn merge_without_ai_keeps_the_baseline(
        category in category_strategy(),
        priority in 1i32..=100,
        quantity in 0i32..10_000,
    ) {
        let baseline = vec![BaselineItem {
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            classification: Classification {
                category,
                priority_score: priority,
                recommended_quantity: quantity,
                reasoning: "decision list".to_string(),
            },
        }];

        let merged = merge(&baseline, None, 0.6);
        prop_assert_eq!(merged.len(), 1);
        prop_assert_eq!(merged[0].category, category);
        prop_assert_eq!(merged[0].priority_score, priority);
        prop_assert!(!merged[0].ai_override);
        prop_assert_eq!(merged[0].confidence_level, 1.0);
    }

    #[test]
    fn overrides_require_disagreement_and_confidence(
        base_category in category_strategy(),
        ai_category in category_strategy(),
        confidence in 0.0f64..=1.0,
        threshold in 0.0f64..=1.0,
    ) {
        let product_id = Uuid::new_v4();
        let variant_id = Uuid::new_v4();
        let baseline = vec![BaselineItem {
            product_id,
            variant_id,
            classification: Classification {
                category: base_category,
                priority_score: 40,
                recommended_quantity: 10,
                reasoning: "decision list".to_string(),
            },
        }];

        let item = AiRecommendationItem {
            product_id,
            variant_id,
            confidence_level: Some(confidence),
            reasoning: Some("model view".to_string()),
            priority_score: Some(77),
            recommended_quantity: Some(25),
        };
        let mut sets = AiRecommendationSets::default();
        match ai_category {
            RecommendationCategory::FastMovingLowStock => sets.fast_moving_low_stock.push(item),
            RecommendationCategory::SlowMovingHighStock => sets.slow_moving_high_stock.push(item),
            RecommendationCategory::HighProfitPotential => sets.high_profit_potential.push(item),
            RecommendationCategory::SupplierPromotions => sets.supplier_promotions.push(item),
            RecommendationCategory::RegularRestock => sets.regular_restock.push(item),
        }
        let response = AiResponse {
            analysis_summary: "batch summary".to_string(),
            recommendations: sets,
            overall_confidence: 0.5,
        };

        let merged = merge(&baseline, Some(&response), threshold);
        prop_assert_eq!(merged.len(), 1);

        let expect_override = ai_category != base_category && confidence >= threshold;
        prop_assert_eq!(merged[0].ai_override, expect_override);
        let expected_category = if expect_override { ai_category } else { base_category };
        prop_assert_eq!(merged[0].category, expected_category);
        prop_assert!((0.0..=1.0).contains(&merged[0].confidence_level));
    }
}
