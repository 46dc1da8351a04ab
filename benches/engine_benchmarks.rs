use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use restock_engine::config::AnalyticsPolicy;
use restock_engine::entities::product_analytics_snapshot::{Model as Snapshot, RiskLevel};
use restock_engine::entities::stock_movement::{self, MovementType};
use restock_engine::services::analytics::CatalogStats;
use restock_engine::services::classification::classify;
use restock_engine::services::stock_ledger::{replay_stock, Projection};
use rust_decimal::Decimal;
use uuid::Uuid;

fn movement_mix(index: usize) -> (MovementType, i32) {
    if index % 3 == 0 {
        (MovementType::Restock, 40)
    } else {
        (MovementType::Sale, 10)
    }
}

fn ledger_history(len: usize) -> Vec<stock_movement::Model> {
    let mut projection = Projection::default();
    let now = Utc::now();
    let store_id = Uuid::new_v4();
    let product_id = Uuid::new_v4();
    let variant_id = Uuid::new_v4();

    (0..len)
        .map(|i| {
            let (movement_type, quantity) = movement_mix(i);
            let (previous_stock, new_stock) = projection
                .apply(movement_type, quantity)
                .expect("valid movement");
            stock_movement::Model {
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
            }
        })
        .collect()
}

fn snapshot(index: usize) -> Snapshot {
    let now = Utc::now();
    let velocity = (index % 25) as f64;
    Snapshot {
        id: Uuid::new_v4(),
        product_id: Uuid::new_v4(),
        variant_id: Uuid::new_v4(),
        sales_velocity: velocity,
        total_sales: (velocity * 30.0) as i32,
        sales_period_days: 30,
        current_stock: (index % 400) as i32,
        available_stock: ((index % 300) as i32).min((index % 400) as i32),
        minimum_stock: 20,
        maximum_stock: if index % 4 == 0 { 0 } else { 250 },
        stock_turnover_rate: velocity / 5.0,
        unit_cost: Decimal::from(4),
        unit_price: Decimal::from(10),
        profit_margin: 0.6,
        total_revenue: Decimal::ZERO,
        total_profit: Decimal::ZERO,
        has_active_promotion: index % 7 == 0,
        promotion_discount: (index % 7 == 0).then(|| Decimal::from(15)),
        performance_score: 0.5,
        risk_level: if index % 5 == 0 {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        },
        analytics_date: now.date_naive(),
        created_at: now,
    }
}

// Benchmark for applying movements through the position projection
fn movement_application_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement_application");

    for size in [100usize, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut projection = Projection::default();
                for i in 0..size {
                    let (movement_type, quantity) = movement_mix(i);
                    let applied = projection
                        .apply(black_box(movement_type), black_box(quantity))
                        .expect("valid movement");
                    black_box(applied);
                }
                projection.current_stock
            });
        });
    }

    group.finish();
}

// Benchmark for replaying a full movement history, the void/rebuild path
fn ledger_replay_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_replay");

    for size in [100usize, 1_000, 10_000].iter() {
        let history = ledger_history(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &history, |b, history| {
            b.iter(|| replay_stock(black_box(history)));
        });
    }

    group.finish();
}

// Benchmark for classifying a catalog of snapshots
fn classification_benchmark(c: &mut Criterion) {
    let snapshots: Vec<Snapshot> = (0..500).map(snapshot).collect();
    let stats = CatalogStats {
        median_velocity: 8.0,
        margin_top_quartile: 0.55,
        max_turnover: 6.0,
        max_velocity: 24.0,
    };
    let policy = AnalyticsPolicy::default();

    c.bench_function("classify_catalog_500", |b| {
        b.iter(|| {
            snapshots
                .iter()
                .map(|snapshot| classify(black_box(snapshot), &stats, &policy).priority_score)
                .sum::<i32>()
        });
    });
}

criterion_group!(
    benches,
    movement_application_benchmark,
    ledger_replay_benchmark,
    classification_benchmark
);
criterion_main!(benches);
