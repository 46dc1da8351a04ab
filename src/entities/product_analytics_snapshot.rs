use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[sea_orm(string_value = "low")]
    Low,
    #[sea_orm(string_value = "medium")]
    Medium,
    #[sea_orm(string_value = "high")]
    High,
}

/// Immutable per-variant analytics for one sales period. Snapshots are keyed
/// by (product, variant, period, analytics_date); recomputing for the same
/// key returns the existing row, later dates supersede earlier ones.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_analytics_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    /// Units sold per day over the sales period
    pub sales_velocity: f64,
    pub total_sales: i32,
    pub sales_period_days: i32,
    pub current_stock: i32,
    /// current_stock minus reservations, summed across stores
    pub available_stock: i32,
    pub minimum_stock: i32,
    pub maximum_stock: i32,
    pub stock_turnover_rate: f64,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_price: Decimal,
    /// (price - cost) / price, clamped to [0, 1]
    pub profit_margin: f64,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_revenue: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_profit: Decimal,
    pub has_active_promotion: bool,
    #[sea_orm(column_type = "Decimal(Some((5, 2)))")]
    pub promotion_discount: Option<Decimal>,
    pub performance_score: f64,
    pub risk_level: RiskLevel,
    pub analytics_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
