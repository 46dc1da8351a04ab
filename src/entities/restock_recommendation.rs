use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    #[sea_orm(string_value = "fast_moving_low_stock")]
    FastMovingLowStock,
    #[sea_orm(string_value = "slow_moving_high_stock")]
    SlowMovingHighStock,
    #[sea_orm(string_value = "high_profit_potential")]
    HighProfitPotential,
    #[sea_orm(string_value = "supplier_promotions")]
    SupplierPromotions,
    #[sea_orm(string_value = "regular_restock")]
    RegularRestock,
}

impl RecommendationCategory {
    pub const ALL: [RecommendationCategory; 5] = [
        RecommendationCategory::FastMovingLowStock,
        RecommendationCategory::SlowMovingHighStock,
        RecommendationCategory::HighProfitPotential,
        RecommendationCategory::SupplierPromotions,
        RecommendationCategory::RegularRestock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationCategory::FastMovingLowStock => "fast_moving_low_stock",
            RecommendationCategory::SlowMovingHighStock => "slow_moving_high_stock",
            RecommendationCategory::HighProfitPotential => "high_profit_potential",
            RecommendationCategory::SupplierPromotions => "supplier_promotions",
            RecommendationCategory::RegularRestock => "regular_restock",
        }
    }
}

/// One prioritized restock suggestion, owned by its analysis. The full batch
/// for an analysis is written atomically when the run completes; afterwards
/// only `is_implemented` may change.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "restock_recommendations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub ai_analysis_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub category: RecommendationCategory,
    /// 1 (lowest) to 100 (most urgent)
    pub priority_score: i32,
    pub recommended_quantity: i32,
    #[sea_orm(column_type = "Text")]
    pub reasoning: String,
    pub confidence_level: f64,
    pub current_stock: i32,
    pub current_sales_velocity: f64,
    pub current_profit_margin: f64,
    pub has_active_promotion: bool,
    pub is_implemented: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::ai_analysis::Entity",
        from = "Column::AiAnalysisId",
        to = "super::ai_analysis::Column::Id"
    )]
    AiAnalysis,
}

impl Related<super::ai_analysis::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AiAnalysis.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
