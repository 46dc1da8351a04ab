use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl AnalysisStatus {
    /// Completed and failed analyses never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

/// One restock analysis run. At most one non-failed row exists per
/// (restock_order_id, period_days, analytics_date); repeated requests for the
/// same key return the existing row instead of starting a second run.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ai_analyses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub restock_order_id: Uuid,
    pub period_days: i32,
    pub analytics_date: NaiveDate,
    /// Serialized batch sent to the classifier, kept for audit
    #[sea_orm(column_type = "Json")]
    pub request_data: Json,
    /// Model that produced the stored classification, "none" when the run
    /// fell back to deterministic rules
    pub ai_model: String,
    #[sea_orm(column_type = "Json", nullable)]
    pub ai_response: Option<Json>,
    pub analysis_summary: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub recommended_products: Json,
    #[sea_orm(column_type = "Json")]
    pub priority_scores: Json,
    pub status: AnalysisStatus,
    pub confidence_score: Option<f64>,
    pub processed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::restock_recommendation::Entity")]
    RestockRecommendation,
}

impl Related<super::restock_recommendation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RestockRecommendation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(AnalysisStatus::Completed.is_terminal());
        assert!(AnalysisStatus::Failed.is_terminal());
        assert!(!AnalysisStatus::Pending.is_terminal());
        assert!(!AnalysisStatus::Processing.is_terminal());
    }
}
