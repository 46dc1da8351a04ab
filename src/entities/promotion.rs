use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "paused")]
    Paused,
    #[sea_orm(string_value = "expired")]
    Expired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum PromotionType {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed_amount")]
    FixedAmount,
}

/// Supplier or marketing promotion, maintained by the promotions service and
/// read here to scope restock classification. A promotion targets variants
/// through any combination of its optional supplier, product, variant and
/// brand links.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "promotions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub promotion_type: PromotionType,
    #[sea_orm(column_type = "Decimal(Some((5, 2)))")]
    pub discount_percent: Decimal,
    pub supplier_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub brand: Option<String>,
    pub status: PromotionStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether the promotion is running at the given instant.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PromotionStatus::Active && self.starts_at <= now && now <= self.ends_at
    }

    /// Whether the promotion targets the given variant via any of its links.
    /// A promotion with no links at all targets nothing.
    pub fn applies_to(&self, variant: &super::product_variant::Model) -> bool {
        let supplier_match = match self.supplier_id {
            Some(supplier_id) => variant.supplier_id == Some(supplier_id),
            None => false,
        };
        let brand_match = match (&self.brand, &variant.brand) {
            (Some(promo_brand), Some(variant_brand)) => {
                promo_brand.eq_ignore_ascii_case(variant_brand)
            }
            _ => false,
        };

        self.variant_id == Some(variant.id)
            || self.product_id == Some(variant.product_id)
            || supplier_match
            || brand_match
    }
}
