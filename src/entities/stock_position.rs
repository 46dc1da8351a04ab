use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current projection of the ledger for one (store, product, variant) key.
///
/// `current_stock` always equals the `new_stock` of the latest surviving
/// movement for the key, `available_stock` is `current_stock` minus
/// `reserved_stock` and never goes negative. Only the ledger service writes
/// this table; `version` increments on every write for optimistic locking.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_positions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub current_stock: i32,
    pub minimum_stock: i32,
    pub maximum_stock: i32,
    pub reserved_stock: i32,
    pub available_stock: i32,
    pub stock_turnover_rate: f64,
    pub days_of_inventory: Option<f64>,
    pub low_stock_alert: bool,
    pub overstock_alert: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
