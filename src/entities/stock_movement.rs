use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    #[sea_orm(string_value = "restock")]
    Restock,
    #[sea_orm(string_value = "sale")]
    Sale,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    #[sea_orm(string_value = "transfer")]
    Transfer,
    #[sea_orm(string_value = "return")]
    Return,
}

impl MovementType {
    /// Signed stock delta this movement applies for the given quantity.
    /// Restocks and returns add stock, sales and transfers remove it, and
    /// adjustments carry their own sign.
    pub fn signed_delta(&self, quantity: i32) -> i32 {
        match self {
            MovementType::Restock | MovementType::Return => quantity,
            MovementType::Sale | MovementType::Transfer => -quantity,
            MovementType::Adjustment => quantity,
        }
    }

    /// Adjustments are the only movement type recorded with a signed quantity.
    pub fn allows_signed_quantity(&self) -> bool {
        matches!(self, MovementType::Adjustment)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Restock => "restock",
            MovementType::Sale => "sale",
            MovementType::Adjustment => "adjustment",
            MovementType::Transfer => "transfer",
            MovementType::Return => "return",
        }
    }
}

/// One append-only entry in the stock ledger. Rows are never updated after
/// insert; voiding sets `deleted_at` and the row stops counting toward
/// projections.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub previous_stock: i32,
    pub new_stock: i32,
    pub reference_id: Option<Uuid>,
    pub reference_type: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
