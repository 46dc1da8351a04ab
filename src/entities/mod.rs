pub mod ai_analysis;
pub mod product_analytics_snapshot;
pub mod product_variant;
pub mod promotion;
pub mod restock_recommendation;
pub mod stock_movement;
pub mod stock_position;

pub use ai_analysis::AnalysisStatus;
pub use product_analytics_snapshot::RiskLevel;
pub use promotion::{PromotionStatus, PromotionType};
pub use restock_recommendation::RecommendationCategory;
pub use stock_movement::MovementType;
